//! Host peers
//!
//! A peer is the host-side twin of a wrapped script object. Host code
//! holds peers through [`PeerHandle`] clones; when the last clone drops,
//! the script twin's pin is handed to the isolate's posted-work queue,
//! so no isolate lock is taken on the dropping thread.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tether_engine::ObjectId;

use crate::wrapper::{Wrapper, WrapperCore};

/// Host-side state carried by a bridged object
///
/// Peers are shared across threads behind [`PeerHandle`], so mutable
/// peer state lives behind interior mutability.
pub trait HostObject: Any + Send + Sync {
    /// Upcast for concrete-type recovery
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct PeerInner {
    object: Box<dyn HostObject>,
    wrapper: Arc<WrapperCore>,
}

impl PeerInner {
    pub(crate) fn new(object: Box<dyn HostObject>, wrapper: Arc<WrapperCore>) -> Arc<Self> {
        Arc::new(Self { object, wrapper })
    }
}

impl Drop for PeerInner {
    fn drop(&mut self) {
        let dropped: *const PeerInner = self;
        self.wrapper.on_peer_dropped(dropped);
    }
}

/// Shared handle to a host peer
///
/// Clones share one peer; the peer stays alive exactly as long as at
/// least one handle does.
#[derive(Clone)]
pub struct PeerHandle {
    inner: Arc<PeerInner>,
}

impl PeerHandle {
    pub(crate) fn new(inner: Arc<PeerInner>) -> Self {
        Self { inner }
    }

    /// The wrapper pairing this peer with its script twin
    pub fn wrapper(&self) -> Wrapper {
        Wrapper::from_core(self.inner.wrapper.clone())
    }

    /// Handle of the script twin
    pub fn object_id(&self) -> ObjectId {
        self.inner.wrapper.object_id()
    }

    /// Registered type name of this peer's class
    pub fn class_name(&self) -> &str {
        self.inner.wrapper.class().name()
    }

    /// Recover the concrete host type
    pub fn downcast_ref<T: HostObject>(&self) -> Option<&T> {
        self.inner.object.as_any().downcast_ref::<T>()
    }

    /// Number of live handles sharing this peer
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("class", &self.class_name())
            .field("object", &self.object_id())
            .finish()
    }
}
