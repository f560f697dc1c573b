//! Object wrappers and the identity table
//!
//! A wrapper pairs one script object with at most one host peer. The
//! identity table maps live object handles to wrapper cores, so wrapping
//! an already-wrapped object always yields the one existing wrapper
//! rather than a second pairing.
//!
//! Wrapper state moves forward only:
//!
//! ```text
//! Live ──(script twin reclaimed, peer still held)──> Detached
//! Live ──(both sides gone)─────────────────────────> Released
//! ```
//!
//! A detached wrapper keeps a property snapshot taken at reclaim time;
//! a released wrapper keeps nothing.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tether_engine::{EngineError, IsolateRef, ObjectId, PostedOp, Value};

use crate::engine::EngineShared;
use crate::error::{BridgeError, BridgeResult};
use crate::peer::{PeerHandle, PeerInner};
use crate::registry::ClassInfo;

pub(crate) enum WrapperState {
    Live,
    Detached { snapshot: FxHashMap<String, Value> },
    Released,
}

struct WrapperCell {
    peer: Weak<PeerInner>,
    state: WrapperState,
}

pub(crate) struct WrapperCore {
    class: Arc<ClassInfo>,
    object: ObjectId,
    isolate: IsolateRef,
    engine: Weak<EngineShared>,
    cell: Mutex<WrapperCell>,
}

impl WrapperCore {
    pub(crate) fn new(
        class: Arc<ClassInfo>,
        object: ObjectId,
        isolate: IsolateRef,
        engine: Weak<EngineShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            class,
            object,
            isolate,
            engine,
            cell: Mutex::new(WrapperCell {
                peer: Weak::new(),
                state: WrapperState::Live,
            }),
        })
    }

    pub(crate) fn object_id(&self) -> ObjectId {
        self.object
    }

    pub(crate) fn class(&self) -> &Arc<ClassInfo> {
        &self.class
    }

    pub(crate) fn engine_shared(&self) -> Option<Arc<EngineShared>> {
        self.engine.upgrade()
    }

    pub(crate) fn peer(&self) -> Option<PeerHandle> {
        self.cell.lock().peer.upgrade().map(PeerHandle::new)
    }

    pub(crate) fn peer_alive(&self) -> bool {
        self.cell.lock().peer.strong_count() > 0
    }

    pub(crate) fn set_peer(&self, peer: Weak<PeerInner>) {
        self.cell.lock().peer = peer;
    }

    /// Called from `PeerInner::drop` on whatever thread dropped the last
    /// handle. That thread may already hold the isolate lock, or none at
    /// all, so the unpin goes through the posted-work queue.
    pub(crate) fn on_peer_dropped(&self, dropped: *const PeerInner) {
        let mut cell = self.cell.lock();
        // A revived peer may already occupy the slot; only clear our own.
        if std::ptr::eq(cell.peer.as_ptr(), dropped) {
            cell.peer = Weak::new();
        }
        drop(cell);
        self.isolate.post(PostedOp::Unpin(self.object));
    }

    pub(crate) fn is_live(&self) -> bool {
        matches!(self.cell.lock().state, WrapperState::Live)
    }

    pub(crate) fn is_detached(&self) -> bool {
        matches!(self.cell.lock().state, WrapperState::Detached { .. })
    }

    pub(crate) fn is_released(&self) -> bool {
        matches!(self.cell.lock().state, WrapperState::Released)
    }

    pub(crate) fn snapshot(&self) -> Option<FxHashMap<String, Value>> {
        match &self.cell.lock().state {
            WrapperState::Detached { snapshot } => Some(snapshot.clone()),
            _ => None,
        }
    }

    pub(crate) fn detach(&self, snapshot: FxHashMap<String, Value>) {
        self.cell.lock().state = WrapperState::Detached { snapshot };
    }

    pub(crate) fn mark_released(&self) {
        self.cell.lock().state = WrapperState::Released;
    }

    fn state_name(&self) -> &'static str {
        match self.cell.lock().state {
            WrapperState::Live => "live",
            WrapperState::Detached { .. } => "detached",
            WrapperState::Released => "released",
        }
    }
}

/// Pairing of one script object with its host peer
///
/// Cloning shares the underlying pairing; the script twin's identity is
/// never duplicated.
#[derive(Clone)]
pub struct Wrapper {
    core: Arc<WrapperCore>,
}

impl Wrapper {
    pub(crate) fn from_core(core: Arc<WrapperCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<WrapperCore> {
        &self.core
    }

    /// Handle of the script twin
    pub fn object_id(&self) -> ObjectId {
        self.core.object_id()
    }

    /// Registered type name of the wrapped object
    pub fn class_name(&self) -> &str {
        self.core.class().name()
    }

    /// The host peer, absent once every [`PeerHandle`] has dropped
    pub fn peer(&self) -> Option<PeerHandle> {
        self.core.peer()
    }

    /// True while both twins are intact
    pub fn is_live(&self) -> bool {
        self.core.is_live()
    }

    /// True once the script twin was reclaimed out from under a held peer
    pub fn is_detached(&self) -> bool {
        self.core.is_detached()
    }

    /// True once both twins are gone
    pub fn is_released(&self) -> bool {
        self.core.is_released()
    }

    /// Property snapshot taken when the script twin was reclaimed
    pub fn detached_snapshot(&self) -> Option<FxHashMap<String, Value>> {
        self.core.snapshot()
    }

    /// Read the script twin's properties
    ///
    /// Returns the detach-time snapshot when the twin is already gone.
    /// Enters the isolate on the live path, so it must not be called
    /// from a thread that already holds the isolate lock.
    pub fn read_properties(&self) -> BridgeResult<FxHashMap<String, Value>> {
        if let Some(snapshot) = self.core.snapshot() {
            return Ok(snapshot);
        }
        let shared = self
            .core
            .engine_shared()
            .ok_or(BridgeError::Engine(EngineError::UseAfterShutdown))?;
        shared.read_wrapper_properties(self.core.object_id())
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("class", &self.class_name())
            .field("object", &self.object_id())
            .field("state", &self.core.state_name())
            .finish()
    }
}

/// Identity table from live script objects to their wrapper cores
///
/// Entries are weak; the table never keeps a wrapper alive. Release
/// and detach paths remove entries eagerly, so a hit is always a
/// wrapper that has not been released.
pub(crate) struct WrapperTable {
    entries: Mutex<FxHashMap<ObjectId, Weak<WrapperCore>>>,
}

impl WrapperTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn get(&self, id: ObjectId) -> Option<Arc<WrapperCore>> {
        self.entries.lock().get(&id)?.upgrade()
    }

    pub(crate) fn insert(&self, id: ObjectId, core: &Arc<WrapperCore>) {
        self.entries.lock().insert(id, Arc::downgrade(core));
    }

    pub(crate) fn remove(&self, id: ObjectId) {
        self.entries.lock().remove(&id);
    }

    pub(crate) fn live_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|core| core.strong_count() > 0)
            .count()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}
