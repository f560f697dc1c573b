//! Generic peers
//!
//! [`GenericPeer`] backs wrapped objects that carry no registered type:
//! plain script objects the host wants a stable identity for. It can
//! also be registered explicitly under the `Generic` name, which adds a
//! `NewInstance` entry point for hosts that mint anonymous wrapped
//! objects by name.

use std::any::Any;
use std::sync::Arc;

use tether_engine::Value;

use crate::binding::{NativeCall, NativeTable};
use crate::engine::{EngineContext, EngineScope};
use crate::error::BridgeResult;
use crate::peer::{HostObject, PeerHandle};
use crate::registry::{ClassInfo, ClassRegistry, HostClass};

/// Host peer with no state of its own
#[derive(Debug, Default)]
pub struct GenericPeer;

impl HostObject for GenericPeer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostClass for GenericPeer {
    const NAME: &'static str = "Generic";

    fn native_bindings(table: &mut NativeTable) -> BridgeResult<()> {
        table.add("NewInstance", "()o", generic_new_instance)
    }
}

fn generic_new_instance(
    scope: &mut EngineScope<'_>,
    _call: NativeCall<'_>,
) -> BridgeResult<Value> {
    let peer = scope.create_instance(GenericPeer::NAME)?;
    Ok(Value::Object(peer.object_id()))
}

impl GenericPeer {
    /// Register under the `Generic` name
    pub fn register(registry: &ClassRegistry) -> BridgeResult<Arc<ClassInfo>> {
        registry.register_class::<GenericPeer>()
    }

    /// Create an anonymous wrapped object on the given engine
    pub fn create(engine: &EngineContext) -> BridgeResult<PeerHandle> {
        engine.create_instance(Self::NAME)
    }
}
