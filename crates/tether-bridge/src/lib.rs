//! Tether bridge - host-object binding layer
//!
//! This crate pairs host-side objects with script twins living in a
//! `tether-engine` isolate:
//! - Class registry with single-inheritance parent chains
//! - Native and script binding tables built at registration time
//! - Identity-preserving object wrappers
//! - Lifecycle reconciliation between the host's reference counting and
//!   the engine's garbage collector
//!
//! # Example
//!
//! ```
//! use std::any::Any;
//! use std::sync::Arc;
//! use tether_bridge::{
//!     BridgeResult, ClassRegistry, EngineContext, EngineOptions, HostClass, HostObject,
//!     ScriptTable, Value,
//! };
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! impl HostObject for Greeter {
//!     fn as_any(&self) -> &dyn Any {
//!         self
//!     }
//! }
//!
//! impl HostClass for Greeter {
//!     const NAME: &'static str = "Greeter";
//!
//!     fn script_bindings(table: &mut ScriptTable) -> BridgeResult<()> {
//!         table.add_method("greet", |_scope, _peer, args| {
//!             let name = args.first().and_then(Value::as_str).unwrap_or("world");
//!             Ok(Value::from(format!("hello, {name}")))
//!         })
//!     }
//! }
//!
//! # fn main() -> BridgeResult<()> {
//! let registry = Arc::new(ClassRegistry::new());
//! registry.register_class::<Greeter>()?;
//!
//! let engine = EngineContext::start(registry, EngineOptions::default())?;
//! let peer = engine.create_instance("Greeter")?;
//!
//! let greeting = engine.enter(|scope| {
//!     scope.call_script_method(peer.object_id(), "greet", &[Value::str("tether")])
//! })?;
//! assert_eq!(greeting, Value::from("hello, tether"));
//!
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod signature;
pub mod binding;
pub mod registry;
pub mod peer;
pub mod wrapper;
pub mod lifecycle;
pub mod engine;
pub mod generic;

pub use binding::{
    Accessor, ConstructorFn, GetterFn, MethodFn, NativeBinding, NativeCall, NativeFn,
    NativeTable, ScriptTable, SetterFn,
};
pub use engine::{EngineContext, EngineOptions, EngineScope};
pub use error::{BridgeError, BridgeResult};
pub use generic::GenericPeer;
pub use lifecycle::ReclaimPolicy;
pub use peer::{HostObject, PeerHandle};
pub use registry::{ClassInfo, ClassRegistry, ClassSpec, HostClass, PeerFactory};
pub use signature::{Shape, Signature};
pub use wrapper::Wrapper;

pub use tether_engine::{EngineError, Isolate, IsolateOptions, ObjectId, Value};
