//! Tether script-object engine
//!
//! This crate provides the embeddable engine substrate that the Tether
//! bridge pairs host objects against:
//! - Slotted object heap with generational handles
//! - Mark-sweep garbage collector with weak finalizers
//! - Isolate lock discipline (one thread inside at a time)
//! - Execution contexts and handle scopes
//! - Counted (global) and weak object handles

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod value;
pub mod gc;
pub mod context;
pub mod isolate;
pub mod handle;

pub use value::{ObjectId, Value};
pub use gc::{Finalize, FinalizeRecord, Finalizer, GcStats, ScriptObject};
pub use context::{Context, ContextId};
pub use isolate::{Isolate, IsolateGuard, IsolateId, IsolateOptions, IsolateRef, PostedOp};
pub use handle::{Global, WeakRef};

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The isolate has been disposed or was never started
    #[error("engine is not running")]
    NotRunning,

    /// The object heap refused an allocation
    #[error("script heap limit reached ({live} live objects, limit {limit})")]
    Allocation {
        /// Live objects at the time of the failed allocation
        live: usize,
        /// Configured object limit
        limit: usize,
    },

    /// No execution context is active on the current isolate entry
    #[error("no execution context is active on this isolate")]
    ContextNotReady,

    /// A handle refers to an object that was already collected
    #[error("stale object handle {0:?}")]
    StaleHandle(ObjectId),

    /// An engine-owned resource was used after its isolate was disposed
    #[error("isolate used after dispose")]
    UseAfterShutdown,
}

/// Engine result
pub type EngineResult<T> = Result<T, EngineError>;
