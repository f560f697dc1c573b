//! Error types for the Tether bridge

use tether_engine::EngineError;

/// Result type for bridge calls
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// A type name was registered twice with conflicting parents
    #[error("type {name:?} already registered (parent {existing:?}, refused parent {requested:?})")]
    DuplicateType {
        /// Conflicting type name
        name: String,
        /// Parent recorded by the first registration
        existing: Option<String>,
        /// Parent requested by the rejected registration
        requested: Option<String>,
    },

    /// A binding name collided within one table
    #[error("binding {name:?} already present on type {class:?}")]
    DuplicateName {
        /// Type whose table rejected the binding
        class: String,
        /// Colliding binding name
        name: String,
    },

    /// A signature descriptor failed to parse
    #[error("bad signature {descriptor:?}: {reason}")]
    BadSignature {
        /// Offending descriptor text
        descriptor: String,
        /// Parse failure detail
        reason: String,
    },

    /// A type name was used before being registered
    #[error("type {0:?} is not registered")]
    TypeNotRegistered(String),

    /// A dispatched member exists nowhere on the type or its ancestors
    #[error("type {class:?} has no member {name:?}")]
    UnknownMember {
        /// Type the dispatch started from
        class: String,
        /// Member name that failed to resolve
        name: String,
    },

    /// A bound property without a setter was written to
    #[error("property {name:?} on type {class:?} has no setter")]
    ReadOnlyProperty {
        /// Type owning the accessor
        class: String,
        /// Accessor name
        name: String,
    },

    /// Call arguments did not match the declared signature
    #[error("arguments for {method:?} do not match {expected:?} ({got})")]
    InvalidArguments {
        /// Method whose signature rejected the call
        method: String,
        /// Declared signature descriptor
        expected: String,
        /// Mismatch detail
        got: String,
    },

    /// Failure raised by host binding code
    #[error("{0}")]
    Host(String),

    /// Engine-level failure
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Host(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Host(s.to_string())
    }
}
