//! Execution contexts
//!
//! A context is a named global scope inside an isolate. One isolate may
//! host several contexts; objects are isolate-wide, but globals hang off
//! the context they were set in and root their objects for collection.

use crate::value::Value;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Create a new unique context ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// An execution context
pub struct Context {
    /// Context ID
    id: ContextId,

    /// Global variables
    globals: FxHashMap<String, Value>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            id: ContextId::new(),
            globals: FxHashMap::default(),
        }
    }

    /// Get the context ID
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Look up a global
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Set a global
    pub fn set_global(&mut self, name: String, value: Value) {
        self.globals.insert(name, value);
    }

    /// Remove a global, returning whether it existed
    pub fn remove_global(&mut self, name: &str) -> bool {
        self.globals.remove(name).is_some()
    }

    /// All globals
    pub fn globals(&self) -> &FxHashMap<String, Value> {
        &self.globals
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
