//! Binding tables for bridged types
//!
//! Each registered type carries two tables:
//! - Native table: entry points the host invokes by name, each guarded
//!   by a parsed [`Signature`]
//! - Script table: methods, accessor pairs, and an optional constructor
//!   that script-side dispatch routes into host code
//!
//! Tables are filled by pure builder functions at registration time and
//! are immutable afterwards, so dispatch never takes a table lock. All
//! callables are plain `fn` pointers.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tether_engine::Value;

use crate::engine::EngineScope;
use crate::error::{BridgeError, BridgeResult};
use crate::peer::{HostObject, PeerHandle};
use crate::signature::Signature;

/// Host-invoked entry point
pub type NativeFn = fn(&mut EngineScope<'_>, NativeCall<'_>) -> BridgeResult<Value>;

/// Script-dispatched method
pub type MethodFn = fn(&mut EngineScope<'_>, &PeerHandle, &[Value]) -> BridgeResult<Value>;

/// Script-dispatched property read
pub type GetterFn = fn(&mut EngineScope<'_>, &PeerHandle) -> BridgeResult<Value>;

/// Script-dispatched property write
pub type SetterFn = fn(&mut EngineScope<'_>, &PeerHandle, Value) -> BridgeResult<()>;

/// Peer constructor for scripted instantiation
pub type ConstructorFn = fn(&mut EngineScope<'_>, &[Value]) -> BridgeResult<Box<dyn HostObject>>;

/// Arguments to a native entry point
pub struct NativeCall<'c> {
    /// Receiver peer, absent for type-level calls
    pub receiver: Option<&'c PeerHandle>,
    /// Call arguments
    pub args: &'c [Value],
}

/// One named host-callable entry point
#[derive(Debug)]
pub struct NativeBinding {
    name: Arc<str>,
    signature: Signature,
    func: NativeFn,
}

impl NativeBinding {
    /// Binding name
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Declared signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn func(&self) -> NativeFn {
        self.func
    }
}

/// Host-callable entry points of one type
#[derive(Debug)]
pub struct NativeTable {
    class: Arc<str>,
    entries: FxHashMap<Arc<str>, NativeBinding>,
}

impl NativeTable {
    /// Empty table for the named type
    pub fn new(class: impl Into<Arc<str>>) -> Self {
        Self {
            class: class.into(),
            entries: FxHashMap::default(),
        }
    }

    /// Add an entry point under `name` with the given signature descriptor
    pub fn add(&mut self, name: &str, descriptor: &str, func: NativeFn) -> BridgeResult<()> {
        let signature = Signature::parse(descriptor)?;
        if self.entries.contains_key(name) {
            return Err(BridgeError::DuplicateName {
                class: self.class.to_string(),
                name: name.to_string(),
            });
        }
        let name: Arc<str> = Arc::from(name);
        self.entries.insert(
            name.clone(),
            NativeBinding {
                name,
                signature,
                func,
            },
        );
        Ok(())
    }

    /// Look up an entry point by name
    pub fn get(&self, name: &str) -> Option<&NativeBinding> {
        self.entries.get(name)
    }

    /// Number of entry points
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entry points are bound
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound entry point names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|name| name.as_ref())
    }
}

/// A getter with an optional setter
#[derive(Debug)]
pub struct Accessor {
    getter: GetterFn,
    setter: Option<SetterFn>,
}

impl Accessor {
    /// Property read thunk
    pub fn getter(&self) -> GetterFn {
        self.getter
    }

    /// Property write thunk, absent for read-only accessors
    pub fn setter(&self) -> Option<SetterFn> {
        self.setter
    }
}

/// Script-callable members of one type
///
/// Methods and accessors share a namespace, a name bound as one cannot
/// be rebound as the other.
#[derive(Debug)]
pub struct ScriptTable {
    class: Arc<str>,
    methods: FxHashMap<Arc<str>, MethodFn>,
    accessors: FxHashMap<Arc<str>, Accessor>,
    constructor: Option<ConstructorFn>,
}

impl ScriptTable {
    /// Empty table for the named type
    pub fn new(class: impl Into<Arc<str>>) -> Self {
        Self {
            class: class.into(),
            methods: FxHashMap::default(),
            accessors: FxHashMap::default(),
            constructor: None,
        }
    }

    fn reject_taken(&self, name: &str) -> BridgeResult<()> {
        if self.methods.contains_key(name) || self.accessors.contains_key(name) {
            return Err(BridgeError::DuplicateName {
                class: self.class.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Add a script-callable method
    pub fn add_method(&mut self, name: &str, func: MethodFn) -> BridgeResult<()> {
        self.reject_taken(name)?;
        self.methods.insert(Arc::from(name), func);
        Ok(())
    }

    /// Add a script-visible accessor, read-only when `setter` is `None`
    pub fn add_accessor(
        &mut self,
        name: &str,
        getter: GetterFn,
        setter: Option<SetterFn>,
    ) -> BridgeResult<()> {
        self.reject_taken(name)?;
        self.accessors.insert(Arc::from(name), Accessor { getter, setter });
        Ok(())
    }

    /// Install the constructor, at most one per type
    pub fn set_constructor(&mut self, func: ConstructorFn) -> BridgeResult<()> {
        if self.constructor.is_some() {
            return Err(BridgeError::DuplicateName {
                class: self.class.to_string(),
                name: "constructor".to_string(),
            });
        }
        self.constructor = Some(func);
        Ok(())
    }

    /// Look up a method by name
    pub fn method(&self, name: &str) -> Option<MethodFn> {
        self.methods.get(name).copied()
    }

    /// Look up an accessor by name
    pub fn accessor(&self, name: &str) -> Option<&Accessor> {
        self.accessors.get(name)
    }

    /// The registered constructor, if any
    pub fn constructor(&self) -> Option<ConstructorFn> {
        self.constructor
    }

    /// True when no members are bound
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.accessors.is_empty() && self.constructor.is_none()
    }
}
