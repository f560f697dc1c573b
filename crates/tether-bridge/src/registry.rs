//! Class registry
//!
//! Types are registered once at startup under a unique name, optionally
//! naming an already-registered parent. Registration order therefore
//! fixes the shape of the inheritance forest: parents first, children
//! after, cycles unrepresentable.
//!
//! The registry is shared by every engine context that should see the
//! same types; nothing here is process-global. Lookups during dispatch
//! are lock-free reads against a concurrent map.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tether_engine::ContextId;

use crate::binding::{NativeTable, ScriptTable};
use crate::error::{BridgeError, BridgeResult};
use crate::generic::GenericPeer;
use crate::peer::HostObject;

/// Peer factory used when instances are created without constructor
/// arguments, and when a collected peer is revived
pub type PeerFactory = fn() -> Box<dyn HostObject>;

/// Immutable description of one registered type
///
/// Carries the binding tables, the peer factory, and the resolved parent
/// class. Per-context installation state is the only mutable part.
#[derive(Debug)]
pub struct ClassInfo {
    name: Arc<str>,
    parent: Option<Arc<ClassInfo>>,
    factory: PeerFactory,
    native: NativeTable,
    script: ScriptTable,
    installed: Mutex<FxHashSet<ContextId>>,
}

impl ClassInfo {
    /// Registered type name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Resolved parent class
    pub fn parent(&self) -> Option<&Arc<ClassInfo>> {
        self.parent.as_ref()
    }

    /// Host-callable entry points
    pub fn native(&self) -> &NativeTable {
        &self.native
    }

    /// Script-callable members
    pub fn script(&self) -> &ScriptTable {
        &self.script
    }

    pub(crate) fn factory(&self) -> PeerFactory {
        self.factory
    }

    /// Ancestor chain of `class`, root first, `class` itself last
    pub fn lineage(class: &Arc<ClassInfo>) -> Vec<Arc<ClassInfo>> {
        let mut chain = Vec::new();
        let mut current = Some(class.clone());
        while let Some(info) = current {
            current = info.parent().cloned();
            chain.push(info);
        }
        chain.reverse();
        chain
    }

    /// Whether this class is `name` or inherits from it
    pub fn derives_from(&self, name: &str) -> bool {
        let mut current = Some(self);
        while let Some(info) = current {
            if info.name() == name {
                return true;
            }
            current = info.parent().map(Arc::as_ref);
        }
        false
    }

    /// Whether this class was installed into the given context
    pub fn is_installed_in(&self, context: ContextId) -> bool {
        self.installed.lock().contains(&context)
    }

    /// Number of contexts this class was installed into
    pub fn installed_context_count(&self) -> usize {
        self.installed.lock().len()
    }

    /// Record installation into a context; false when already installed
    pub(crate) fn mark_installed(&self, context: ContextId) -> bool {
        self.installed.lock().insert(context)
    }
}

fn no_native(_: &mut NativeTable) -> BridgeResult<()> {
    Ok(())
}

fn no_script(_: &mut ScriptTable) -> BridgeResult<()> {
    Ok(())
}

fn make_default<T: HostClass>() -> Box<dyn HostObject> {
    Box::new(T::default())
}

/// Startup description of one type
///
/// The table builders are plain functions, so a spec is inert data until
/// [`ClassRegistry::register`] runs them.
pub struct ClassSpec {
    name: &'static str,
    parent: Option<&'static str>,
    factory: PeerFactory,
    native: fn(&mut NativeTable) -> BridgeResult<()>,
    script: fn(&mut ScriptTable) -> BridgeResult<()>,
}

impl ClassSpec {
    /// Spec with no parent and empty tables
    pub fn new(name: &'static str, factory: PeerFactory) -> Self {
        Self {
            name,
            parent: None,
            factory,
            native: no_native,
            script: no_script,
        }
    }

    /// Name an already-registered parent type
    pub fn with_parent(mut self, parent: &'static str) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Builder filling the host-callable table
    pub fn with_native(mut self, build: fn(&mut NativeTable) -> BridgeResult<()>) -> Self {
        self.native = build;
        self
    }

    /// Builder filling the script-callable table
    pub fn with_script(mut self, build: fn(&mut ScriptTable) -> BridgeResult<()>) -> Self {
        self.script = build;
        self
    }
}

/// Statically described host class
///
/// Implementing this trait lets a type register itself through
/// [`ClassRegistry::register_class`] instead of hand-building a
/// [`ClassSpec`].
pub trait HostClass: HostObject + Default {
    /// Registered type name
    const NAME: &'static str;

    /// Parent type name, registered before this class
    const PARENT: Option<&'static str> = None;

    /// Host-callable entry points
    fn native_bindings(_table: &mut NativeTable) -> BridgeResult<()> {
        Ok(())
    }

    /// Script-callable members
    fn script_bindings(_table: &mut ScriptTable) -> BridgeResult<()> {
        Ok(())
    }
}

/// Registry of bridged types
///
/// Registration is first-wins and idempotent: re-registering a name with
/// the same parent returns the existing class, a conflicting parent is
/// refused.
pub struct ClassRegistry {
    classes: DashMap<Arc<str>, Arc<ClassInfo>>,
    untyped: OnceCell<Arc<ClassInfo>>,
}

impl ClassRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            classes: DashMap::new(),
            untyped: OnceCell::new(),
        }
    }

    /// Register a type from a spec
    ///
    /// The parent, when named, must already be registered. The spec's
    /// table builders run exactly once, before the class becomes
    /// visible to concurrent lookups.
    pub fn register(&self, spec: ClassSpec) -> BridgeResult<Arc<ClassInfo>> {
        let parent = match spec.parent {
            Some(name) => Some(
                self.lookup(name)
                    .ok_or_else(|| BridgeError::TypeNotRegistered(name.to_string()))?,
            ),
            None => None,
        };

        match self.classes.entry(Arc::from(spec.name)) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                let same_parent = match (existing.parent(), parent.as_ref()) {
                    (None, None) => true,
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                    _ => false,
                };
                if same_parent {
                    Ok(existing.clone())
                } else {
                    Err(BridgeError::DuplicateType {
                        name: spec.name.to_string(),
                        existing: existing.parent().map(|p| p.name().to_string()),
                        requested: parent.map(|p| p.name().to_string()),
                    })
                }
            }
            Entry::Vacant(entry) => {
                let mut native = NativeTable::new(spec.name);
                (spec.native)(&mut native)?;
                let mut script = ScriptTable::new(spec.name);
                (spec.script)(&mut script)?;

                let info = Arc::new(ClassInfo {
                    name: Arc::from(spec.name),
                    parent,
                    factory: spec.factory,
                    native,
                    script,
                    installed: Mutex::new(FxHashSet::default()),
                });
                entry.insert(info.clone());
                Ok(info)
            }
        }
    }

    /// Register a statically described class
    pub fn register_class<T: HostClass>(&self) -> BridgeResult<Arc<ClassInfo>> {
        let mut spec = ClassSpec::new(T::NAME, make_default::<T>)
            .with_native(T::native_bindings)
            .with_script(T::script_bindings);
        if let Some(parent) = T::PARENT {
            spec = spec.with_parent(parent);
        }
        self.register(spec)
    }

    /// Look up a registered type by name
    pub fn lookup(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.classes.get(name).map(|entry| entry.clone())
    }

    /// Whether a type name is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no types are registered
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Registered type names
    pub fn names(&self) -> Vec<Arc<str>> {
        self.classes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Fallback class used when wrapping objects with no type tag
    ///
    /// Not listed in the registry; instances are backed by
    /// [`GenericPeer`] and expose no bindings.
    pub(crate) fn untyped(&self) -> Arc<ClassInfo> {
        self.untyped
            .get_or_init(|| {
                Arc::new(ClassInfo {
                    name: Arc::from("<untyped>"),
                    parent: None,
                    factory: make_default::<GenericPeer>,
                    native: NativeTable::new("<untyped>"),
                    script: ScriptTable::new("<untyped>"),
                    installed: Mutex::new(FxHashSet::default()),
                })
            })
            .clone()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
