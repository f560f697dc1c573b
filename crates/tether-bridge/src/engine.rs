//! Engine contexts and scoped bridge operations
//!
//! An [`EngineContext`] pairs one isolate with one execution context and
//! a shared [`ClassRegistry`]. Host threads hold clones of the context
//! handle; every bridge operation funnels through [`EngineContext::enter`],
//! which takes the isolate lock, makes the context current, and hands the
//! calling closure an [`EngineScope`]:
//!
//! ```text
//! host thread ──enter()──> isolate lock ──> EngineScope
//!                                             │ create_instance / construct
//!                                             │ wrap / peer_of
//!                                             │ call_native / call_script_method
//!                                             │ get/set_bound_property
//!                                             └ guard() for raw engine access
//! ```
//!
//! Classes install lazily: the first use of a type inside a context
//! installs its binding tables (parents first), at most once per
//! context. Wrapping is identity-preserving per object, backed by the
//! engine-wide internal slot and the per-engine identity table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tether_engine::{
    ContextId, EngineError, Isolate, IsolateGuard, IsolateOptions, ObjectId, Value,
};

use crate::binding::{Accessor, MethodFn, NativeBinding, NativeCall};
use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::{make_finalizer, ReclaimPolicy};
use crate::peer::{PeerHandle, PeerInner};
use crate::registry::{ClassInfo, ClassRegistry};
use crate::wrapper::{Wrapper, WrapperCore, WrapperTable};

/// Options for starting an engine context
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Policy for script twins condemned while their peer lives
    pub policy: ReclaimPolicy,

    /// Options for the backing isolate
    pub isolate: IsolateOptions,
}

impl EngineOptions {
    /// Options with a specific reclaim policy
    pub fn with_policy(policy: ReclaimPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Options with specific isolate settings
    pub fn with_isolate(isolate: IsolateOptions) -> Self {
        Self {
            isolate,
            ..Default::default()
        }
    }
}

pub(crate) struct EngineShared {
    isolate: Isolate,
    context: ContextId,
    registry: Arc<ClassRegistry>,
    policy: ReclaimPolicy,
    wrappers: WrapperTable,
    installed: Mutex<FxHashSet<Arc<str>>>,
    running: AtomicBool,
    owns_isolate: bool,
}

impl EngineShared {
    pub(crate) fn policy(&self) -> ReclaimPolicy {
        self.policy
    }

    pub(crate) fn wrappers(&self) -> &WrapperTable {
        &self.wrappers
    }

    pub(crate) fn read_wrapper_properties(
        &self,
        id: ObjectId,
    ) -> BridgeResult<FxHashMap<String, Value>> {
        if !self.running.load(Ordering::Acquire) {
            return Err(BridgeError::Engine(EngineError::UseAfterShutdown));
        }
        let guard = self.isolate.enter()?;
        Ok(guard.snapshot_properties(id)?)
    }
}

/// One bridged engine: an isolate, one context, and a class registry
///
/// The handle is cheap to clone and shared freely across host threads.
/// All clones address the same engine; `shutdown` on any of them tears
/// the pairing down for all.
#[derive(Clone)]
pub struct EngineContext {
    shared: Arc<EngineShared>,
}

impl EngineContext {
    /// Start an engine on a freshly created isolate
    pub fn start(registry: Arc<ClassRegistry>, options: EngineOptions) -> BridgeResult<Self> {
        let isolate = Isolate::new(options.isolate);
        Self::with_isolate(isolate, registry, options.policy, true)
    }

    /// Attach an engine to an isolate created elsewhere
    ///
    /// A fresh context is created on the isolate. Shutting the engine
    /// down destroys that context but leaves the isolate running.
    pub fn attach(
        isolate: Isolate,
        registry: Arc<ClassRegistry>,
        policy: ReclaimPolicy,
    ) -> BridgeResult<Self> {
        Self::with_isolate(isolate, registry, policy, false)
    }

    fn with_isolate(
        isolate: Isolate,
        registry: Arc<ClassRegistry>,
        policy: ReclaimPolicy,
        owns_isolate: bool,
    ) -> BridgeResult<Self> {
        let context = {
            let mut guard = isolate.enter()?;
            guard.create_context()
        };
        Ok(Self {
            shared: Arc::new(EngineShared {
                isolate,
                context,
                registry,
                policy,
                wrappers: WrapperTable::new(),
                installed: Mutex::new(FxHashSet::default()),
                running: AtomicBool::new(true),
                owns_isolate,
            }),
        })
    }

    /// The backing isolate
    pub fn isolate(&self) -> &Isolate {
        &self.shared.isolate
    }

    /// The engine's execution context
    pub fn context(&self) -> ContextId {
        self.shared.context
    }

    /// The shared class registry
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.shared.registry
    }

    /// Reclaim policy for host-held twins
    pub fn policy(&self) -> ReclaimPolicy {
        self.shared.policy
    }

    /// False once `shutdown` has begun
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of live wrappers created through this engine
    pub fn wrapper_count(&self) -> usize {
        self.shared.wrappers.live_count()
    }

    /// Names of classes installed into this engine's context
    pub fn installed_classes(&self) -> Vec<Arc<str>> {
        self.shared.installed.lock().iter().cloned().collect()
    }

    /// Enter the engine and run `f` under the isolate lock
    ///
    /// Blocks until the lock is free. The engine's context is current
    /// for the duration of the closure.
    pub fn enter<R>(
        &self,
        f: impl FnOnce(&mut EngineScope<'_>) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(BridgeError::Engine(EngineError::NotRunning));
        }
        let mut guard = self.shared.isolate.enter()?;
        guard.enter_context(self.shared.context)?;
        let mut scope = EngineScope {
            shared: &self.shared,
            guard,
        };
        f(&mut scope)
    }

    /// Create an instance of a registered type, entering the engine
    pub fn create_instance(&self, type_name: &str) -> BridgeResult<PeerHandle> {
        self.enter(|scope| scope.create_instance(type_name))
    }

    /// Construct an instance with arguments, entering the engine
    pub fn construct(&self, type_name: &str, args: &[Value]) -> BridgeResult<PeerHandle> {
        self.enter(|scope| scope.construct(type_name, args))
    }

    /// Invoke a host-callable entry point, entering the engine
    pub fn call_native(
        &self,
        type_name: &str,
        method: &str,
        receiver: Option<&PeerHandle>,
        args: &[Value],
    ) -> BridgeResult<Value> {
        self.enter(|scope| scope.call_native(type_name, method, receiver, args))
    }

    /// Install a registered type into this engine's context
    pub fn install(&self, type_name: &str) -> BridgeResult<()> {
        self.enter(|scope| {
            scope.install(type_name)?;
            Ok(())
        })
    }

    /// Wrap a script object, entering the engine
    pub fn wrap(&self, id: ObjectId) -> BridgeResult<Wrapper> {
        self.enter(|scope| scope.wrap(id))
    }

    /// Resolve a script object to a live host peer, entering the engine
    pub fn peer_of(&self, id: ObjectId) -> BridgeResult<PeerHandle> {
        self.enter(|scope| scope.peer_of(id))
    }

    /// Run a full collection, entering the engine
    pub fn collect_garbage(&self) -> BridgeResult<usize> {
        self.enter(|scope| Ok(scope.collect_garbage()))
    }

    /// Tear the engine down
    ///
    /// Stops accepting new entries, blocks until the active entry (if
    /// any) finishes, then destroys the engine's context. An engine
    /// started through [`EngineContext::start`] also disposes its
    /// isolate. Outstanding wrappers answer `UseAfterShutdown` from
    /// here on. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut guard) = self.shared.isolate.enter() {
            let _ = guard.destroy_context(self.shared.context);
        }
        self.shared.wrappers.clear();
        if self.shared.owns_isolate {
            self.shared.isolate.dispose();
        }
    }
}

/// Bridge operations available while inside the engine
///
/// A scope borrows the engine's entry guard; it exists only inside
/// [`EngineContext::enter`] and is handed to binding thunks during
/// dispatch.
pub struct EngineScope<'e> {
    shared: &'e Arc<EngineShared>,
    guard: IsolateGuard<'e>,
}

impl<'e> EngineScope<'e> {
    /// The engine's execution context
    pub fn context(&self) -> ContextId {
        self.shared.context
    }

    /// The shared class registry
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.shared.registry
    }

    /// Raw access to the underlying engine entry
    pub fn guard(&mut self) -> &mut IsolateGuard<'e> {
        &mut self.guard
    }

    /// Install a registered type (and its ancestors) into this context
    pub fn install(&mut self, type_name: &str) -> BridgeResult<Arc<ClassInfo>> {
        let class = self.resolve(type_name)?;
        self.install_class(&class);
        Ok(class)
    }

    /// Create an instance of a registered type
    ///
    /// Allocates the script twin, tags it, and pairs it with a host
    /// peer. The type's constructor, when bound, runs with no
    /// arguments; otherwise the peer comes from the class factory.
    pub fn create_instance(&mut self, type_name: &str) -> BridgeResult<PeerHandle> {
        let class = self.resolve(type_name)?;
        self.install_class(&class);
        let id = self.guard.alloc_object()?;
        self.guard.set_type_tag(id, class.name_arc().clone())?;
        let (_, peer) = self.wrap_fresh(id, class, None)?;
        Ok(peer)
    }

    /// Construct an instance through the type's bound constructor
    pub fn construct(&mut self, type_name: &str, args: &[Value]) -> BridgeResult<PeerHandle> {
        let class = self.resolve(type_name)?;
        self.install_class(&class);
        let id = self.guard.alloc_object()?;
        self.guard.set_type_tag(id, class.name_arc().clone())?;
        let (_, peer) = self.wrap_fresh(id, class, Some(args))?;
        Ok(peer)
    }

    /// Wrap a script object, preserving identity
    ///
    /// An already-wrapped object yields its existing wrapper, whichever
    /// engine created it. An unwrapped object is paired with a fresh
    /// peer of its tagged type, or with a generic peer when untagged.
    pub fn wrap(&mut self, id: ObjectId) -> BridgeResult<Wrapper> {
        if !self.guard.is_live(id) {
            return Err(BridgeError::Engine(EngineError::StaleHandle(id)));
        }
        if let Some(core) = self.shared.wrappers.get(id) {
            return Ok(Wrapper::from_core(core));
        }
        if let Some(core) = self.foreign_core(id)? {
            return Ok(Wrapper::from_core(core));
        }

        let class = match self.guard.type_tag(id)? {
            Some(tag) => self
                .shared
                .registry
                .lookup(&tag)
                .ok_or_else(|| BridgeError::TypeNotRegistered(tag.to_string()))?,
            None => self.shared.registry.untyped(),
        };
        self.install_class(&class);
        let (wrapper, _) = self.wrap_fresh(id, class, None)?;
        Ok(wrapper)
    }

    /// Resolve a script object to a live host peer
    ///
    /// Wraps the object first if needed. A peer whose last handle was
    /// dropped while the twin lived on is revived through the class
    /// factory.
    pub fn peer_of(&mut self, id: ObjectId) -> BridgeResult<PeerHandle> {
        let core = self.wrapper_core_of(id)?;
        self.ensure_peer(&core)
    }

    /// Invoke a host-callable entry point after signature validation
    pub fn call_native(
        &mut self,
        type_name: &str,
        method: &str,
        receiver: Option<&PeerHandle>,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let class = self.resolve(type_name)?;
        self.install_class(&class);
        let binding = find_native(&class, method).ok_or_else(|| BridgeError::UnknownMember {
            class: type_name.to_string(),
            name: method.to_string(),
        })?;
        binding.signature().check(method, args)?;
        let func = binding.func();
        func(self, NativeCall { receiver, args })
    }

    /// Dispatch a script-callable method on a wrapped object
    ///
    /// Resolution walks the object's class and then its ancestors, so
    /// subclasses see inherited members.
    pub fn call_script_method(
        &mut self,
        id: ObjectId,
        name: &str,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let core = self.wrapper_core_of(id)?;
        let peer = self.ensure_peer(&core)?;
        let method = find_method(core.class(), name).ok_or_else(|| BridgeError::UnknownMember {
            class: core.class().name().to_string(),
            name: name.to_string(),
        })?;
        method(self, &peer, args)
    }

    /// Read a bound accessor on a wrapped object
    pub fn get_bound_property(&mut self, id: ObjectId, name: &str) -> BridgeResult<Value> {
        let core = self.wrapper_core_of(id)?;
        let peer = self.ensure_peer(&core)?;
        let accessor =
            find_accessor(core.class(), name).ok_or_else(|| BridgeError::UnknownMember {
                class: core.class().name().to_string(),
                name: name.to_string(),
            })?;
        let getter = accessor.getter();
        getter(self, &peer)
    }

    /// Write a bound accessor on a wrapped object
    pub fn set_bound_property(
        &mut self,
        id: ObjectId,
        name: &str,
        value: Value,
    ) -> BridgeResult<()> {
        let core = self.wrapper_core_of(id)?;
        let peer = self.ensure_peer(&core)?;
        let accessor =
            find_accessor(core.class(), name).ok_or_else(|| BridgeError::UnknownMember {
                class: core.class().name().to_string(),
                name: name.to_string(),
            })?;
        let setter = accessor.setter().ok_or_else(|| BridgeError::ReadOnlyProperty {
            class: core.class().name().to_string(),
            name: name.to_string(),
        })?;
        setter(self, &peer, value)
    }

    /// Read a plain property of a script object
    pub fn get_property(&self, id: ObjectId, name: &str) -> BridgeResult<Option<Value>> {
        Ok(self.guard.get_property(id, name)?)
    }

    /// Write a plain property of a script object
    pub fn set_property(
        &mut self,
        id: ObjectId,
        name: impl Into<String>,
        value: Value,
    ) -> BridgeResult<()> {
        Ok(self.guard.set_property(id, name, value)?)
    }

    /// Run a full collection now
    pub fn collect_garbage(&mut self) -> usize {
        self.guard.collect_garbage()
    }

    fn resolve(&self, type_name: &str) -> BridgeResult<Arc<ClassInfo>> {
        self.shared
            .registry
            .lookup(type_name)
            .ok_or_else(|| BridgeError::TypeNotRegistered(type_name.to_string()))
    }

    fn install_class(&self, class: &Arc<ClassInfo>) {
        let context = self.shared.context;
        for ancestor in ClassInfo::lineage(class) {
            if ancestor.mark_installed(context) {
                self.shared.installed.lock().insert(ancestor.name_arc().clone());
            }
        }
    }

    /// Wrapper core left in the object's internal slot by another engine
    /// on the same isolate
    fn foreign_core(&mut self, id: ObjectId) -> BridgeResult<Option<Arc<WrapperCore>>> {
        match self.guard.internal(id)? {
            Some(internal) => Ok(internal.downcast::<WrapperCore>().ok()),
            None => Ok(None),
        }
    }

    fn wrapper_core_of(&mut self, id: ObjectId) -> BridgeResult<Arc<WrapperCore>> {
        if let Some(core) = self.shared.wrappers.get(id) {
            return Ok(core);
        }
        let wrapper = self.wrap(id)?;
        Ok(wrapper.core().clone())
    }

    fn ensure_peer(&mut self, core: &Arc<WrapperCore>) -> BridgeResult<PeerHandle> {
        if let Some(peer) = core.peer() {
            return Ok(peer);
        }
        // The host dropped its last handle while the twin lived on;
        // revive a fresh peer through the class factory.
        let object = (core.class().factory())();
        let inner = PeerInner::new(object, core.clone());
        core.set_peer(Arc::downgrade(&inner));
        Ok(PeerHandle::new(inner))
    }

    fn wrap_fresh(
        &mut self,
        id: ObjectId,
        class: Arc<ClassInfo>,
        args: Option<&[Value]>,
    ) -> BridgeResult<(Wrapper, PeerHandle)> {
        // Root the object for the rest of this entry; a constructor may
        // allocate and trigger a collection mid-wrap.
        self.guard.keep_alive(id)?;

        let object = match (args, class.script().constructor()) {
            (Some(args), Some(ctor)) => ctor(self, args)?,
            (Some(_), None) => {
                return Err(BridgeError::UnknownMember {
                    class: class.name().to_string(),
                    name: "constructor".to_string(),
                })
            }
            (None, Some(ctor)) => ctor(self, &[])?,
            (None, None) => (class.factory())(),
        };

        let core = WrapperCore::new(
            class,
            id,
            self.shared.isolate.downgrade(),
            Arc::downgrade(self.shared),
        );
        let inner = PeerInner::new(object, core.clone());
        core.set_peer(Arc::downgrade(&inner));

        self.guard
            .set_internal(id, Some(core.clone() as Arc<dyn std::any::Any + Send + Sync>))?;
        self.guard.set_finalizer(
            id,
            make_finalizer(Arc::downgrade(self.shared), Arc::downgrade(&core)),
        )?;
        self.shared.wrappers.insert(id, &core);

        Ok((Wrapper::from_core(core), PeerHandle::new(inner)))
    }
}

fn find_native<'c>(class: &'c ClassInfo, name: &str) -> Option<&'c NativeBinding> {
    let mut current = Some(class);
    while let Some(info) = current {
        if let Some(binding) = info.native().get(name) {
            return Some(binding);
        }
        current = info.parent().map(Arc::as_ref);
    }
    None
}

fn find_method(class: &ClassInfo, name: &str) -> Option<MethodFn> {
    let mut current = Some(class);
    while let Some(info) = current {
        if let Some(method) = info.script().method(name) {
            return Some(method);
        }
        current = info.parent().map(Arc::as_ref);
    }
    None
}

fn find_accessor<'c>(class: &'c ClassInfo, name: &str) -> Option<&'c Accessor> {
    let mut current = Some(class);
    while let Some(info) = current {
        if let Some(accessor) = info.script().accessor(name) {
            return Some(accessor);
        }
        current = info.parent().map(Arc::as_ref);
    }
    None
}
