//! Isolates and the engine lock discipline
//!
//! An isolate is one single-threaded engine instance. Any number of host
//! threads may hold an [`Isolate`] handle, but exactly one thread is
//! inside at a time: every operation goes through an [`IsolateGuard`]
//! obtained from [`Isolate::enter`], which blocks until the lock is
//! free. The lock is not re-entrant; entering twice on the same thread
//! deadlocks, as it would in any embedding of this shape.
//!
//! Work that originates off-lock (host-side handle drops, peer
//! teardown) must not try to take the lock. It is posted to the
//! isolate's deferred-release queue instead and applied the next time
//! any thread enters.

use crate::context::{Context, ContextId};
use crate::gc::{Collector, Finalizer, GcStats, ScriptHeap};
use crate::handle::{Global, WeakRef};
use crate::value::{ObjectId, Value};
use crate::{EngineError, EngineResult};
use crossbeam::queue::SegQueue;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolateId(u64);

impl IsolateId {
    /// Create a new unique isolate ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        IsolateId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for IsolateId {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for creating an isolate
#[derive(Debug, Clone)]
pub struct IsolateOptions {
    /// Maximum live objects (0 = unlimited)
    pub max_objects: usize,

    /// Live-object count that triggers automatic collection
    /// (0 disables automatic collection)
    pub gc_threshold: usize,
}

impl Default for IsolateOptions {
    fn default() -> Self {
        Self {
            max_objects: 0,
            gc_threshold: 1024,
        }
    }
}

impl IsolateOptions {
    /// Options with a live-object budget
    pub fn with_max_objects(max_objects: usize) -> Self {
        Self {
            max_objects,
            ..Default::default()
        }
    }

    /// Options with a specific automatic-collection threshold
    pub fn with_gc_threshold(gc_threshold: usize) -> Self {
        Self {
            gc_threshold,
            ..Default::default()
        }
    }
}

/// Work posted to the deferred-release queue
///
/// Posted operations are applied, in order, the next time a thread
/// enters the isolate. [`PostedOp::Callback`] closures run while the
/// lock is held and therefore must not enter the isolate themselves.
pub enum PostedOp {
    /// Drop one strong reference from an object
    ReleaseGlobal(ObjectId),
    /// Clear the keep-alive pin on an object
    Unpin(ObjectId),
    /// Run an embedder cleanup callback under the lock
    Callback(Box<dyn FnOnce() + Send>),
}

/// State behind the isolate lock
struct IsolateState {
    /// Object heap
    heap: ScriptHeap,

    /// Contexts hosted by this isolate
    contexts: FxHashMap<ContextId, Context>,

    /// Handle-scope frames; locals rooted per entry
    frames: Vec<Vec<ObjectId>>,

    /// Context the current entry is executing in
    current: Option<ContextId>,

    /// Collector and its bookkeeping
    collector: Collector,
}

struct IsolateShared {
    /// Isolate ID
    id: IsolateId,

    /// The engine lock and everything behind it
    state: Mutex<IsolateState>,

    /// Deferred-release queue, pushed without the lock
    queue: SegQueue<PostedOp>,

    /// Set once by `dispose`
    disposed: AtomicBool,
}

/// A single-threaded engine instance
///
/// Cloning an `Isolate` clones the handle, not the engine; all clones
/// share one heap and one lock.
#[derive(Clone)]
pub struct Isolate {
    shared: Arc<IsolateShared>,
}

impl Isolate {
    /// Create a new isolate
    pub fn new(options: IsolateOptions) -> Self {
        Self {
            shared: Arc::new(IsolateShared {
                id: IsolateId::new(),
                state: Mutex::new(IsolateState {
                    heap: ScriptHeap::new(options.max_objects),
                    contexts: FxHashMap::default(),
                    frames: Vec::new(),
                    current: None,
                    collector: Collector::new(options.gc_threshold),
                }),
                queue: SegQueue::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the isolate ID
    pub fn id(&self) -> IsolateId {
        self.shared.id
    }

    /// A weak handle that can outlive the isolate and post queue work
    pub fn downgrade(&self) -> IsolateRef {
        IsolateRef {
            id: self.shared.id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Enter the isolate, blocking until the lock is free
    ///
    /// Pending deferred-release work is applied before the guard is
    /// handed out.
    pub fn enter(&self) -> EngineResult<IsolateGuard<'_>> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        let state = self.shared.state.lock();
        self.finish_entry(state)
    }

    /// Enter the isolate if the lock is free right now
    pub fn try_enter(&self) -> EngineResult<Option<IsolateGuard<'_>>> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        match self.shared.state.try_lock() {
            Some(state) => self.finish_entry(state).map(Some),
            None => Ok(None),
        }
    }

    fn finish_entry<'a>(
        &'a self,
        state: MutexGuard<'a, IsolateState>,
    ) -> EngineResult<IsolateGuard<'a>> {
        // Dispose may have won the lock between the flag check and ours
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        let mut guard = IsolateGuard {
            shared: &self.shared,
            state,
        };
        guard.drain_posted();
        guard.state.frames.push(Vec::new());
        Ok(guard)
    }

    /// Post work to the deferred-release queue without taking the lock
    ///
    /// Returns false if the isolate is already disposed.
    pub fn post(&self, op: PostedOp) -> bool {
        if self.shared.disposed.load(Ordering::Acquire) {
            return false;
        }
        self.shared.queue.push(op);
        true
    }

    /// Tear the isolate down
    ///
    /// Blocks until the current guard (if any) is released, then drops
    /// every context and object. All outstanding handles go stale and
    /// further `enter` calls fail. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.shared.state.lock();
        while self.shared.queue.pop().is_some() {}
        state.frames.clear();
        state.current = None;
        state.contexts.clear();
        state.heap.clear();
    }

    /// Whether `dispose` has run
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}

/// A weak, thread-safe reference to an isolate
///
/// Held by handles and embedder objects whose drop may run on any
/// thread. Posting through a dead or disposed isolate is a no-op.
#[derive(Clone)]
pub struct IsolateRef {
    id: IsolateId,
    shared: Weak<IsolateShared>,
}

impl IsolateRef {
    /// ID of the referenced isolate
    pub fn id(&self) -> IsolateId {
        self.id
    }

    /// Upgrade back to a full handle
    pub fn upgrade(&self) -> Option<Isolate> {
        let shared = self.shared.upgrade()?;
        if shared.disposed.load(Ordering::Acquire) {
            return None;
        }
        Some(Isolate { shared })
    }

    /// Post work to the deferred-release queue
    ///
    /// Returns false if the isolate is gone or disposed.
    pub fn post(&self, op: PostedOp) -> bool {
        match self.shared.upgrade() {
            Some(shared) if !shared.disposed.load(Ordering::Acquire) => {
                shared.queue.push(op);
                true
            }
            _ => false,
        }
    }
}

/// Exclusive entry into an isolate
///
/// All heap, context and handle operations go through the guard. The
/// guard holds the engine lock; dropping it releases the lock and
/// unroots every handle-scope local of this entry.
pub struct IsolateGuard<'a> {
    shared: &'a Arc<IsolateShared>,
    state: MutexGuard<'a, IsolateState>,
}

impl<'a> IsolateGuard<'a> {
    /// ID of the entered isolate
    pub fn isolate_id(&self) -> IsolateId {
        self.shared.id
    }

    fn drain_posted(&mut self) {
        while let Some(op) = self.shared.queue.pop() {
            match op {
                PostedOp::ReleaseGlobal(id) => self.state.heap.release_ref(id),
                PostedOp::Unpin(id) => self.state.heap.unpin(id),
                PostedOp::Callback(callback) => callback(),
            }
        }
    }

    fn isolate_ref(&self) -> IsolateRef {
        IsolateRef {
            id: self.shared.id,
            shared: Arc::downgrade(self.shared),
        }
    }

    // --- contexts ---

    /// Create a context in this isolate
    pub fn create_context(&mut self) -> ContextId {
        let context = Context::new();
        let id = context.id();
        self.state.contexts.insert(id, context);
        id
    }

    /// Destroy a context and drop its globals
    pub fn destroy_context(&mut self, id: ContextId) -> EngineResult<()> {
        if self.state.contexts.remove(&id).is_none() {
            return Err(EngineError::ContextNotReady);
        }
        if self.state.current == Some(id) {
            self.state.current = None;
        }
        Ok(())
    }

    /// Make a context current for the rest of this entry
    pub fn enter_context(&mut self, id: ContextId) -> EngineResult<()> {
        if !self.state.contexts.contains_key(&id) {
            return Err(EngineError::ContextNotReady);
        }
        self.state.current = Some(id);
        Ok(())
    }

    /// Leave the current context
    pub fn exit_context(&mut self) {
        self.state.current = None;
    }

    /// The context the current entry is executing in
    pub fn current_context(&self) -> EngineResult<ContextId> {
        self.state.current.ok_or(EngineError::ContextNotReady)
    }

    /// Whether the context exists
    pub fn has_context(&self, id: ContextId) -> bool {
        self.state.contexts.contains_key(&id)
    }

    // --- globals (through the current context) ---

    /// Set a global in the current context
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) -> EngineResult<()> {
        let id = self.current_context()?;
        let context = self
            .state
            .contexts
            .get_mut(&id)
            .expect("current context must exist");
        context.set_global(name.into(), value);
        Ok(())
    }

    /// Look up a global in the current context
    pub fn global(&self, name: &str) -> EngineResult<Option<Value>> {
        let id = self.current_context()?;
        let context = self
            .state
            .contexts
            .get(&id)
            .expect("current context must exist");
        Ok(context.global(name).cloned())
    }

    /// Remove a global from the current context
    pub fn remove_global(&mut self, name: &str) -> EngineResult<bool> {
        let id = self.current_context()?;
        let context = self
            .state
            .contexts
            .get_mut(&id)
            .expect("current context must exist");
        Ok(context.remove_global(name))
    }

    // --- objects ---

    /// Allocate an empty object in the current context
    ///
    /// The object is rooted in the innermost handle scope until that
    /// scope (or the entry itself) ends. May trigger a collection first
    /// when the automatic threshold is reached.
    pub fn alloc_object(&mut self) -> EngineResult<ObjectId> {
        self.current_context()?;
        if self
            .state
            .collector
            .should_collect(self.state.heap.live_count())
        {
            self.run_collection();
        }
        let id = self.state.heap.allocate()?;
        if let Some(frame) = self.state.frames.last_mut() {
            frame.push(id);
        }
        Ok(id)
    }

    /// Whether the handle refers to a live object
    pub fn is_live(&self, id: ObjectId) -> bool {
        self.state.heap.contains(id)
    }

    /// Native type tag of an object
    pub fn type_tag(&self, id: ObjectId) -> EngineResult<Option<Arc<str>>> {
        match self.state.heap.get(id) {
            Some(object) => Ok(object.type_tag().cloned()),
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Tag an object with the native type it was created for
    pub fn set_type_tag(&mut self, id: ObjectId, tag: impl Into<Arc<str>>) -> EngineResult<()> {
        match self.state.heap.get_mut(id) {
            Some(object) => {
                object.set_type_tag(tag.into());
                Ok(())
            }
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Read a property
    pub fn get_property(&self, id: ObjectId, name: &str) -> EngineResult<Option<Value>> {
        match self.state.heap.get(id) {
            Some(object) => Ok(object.property(name).cloned()),
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Write a property
    pub fn set_property(
        &mut self,
        id: ObjectId,
        name: impl Into<String>,
        value: Value,
    ) -> EngineResult<()> {
        match self.state.heap.get_mut(id) {
            Some(object) => {
                object.set_property(name.into(), value);
                Ok(())
            }
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Delete a property, returning whether it existed
    pub fn delete_property(&mut self, id: ObjectId, name: &str) -> EngineResult<bool> {
        match self.state.heap.get_mut(id) {
            Some(object) => Ok(object.delete_property(name)),
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Names of all properties on an object
    pub fn property_names(&self, id: ObjectId) -> EngineResult<Vec<String>> {
        match self.state.heap.get(id) {
            Some(object) => Ok(object.properties().keys().cloned().collect()),
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Copy of all properties on an object
    pub fn snapshot_properties(
        &self,
        id: ObjectId,
    ) -> EngineResult<FxHashMap<String, Value>> {
        match self.state.heap.get(id) {
            Some(object) => Ok(object.properties().clone()),
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Embedder data attached to an object
    pub fn internal(&self, id: ObjectId) -> EngineResult<Option<Arc<dyn Any + Send + Sync>>> {
        match self.state.heap.get(id) {
            Some(object) => Ok(object.internal().cloned()),
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Attach embedder data to an object
    pub fn set_internal(
        &mut self,
        id: ObjectId,
        data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> EngineResult<()> {
        match self.state.heap.get_mut(id) {
            Some(object) => {
                object.set_internal(data);
                Ok(())
            }
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    // --- handle scopes ---

    /// Run `f` inside a nested handle scope
    ///
    /// Objects allocated (or kept alive) inside the scope are unrooted
    /// when it ends. References that must outlive the scope have to be
    /// promoted to a [`Global`] or stored somewhere reachable first.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.state.frames.push(Vec::new());
        let result = f(self);
        self.state.frames.pop();
        result
    }

    /// Root an object in the innermost handle scope
    pub fn keep_alive(&mut self, id: ObjectId) -> EngineResult<()> {
        if !self.state.heap.contains(id) {
            return Err(EngineError::StaleHandle(id));
        }
        if let Some(frame) = self.state.frames.last_mut() {
            frame.push(id);
        }
        Ok(())
    }

    // --- handles ---

    /// Promote an object to a counted strong handle
    pub fn new_global(&mut self, id: ObjectId) -> EngineResult<Global> {
        self.state.heap.add_ref(id)?;
        Ok(Global::new(id, self.isolate_ref()))
    }

    /// Create a weak handle to an object
    pub fn new_weak(&mut self, id: ObjectId) -> EngineResult<WeakRef> {
        if !self.state.heap.contains(id) {
            return Err(EngineError::StaleHandle(id));
        }
        Ok(WeakRef::new(id, self.isolate_ref()))
    }

    /// Install the weak callback for an object
    ///
    /// The callback runs when the collector condemns the object; see
    /// [`crate::gc::Finalize`] for the verdicts it may answer.
    pub fn set_finalizer(&mut self, id: ObjectId, finalizer: Finalizer) -> EngineResult<()> {
        self.state.heap.set_finalizer(id, finalizer)
    }

    /// Remove the weak callback for an object
    pub fn clear_finalizer(&mut self, id: ObjectId) {
        self.state.heap.clear_finalizer(id);
    }

    /// Clear the keep-alive pin left by a `Retain` verdict
    pub fn unpin(&mut self, id: ObjectId) {
        self.state.heap.unpin(id);
    }

    pub(crate) fn release_strong(&mut self, id: ObjectId) {
        self.state.heap.release_ref(id);
    }

    // --- collection ---

    /// Run a full collection now, returning the number of objects freed
    pub fn collect_garbage(&mut self) -> usize {
        self.run_collection()
    }

    fn run_collection(&mut self) -> usize {
        // Collect roots first to avoid borrowing the heap during the trace
        let mut roots: Vec<ObjectId> = Vec::new();
        for frame in &self.state.frames {
            roots.extend_from_slice(frame);
        }
        for context in self.state.contexts.values() {
            for value in context.globals().values() {
                if let Value::Object(id) = value {
                    roots.push(*id);
                }
            }
        }

        let state = &mut *self.state;
        state.collector.collect(&mut state.heap, &roots)
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.state.collector.stats().clone()
    }

    /// Number of live objects
    pub fn live_objects(&self) -> usize {
        self.state.heap.live_count()
    }
}

impl Drop for IsolateGuard<'_> {
    fn drop(&mut self) {
        self.state.frames.clear();
        self.state.current = None;
    }
}
