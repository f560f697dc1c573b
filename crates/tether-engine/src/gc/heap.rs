//! Slot-arena heap for script objects
//!
//! This module provides the storage layer: allocation, generational
//! lookup, strong-reference accounting and slot reclamation. The
//! collection algorithm lives in [`super::collector`].

use super::collector::Finalizer;
use crate::value::{ObjectId, Value};
use crate::{EngineError, EngineResult};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;

/// A heap-managed script object
///
/// Objects carry a property map, an optional type tag naming the native
/// class they were created for, and an opaque internal slot the embedder
/// can attach host data to. The internal slot is not traced; as far as
/// the collector is concerned it is a leaf.
pub struct ScriptObject {
    /// Native type tag, if the object was created for a registered class
    type_tag: Option<Arc<str>>,

    /// Named properties
    properties: FxHashMap<String, Value>,

    /// Embedder data (not traced)
    internal: Option<Arc<dyn Any + Send + Sync>>,
}

impl ScriptObject {
    pub(crate) fn new() -> Self {
        Self {
            type_tag: None,
            properties: FxHashMap::default(),
            internal: None,
        }
    }

    /// Native type tag, if any
    pub fn type_tag(&self) -> Option<&Arc<str>> {
        self.type_tag.as_ref()
    }

    pub(crate) fn set_type_tag(&mut self, tag: Arc<str>) {
        self.type_tag = Some(tag);
    }

    /// Look up a property
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub(crate) fn set_property(&mut self, name: String, value: Value) {
        self.properties.insert(name, value);
    }

    pub(crate) fn delete_property(&mut self, name: &str) -> bool {
        self.properties.remove(name).is_some()
    }

    /// All properties
    pub fn properties(&self) -> &FxHashMap<String, Value> {
        &self.properties
    }

    /// Embedder data attached to this object
    pub fn internal(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.internal.as_ref()
    }

    pub(crate) fn set_internal(&mut self, data: Option<Arc<dyn Any + Send + Sync>>) {
        self.internal = data;
    }
}

/// One arena slot
struct Slot {
    /// Generation of the slot; bumped every time the slot is reclaimed
    generation: u32,

    /// The object, or `None` while the slot sits on the free list
    object: Option<ScriptObject>,

    /// Mark bit for the current collection cycle
    marked: bool,

    /// Strong references held through global handles
    strong: u32,

    /// Keep-alive set by a finalizer that answered `Retain`
    pinned: bool,

    /// Weak callback invoked when the object is condemned
    finalizer: Option<Finalizer>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            generation: 0,
            object: None,
            marked: false,
            strong: 0,
            pinned: false,
            finalizer: None,
        }
    }

    fn is_live(&self) -> bool {
        self.object.is_some()
    }
}

/// Slot-arena heap
pub struct ScriptHeap {
    /// All slots, live and free
    slots: Vec<Slot>,

    /// Indices of reclaimed slots available for reuse
    free: Vec<u32>,

    /// Number of live objects
    live: usize,

    /// Maximum live objects (0 = unlimited)
    max_objects: usize,
}

impl ScriptHeap {
    /// Create a new heap
    pub fn new(max_objects: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_objects,
        }
    }

    /// Allocate an empty object
    pub fn allocate(&mut self) -> EngineResult<ObjectId> {
        // Check object budget
        if self.max_objects > 0 && self.live >= self.max_objects {
            return Err(EngineError::Allocation {
                live: self.live,
                limit: self.max_objects,
            });
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::empty());
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.object = Some(ScriptObject::new());
        slot.marked = false;
        slot.strong = 0;
        slot.pinned = false;
        slot.finalizer = None;
        self.live += 1;

        Ok(ObjectId::new(index, slot.generation))
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation == id.generation() && slot.is_live() {
            Some(slot)
        } else {
            None
        }
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation == id.generation() && slot.is_live() {
            Some(slot)
        } else {
            None
        }
    }

    /// Whether the handle still refers to a live object
    pub fn contains(&self, id: ObjectId) -> bool {
        self.slot(id).is_some()
    }

    /// Look up a live object
    pub fn get(&self, id: ObjectId) -> Option<&ScriptObject> {
        self.slot(id).and_then(|s| s.object.as_ref())
    }

    /// Look up a live object mutably
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ScriptObject> {
        self.slot_mut(id).and_then(|s| s.object.as_mut())
    }

    /// Add a strong reference (global handle)
    pub fn add_ref(&mut self, id: ObjectId) -> EngineResult<()> {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.strong += 1;
                Ok(())
            }
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Drop a strong reference; stale handles are ignored
    pub fn release_ref(&mut self, id: ObjectId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.strong = slot.strong.saturating_sub(1);
        }
    }

    /// Clear the keep-alive pin; stale handles are ignored
    pub fn unpin(&mut self, id: ObjectId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.pinned = false;
        }
    }

    /// Install the weak callback for an object (replacing any previous one)
    pub fn set_finalizer(&mut self, id: ObjectId, finalizer: Finalizer) -> EngineResult<()> {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.finalizer = Some(finalizer);
                Ok(())
            }
            None => Err(EngineError::StaleHandle(id)),
        }
    }

    /// Remove the weak callback for an object
    pub fn clear_finalizer(&mut self, id: ObjectId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.finalizer = None;
        }
    }

    /// Number of live objects
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Total slots ever created
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over live object handles
    pub fn iter_live(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            if slot.is_live() {
                Some(ObjectId::new(i as u32, slot.generation))
            } else {
                None
            }
        })
    }

    /// Reclaim everything, used on dispose
    ///
    /// Drops all objects (and whatever their internal slots hold) and
    /// bumps every generation so outstanding handles go stale.
    pub fn clear(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_live() {
                slot.object = None;
                slot.finalizer = None;
                slot.strong = 0;
                slot.pinned = false;
                slot.generation += 1;
                self.free.push(i as u32);
            }
        }
        self.live = 0;
    }

    // --- collector interface ---

    pub(crate) fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }

    /// Mark a slot; returns false if the handle is stale or already marked
    pub(crate) fn mark(&mut self, id: ObjectId) -> bool {
        match self.slot_mut(id) {
            Some(slot) if !slot.marked => {
                slot.marked = true;
                true
            }
            _ => false,
        }
    }

    /// Push every object reference held by `id`'s properties onto `out`
    pub(crate) fn trace_refs(&self, id: ObjectId, out: &mut Vec<ObjectId>) {
        if let Some(object) = self.get(id) {
            for value in object.properties.values() {
                if let Value::Object(child) = value {
                    out.push(*child);
                }
            }
        }
    }

    /// Handles of slots rooted by strong counts or pins
    pub(crate) fn counted_roots(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_live() && (slot.strong > 0 || slot.pinned))
            .map(|(i, slot)| ObjectId::new(i as u32, slot.generation))
            .collect()
    }

    /// Unmarked live slots that carry a finalizer
    pub(crate) fn condemned_with_finalizers(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_live() && !slot.marked && slot.finalizer.is_some())
            .map(|(i, slot)| ObjectId::new(i as u32, slot.generation))
            .collect()
    }

    pub(crate) fn take_finalizer(&mut self, id: ObjectId) -> Option<Finalizer> {
        self.slot_mut(id).and_then(|slot| slot.finalizer.take())
    }

    pub(crate) fn restore_finalizer(&mut self, id: ObjectId, finalizer: Finalizer) {
        if let Some(slot) = self.slot_mut(id) {
            slot.finalizer = Some(finalizer);
        }
    }

    pub(crate) fn pin(&mut self, id: ObjectId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.pinned = true;
        }
    }

    /// Free all unmarked live slots, returning how many were reclaimed
    pub(crate) fn sweep_unmarked(&mut self) -> usize {
        let mut freed = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_live() && !slot.marked {
                slot.object = None;
                slot.finalizer = None;
                slot.strong = 0;
                slot.pinned = false;
                slot.generation += 1;
                self.free.push(i as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        freed
    }
}
