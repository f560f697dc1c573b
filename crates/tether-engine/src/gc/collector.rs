//! Mark-sweep collector with a finalizer phase
//!
//! Collection runs in three phases:
//!
//! 1. **Mark**: trace from the external roots (context globals, handle
//!    scopes) and the heap's own counted roots (strong handles, pins).
//! 2. **Finalize**: every unmarked object carrying a weak callback is
//!    condemned; its callback runs exactly once per condemnation and
//!    answers [`Finalize::Release`] or [`Finalize::Retain`]. Retained
//!    objects are pinned, keep their callback armed, and are re-marked
//!    together with everything they reference.
//! 3. **Sweep**: remaining unmarked objects are reclaimed and their
//!    slots' generations bumped.
//!
//! Callbacks run while the collector holds the heap, so they must not
//! allocate or touch other heap objects; they may only read the dying
//! object handed to them and their own captured state.

use super::heap::{ScriptHeap, ScriptObject};
use crate::value::{ObjectId, Value};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Verdict of a weak callback for a condemned object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// Let the object be reclaimed
    Release,
    /// Keep the object alive; it is pinned until explicitly unpinned
    Retain,
}

/// View of a condemned object handed to its weak callback
pub struct FinalizeRecord<'a> {
    id: ObjectId,
    object: &'a ScriptObject,
}

impl<'a> FinalizeRecord<'a> {
    /// Handle of the condemned object
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The condemned object itself
    pub fn object(&self) -> &'a ScriptObject {
        self.object
    }

    /// Copy of the object's properties, for callbacks that keep state
    /// beyond the object's lifetime
    pub fn snapshot_properties(&self) -> FxHashMap<String, Value> {
        self.object.properties().clone()
    }
}

/// Weak callback invoked when an object is condemned
pub type Finalizer = Box<dyn FnMut(FinalizeRecord<'_>) -> Finalize + Send>;

/// Collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total weak callbacks run
    pub finalizers_run: usize,

    /// Total objects kept alive by a `Retain` verdict
    pub objects_retained: usize,

    /// Total pause time
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

/// Mark-sweep collector
pub struct Collector {
    /// Live-object count that triggers an automatic collection
    threshold: usize,

    /// Initial threshold, the floor after adjustment
    initial_threshold: usize,

    /// Statistics
    stats: GcStats,
}

impl Collector {
    /// Create a collector with the given automatic-collection threshold
    /// (0 disables automatic collection)
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            initial_threshold: threshold,
            stats: GcStats::default(),
        }
    }

    /// Whether an allocation at the given live count should collect first
    pub fn should_collect(&self, live: usize) -> bool {
        self.threshold > 0 && live >= self.threshold
    }

    /// Run a full collection; `roots` are the external roots
    pub fn collect(&mut self, heap: &mut ScriptHeap, roots: &[ObjectId]) -> usize {
        let start = Instant::now();

        // Mark phase
        heap.clear_marks();
        let mut worklist: Vec<ObjectId> = Vec::with_capacity(roots.len());
        worklist.extend_from_slice(roots);
        worklist.extend(heap.counted_roots());
        while let Some(id) = worklist.pop() {
            if heap.mark(id) {
                heap.trace_refs(id, &mut worklist);
            }
        }

        // Finalizer phase
        let mut retained: Vec<ObjectId> = Vec::new();
        for id in heap.condemned_with_finalizers() {
            let Some(mut finalizer) = heap.take_finalizer(id) else {
                continue;
            };
            let decision = {
                let object = heap.get(id).expect("condemned object must be live");
                finalizer(FinalizeRecord { id, object })
            };
            self.stats.finalizers_run += 1;
            match decision {
                Finalize::Retain => {
                    heap.pin(id);
                    heap.restore_finalizer(id, finalizer);
                    retained.push(id);
                }
                Finalize::Release => drop(finalizer),
            }
        }

        // A retained object keeps everything it references alive
        let mut worklist = retained.clone();
        while let Some(id) = worklist.pop() {
            if heap.mark(id) {
                heap.trace_refs(id, &mut worklist);
            }
        }

        // Sweep phase
        let freed = heap.sweep_unmarked();

        // Update stats
        let duration = start.elapsed();
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        self.stats.objects_retained += retained.len();
        self.stats.last_pause_time = duration;
        self.stats.total_pause_time += duration;

        // Adjust threshold (grow by 2x current usage, floored at the initial value)
        if self.initial_threshold > 0 {
            self.threshold = (heap.live_count() * 2).max(self.initial_threshold);
        }

        freed
    }

    /// Collector statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn heap_and_collector() -> (ScriptHeap, Collector) {
        (ScriptHeap::new(0), Collector::new(1024))
    }

    #[test]
    fn test_collect_unrooted() {
        let (mut heap, mut collector) = heap_and_collector();
        let id = heap.allocate().unwrap();

        let freed = collector.collect(&mut heap, &[]);

        assert_eq!(freed, 1);
        assert!(!heap.contains(id));
        assert_eq!(collector.stats().collections, 1);
    }

    #[test]
    fn test_collect_rooted_survives() {
        let (mut heap, mut collector) = heap_and_collector();
        let id = heap.allocate().unwrap();

        let freed = collector.collect(&mut heap, &[id]);

        assert_eq!(freed, 0);
        assert!(heap.contains(id));
    }

    #[test]
    fn test_collect_traces_references() {
        let (mut heap, mut collector) = heap_and_collector();
        let parent = heap.allocate().unwrap();
        let child = heap.allocate().unwrap();
        let orphan = heap.allocate().unwrap();
        heap.get_mut(parent)
            .unwrap()
            .set_property("child".into(), Value::Object(child));

        let freed = collector.collect(&mut heap, &[parent]);

        assert_eq!(freed, 1);
        assert!(heap.contains(parent));
        assert!(heap.contains(child));
        assert!(!heap.contains(orphan));
    }

    #[test]
    fn test_collect_strong_count_roots() {
        let (mut heap, mut collector) = heap_and_collector();
        let id = heap.allocate().unwrap();
        heap.add_ref(id).unwrap();

        assert_eq!(collector.collect(&mut heap, &[]), 0);
        assert!(heap.contains(id));

        heap.release_ref(id);
        assert_eq!(collector.collect(&mut heap, &[]), 1);
        assert!(!heap.contains(id));
    }

    #[test]
    fn test_finalizer_release() {
        let (mut heap, mut collector) = heap_and_collector();
        let id = heap.allocate().unwrap();
        heap.get_mut(id)
            .unwrap()
            .set_property("n".into(), Value::from(7i64));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        heap.set_finalizer(
            id,
            Box::new(move |record| {
                assert_eq!(record.object().property("n"), Some(&Value::from(7i64)));
                seen2.fetch_add(1, Ordering::SeqCst);
                Finalize::Release
            }),
        )
        .unwrap();

        let freed = collector.collect(&mut heap, &[]);

        assert_eq!(freed, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!heap.contains(id));
        assert_eq!(collector.stats().finalizers_run, 1);
    }

    #[test]
    fn test_finalizer_retain_pins_object() {
        let (mut heap, mut collector) = heap_and_collector();
        let id = heap.allocate().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        heap.set_finalizer(
            id,
            Box::new(move |_| {
                // Retain the first time, release once unpinned and condemned again
                if calls2.fetch_add(1, Ordering::SeqCst) == 0 {
                    Finalize::Retain
                } else {
                    Finalize::Release
                }
            }),
        )
        .unwrap();

        // First collection retains
        assert_eq!(collector.collect(&mut heap, &[]), 0);
        assert!(heap.contains(id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Pinned objects are roots, so a second collection does not condemn
        assert_eq!(collector.collect(&mut heap, &[]), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // After unpinning the callback runs again and releases
        heap.unpin(id);
        assert_eq!(collector.collect(&mut heap, &[]), 1);
        assert!(!heap.contains(id));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(collector.stats().objects_retained, 1);
    }

    #[test]
    fn test_retained_object_keeps_children() {
        let (mut heap, mut collector) = heap_and_collector();
        let parent = heap.allocate().unwrap();
        let child = heap.allocate().unwrap();
        heap.get_mut(parent)
            .unwrap()
            .set_property("child".into(), Value::Object(child));
        heap.set_finalizer(parent, Box::new(|_| Finalize::Retain))
            .unwrap();

        collector.collect(&mut heap, &[]);

        assert!(heap.contains(parent));
        assert!(heap.contains(child));
    }

    #[test]
    fn test_threshold() {
        let collector = Collector::new(4);
        assert!(!collector.should_collect(3));
        assert!(collector.should_collect(4));

        let disabled = Collector::new(0);
        assert!(!disabled.should_collect(1_000_000));
    }
}
