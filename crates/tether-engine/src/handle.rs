//! Persistent object handles
//!
//! Handle-scope locals die with their scope. References that must
//! outlive an isolate entry are promoted to one of the handle types
//! here:
//!
//! - [`Global`] holds a counted strong reference; the object survives
//!   collection until the handle is released.
//! - [`WeakRef`] does not keep the object alive; it upgrades to the
//!   object id only while the object is still live.
//!
//! Dropping a `Global` without the lock is legal from any thread: the
//! release is posted to the isolate's deferred-release queue and applied
//! on the next entry.

use crate::isolate::{IsolateGuard, IsolateRef, PostedOp};
use crate::value::ObjectId;
use crate::{EngineError, EngineResult};

/// Counted strong handle to a heap object
///
/// Not clonable; each strong reference is created under the lock with
/// [`IsolateGuard::new_global`].
pub struct Global {
    id: ObjectId,
    isolate: IsolateRef,
    released: bool,
}

impl Global {
    pub(crate) fn new(id: ObjectId, isolate: IsolateRef) -> Self {
        Self {
            id,
            isolate,
            released: false,
        }
    }

    /// Handle of the referenced object
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Resolve the handle under the lock
    pub fn get(&self, guard: &IsolateGuard<'_>) -> EngineResult<ObjectId> {
        debug_assert_eq!(guard.isolate_id(), self.isolate.id());
        if guard.is_live(self.id) {
            Ok(self.id)
        } else {
            Err(EngineError::StaleHandle(self.id))
        }
    }

    /// Release the strong reference immediately, under the lock
    pub fn release(mut self, guard: &mut IsolateGuard<'_>) {
        debug_assert_eq!(guard.isolate_id(), self.isolate.id());
        guard.release_strong(self.id);
        self.released = true;
    }
}

impl Drop for Global {
    fn drop(&mut self) {
        if !self.released {
            // The lock may be held elsewhere, or even by this thread;
            // hand the release to the queue instead of taking it
            self.isolate.post(PostedOp::ReleaseGlobal(self.id));
        }
    }
}

/// Weak handle to a heap object
#[derive(Clone)]
pub struct WeakRef {
    id: ObjectId,
    isolate: IsolateRef,
}

impl WeakRef {
    pub(crate) fn new(id: ObjectId, isolate: IsolateRef) -> Self {
        Self { id, isolate }
    }

    /// Handle of the referenced object, live or not
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Resolve to the object id if the object is still live
    pub fn upgrade(&self, guard: &IsolateGuard<'_>) -> Option<ObjectId> {
        debug_assert_eq!(guard.isolate_id(), self.isolate.id());
        if guard.is_live(self.id) {
            Some(self.id)
        } else {
            None
        }
    }
}
