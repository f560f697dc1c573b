//! Lifecycle reconciliation between the two collectors
//!
//! Host and engine reclaim memory independently: the host drops peers
//! whenever their last [`PeerHandle`](crate::PeerHandle) goes away, the
//! engine condemns script twins whenever they become unreachable. The
//! weak callback installed on every wrapped object is where the two
//! meet. On condemnation it checks the host side:
//!
//! - Peer still alive: the configured [`ReclaimPolicy`] decides whether
//!   the twin is kept (pinned until the peer drops) or detached behind
//!   a property snapshot.
//! - Peer gone: the pairing is released, its identity-table entry
//!   removed, and the twin reclaimed.
//!
//! The callback runs inside the engine's collection pause, so it only
//! touches bridge-side state and the condemned object handed to it.

use std::sync::Weak;

use tether_engine::{Finalize, Finalizer};

use crate::engine::EngineShared;
use crate::wrapper::WrapperCore;

/// What happens to a script twin condemned while its host peer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimPolicy {
    /// Keep the twin alive until the peer drops
    Resurrect,
    /// Snapshot the twin's properties and let it go
    Detach,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        ReclaimPolicy::Resurrect
    }
}

/// Weak callback wired onto every wrapped object
pub(crate) fn make_finalizer(engine: Weak<EngineShared>, core: Weak<WrapperCore>) -> Finalizer {
    Box::new(move |record| {
        let core = match core.upgrade() {
            Some(core) => core,
            // Wrapper core already gone, nothing left to reconcile
            None => return Finalize::Release,
        };
        let shared = match engine.upgrade() {
            Some(shared) => shared,
            None => {
                core.mark_released();
                return Finalize::Release;
            }
        };

        if core.peer_alive() {
            return match shared.policy() {
                ReclaimPolicy::Resurrect => Finalize::Retain,
                ReclaimPolicy::Detach => {
                    core.detach(record.snapshot_properties());
                    shared.wrappers().remove(record.id());
                    Finalize::Release
                }
            };
        }

        shared.wrappers().remove(record.id());
        core.mark_released();
        Finalize::Release
    })
}
