//! Garbage-collected object heap
//!
//! This module provides the slotted heap and the mark-sweep collector
//! behind every isolate.
//!
//! # Architecture
//!
//! - **ScriptObject**: property map plus an optional type tag and an
//!   opaque internal slot for embedder data
//! - **ScriptHeap**: slot arena with a free list, per-slot generations,
//!   strong-reference counts and pin flags
//! - **Collector**: mark-sweep algorithm with a finalizer phase in which
//!   weak callbacks may retain the dying object
//!
//! # Slot Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Slot                                         │
//! │  - generation: u32   (bumped on reclaim)     │
//! │  - strong: u32       (global handle count)   │
//! │  - pinned: bool      (finalizer keep-alive)  │
//! │  - finalizer: Option<Finalizer>              │
//! │  - object: Option<ScriptObject>              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! An `ObjectId` pairs a slot index with the generation it was minted
//! against; lookups on reclaimed slots miss instead of aliasing whatever
//! object reuses the slot later.

mod collector;
mod heap;

// Re-export public types
pub use collector::{Collector, Finalize, FinalizeRecord, Finalizer, GcStats};
pub use heap::{ScriptHeap, ScriptObject};
