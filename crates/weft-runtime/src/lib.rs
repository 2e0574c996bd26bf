//! # weft-runtime
//!
//! Execution runtime for the Weft dataflow engine.
//!
//! - `Arena`: one pre-sized contiguous allocation partitioned into six
//!   fixed-order regions, with bump allocators for node buffers and
//!   kernel scratch. Zero heap allocation on the execute hot path.
//! - `Scheduler`: level-partitioned task groups with completion-driven
//!   readiness, driving a pool of worker threads.
//! - `Engine`: loads a binary model, materializes per-node dual buffers,
//!   and runs passes sequentially or level-parallel.

pub mod arena;
pub mod engine;
pub mod scheduler;

pub use arena::{Arena, ArenaView, BufferRange, NodeSlot, Region, RegionKind};
pub use engine::{ArenaPlan, Engine, EngineOptions, Stats, DEFAULT_STREAMING_WINDOW};
pub use scheduler::{SchedState, Scheduler, TaskGroup};
