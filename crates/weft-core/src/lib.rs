//! # weft-core
//!
//! Core primitives for the Weft dataflow engine:
//! - Power-of-two alignment arithmetic and cache-aligned buffers
//! - Node flag bits shared between model and runtime
//! - The `WeftError` taxonomy used across every crate in the workspace

pub mod align;
pub mod error;
pub mod flags;

pub use align::{align_up, align_up_32, align_up_cache, is_aligned, AlignedBuf};
pub use align::{CACHE_LINE, PAYLOAD_ALIGN, SIMD_ALIGN};
pub use error::WeftError;

pub type Result<T> = std::result::Result<T, WeftError>;
