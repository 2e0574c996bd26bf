//! Node flag bits shared between the model and the runtime.

/// Set when lineage has been recorded for the node.
pub const LINEAGE_TRACKED: u32 = 1 << 0;

/// Set when the node has been fused with a neighbor by the compiler.
pub const FUSED: u32 = 1 << 1;

/// Set when the node's data needs propagation.
pub const DIRTY: u32 = 1 << 2;

/// Set for nodes whose payload must never be mutated.
pub const READ_ONLY: u32 = 1 << 3;

/// Whether `flag` is set in `flags`.
#[inline]
pub fn has(flags: u32, flag: u32) -> bool {
    flags & flag != 0
}

/// `flags` with `flag` set.
#[inline]
pub fn set(flags: u32, flag: u32) -> u32 {
    flags | flag
}

/// `flags` with `flag` cleared.
#[inline]
pub fn clear(flags: u32, flag: u32) -> u32 {
    flags & !flag
}
