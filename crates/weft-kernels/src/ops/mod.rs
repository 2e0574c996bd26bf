//! Reference kernel implementations.
//!
//! Every kernel has the registry signature `fn(&mut [u8])`: an in-place
//! transform over packed little-endian 32-bit lanes. Kernels never
//! allocate, never keep the slice past the call, and decline (return
//! without mutating) when a header declares more data than the buffer
//! holds.

pub mod activation;
pub mod conv;
pub mod elementwise;
pub mod matmul;
pub mod norm;
pub mod reduce;

/// The no-op kernel: used for padding nodes and unregistered opcodes.
pub fn noop(_data: &mut [u8]) {}
