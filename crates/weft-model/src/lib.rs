//! # weft-model
//!
//! Immutable graph model for the Weft dataflow engine plus the `.weftb`
//! binary formats the runtime consumes.
//!
//! A model is an ordered list of fixed-schema nodes and one opaque payload
//! blob. Nodes reference payload segments by byte offset and declare their
//! incoming dependencies in a topology list; the graph must be acyclic.

pub mod binary;
pub mod graph;

pub use binary::{detect, preferred_variant, read, read_with, write, Variant, VERSION};
pub use graph::{Graph, Node, Topology, OFFSET_UNSET, TOPO_SENTINEL};
