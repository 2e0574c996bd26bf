//! Immutable graph representation consumed by the runtime.
//!
//! Topology direction: **every id listed in a node's `topology` is an
//! incoming dependency of that node** — `B ∈ A.topology` means A runs after
//! B. The binary format does not mark the direction, so this reading is
//! normative for the whole workspace (the scheduler, the cycle detector,
//! and the compiler all assume it).

use smallvec::SmallVec;
use weft_core::{Result, WeftError};

/// Sentinel topology entry meaning "unused / padding", never a dependency.
pub const TOPO_SENTINEL: u16 = 0xFFFF;

/// Sentinel payload offset meaning "no payload segment assigned".
pub const OFFSET_UNSET: u16 = 0xFFFF;

/// Inline capacity for per-node dependency lists; almost every real graph
/// node has at most a handful of inputs.
pub type Topology = SmallVec<[u16; 4]>;

/// A single compute node in the model graph.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Unique id within the graph.
    pub id: u16,
    /// Kernel selector (index into the 256-slot registry).
    pub opcode: u8,
    /// Byte offset of this node's segment in the payload blob.
    pub in_off: u16,
    /// One-past-the-end byte offset of the segment.
    pub out_off: u16,
    /// Runtime flag bits (see `weft_core::flags`).
    pub flags: u32,
    /// Incoming dependency ids. `TOPO_SENTINEL` entries are padding.
    pub topology: Topology,
}

impl Node {
    /// Byte length of the node's payload segment, when the offsets define
    /// one (`out_off > in_off` and both offsets set).
    pub fn payload_span(&self) -> Option<usize> {
        if self.in_off < OFFSET_UNSET && self.out_off < OFFSET_UNSET && self.out_off > self.in_off
        {
            Some((self.out_off - self.in_off) as usize)
        } else {
            None
        }
    }

    /// The node's real dependencies, with sentinel padding filtered out.
    pub fn dependencies(&self) -> impl Iterator<Item = u16> + '_ {
        self.topology.iter().copied().filter(|&id| id != TOPO_SENTINEL)
    }
}

/// An immutable model: an ordered node list plus an opaque payload blob.
///
/// File order is treated as execution-friendly but never trusted; the
/// runtime recomputes dependency levels from the topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub payload: Vec<u8>,
}

impl Graph {
    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up a node by id.
    pub fn node_by_id(&self, id: u16) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check structural consistency: at least one node, unique ids,
    /// resolvable topology references, in-range payload offsets, and an
    /// acyclic dependency relation.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(WeftError::GraphInconsistent("graph has no nodes".into()));
        }

        let mut seen = std::collections::HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(WeftError::GraphInconsistent(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
        }

        for node in &self.nodes {
            for dep in node.dependencies() {
                if !seen.contains(&dep) {
                    return Err(WeftError::GraphInconsistent(format!(
                        "node {} references non-existent dependency {}",
                        node.id, dep
                    )));
                }
            }

            if node.in_off < OFFSET_UNSET && node.out_off < OFFSET_UNSET {
                if node.in_off > node.out_off {
                    return Err(WeftError::GraphInconsistent(format!(
                        "node {} has in_off {} past out_off {}",
                        node.id, node.in_off, node.out_off
                    )));
                }
                if node.out_off as usize > self.payload.len() {
                    return Err(WeftError::GraphInconsistent(format!(
                        "node {} out_off {} exceeds payload size {}",
                        node.id,
                        node.out_off,
                        self.payload.len()
                    )));
                }
            }
        }

        self.topo_order().map(|_| ())
    }

    /// Topological order of node ids (Kahn's algorithm), dependencies
    /// first. Fails with `GraphCyclic` when the order does not cover every
    /// node.
    pub fn topo_order(&self) -> Result<Vec<u16>> {
        let mut in_degree: std::collections::HashMap<u16, usize> =
            self.nodes.iter().map(|n| (n.id, 0)).collect();
        let mut successors: std::collections::HashMap<u16, Vec<u16>> =
            std::collections::HashMap::with_capacity(self.nodes.len());

        for node in &self.nodes {
            for dep in node.dependencies() {
                *in_degree.get_mut(&node.id).expect("id registered above") += 1;
                successors.entry(dep).or_default().push(node.id);
            }
        }

        // Seed with zero-in-degree nodes in graph order for a stable result.
        let mut queue: std::collections::VecDeque<u16> = self
            .nodes
            .iter()
            .filter(|n| in_degree[&n.id] == 0)
            .map(|n| n.id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(succs) = successors.get(&id) {
                for &succ in succs {
                    let deg = in_degree.get_mut(&succ).expect("successor id registered");
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .iter()
                .map(|n| n.id)
                .filter(|id| in_degree[id] > 0)
                .min()
                .unwrap_or(0);
            return Err(WeftError::GraphCyclic { node: stuck });
        }

        Ok(order)
    }

    /// Reorder `nodes` into topological order. Used by the compiler so the
    /// emitted file is execution-friendly; fails on cycles.
    pub fn sort_topological(&mut self) -> Result<()> {
        let order = self.topo_order()?;
        let mut by_id: std::collections::HashMap<u16, Node> =
            self.nodes.drain(..).map(|n| (n.id, n)).collect();
        self.nodes = order
            .into_iter()
            .map(|id| by_id.remove(&id).expect("order covers every id"))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn node(id: u16, topo: &[u16]) -> Node {
        Node {
            id,
            opcode: 0,
            in_off: 0,
            out_off: 0,
            flags: 0,
            topology: topo.iter().copied().collect(),
        }
    }

    #[test]
    fn test_payload_span() {
        let mut n = node(0, &[]);
        n.in_off = 16;
        n.out_off = 48;
        assert_eq!(n.payload_span(), Some(32));

        n.out_off = 16;
        assert_eq!(n.payload_span(), None);

        n.in_off = OFFSET_UNSET;
        n.out_off = OFFSET_UNSET;
        assert_eq!(n.payload_span(), None);
    }

    #[test]
    fn test_dependencies_filter_sentinel() {
        let n = Node {
            id: 1,
            opcode: 0,
            in_off: 0,
            out_off: 0,
            flags: 0,
            topology: smallvec![0, TOPO_SENTINEL, 2],
        };
        let deps: Vec<u16> = n.dependencies().collect();
        assert_eq!(deps, vec![0, 2]);
    }

    #[test]
    fn test_validate_rejects_empty() {
        let g = Graph::default();
        assert!(matches!(g.validate(), Err(WeftError::GraphInconsistent(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let g = Graph {
            nodes: vec![node(3, &[]), node(3, &[])],
            payload: Vec::new(),
        };
        assert!(matches!(g.validate(), Err(WeftError::GraphInconsistent(_))));
    }

    #[test]
    fn test_validate_rejects_dangling_dependency() {
        let g = Graph {
            nodes: vec![node(0, &[9])],
            payload: Vec::new(),
        };
        assert!(matches!(g.validate(), Err(WeftError::GraphInconsistent(_))));
    }

    #[test]
    fn test_validate_accepts_forward_reference() {
        // A node may depend on a node declared later in the file.
        let g = Graph {
            nodes: vec![node(0, &[1]), node(1, &[])],
            payload: Vec::new(),
        };
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds_offsets() {
        let mut n = node(0, &[]);
        n.in_off = 0;
        n.out_off = 64;
        let g = Graph { nodes: vec![n], payload: vec![0u8; 32] };
        assert!(matches!(g.validate(), Err(WeftError::GraphInconsistent(_))));
    }

    #[test]
    fn test_topo_order_chain() {
        let g = Graph {
            nodes: vec![node(0, &[]), node(1, &[0]), node(2, &[1])],
            payload: Vec::new(),
        };
        assert_eq!(g.topo_order().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_topo_order_rejects_cycle() {
        let g = Graph {
            nodes: vec![node(0, &[1]), node(1, &[0])],
            payload: Vec::new(),
        };
        assert!(matches!(g.topo_order(), Err(WeftError::GraphCyclic { .. })));
    }

    #[test]
    fn test_sort_topological_reorders() {
        let mut g = Graph {
            nodes: vec![node(2, &[1]), node(1, &[0]), node(0, &[])],
            payload: Vec::new(),
        };
        g.sort_topological().unwrap();
        let ids: Vec<u16> = g.nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
