//! Execution engine: loads a binary model, lays out the arena, and drives
//! passes over the node graph.
//!
//! A pass stages each node's `prev` state into its `prop` buffer, runs the
//! node's kernel in place on `prop`, then swaps the two so the fresh bytes
//! become `prev` for successors and for the next pass. Streaming mode runs
//! passes through the level scheduler on a worker pool; otherwise nodes
//! run sequentially in ascending level order on the calling thread.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use weft_core::{align_up, align_up_32, align_up_cache, Result, WeftError, CACHE_LINE};
use weft_kernels::Registry;
use weft_model::{Graph, Topology};

use crate::arena::{Arena, BufferRange, NodeSlot};
use crate::scheduler::Scheduler;

/// Streaming window size used when the caller does not request one.
pub const DEFAULT_STREAMING_WINDOW: usize = 4096;

/// Smallest scratch region the auto-sizer will lay out.
const MIN_SCRATCH: usize = 1024;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker threads for streaming passes. Clamped to at least 1.
    pub workers: usize,
    /// Total arena bytes; 0 lets the engine compute the minimum.
    pub arena_size: usize,
    /// Keep per-opcode counters and latency averages.
    pub enable_stats: bool,
    /// Drive passes through the level scheduler.
    pub streaming: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            arena_size: 0,
            enable_stats: false,
            streaming: true,
        }
    }
}

/// Caller-requested arena region sizes; zero fields are auto-computed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArenaPlan {
    pub node_payloads: usize,
    pub scratch: usize,
    pub streaming_input: usize,
}

/// Read-only execution statistics snapshot.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Stats {
    pub total_passes: u64,
    pub average_latency: Duration,
    pub per_opcode_count: HashMap<u8, u64>,
    pub unknown_opcodes: u64,
    pub arena_utilization: f64,
}

#[derive(Debug)]
struct StatsAcc {
    total_passes: u64,
    average_latency: Duration,
    per_opcode: Box<[u64; 256]>,
    unknown_opcodes: u64,
    arena_utilization: f64,
}

impl StatsAcc {
    fn new() -> Self {
        Self {
            total_passes: 0,
            average_latency: Duration::ZERO,
            per_opcode: Box::new([0; 256]),
            unknown_opcodes: 0,
            arena_utilization: 0.0,
        }
    }
}

/// Top-level coordinator owning the graph, arena, registry, and scheduler.
#[derive(Debug)]
pub struct Engine {
    graph: Graph,
    registry: Registry,
    arena: Arena,
    topologies: Vec<Topology>,
    index_of: HashMap<u16, usize>,
    exec_order: Vec<u16>,
    scheduler: Option<Scheduler>,
    opts: EngineOptions,
    stats: Mutex<StatsAcc>,
}

impl Engine {
    /// Read a `.weftb` file and build an engine with the reference kernel
    /// registry.
    pub fn load(path: impl AsRef<Path>, opts: EngineOptions) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let graph = weft_model::read(&data)?;
        tracing::info!(
            nodes = graph.node_count(),
            payload = graph.payload.len(),
            "loaded model {}",
            path.as_ref().display()
        );
        Self::from_graph(graph, opts)
    }

    /// Build an engine with the reference kernel registry.
    pub fn from_graph(graph: Graph, opts: EngineOptions) -> Result<Self> {
        Self::with_registry(graph, Registry::with_reference_kernels(), opts)
    }

    /// Build an engine with a caller-supplied registry and auto-sized
    /// arena regions.
    pub fn with_registry(graph: Graph, registry: Registry, opts: EngineOptions) -> Result<Self> {
        Self::with_plan(graph, registry, opts, ArenaPlan::default())
    }

    /// Build an engine with explicit arena region sizes. Zero plan fields
    /// fall back to auto-sizing.
    pub fn with_plan(
        graph: Graph,
        registry: Registry,
        opts: EngineOptions,
        plan: ArenaPlan,
    ) -> Result<Self> {
        graph.validate()?;
        let scheduler = Scheduler::new(&graph)?;
        let exec_order = scheduler.sequential_order();
        let level_count = scheduler.groups().len();

        let node_payloads = if plan.node_payloads > 0 {
            plan.node_payloads
        } else {
            graph
                .nodes
                .iter()
                .map(|n| 2 * align_up_cache(node_payload_size(n, &registry)))
                .sum()
        };
        let scratch = if plan.scratch > 0 {
            plan.scratch
        } else {
            align_up_32((node_payloads / 4).max(MIN_SCRATCH))
        };
        let streaming_input = if !opts.streaming {
            0
        } else if plan.streaming_input > 0 {
            plan.streaming_input
        } else {
            DEFAULT_STREAMING_WINDOW
        };

        let mut arena = Arena::new(
            opts.arena_size,
            &graph.payload,
            graph.nodes.len(),
            node_payloads,
            scratch,
            streaming_input,
        )?;

        let mut topologies = Vec::with_capacity(graph.nodes.len());
        let mut index_of = HashMap::with_capacity(graph.nodes.len());
        for (i, node) in graph.nodes.iter().enumerate() {
            let size = node_payload_size(node, &registry);
            // Buffers span the node's payload size rounded to whole 32-bit
            // lanes; the allocation itself is cache-line sized so every
            // buffer starts on its own cache line.
            let logical = align_up(size, 4);
            let aligned = align_up_cache(size);
            let prev_alloc = arena.alloc_node_payload(aligned, CACHE_LINE)?;
            let prop_alloc = arena.alloc_node_payload(aligned, CACHE_LINE)?;
            let prev = BufferRange { offset: prev_alloc.offset, len: logical as u32 };
            let prop = BufferRange { offset: prop_alloc.offset, len: logical as u32 };
            arena.seed_from_payload(node.in_off as usize, node.out_off as usize, prev);
            *arena.node_slot(i) = NodeSlot::new(node.opcode, node.flags, prev, prop);
            topologies.push(node.dependencies().collect());
            index_of.insert(node.id, i);
        }

        tracing::info!(
            nodes = graph.node_count(),
            levels = level_count,
            arena_bytes = arena.total_size(),
            streaming = opts.streaming,
            "engine initialized"
        );

        Ok(Self {
            graph,
            registry,
            arena,
            topologies,
            index_of,
            exec_order,
            scheduler: opts.streaming.then_some(scheduler),
            opts,
            stats: Mutex::new(StatsAcc::new()),
        })
    }

    /// Run one pass over the graph.
    pub fn execute(&mut self) -> Result<()> {
        let start = Instant::now();
        self.arena.reset_scratch();

        let view = self.arena.view();
        let registry = &self.registry;
        let index_of = &self.index_of;
        let enable_stats = self.opts.enable_stats;
        let stats = &self.stats;

        let exec = |id: u16| {
            let idx = index_of[&id];
            // Sound: the scheduler guarantees only one worker touches a
            // node's slot and buffers at a time.
            let slot = unsafe { view.slot_mut(idx) };
            run_node(&view, slot, registry, enable_stats, stats);
        };

        if self.opts.streaming {
            let workers = self.opts.workers.max(1);
            let scheduler =
                self.scheduler.as_mut().ok_or(WeftError::SchedulerNotInitialized)?;
            scheduler.run(workers, exec);
        } else {
            for &id in &self.exec_order {
                exec(id);
            }
        }

        let elapsed = start.elapsed();
        if enable_stats {
            let mut acc = self.stats.lock();
            acc.total_passes += 1;
            acc.average_latency = if acc.total_passes == 1 {
                elapsed
            } else {
                let n = acc.total_passes as u128;
                let prev = acc.average_latency.as_nanos();
                Duration::from_nanos(((prev * (n - 1) + elapsed.as_nanos()) / n) as u64)
            };
            acc.arena_utilization = self.arena.utilization();
        }
        tracing::debug!(micros = elapsed.as_micros() as u64, "pass complete");
        Ok(())
    }

    /// Stamp `input` into the streaming window, run one pass, and copy up
    /// to `output.len()` bytes of the first node's propagation buffer out.
    /// Returns the number of bytes copied.
    ///
    /// After the pass's swap the propagation buffer holds the state the
    /// pass started from; the freshly-transformed state is readable via
    /// [`Engine::node_prev`].
    pub fn execute_streaming(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        if !self.opts.streaming {
            return Err(WeftError::StreamingNotConfigured);
        }
        self.arena.write_streaming_input(input)?;
        self.execute()?;

        let slot = self.arena.node_slot_copy(0);
        let window = self.arena.bytes(slot.prop);
        let n = window.len().min(output.len());
        output[..n].copy_from_slice(&window[..n]);
        Ok(n)
    }

    /// Read-only view of the loaded graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The engine's arena.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// The scheduler, when streaming is configured.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// A node's previous-step buffer (the freshest output after a pass),
    /// by graph index.
    pub fn node_prev(&self, index: usize) -> &[u8] {
        let slot = self.arena.node_slot_copy(index);
        self.arena.bytes(slot.prev)
    }

    /// A node's propagation buffer, by graph index.
    pub fn node_prop(&self, index: usize) -> &[u8] {
        let slot = self.arena.node_slot_copy(index);
        self.arena.bytes(slot.prop)
    }

    /// A node's sentinel-free dependency list, by graph index.
    pub fn node_topology(&self, index: usize) -> &[u16] {
        &self.topologies[index]
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> Stats {
        let acc = self.stats.lock();
        let per_opcode_count = acc
            .per_opcode
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(op, &count)| (op as u8, count))
            .collect();
        Stats {
            total_passes: acc.total_passes,
            average_latency: acc.average_latency,
            per_opcode_count,
            unknown_opcodes: acc.unknown_opcodes,
            arena_utilization: acc.arena_utilization,
        }
    }
}

/// Buffer size for a node: the payload segment length when the offsets
/// define one, else the registry's per-opcode default.
fn node_payload_size(node: &weft_model::Node, registry: &Registry) -> usize {
    node.payload_span().unwrap_or_else(|| registry.default_payload(node.opcode))
}

fn run_node(
    view: &crate::arena::ArenaView,
    slot: &mut NodeSlot,
    registry: &Registry,
    enable_stats: bool,
    stats: &Mutex<StatsAcc>,
) {
    // Stage the current state, transform it in place, then swap so the
    // fresh bytes become `prev`. Unknown opcodes pass state through
    // unchanged.
    unsafe {
        let prev = view.bytes_mut(slot.prev);
        let prop = view.bytes_mut(slot.prop);
        prop.copy_from_slice(prev);

        match registry.lookup(slot.opcode) {
            Some(kernel) => {
                kernel(prop);
                if enable_stats {
                    stats.lock().per_opcode[slot.opcode as usize] += 1;
                }
            }
            None => {
                if enable_stats {
                    stats.lock().unknown_opcodes += 1;
                }
                tracing::trace!(opcode = slot.opcode, "no kernel registered, passing through");
            }
        }
    }
    slot.swap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::RegionKind;
    use smallvec::smallvec;
    use weft_model::Node;

    fn noop_node(id: u16, in_off: u16, out_off: u16, topo: Topology) -> Node {
        Node { id, opcode: 0x00, in_off, out_off, flags: 0, topology: topo }
    }

    fn seq_opts() -> EngineOptions {
        EngineOptions { workers: 1, arena_size: 0, enable_stats: true, streaming: false }
    }

    #[test]
    fn test_default_options() {
        let opts = EngineOptions::default();
        assert!(opts.workers >= 1);
        assert_eq!(opts.arena_size, 0);
        assert!(opts.streaming);
    }

    #[test]
    fn test_from_graph_lays_out_dual_buffers() {
        let graph = Graph {
            nodes: vec![noop_node(0, 0, 64, Topology::new())],
            payload: vec![0x11; 64],
        };
        let engine = Engine::from_graph(graph, seq_opts()).unwrap();
        assert_eq!(engine.node_prev(0).len(), 64);
        assert_eq!(engine.node_prop(0).len(), 64);
        assert_eq!(engine.node_prev(0), vec![0x11; 64].as_slice());
        assert!(engine.node_prop(0).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_default_payload_for_unset_offsets() {
        let graph = Graph {
            nodes: vec![noop_node(0, 0, 0, Topology::new())],
            payload: Vec::new(),
        };
        let engine = Engine::from_graph(graph, seq_opts()).unwrap();
        // Registry fallback of 256 bytes, cache-aligned.
        assert_eq!(engine.node_prev(0).len(), 256);
    }

    #[test]
    fn test_rejects_cyclic_graph() {
        let graph = Graph {
            nodes: vec![
                noop_node(0, 0, 0, smallvec![1]),
                noop_node(1, 0, 0, smallvec![0]),
            ],
            payload: Vec::new(),
        };
        assert!(matches!(
            Engine::from_graph(graph, seq_opts()),
            Err(WeftError::GraphCyclic { .. })
        ));
    }

    #[test]
    fn test_sequential_pass_keeps_state_for_noop() {
        let graph = Graph {
            nodes: vec![noop_node(0, 0, 16, Topology::new())],
            payload: vec![0xAA; 16],
        };
        let mut engine = Engine::from_graph(graph, seq_opts()).unwrap();
        engine.execute().unwrap();
        assert_eq!(&engine.node_prev(0)[..16], vec![0xAA; 16].as_slice());
    }

    #[test]
    fn test_streaming_not_configured() {
        let graph = Graph {
            nodes: vec![noop_node(0, 0, 16, Topology::new())],
            payload: vec![0u8; 16],
        };
        let mut engine = Engine::from_graph(graph, seq_opts()).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(
            engine.execute_streaming(&[1, 2, 3], &mut out),
            Err(WeftError::StreamingNotConfigured)
        );
    }

    #[test]
    fn test_stats_accumulate() {
        let graph = Graph {
            nodes: vec![
                noop_node(0, 0, 16, Topology::new()),
                Node {
                    id: 1,
                    opcode: 0x03,
                    in_off: 0,
                    out_off: 16,
                    flags: 0,
                    topology: smallvec![0],
                },
            ],
            payload: vec![0u8; 16],
        };
        let mut engine = Engine::from_graph(graph, seq_opts()).unwrap();
        engine.execute().unwrap();
        engine.execute().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.total_passes, 2);
        assert_eq!(stats.per_opcode_count.get(&0x00), Some(&2));
        assert_eq!(stats.per_opcode_count.get(&0x03), Some(&2));
        assert_eq!(stats.unknown_opcodes, 0);
        assert!(stats.arena_utilization > 0.0 && stats.arena_utilization <= 1.0);
    }

    #[test]
    fn test_unknown_opcode_is_counted_not_fatal() {
        let graph = Graph {
            nodes: vec![Node {
                id: 0,
                opcode: 0xEE,
                in_off: 0,
                out_off: 16,
                flags: 0,
                topology: Topology::new(),
            }],
            payload: vec![0x42; 16],
        };
        let mut engine = Engine::from_graph(graph, seq_opts()).unwrap();
        engine.execute().unwrap();
        assert_eq!(engine.stats().unknown_opcodes, 1);
        // State passes through unchanged.
        assert_eq!(&engine.node_prev(0)[..16], vec![0x42; 16].as_slice());
    }

    #[test]
    fn test_node_payloads_exhaustion_surfaces_from_init() {
        let graph = Graph {
            nodes: (0..10)
                .map(|i| noop_node(i, 0, 128, Topology::new()))
                .collect(),
            payload: vec![0u8; 128],
        };
        let plan = ArenaPlan { node_payloads: 256, ..Default::default() };
        let err = Engine::with_plan(graph, Registry::with_reference_kernels(), seq_opts(), plan)
            .unwrap_err();
        assert!(matches!(err, WeftError::NodePayloadsExhausted { .. }));
    }

    #[test]
    fn test_topology_copied_to_runtime() {
        let graph = Graph {
            nodes: vec![
                noop_node(0, 0, 0, Topology::new()),
                noop_node(1, 0, 0, smallvec![0, weft_model::TOPO_SENTINEL]),
            ],
            payload: Vec::new(),
        };
        let engine = Engine::from_graph(graph, seq_opts()).unwrap();
        assert_eq!(engine.node_topology(0), &[] as &[u16]);
        assert_eq!(engine.node_topology(1), &[0]);
    }

    #[test]
    fn test_arena_regions_present() {
        let graph = Graph {
            nodes: vec![noop_node(0, 0, 32, Topology::new())],
            payload: vec![0u8; 32],
        };
        let engine = Engine::from_graph(
            graph,
            EngineOptions { workers: 2, arena_size: 0, enable_stats: false, streaming: true },
        )
        .unwrap();
        let arena = engine.arena();
        assert!(arena.region(RegionKind::NodeMetadata).size > 0);
        assert!(arena.region(RegionKind::NodePayloads).size > 0);
        assert!(arena.region(RegionKind::Scratch).size > 0);
        assert_eq!(
            arena.region(RegionKind::StreamingInput).size,
            align_up_32(DEFAULT_STREAMING_WINDOW)
        );
    }
}
