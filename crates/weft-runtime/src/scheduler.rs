//! Dependency-aware streaming scheduler.
//!
//! Topology entries are read as **incoming dependencies**: `B ∈ A.topology`
//! means A waits for B. The scheduler assigns every node a level
//! (`0` for dependency-free nodes, otherwise one past its deepest
//! dependency), partitions nodes into one task group per level, and drives
//! a pool of worker threads over the groups with completion-driven
//! readiness: a waiting group is released only once every dependency of
//! every member has finished running.
//!
//! The level/group plan is computed once and reused across passes; each
//! `run` call drives one pass through the Built → Running → Drained →
//! Stopped lifecycle.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use smallvec::SmallVec;
use weft_core::{Result, WeftError};
use weft_model::Graph;

/// Nodes sharing one dependency depth, released and executed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroup {
    pub level: u16,
    /// Member node ids, in graph order.
    pub node_ids: Vec<u16>,
}

/// Pass lifecycle states. Transitions only move forward within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedState {
    Built,
    Running,
    Drained,
    Stopped,
}

/// Level-partitioned execution plan plus the worker protocol driving it.
#[derive(Debug)]
pub struct Scheduler {
    deps: HashMap<u16, SmallVec<[u16; 4]>>,
    succs: HashMap<u16, SmallVec<[u16; 4]>>,
    levels: HashMap<u16, u16>,
    groups: Vec<TaskGroup>,
    state: SchedState,
}

impl Scheduler {
    /// Build the dependency map, level assignment, and task groups for
    /// `graph`. Fails with `GraphCyclic` when the level recurrence cannot
    /// terminate and `GraphInconsistent` on unresolvable dependencies.
    pub fn new(graph: &Graph) -> Result<Self> {
        let mut deps: HashMap<u16, SmallVec<[u16; 4]>> =
            HashMap::with_capacity(graph.nodes.len());
        let mut succs: HashMap<u16, SmallVec<[u16; 4]>> =
            HashMap::with_capacity(graph.nodes.len());

        for node in &graph.nodes {
            deps.insert(node.id, node.dependencies().collect());
            succs.entry(node.id).or_default();
        }
        for node in &graph.nodes {
            for dep in node.dependencies() {
                if !deps.contains_key(&dep) {
                    return Err(WeftError::GraphInconsistent(format!(
                        "node {} depends on unknown node {}",
                        node.id, dep
                    )));
                }
                succs.entry(dep).or_default().push(node.id);
            }
        }

        let levels = assign_levels(graph, &deps)?;

        // One group per level, members kept in graph order.
        let mut by_level: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
        for node in &graph.nodes {
            by_level.entry(levels[&node.id]).or_default().push(node.id);
        }
        let groups = by_level
            .into_iter()
            .map(|(level, node_ids)| TaskGroup { level, node_ids })
            .collect();

        Ok(Self { deps, succs, levels, groups, state: SchedState::Built })
    }

    /// A node's direct dependencies (sentinel-free).
    pub fn deps_of(&self, id: u16) -> &[u16] {
        self.deps.get(&id).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Nodes that depend on `id`.
    pub fn successors_of(&self, id: u16) -> &[u16] {
        self.succs.get(&id).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// A node's dependency depth.
    pub fn level_of(&self, id: u16) -> Option<u16> {
        self.levels.get(&id).copied()
    }

    /// Task groups in ascending level order.
    pub fn groups(&self) -> &[TaskGroup] {
        &self.groups
    }

    /// Lifecycle state of the current or most recent pass.
    pub fn state(&self) -> SchedState {
        self.state
    }

    /// Node ids flattened into sequential execution order: ascending
    /// level, graph order within a level. The sequential oracle path.
    pub fn sequential_order(&self) -> Vec<u16> {
        self.groups.iter().flat_map(|g| g.node_ids.iter().copied()).collect()
    }

    /// Drive one pass: release ready groups to a pool of `workers`
    /// threads, calling `exec` once per node, dependencies always first.
    ///
    /// Nodes inside one group run concurrently (no ordering among them);
    /// a waiting group is released only after every dependency of every
    /// member has completed.
    pub fn run<F>(&mut self, workers: usize, exec: F)
    where
        F: Fn(u16) + Sync,
    {
        let workers = workers.max(1);
        let Self { ref deps, ref groups, ref mut state, .. } = *self;
        *state = SchedState::Running;

        let (ready_tx, ready_rx) = mpsc::channel::<usize>();
        let ready_rx = Arc::new(Mutex::new(ready_rx));
        let (done_tx, done_rx) = mpsc::channel::<u16>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let ready_rx = Arc::clone(&ready_rx);
                let done_tx = done_tx.clone();
                let exec = &exec;
                scope.spawn(move || loop {
                    // Holding the lock across recv serializes idle workers
                    // on the mutex instead of the channel; execution below
                    // happens with the lock released.
                    let next = { ready_rx.lock().recv() };
                    let Ok(group_idx) = next else { break };
                    let group: &TaskGroup = &groups[group_idx];

                    if group.node_ids.len() == 1 {
                        exec(group.node_ids[0]);
                    } else {
                        group.node_ids.par_iter().for_each(|&id| exec(id));
                    }
                    for &id in &group.node_ids {
                        let _ = done_tx.send(id);
                    }
                });
            }
            drop(done_tx);

            let mut waiting: BTreeMap<u16, usize> =
                groups.iter().enumerate().map(|(i, g)| (g.level, i)).collect();
            let mut completed: HashSet<u16> = HashSet::new();

            let group_ready = |group: &TaskGroup, completed: &HashSet<u16>| {
                group.node_ids.iter().all(|id| {
                    deps.get(id)
                        .map(|d| d.iter().all(|dep| completed.contains(dep)))
                        .unwrap_or(true)
                })
            };

            // Release everything runnable up front (the dependency-free
            // groups).
            let initial: Vec<u16> = waiting
                .iter()
                .filter(|(_, &idx)| group_ready(&groups[idx], &completed))
                .map(|(&level, _)| level)
                .collect();
            for level in initial {
                let idx = waiting.remove(&level).expect("level present");
                let _ = ready_tx.send(idx);
            }

            // Completion handler: one release at most per completion event;
            // repeated completions progressively drain the waiting map.
            while !waiting.is_empty() {
                let Ok(id) = done_rx.recv() else { break };
                completed.insert(id);

                let next = waiting
                    .iter()
                    .find(|(_, &idx)| group_ready(&groups[idx], &completed))
                    .map(|(&level, _)| level);
                if let Some(level) = next {
                    let idx = waiting.remove(&level).expect("level present");
                    let _ = ready_tx.send(idx);
                }
            }

            // Close the ready queue; idle workers drain out and the scope
            // joins the rest.
            drop(ready_tx);
            *state = SchedState::Drained;
        });

        self.state = SchedState::Stopped;
    }
}

/// Levels by the recurrence `level(n) = 1 + max(level(deps))`, zero for
/// dependency-free nodes. Iterative DFS with an in-progress marker for
/// cycle detection.
fn assign_levels(
    graph: &Graph,
    deps: &HashMap<u16, SmallVec<[u16; 4]>>,
) -> Result<HashMap<u16, u16>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<u16, Mark> =
        graph.nodes.iter().map(|n| (n.id, Mark::Unvisited)).collect();
    let mut levels: HashMap<u16, u16> = HashMap::with_capacity(graph.nodes.len());

    for node in &graph.nodes {
        if marks[&node.id] == Mark::Done {
            continue;
        }

        // Frame: (id, index of the next dependency to descend into).
        let mut stack: Vec<(u16, usize)> = vec![(node.id, 0)];
        marks.insert(node.id, Mark::InProgress);

        while let Some(top) = stack.last_mut() {
            let id = top.0;
            let next = top.1;
            let node_deps = &deps[&id];
            if next < node_deps.len() {
                top.1 += 1;
                let dep = node_deps[next];
                match marks[&dep] {
                    Mark::InProgress => return Err(WeftError::GraphCyclic { node: dep }),
                    Mark::Unvisited => {
                        marks.insert(dep, Mark::InProgress);
                        stack.push((dep, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                let level = node_deps
                    .iter()
                    .map(|d| levels[d] + 1)
                    .max()
                    .unwrap_or(0);
                levels.insert(id, level);
                marks.insert(id, Mark::Done);
                stack.pop();
            }
        }
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use weft_model::{Node, Topology};

    fn node(id: u16, topo: &[u16]) -> Node {
        Node {
            id,
            opcode: 0,
            in_off: 0,
            out_off: 0,
            flags: 0,
            topology: topo.iter().copied().collect::<Topology>(),
        }
    }

    fn graph(nodes: Vec<Node>) -> Graph {
        Graph { nodes, payload: Vec::new() }
    }

    #[test]
    fn test_chain_levels() {
        let g = graph(vec![node(0, &[]), node(1, &[0])]);
        let s = Scheduler::new(&g).unwrap();
        assert_eq!(s.level_of(0), Some(0));
        assert_eq!(s.level_of(1), Some(1));
        assert_eq!(s.groups().len(), 2);
    }

    #[test]
    fn test_diamond_levels_and_groups() {
        // A → {B, C} → D
        let g = graph(vec![
            node(0, &[]),
            node(1, &[0]),
            node(2, &[0]),
            node(3, &[1, 2]),
        ]);
        let s = Scheduler::new(&g).unwrap();
        assert_eq!(s.level_of(0), Some(0));
        assert_eq!(s.level_of(1), Some(1));
        assert_eq!(s.level_of(2), Some(1));
        assert_eq!(s.level_of(3), Some(2));

        let groups = s.groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].node_ids, vec![0]);
        assert_eq!(groups[1].node_ids, vec![1, 2]);
        assert_eq!(groups[2].node_ids, vec![3]);
    }

    #[test]
    fn test_cycle_rejected() {
        let g = graph(vec![node(0, &[1]), node(1, &[0])]);
        assert!(matches!(Scheduler::new(&g), Err(WeftError::GraphCyclic { .. })));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let g = graph(vec![node(0, &[0])]);
        assert!(matches!(Scheduler::new(&g), Err(WeftError::GraphCyclic { .. })));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let g = graph(vec![node(0, &[7])]);
        assert!(matches!(
            Scheduler::new(&g),
            Err(WeftError::GraphInconsistent(_))
        ));
    }

    #[test]
    fn test_levels_exceed_dependency_levels() {
        let g = graph(vec![
            node(0, &[]),
            node(1, &[0]),
            node(2, &[0, 1]),
            node(3, &[2]),
            node(4, &[0]),
        ]);
        let s = Scheduler::new(&g).unwrap();
        for n in &g.nodes {
            let level = s.level_of(n.id).unwrap();
            for dep in n.dependencies() {
                assert!(level > s.level_of(dep).unwrap());
            }
        }
    }

    #[test]
    fn test_idempotent_construction() {
        let g = graph(vec![
            node(0, &[]),
            node(1, &[0]),
            node(2, &[0]),
            node(3, &[1, 2]),
            node(4, &[3, 0]),
        ]);
        let a = Scheduler::new(&g).unwrap();
        let b = Scheduler::new(&g).unwrap();
        assert_eq!(a.groups(), b.groups());
        for n in &g.nodes {
            assert_eq!(a.level_of(n.id), b.level_of(n.id));
            assert_eq!(a.deps_of(n.id), b.deps_of(n.id));
            assert_eq!(a.successors_of(n.id), b.successors_of(n.id));
        }
    }

    #[test]
    fn test_successors_are_reverse_of_deps() {
        let g = graph(vec![node(0, &[]), node(1, &[0]), node(2, &[0])]);
        let s = Scheduler::new(&g).unwrap();
        assert_eq!(s.successors_of(0), &[1, 2]);
        assert!(s.successors_of(1).is_empty());
    }

    #[test]
    fn test_sequential_order_respects_dependencies() {
        let g = graph(vec![
            node(3, &[1, 2]),
            node(1, &[0]),
            node(2, &[0]),
            node(0, &[]),
        ]);
        let s = Scheduler::new(&g).unwrap();
        let order = s.sequential_order();
        let pos = |id: u16| order.iter().position(|&x| x == id).unwrap();
        for n in &g.nodes {
            for dep in n.dependencies() {
                assert!(pos(dep) < pos(n.id));
            }
        }
    }

    #[test]
    fn test_run_executes_every_node_once_dependencies_first() {
        let g = graph(vec![
            node(0, &[]),
            node(1, &[0]),
            node(2, &[0]),
            node(3, &[1, 2]),
        ]);
        let mut s = Scheduler::new(&g).unwrap();

        let trace: PlMutex<Vec<u16>> = PlMutex::new(Vec::new());
        s.run(2, |id| trace.lock().push(id));

        let order = trace.into_inner();
        assert_eq!(order.len(), 4);
        let pos = |id: u16| order.iter().position(|&x| x == id).unwrap();
        for n in &g.nodes {
            for dep in n.dependencies() {
                assert!(pos(dep) < pos(n.id), "node {} ran before dep {}", n.id, dep);
            }
        }
        assert_eq!(s.state(), SchedState::Stopped);
    }

    #[test]
    fn test_run_single_worker_matches_plan() {
        let g = graph(vec![node(0, &[]), node(1, &[0]), node(2, &[1])]);
        let mut s = Scheduler::new(&g).unwrap();
        let trace: PlMutex<Vec<u16>> = PlMutex::new(Vec::new());
        s.run(1, |id| trace.lock().push(id));
        assert_eq!(trace.into_inner(), vec![0, 1, 2]);
    }

    #[test]
    fn test_state_starts_built() {
        let g = graph(vec![node(0, &[])]);
        let s = Scheduler::new(&g).unwrap();
        assert_eq!(s.state(), SchedState::Built);
    }
}
