//! Directed graphs over blocks and routines with transitive reachability.
//!
//! Nodes and edges keep insertion order so every traversal, and anything
//! generated from it, is deterministic.

use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::hash::Hash;

use crate::program::{Program, Routine, RoutineId};

#[derive(Debug, Clone)]
pub struct Graph<N: Copy + Eq + Hash> {
    nodes: IndexSet<N>,
    successors: IndexMap<N, IndexSet<N>>,
    predecessors: IndexMap<N, IndexSet<N>>,
}

impl<N: Copy + Eq + Hash> Default for Graph<N> {
    fn default() -> Self {
        Self {
            nodes: IndexSet::new(),
            successors: IndexMap::new(),
            predecessors: IndexMap::new(),
        }
    }
}

impl<N: Copy + Eq + Hash> Graph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N) {
        if self.nodes.insert(node) {
            self.successors.insert(node, IndexSet::new());
            self.predecessors.insert(node, IndexSet::new());
        }
    }

    pub fn add_edge(&mut self, from: N, to: N) {
        self.add_node(from);
        self.add_node(to);
        self.successors.entry(from).or_default().insert(to);
        self.predecessors.entry(to).or_default().insert(from);
    }

    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.nodes.iter().copied()
    }

    pub fn contains(&self, node: N) -> bool {
        self.nodes.contains(&node)
    }

    pub fn successors(&self, node: N) -> impl Iterator<Item = N> + '_ {
        self.successors
            .get(&node)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    pub fn predecessors(&self, node: N) -> impl Iterator<Item = N> + '_ {
        self.predecessors
            .get(&node)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Every node reachable from `node` by one or more edges.
    pub fn nested_successors(&self, node: N) -> IndexSet<N> {
        Self::closure(node, &self.successors)
    }

    /// Every node that reaches `node` by one or more edges.
    pub fn nested_predecessors(&self, node: N) -> IndexSet<N> {
        Self::closure(node, &self.predecessors)
    }

    fn closure(start: N, edges: &IndexMap<N, IndexSet<N>>) -> IndexSet<N> {
        let mut seen = IndexSet::new();
        let mut queue: VecDeque<N> = VecDeque::new();
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            let Some(next) = edges.get(&current) else {
                continue;
            };
            for &n in next {
                if seen.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        seen
    }

    /// `true` when `node` lies on a cycle.
    pub fn on_cycle(&self, node: N) -> bool {
        self.nested_successors(node).contains(&node)
    }
}

/// Block graph of a routine, nodes are block indices.
///
/// Goto targets that name no block of the routine are ignored.
pub fn block_graph(routine: &Routine) -> Graph<usize> {
    let mut graph = Graph::new();
    for (i, block) in routine.blocks.iter().enumerate() {
        graph.add_node(i);
        for target in block.successors() {
            if let Some(j) = routine.block_index(target) {
                graph.add_edge(i, j);
            }
        }
    }
    graph
}

/// Routines with bodies reachable from `root` through calls, `root` first,
/// in breadth-first discovery order.
pub fn reachable_routines(program: &Program, root: RoutineId) -> Vec<RoutineId> {
    let mut seen: IndexSet<RoutineId> = IndexSet::new();
    let mut queue = VecDeque::new();
    seen.insert(root);
    queue.push_back(root);
    while let Some(current) = queue.pop_front() {
        for call in program.routine(current).calls() {
            let Some(callee) = program.find_routine(&call.callee) else {
                continue;
            };
            if program.routine(callee).has_body() && seen.insert(callee) {
                queue.push_back(callee);
            }
        }
    }
    seen.into_iter().collect()
}
