//! Region abstraction shared by per-entry-point routines and pair checkers.

use indexmap::IndexMap;

use lockward_ir::graph::block_graph;
use lockward_ir::{Expr, Instr, Program, RoutineId};

use crate::shared_state::MemoryRegion;

/// A routine viewed through its loops, with invariants living at the
/// start of loop header blocks.
pub trait Region {
    fn name(&self) -> &str;

    fn routine(&self) -> RoutineId;

    /// Put `invariants` at the top of block `at`, in order; returns how
    /// many were inserted.
    fn add_invariants(&self, program: &mut Program, at: usize, invariants: Vec<Expr>) -> usize {
        let Some(block) = program.routine_mut(self.routine()).blocks.get_mut(at) else {
            return 0;
        };
        let count = invariants.len();
        block.instrs.splice(0..0, invariants.into_iter().map(Instr::assert));
        count
    }

    /// Blocks on a cycle that are entered from outside it.
    fn loop_headers(&self, program: &Program) -> Vec<usize> {
        let routine = program.routine(self.routine());
        let graph = block_graph(routine);
        graph
            .nodes()
            .filter(|&b| {
                let inside = graph.nested_successors(b);
                inside.contains(&b) && (b == 0 || graph.predecessors(b).any(|p| !inside.contains(&p)))
            })
            .collect()
    }
}

/// A routine owned by one entry point: the entry point itself or a clone of
/// something it reaches.
#[derive(Debug, Clone)]
pub struct InstrumentationRegion {
    pub name: String,
    pub routine: RoutineId,
    pub entry_point: String,
    pub is_entry_point: bool,
    pub inlined: bool,
    pub device_registered: bool,
    pub changes_registration: bool,
    /// Calls an unregister routine itself or through a callee region.
    pub reaches_unregister: bool,
    pub sliced: bool,
    /// Transitively acquires or releases each lock.
    pub calls_lock: IndexMap<String, bool>,
}

impl InstrumentationRegion {
    pub fn new(name: impl Into<String>, routine: RoutineId, entry_point: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routine,
            entry_point: entry_point.into(),
            is_entry_point: false,
            inlined: false,
            device_registered: false,
            changes_registration: false,
            reaches_unregister: false,
            sliced: false,
            calls_lock: IndexMap::new(),
        }
    }

    pub fn calls_lock(&self, lock: &str) -> bool {
        self.calls_lock.get(lock).copied().unwrap_or(false)
    }
}

impl Region for InstrumentationRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn routine(&self) -> RoutineId {
        self.routine
    }
}

/// Synthetic checking routine for one pair of entry points.
#[derive(Debug, Clone)]
pub struct PairCheckingRegion {
    pub name: String,
    pub routine: RoutineId,
    pub ep1: String,
    pub ep2: String,
    /// For each parameter of `ep2`, the `ep1` parameter it was merged into.
    pub merged: Vec<Option<usize>>,
    /// Regions that received a race assertion.
    pub checked_regions: Vec<MemoryRegion>,
}

impl PairCheckingRegion {
    pub fn is_self_pair(&self) -> bool {
        self.ep1 == self.ep2
    }
}

impl Region for PairCheckingRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn routine(&self) -> RoutineId {
        self.routine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockward_ir::{Block, InstrKind, Routine, Transfer};

    fn looping() -> (Program, InstrumentationRegion) {
        let goto = |t: &[&str]| Transfer::Goto(t.iter().map(|s| s.to_string()).collect());
        let mut program = Program::new();
        let id = program
            .add_routine(Routine::new("f", Vec::new()).with_blocks(vec![
                Block::new("entry", Vec::new(), goto(&["head"])),
                Block::new("head", Vec::new(), goto(&["body", "exit"])),
                Block::new("body", Vec::new(), goto(&["head"])),
                Block::new("exit", Vec::new(), Transfer::Return),
            ]))
            .unwrap();
        (program, InstrumentationRegion::new("f", id, "f"))
    }

    #[test]
    fn loop_header_is_the_cycle_entry() {
        let (program, region) = looping();
        assert_eq!(region.loop_headers(&program), vec![1]);
    }

    #[test]
    fn invariants_keep_their_order_at_the_loop_header() {
        let (mut program, region) = looping();
        let header = region.loop_headers(&program)[0];
        assert_eq!(region.add_invariants(&mut program, header, vec![Expr::var("a")]), 1);
        region.add_invariants(&mut program, header, vec![Expr::var("b"), Expr::var("c")]);
        let instrs = &program.routine(region.routine).blocks[header].instrs;
        assert_eq!(
            instrs.iter().map(|i| i.kind.clone()).collect::<Vec<_>>(),
            vec![
                InstrKind::Assert(Expr::var("b")),
                InstrKind::Assert(Expr::var("c")),
                InstrKind::Assert(Expr::var("a")),
            ]
        );
        assert_eq!(region.add_invariants(&mut program, 9, vec![Expr::var("d")]), 0);
    }
}
