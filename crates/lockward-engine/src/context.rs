//! Analysis context shared by every pass.
//!
//! Holds exclusive mutable access to the program plus everything discovered
//! once up front (entry points, locks, regions) and the regions the passes
//! create. Regions refer to routines by `RoutineId`, never by reference.

use indexmap::{IndexMap, IndexSet};

use lockward_ir::graph::{reachable_routines, Graph};
use lockward_ir::{AccessKind, Decoration, Expr, InstrKind, Program};

use crate::driver::Discovery;
use crate::lockset::{AccessCheckingVariable, Lock, Lockset};
use crate::region::{InstrumentationRegion, PairCheckingRegion};
use crate::shared_state::{MemoryRegion, SharedStateAnalyser};

#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub name: String,
    /// Tracked regions, as reported by the shared-state analyser.
    pub regions: Vec<MemoryRegion>,
    pub inlined: bool,
}

pub struct AnalysisContext<'p> {
    pub program: &'p mut Program,
    pub init_routine: String,
    pub entry_points: Vec<EntryPoint>,
    pub locks: Vec<Lock>,
    /// Union of all entry points' regions, in discovery order.
    pub memory_regions: Vec<MemoryRegion>,
    pub locksets: Vec<Lockset>,
    pub access_vars: Vec<AccessCheckingVariable>,
    pub regions: Vec<InstrumentationRegion>,
    pub pair_regions: IndexMap<(String, String), PairCheckingRegion>,
    pub matched_accesses: Vec<Vec<Expr>>,
}

impl<'p> AnalysisContext<'p> {
    /// Discover regions and locks for every entry point; the program is
    /// not modified.
    pub fn new(
        program: &'p mut Program,
        discovery: Discovery,
        analyser: &dyn SharedStateAnalyser,
    ) -> Self {
        let mut entry_points = Vec::with_capacity(discovery.entry_points.len());
        let mut memory_regions: IndexSet<MemoryRegion> = IndexSet::new();
        let mut locks: IndexSet<String> = IndexSet::new();

        for name in discovery.entry_points {
            let regions = analyser.regions_of(program, &name);
            memory_regions.extend(regions.iter().cloned());
            let inlined = program
                .routine_by_name(&name)
                .map(|r| r.has_decoration(&Decoration::Inline))
                .unwrap_or(false);
            if let Some(root) = program.find_routine(&name) {
                for id in reachable_routines(program, root) {
                    for instr in program.routine(id).instrs() {
                        match &instr.kind {
                            InstrKind::Acquire { lock } | InstrKind::Release { lock } => {
                                locks.insert(lock.clone());
                            }
                            _ => {}
                        }
                    }
                }
            }
            entry_points.push(EntryPoint {
                name,
                regions,
                inlined,
            });
        }

        Self {
            program,
            init_routine: discovery.init_routine,
            entry_points,
            locks: locks.into_iter().map(Lock::new).collect(),
            memory_regions: memory_regions.into_iter().collect(),
            locksets: Vec::new(),
            access_vars: Vec::new(),
            regions: Vec::new(),
            pair_regions: IndexMap::new(),
            matched_accesses: analyser.matched_accesses(),
        }
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    /// Indices into `regions` owned by `entry_point`, entry point first.
    pub fn regions_of(&self, entry_point: &str) -> Vec<usize> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.entry_point == entry_point)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn region_by_name(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.name == name)
    }

    /// Call graph between the regions of one entry point, by region index.
    pub fn call_graph(&self, entry_point: &str) -> Graph<usize> {
        let members = self.regions_of(entry_point);
        let mut graph = Graph::new();
        for &i in &members {
            graph.add_node(i);
        }
        for &i in &members {
            let routine = self.program.routine(self.regions[i].routine);
            for call in routine.calls() {
                if let Some(j) = members.iter().copied().find(|&j| self.regions[j].name == call.callee) {
                    graph.add_edge(i, j);
                }
            }
        }
        graph
    }

    pub fn memory_lockset(&self, entry_point: &str, region: &MemoryRegion, lock: &Lock) -> Option<&Lockset> {
        self.locksets.iter().find(|ls| {
            ls.entry_point.as_deref() == Some(entry_point)
                && ls.target == region.as_str()
                && &ls.lock == lock
        })
    }

    /// Memory locksets of `entry_point`, in declaration order.
    pub fn memory_locksets_of<'a>(&'a self, entry_point: &'a str) -> impl Iterator<Item = &'a Lockset> + 'a {
        self.locksets
            .iter()
            .filter(move |ls| ls.entry_point.as_deref() == Some(entry_point))
    }

    pub fn access_var(
        &self,
        entry_point: &str,
        region: &MemoryRegion,
        kind: AccessKind,
    ) -> Option<&AccessCheckingVariable> {
        self.access_vars
            .iter()
            .find(|v| v.entry_point == entry_point && &v.region == region && v.kind == kind)
    }

    pub fn access_vars_of<'a>(
        &'a self,
        entry_point: &'a str,
    ) -> impl Iterator<Item = &'a AccessCheckingVariable> + 'a {
        self.access_vars
            .iter()
            .filter(move |v| v.entry_point == entry_point)
    }

    /// Variables written only by instrumentation: memory locksets and
    /// access-checking state.
    pub fn is_instrumentation_var(&self, name: &str) -> bool {
        self.locksets
            .iter()
            .any(|ls| !ls.is_current() && ls.variable == name)
            || self
                .access_vars
                .iter()
                .any(|v| v.has_occurred == name || v.offset == name)
    }

    pub fn no_op_routine(entry_point: &str) -> String {
        format!("_NO_OP_${entry_point}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_state::AccessScanAnalyser;
    use lockward_ir::{Block, Instr, Routine, Transfer};

    #[test]
    fn locks_and_regions_are_discovered_in_entry_point_order() {
        let mut program = Program::new();
        let body = |instrs| vec![Block::new("entry", instrs, Transfer::Return)];
        program
            .add_routine(Routine::new("a", Vec::new()).with_blocks(body(vec![
                Instr::acquire("L2"),
                Instr::write("$M.1", Expr::int(0), Expr::int(0)),
                Instr::release("L2"),
            ])))
            .unwrap();
        program
            .add_routine(Routine::new("b", Vec::new()).with_blocks(body(vec![
                Instr::acquire("L1"),
                Instr::write("$M.0", Expr::int(0), Expr::int(0)),
                Instr::write("$M.1", Expr::int(0), Expr::int(0)),
                Instr::release("L1"),
            ])))
            .unwrap();
        let discovery = Discovery {
            init_routine: "init".into(),
            entry_points: vec!["a".into(), "b".into()],
        };
        let ctx = AnalysisContext::new(&mut program, discovery, &AccessScanAnalyser::new());
        let locks: Vec<&str> = ctx.locks.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(locks, vec!["L2", "L1"]);
        let regions: Vec<&str> = ctx.memory_regions.iter().map(MemoryRegion::as_str).collect();
        assert_eq!(regions, vec!["$M.1", "$M.0"]);
        assert_eq!(ctx.entry_point("b").unwrap().regions.len(), 2);
    }
}
