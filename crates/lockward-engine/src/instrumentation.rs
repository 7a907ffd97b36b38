//! Entry-point instrumentation.
//!
//! Every routine an entry point reaches is cloned as `<name>$<ep>` so each
//! entry point writes only its own memory-lockset and access-checking
//! variables. Lock operations then become current-lockset updates and every
//! tracked access is preceded by the logging that records its protection.

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use lockward_ir::graph::reachable_routines;
use lockward_ir::program::{Access, IrError};
use lockward_ir::{Decoration, Expr, Instr, InstrKind, Program, RoutineId};

use crate::context::AnalysisContext;
use crate::lockset::{update_expr, Lock, CURRENT_LOCKSET};
use crate::region::InstrumentationRegion;
use crate::shared_state::MemoryRegion;

#[derive(Debug, Default)]
pub struct EntryPointInstrumentation;

impl EntryPointInstrumentation {
    pub fn new() -> Self {
        Self
    }

    /// Clone the routines `entry_point` reaches and create its regions.
    ///
    /// Must run for every entry point before any of them is rewritten, so
    /// clones are taken from unmodified bodies.
    pub fn create_regions(
        &self,
        ctx: &mut AnalysisContext<'_>,
        entry_point: &str,
    ) -> Result<usize, IrError> {
        let root = ctx.program.routine_id(entry_point)?;
        let reachable = reachable_routines(ctx.program, root);

        let mut renames: IndexMap<String, String> = IndexMap::new();
        let mut members = vec![root];
        for &id in reachable.iter().skip(1) {
            let mut clone = ctx.program.routine(id).clone();
            let original = std::mem::take(&mut clone.name);
            clone.name = format!("{original}${entry_point}");
            renames.insert(original, clone.name.clone());
            members.push(ctx.program.add_routine(clone)?);
        }

        for &id in &members {
            for call in ctx.program.routine_mut(id).calls_mut() {
                if let Some(target) = renames.get(&call.callee) {
                    call.callee = target.clone();
                }
            }
        }

        let inlined_ep = ctx
            .entry_point(entry_point)
            .map(|ep| ep.inlined)
            .unwrap_or(false);
        for &id in &members {
            let routine = ctx.program.routine(id);
            let mut region = InstrumentationRegion::new(routine.name.clone(), id, entry_point);
            region.is_entry_point = id == root;
            region.inlined = routine.has_decoration(&Decoration::Inline) || (id == root && inlined_ep);
            ctx.regions.push(region);
        }
        self.compute_lock_flags(ctx, entry_point);

        debug!(entry_point, clones = renames.len(), "Entry point regions created");
        Ok(renames.len())
    }

    /// Flag, per region and lock, whether the region or anything it calls
    /// acquires or releases the lock.
    fn compute_lock_flags(&self, ctx: &mut AnalysisContext<'_>, entry_point: &str) {
        let members = ctx.regions_of(entry_point);
        let direct: IndexMap<usize, IndexSet<String>> = members
            .iter()
            .map(|&i| {
                let locks = ctx
                    .program
                    .routine(ctx.regions[i].routine)
                    .instrs()
                    .filter_map(|instr| match &instr.kind {
                        InstrKind::Acquire { lock } | InstrKind::Release { lock } => {
                            Some(lock.clone())
                        }
                        _ => None,
                    })
                    .collect();
                (i, locks)
            })
            .collect();
        let graph = ctx.call_graph(entry_point);
        let lock_names: Vec<String> = ctx.locks.iter().map(|l| l.name.clone()).collect();

        for &i in &members {
            let mut touched = direct[&i].clone();
            for callee in graph.nested_successors(i) {
                touched.extend(direct[&callee].iter().cloned());
            }
            ctx.regions[i].calls_lock = lock_names
                .iter()
                .map(|l| (l.clone(), touched.contains(l)))
                .collect();
        }
    }

    /// Rewrite lock operations and tracked accesses in every region of
    /// `entry_point`; returns the number of instructions emitted.
    pub fn instrument(&self, ctx: &mut AnalysisContext<'_>, entry_point: &str) -> usize {
        let tracked: Vec<MemoryRegion> = ctx
            .entry_point(entry_point)
            .map(|ep| ep.regions.clone())
            .unwrap_or_default();
        let locks = ctx.locks.clone();
        let mut emitted = 0;

        for i in ctx.regions_of(entry_point) {
            let id = ctx.regions[i].routine;
            let mut blocks = std::mem::take(&mut ctx.program.routine_mut(id).blocks);
            for block in &mut blocks {
                let instrs = std::mem::take(&mut block.instrs);
                let mut rewritten = Vec::with_capacity(instrs.len());
                for instr in instrs {
                    match &instr.kind {
                        InstrKind::Acquire { lock } | InstrKind::Release { lock } => {
                            let value = matches!(instr.kind, InstrKind::Acquire { .. });
                            let lock = Lock::new(lock.clone());
                            let mut update = Instr::assign(CURRENT_LOCKSET, update_expr(&lock, value));
                            update.decorations = instr.decorations;
                            rewritten.push(update);
                            emitted += 1;
                        }
                        InstrKind::Access(access)
                            if tracked.iter().any(|r| r.as_str() == access.region) =>
                        {
                            let logs = self.access_logs(ctx, entry_point, access, &locks);
                            emitted += logs.len();
                            rewritten.extend(logs);
                            rewritten.push(instr);
                        }
                        _ => rewritten.push(instr),
                    }
                }
                block.instrs = rewritten;
            }
            ctx.program.routine_mut(id).blocks = blocks;
        }

        info!(entry_point, emitted, "Entry point instrumented");
        emitted
    }

    fn access_logs(
        &self,
        ctx: &AnalysisContext<'_>,
        entry_point: &str,
        access: &Access,
        locks: &[Lock],
    ) -> Vec<Instr> {
        let region = MemoryRegion::new(access.region.clone());
        let Some(vars) = ctx.access_var(entry_point, &region, access.kind) else {
            return Vec::new();
        };
        let tag = Decoration::AccessLog {
            kind: access.kind,
            region: access.region.clone(),
        };
        let mut logs = Vec::with_capacity(locks.len() + 2);
        for lock in locks {
            if let Some(ls) = ctx.memory_lockset(entry_point, &region, lock) {
                let update = Expr::var(ls.variable.clone()).and(lock.held());
                logs.push(Instr::assign(ls.variable.clone(), update).with_decoration(tag.clone()));
            }
        }
        logs.push(Instr::assign(vars.has_occurred.clone(), Expr::bool(true)).with_decoration(tag.clone()));
        logs.push(Instr::assign(vars.offset.clone(), access.offset.clone()).with_decoration(tag));
        logs
    }

    /// Propagate `modifies` bottom-up over every region to a fixed point.
    pub fn propagate_contracts(&self, ctx: &mut AnalysisContext<'_>) -> usize {
        let routines: Vec<RoutineId> = ctx.regions.iter().map(|r| r.routine).collect();
        let writes = transitive_writes(ctx.program, &routines);
        let mut added = 0;
        for (id, vars) in writes {
            let modifies = &mut ctx.program.routine_mut(id).contract.modifies;
            for var in vars {
                if modifies.insert(var) {
                    added += 1;
                }
            }
        }
        info!(routines = routines.len(), added, "Modifies sets propagated");
        added
    }
}

/// Globals each routine writes directly or through its callees.
///
/// Callees outside `routines` contribute their declared `modifies`.
pub fn transitive_writes(
    program: &Program,
    routines: &[RoutineId],
) -> IndexMap<RoutineId, IndexSet<String>> {
    let mut writes: IndexMap<RoutineId, IndexSet<String>> = routines
        .iter()
        .map(|&id| {
            let routine = program.routine(id);
            let direct = routine
                .instrs()
                .flat_map(Instr::written_vars)
                .filter(|v| !routine.is_parameter_or_local(v) && program.find_global(v).is_some())
                .map(str::to_string)
                .collect();
            (id, direct)
        })
        .collect();

    loop {
        let mut changed = false;
        for &id in routines {
            let mut inherited: Vec<String> = Vec::new();
            for call in program.routine(id).calls() {
                let Some(callee) = program.find_routine(&call.callee) else {
                    continue;
                };
                match writes.get(&callee) {
                    Some(vars) => inherited.extend(vars.iter().cloned()),
                    None => inherited.extend(program.routine(callee).contract.modifies.iter().cloned()),
                }
            }
            let own = writes.entry(id).or_default();
            for var in inherited {
                changed |= own.insert(var);
            }
        }
        if !changed {
            break;
        }
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Discovery;
    use crate::lockset::LocksetModel;
    use crate::options::PipelineOptions;
    use crate::shared_state::AccessScanAnalyser;
    use lockward_ir::program::Param;
    use lockward_ir::{Block, Routine, Transfer, Type};

    fn driver() -> Program {
        let mut program = Program::new();
        program.declare_global("$M.0", Type::map(Type::Int, Type::Int), Vec::new());
        let body = |instrs| vec![Block::new("entry", instrs, Transfer::Return)];
        program
            .add_routine(Routine::new("ep", vec![Param::new("p", Type::Int)]).with_blocks(body(vec![
                Instr::acquire("L"),
                Instr::call("helper", vec![Expr::var("p")]),
                Instr::release("L"),
            ])))
            .unwrap();
        program
            .add_routine(Routine::new("helper", vec![Param::new("q", Type::Int)]).with_blocks(
                body(vec![Instr::write("$M.0", Expr::var("q"), Expr::int(1))]),
            ))
            .unwrap();
        program
    }

    #[test]
    fn reachable_routines_are_cloned_and_rewritten() {
        let mut program = driver();
        let options = PipelineOptions::default();
        let discovery = Discovery {
            init_routine: "init".into(),
            entry_points: vec!["ep".into()],
        };
        let mut ctx = AnalysisContext::new(&mut program, discovery, &AccessScanAnalyser::new());
        LocksetModel::new(&options).run(&mut ctx);
        let pass = EntryPointInstrumentation::new();
        assert_eq!(pass.create_regions(&mut ctx, "ep").unwrap(), 1);
        // one MLS update, has-occurred, offset, plus two lockset updates
        assert_eq!(pass.instrument(&mut ctx, "ep"), 5);
        pass.propagate_contracts(&mut ctx);

        let ep = ctx.program.routine_by_name("ep").unwrap();
        assert_eq!(ep.calls().next().unwrap().callee, "helper$ep");
        assert!(ep.contract.modifies.contains(CURRENT_LOCKSET));
        assert!(ep.contract.modifies.contains("MLS$$M.0$L$ep"));
        assert!(ep.contract.modifies.contains("$M.0"));

        let helper = ctx.program.routine_by_name("helper$ep").unwrap();
        let logs = helper.instrs().filter(|i| i.is_access_log()).count();
        assert_eq!(logs, 3);
        let ep_region = &ctx.regions[ctx.region_by_name("ep").unwrap()];
        let helper_region = &ctx.regions[ctx.region_by_name("helper$ep").unwrap()];
        assert!(ep_region.calls_lock("L"));
        assert!(!helper_region.calls_lock("L"));
        // the original stays untouched
        let original = ctx.program.routine_by_name("helper").unwrap();
        assert!(original.instrs().all(|i| !i.is_access_log()));
    }
}
