//! Device-disable slicing.
//!
//! Code that runs strictly after the device is unregistered cannot race with
//! code that runs while it is registered, so its access logging and region
//! calls are replaced by calls to the entry point's no-op routine. Control
//! flow and the accesses themselves are left alone.

use indexmap::IndexSet;
use tracing::{debug, info};

use lockward_ir::graph::block_graph;
use lockward_ir::{Instr, Program, RoutineId};

use crate::context::AnalysisContext;
use crate::instrumentation::transitive_writes;
use crate::registration::is_unregister_call;

#[derive(Debug, Default)]
pub struct DeviceDisableSlicing;

impl DeviceDisableSlicing {
    pub fn new() -> Self {
        Self
    }

    /// Slice the regions of `entry_point`; returns the number of changes.
    ///
    /// Running it again on already sliced regions returns 0.
    pub fn run(&self, ctx: &mut AnalysisContext<'_>, entry_point: &str) -> usize {
        let no_op = AnalysisContext::no_op_routine(entry_point);
        let members = ctx.regions_of(entry_point);
        let member_names: Vec<String> = members.iter().map(|&i| ctx.regions[i].name.clone()).collect();
        let mut changes = 0;

        // (a) calls into regions that never run while the device is registered
        let mut sliced: IndexSet<usize> = IndexSet::new();
        for &i in &members {
            let id = ctx.regions[i].routine;
            let mut replaced = Vec::new();
            for call in ctx.program.routine_mut(id).calls_mut() {
                let Some(pos) = member_names.iter().position(|n| *n == call.callee) else {
                    continue;
                };
                let callee = members[pos];
                let region = &ctx.regions[callee];
                if region.device_registered || region.changes_registration {
                    continue;
                }
                call.callee = no_op.clone();
                call.args.clear();
                call.outs.clear();
                replaced.push(callee);
            }
            changes += replaced.len();
            sliced.extend(replaced);
        }
        for &i in &sliced {
            ctx.regions[i].sliced = true;
            let id = ctx.regions[i].routine;
            let routine = ctx.program.routine_mut(id);
            for block in &mut routine.blocks {
                for instr in &mut block.instrs {
                    changes += neutralise(instr, &no_op, &member_names);
                }
            }
        }

        // (b) the transition region, after its first unregister call
        let transition = members.iter().copied().find_map(|i| {
            first_call(ctx.program, ctx.regions[i].routine, is_unregister_call).map(|pivot| (i, pivot))
        });
        if let Some((changing, pivot)) = transition {
            let id = ctx.regions[changing].routine;
            changes += slice_after(ctx.program, id, pivot, &no_op, &member_names);

            // (c) callers leading to the transition that it cannot reach back
            let graph = ctx.call_graph(entry_point);
            let successors = graph.nested_successors(changing);
            let predecessors: Vec<usize> = graph
                .nested_predecessors(changing)
                .into_iter()
                .filter(|p| !successors.contains(p))
                .collect();
            let mut targets: Vec<String> = predecessors
                .iter()
                .map(|&p| ctx.regions[p].name.clone())
                .collect();
            targets.push(ctx.regions[changing].name.clone());
            for &p in &predecessors {
                let id = ctx.regions[p].routine;
                if let Some(pivot) = first_call(ctx.program, id, |callee| targets.iter().any(|t| t == callee)) {
                    changes += slice_after(ctx.program, id, pivot, &no_op, &member_names);
                }
            }
        } else {
            debug!(entry_point, "No unregister call, nothing to slice after");
        }

        for &i in &members {
            changes += dedup_no_ops(ctx.program, ctx.regions[i].routine, &no_op);
        }

        // (d) contracts no longer claim removed instrumentation writes
        changes += self.clean_modifies(ctx, &members);

        if changes > 0 {
            ctx.program.ensure_declared(&no_op);
        }
        info!(entry_point, changes, sliced = sliced.len(), "Device-disable slicing done");
        changes
    }

    fn clean_modifies(&self, ctx: &mut AnalysisContext<'_>, members: &[usize]) -> usize {
        let routines: Vec<RoutineId> = members.iter().map(|&i| ctx.regions[i].routine).collect();
        let writes = transitive_writes(ctx.program, &routines);
        let mut removed = 0;
        for (id, written) in writes {
            let stale: Vec<String> = ctx
                .program
                .routine(id)
                .contract
                .modifies
                .iter()
                .filter(|v| ctx.is_instrumentation_var(v) && !written.contains(*v))
                .cloned()
                .collect();
            let modifies = &mut ctx.program.routine_mut(id).contract.modifies;
            for var in stale {
                modifies.shift_remove(&var);
                removed += 1;
            }
        }
        removed
    }
}

/// (block, instr) of the first call whose callee satisfies `matches`, in
/// block order.
fn first_call(program: &Program, id: RoutineId, matches: impl Fn(&str) -> bool) -> Option<(usize, usize)> {
    program
        .routine(id)
        .blocks
        .iter()
        .enumerate()
        .find_map(|(b, block)| {
            block
                .instrs
                .iter()
                .position(|i| i.as_call().is_some_and(|c| matches(&c.callee)))
                .map(|pos| (b, pos))
        })
}

/// Neutralise every block strictly after the pivot block that cannot reach
/// back to it, plus the rest of the pivot block when it is not on a cycle.
fn slice_after(
    program: &mut Program,
    id: RoutineId,
    (pivot_block, pivot_instr): (usize, usize),
    no_op: &str,
    regions: &[String],
) -> usize {
    let graph = block_graph(program.routine(id));
    let predecessors = graph.nested_predecessors(pivot_block);
    let successors: Vec<usize> = graph
        .nested_successors(pivot_block)
        .into_iter()
        .filter(|b| *b != pivot_block && !predecessors.contains(b))
        .collect();

    let routine = program.routine_mut(id);
    let mut changes = 0;
    for b in successors {
        for instr in &mut routine.blocks[b].instrs {
            changes += neutralise(instr, no_op, regions);
        }
    }
    if !predecessors.contains(&pivot_block) {
        for instr in routine.blocks[pivot_block].instrs.iter_mut().skip(pivot_instr + 1) {
            changes += neutralise(instr, no_op, regions);
        }
    }
    changes
}

/// Turn access logging and calls into instrumented regions into no-ops.
fn neutralise(instr: &mut Instr, no_op: &str, regions: &[String]) -> usize {
    let is_region_call = instr
        .as_call()
        .is_some_and(|c| regions.iter().any(|r| *r == c.callee));
    if instr.is_access_log() || is_region_call {
        *instr = Instr::call(no_op, Vec::new());
        1
    } else {
        0
    }
}

fn dedup_no_ops(program: &mut Program, id: RoutineId, no_op: &str) -> usize {
    let is_no_op = |i: &Instr| i.as_call().is_some_and(|c| c.callee == no_op && c.args.is_empty());
    let mut removed = 0;
    for block in &mut program.routine_mut(id).blocks {
        let before = block.instrs.len();
        block.instrs.dedup_by(|a, b| is_no_op(&*a) && is_no_op(&*b));
        removed += before - block.instrs.len();
    }
    removed
}
