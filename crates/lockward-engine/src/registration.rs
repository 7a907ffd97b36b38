//! Device-registration analysis.
//!
//! Marks the regions that register or unregister the device, then which
//! regions run while the device is still registered.

use tracing::debug;

use crate::context::AnalysisContext;

pub const REGISTER_DEVICE_PREFIX: &str = "_REGISTER_DEVICE_";
pub const UNREGISTER_DEVICE_PREFIX: &str = "_UNREGISTER_DEVICE_";

pub fn is_unregister_call(callee: &str) -> bool {
    callee.starts_with(UNREGISTER_DEVICE_PREFIX)
}

pub fn is_registration_call(callee: &str) -> bool {
    callee.starts_with(REGISTER_DEVICE_PREFIX) || is_unregister_call(callee)
}

#[derive(Debug, Default)]
pub struct DeviceRegistrationAnalysis;

impl DeviceRegistrationAnalysis {
    pub fn new() -> Self {
        Self
    }

    /// Returns how many regions of `entry_point` end up device-registered.
    pub fn run(&self, ctx: &mut AnalysisContext<'_>, entry_point: &str) -> usize {
        let members = ctx.regions_of(entry_point);
        let mut unregisters = Vec::with_capacity(members.len());
        for &i in &members {
            let routine = ctx.program.routine(ctx.regions[i].routine);
            ctx.regions[i].changes_registration = routine.calls().any(|c| is_registration_call(&c.callee));
            if routine.calls().any(|c| is_unregister_call(&c.callee)) {
                unregisters.push(i);
            }
        }
        let graph = ctx.call_graph(entry_point);
        for &i in &members {
            ctx.regions[i].reaches_unregister = unregisters.contains(&i)
                || graph.nested_successors(i).iter().any(|j| unregisters.contains(j));
        }

        let mut worklist: Vec<usize> = Vec::new();
        for &i in &members {
            if ctx.regions[i].is_entry_point {
                ctx.regions[i].device_registered = true;
                worklist.push(i);
            }
        }
        while let Some(i) = worklist.pop() {
            for callee in registered_callees(ctx, i, &members) {
                if !ctx.regions[callee].device_registered {
                    ctx.regions[callee].device_registered = true;
                    worklist.push(callee);
                }
            }
        }

        let registered = members.iter().filter(|&&i| ctx.regions[i].device_registered).count();
        let changing = members.iter().filter(|&&i| ctx.regions[i].changes_registration).count();
        debug!(entry_point, registered, changing, "Device registration analysed");
        registered
    }
}

/// Callee regions that region `caller` calls before its transition point:
/// the first unregister call or call to a region that reaches one.
/// Registering the device is not a transition.
fn registered_callees(
    ctx: &AnalysisContext<'_>,
    caller: usize,
    members: &[usize],
) -> Vec<usize> {
    let mut callees = Vec::new();
    for call in ctx.program.routine(ctx.regions[caller].routine).calls() {
        if is_unregister_call(&call.callee) {
            break;
        }
        let Some(callee) = members
            .iter()
            .copied()
            .find(|&j| ctx.regions[j].name == call.callee)
        else {
            continue;
        };
        if ctx.regions[callee].reaches_unregister {
            break;
        }
        callees.push(callee);
    }
    callees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Discovery;
    use crate::instrumentation::EntryPointInstrumentation;
    use crate::shared_state::AccessScanAnalyser;
    use lockward_ir::{Block, Instr, Program, Routine, Transfer};

    fn leaf(program: &mut Program, name: &str, instrs: Vec<Instr>) {
        program
            .add_routine(
                Routine::new(name, Vec::new())
                    .with_blocks(vec![Block::new("entry", instrs, Transfer::Return)]),
            )
            .unwrap();
    }

    #[test]
    fn callees_after_the_transition_are_not_registered() {
        let mut program = Program::new();
        leaf(
            &mut program,
            "remove",
            vec![
                Instr::call("before", Vec::new()),
                Instr::call("teardown", Vec::new()),
                Instr::call("after", Vec::new()),
            ],
        );
        leaf(&mut program, "before", Vec::new());
        leaf(&mut program, "after", Vec::new());
        leaf(
            &mut program,
            "teardown",
            vec![Instr::call("_UNREGISTER_DEVICE_netdev", Vec::new())],
        );
        let discovery = Discovery {
            init_routine: "probe".into(),
            entry_points: vec!["remove".into()],
        };
        let mut ctx = AnalysisContext::new(&mut program, discovery, &AccessScanAnalyser::new());
        EntryPointInstrumentation::new()
            .create_regions(&mut ctx, "remove")
            .unwrap();
        let registered = DeviceRegistrationAnalysis::new().run(&mut ctx, "remove");
        assert_eq!(registered, 2);

        let flag = |name: &str| {
            let r = &ctx.regions[ctx.region_by_name(name).unwrap()];
            (r.device_registered, r.changes_registration)
        };
        assert_eq!(flag("remove"), (true, false));
        assert_eq!(flag("before$remove"), (true, false));
        assert_eq!(flag("teardown$remove"), (false, true));
        assert_eq!(flag("after$remove"), (false, false));
    }

    #[test]
    fn registering_does_not_end_the_registered_phase() {
        let mut program = Program::new();
        leaf(
            &mut program,
            "open",
            vec![Instr::call("setup", Vec::new()), Instr::call("work", Vec::new())],
        );
        leaf(&mut program, "setup", vec![Instr::call("_REGISTER_DEVICE_net", Vec::new())]);
        leaf(&mut program, "work", Vec::new());
        let discovery = Discovery {
            init_routine: "probe".into(),
            entry_points: vec!["open".into()],
        };
        let mut ctx = AnalysisContext::new(&mut program, discovery, &AccessScanAnalyser::new());
        EntryPointInstrumentation::new()
            .create_regions(&mut ctx, "open")
            .unwrap();
        assert_eq!(DeviceRegistrationAnalysis::new().run(&mut ctx, "open"), 3);

        let setup = &ctx.regions[ctx.region_by_name("setup$open").unwrap()];
        assert!(setup.changes_registration);
        assert!(!setup.reaches_unregister);
        assert!(ctx.regions[ctx.region_by_name("work$open").unwrap()].device_registered);
    }
}
