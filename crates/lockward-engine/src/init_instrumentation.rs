//! Init-routine instrumentation.
//!
//! The init routine stops calling entry points directly. Instead it ends in
//! a block that establishes the initial lockset state and calls every pair
//! checker with the arguments init would have passed to the entry points.

use tracing::{info, warn};

use lockward_ir::program::{IrError, Param};
use lockward_ir::{Block, Expr, Instr, InstrKind, Transfer};

use crate::context::AnalysisContext;
use crate::lockset::{no_lock_held, CURRENT_LOCKSET};
use crate::pairwise::init_call_sites;

pub const PAIR_CHECKS_BLOCK: &str = "$pair_checks";

#[derive(Debug, Default)]
pub struct InitInstrumentation;

impl InitInstrumentation {
    pub fn new() -> Self {
        Self
    }

    /// Returns the number of checker calls added.
    pub fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<usize, IrError> {
        let init_id = ctx.program.routine_id(&ctx.init_routine)?;
        let sites = init_call_sites(ctx.program, &ctx.init_routine);

        let mut instrs = vec![Instr::assume(no_lock_held())];
        for ls in ctx.locksets.iter().filter(|ls| !ls.is_current()) {
            instrs.push(Instr::assume(ls.as_expr()));
        }
        for var in &ctx.access_vars {
            instrs.push(Instr::assume(Expr::var(var.has_occurred.clone()).not()));
        }

        let mut fresh: Vec<Param> = Vec::new();
        let mut calls = Vec::new();
        for pair in ctx.pair_regions.values() {
            let mut args = Vec::new();
            let mut sides = vec![(pair.ep1.as_str(), None)];
            if !pair.is_self_pair() {
                sides.push((pair.ep2.as_str(), Some(&pair.merged)));
            }
            for (ep, merged) in sides {
                let params = ctx.program.routine(ctx.program.routine_id(ep)?).params.clone();
                let site_args = match sites.get(ep) {
                    Some(site) => site.args.clone(),
                    None => {
                        warn!(entry_point = ep, "Init routine never calls entry point, arguments left unconstrained");
                        params
                            .iter()
                            .map(|p| {
                                let local = Param::new(format!("$arg${ep}${}", p.name), p.ty.clone());
                                let var = Expr::var(local.name.clone());
                                if !fresh.contains(&local) {
                                    fresh.push(local);
                                }
                                var
                            })
                            .collect()
                    }
                };
                debug_assert_eq!(
                    site_args.len(),
                    params.len(),
                    "init call to {ep} does not match its parameters"
                );
                for (k, arg) in site_args.into_iter().enumerate() {
                    let shared = merged.map(|m| m.get(k).copied().flatten().is_some()).unwrap_or(false);
                    if !shared {
                        args.push(arg);
                    }
                }
            }
            calls.push(Instr::call(pair.name.clone(), args));
        }
        if !fresh.is_empty() {
            instrs.push(Instr::new(InstrKind::Havoc(
                fresh.iter().map(|p| p.name.clone()).collect(),
            )));
        }
        let added = calls.len();
        instrs.extend(calls);

        let mut modifies = vec![CURRENT_LOCKSET.to_string()];
        modifies.extend(
            ctx.locksets
                .iter()
                .filter(|ls| !ls.is_current())
                .map(|ls| ls.variable.clone()),
        );
        for var in &ctx.access_vars {
            modifies.push(var.has_occurred.clone());
            modifies.push(var.offset.clone());
        }
        for pair in ctx.pair_regions.values() {
            modifies.extend(ctx.program.routine(pair.routine).contract.modifies.iter().cloned());
        }

        let entry_points: Vec<String> = ctx.entry_points.iter().map(|ep| ep.name.clone()).collect();
        let init = ctx.program.routine_mut(init_id);
        let mut removed = 0;
        for block in &mut init.blocks {
            let before = block.instrs.len();
            block
                .instrs
                .retain(|i| !matches!(i.as_call(), Some(c) if entry_points.contains(&c.callee)));
            removed += before - block.instrs.len();
            if block.transfer == Transfer::Return {
                block.transfer = Transfer::Goto(vec![PAIR_CHECKS_BLOCK.to_string()]);
            }
        }
        init.blocks
            .push(Block::new(PAIR_CHECKS_BLOCK, instrs, Transfer::Return));
        for local in fresh {
            if !init.is_parameter_or_local(&local.name) {
                init.locals.push(local);
            }
        }
        init.contract.modifies.extend(modifies);

        info!(init = %init.name, checkers = added, removed, "Init routine instrumented");
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Discovery;
    use crate::instrumentation::EntryPointInstrumentation;
    use crate::lockset::LocksetModel;
    use crate::options::PipelineOptions;
    use crate::pairwise::PairwiseCheckerGenerator;
    use crate::shared_state::AccessScanAnalyser;
    use lockward_ir::{Program, Routine, Type};

    /// `open` and `close` each write `$M.0[dev]`; init calls `open` with
    /// `open_args`.
    fn open_close(open_args: Vec<Expr>) -> Program {
        let mut program = Program::new();
        program.declare_global("$M.0", Type::map(Type::Int, Type::Int), Vec::new());
        for name in ["open", "close"] {
            program
                .add_routine(
                    Routine::new(name, vec![Param::new("dev", Type::Int)]).with_blocks(vec![
                        Block::new(
                            "entry",
                            vec![Instr::write("$M.0", Expr::var("dev"), Expr::int(0))],
                            Transfer::Return,
                        ),
                    ]),
                )
                .unwrap();
        }
        program
            .add_routine(Routine::new("probe", Vec::new()).with_blocks(vec![Block::new(
                "entry",
                vec![Instr::call("open", open_args)],
                Transfer::Return,
            )]))
            .unwrap();
        program
    }

    fn with_checkers(program: &mut Program) -> AnalysisContext<'_> {
        let options = PipelineOptions::default();
        let analyser = AccessScanAnalyser::new();
        let discovery = Discovery {
            init_routine: "probe".into(),
            entry_points: vec!["open".into(), "close".into()],
        };
        let mut ctx = AnalysisContext::new(program, discovery, &analyser);
        LocksetModel::new(&options).run(&mut ctx);
        let pass = EntryPointInstrumentation::new();
        for ep in ["open", "close"] {
            pass.create_regions(&mut ctx, ep).unwrap();
            pass.instrument(&mut ctx, ep);
        }
        PairwiseCheckerGenerator::new(&ctx, &analyser).run(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn init_calls_checkers_instead_of_entry_points() {
        let mut program = open_close(vec![Expr::int(3)]);
        let mut ctx = with_checkers(&mut program);
        assert_eq!(InitInstrumentation::new().run(&mut ctx).unwrap(), 3);

        let init = ctx.program.routine_by_name("probe").unwrap();
        assert_eq!(init.blocks.len(), 2);
        assert!(init.blocks[0].instrs.is_empty());
        let callees: Vec<(&str, usize)> = init
            .calls()
            .map(|c| (c.callee.as_str(), c.args.len()))
            .collect();
        assert_eq!(
            callees,
            vec![("check$open$open", 1), ("check$open$close", 1), ("check$close$close", 1)]
        );
        // close is never called by init, so its argument is havocked
        assert!(init.is_parameter_or_local("$arg$close$dev"));
        assert!(init.contract.modifies.contains(CURRENT_LOCKSET));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "does not match its parameters")]
    fn init_call_with_wrong_arity_is_caught() {
        let mut program = open_close(vec![Expr::int(3), Expr::int(4)]);
        let mut ctx = with_checkers(&mut program);
        let _ = InitInstrumentation::new().run(&mut ctx);
    }
}
