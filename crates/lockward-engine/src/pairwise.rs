//! Pairwise checker generation.
//!
//! For every pair of entry points `(ep1, ep2)` with `ep1` at or before `ep2`
//! in discovery order, a `check$ep1$ep2` routine calls both entry points with
//! reconciled arguments and then asserts, per shared region, that any write
//! was protected by a lock common to both sides.

use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use tracing::{debug, info};

use lockward_ir::program::{Contract, IrError, Param};
use lockward_ir::{
    AccessKind, Block, Decoration, Expr, Instr, InstrKind, Program, Routine, RoutineId, Transfer,
};

use crate::context::AnalysisContext;
use crate::lockset::CURRENT_LOCKSET;
use crate::region::PairCheckingRegion;
use crate::shared_state::{MemoryRegion, SharedStateAnalyser};

pub const HEADER_BLOCK: &str = "$header";
pub const CHECKER_BLOCK: &str = "$checker";

pub fn checker_name(ep1: &str, ep2: &str) -> String {
    format!("check${ep1}${ep2}")
}

/// First call the init routine makes to one entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct InitCallSite {
    pub args: Vec<Expr>,
    /// Arguments with single-assignment locals replaced by their definition.
    pub resolved: Vec<Expr>,
}

/// Scan the init routine once and record its first call to each callee.
pub fn init_call_sites(program: &Program, init: &str) -> IndexMap<String, InitCallSite> {
    let mut sites = IndexMap::new();
    let Some(routine) = program.routine_by_name(init) else {
        return sites;
    };

    let mut definitions: HashMap<&str, Option<&Expr>> = HashMap::new();
    for instr in routine.instrs() {
        match &instr.kind {
            InstrKind::Assign { target, value } if routine.is_parameter_or_local(target) => {
                definitions
                    .entry(target.as_str())
                    .and_modify(|d| *d = None)
                    .or_insert(Some(value));
            }
            _ => {
                for var in instr.written_vars() {
                    definitions.insert(var, None);
                }
            }
        }
    }

    for call in routine.calls() {
        if sites.contains_key(&call.callee) {
            continue;
        }
        let resolved = call
            .args
            .iter()
            .map(|arg| match arg.as_var().and_then(|v| definitions.get(v)) {
                Some(Some(def)) => (*def).clone(),
                _ => arg.clone(),
            })
            .collect();
        sites.insert(
            call.callee.clone(),
            InitCallSite {
                args: call.args.clone(),
                resolved,
            },
        );
    }
    sites
}

/// Combined parameter list of a checker and the arguments of both calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamPlan {
    pub params: Vec<Param>,
    pub args1: Vec<Expr>,
    pub args2: Vec<Expr>,
    /// For each `ep2` parameter, the `ep1` parameter it shares.
    pub merged: Vec<Option<usize>>,
}

/// Merge `second` into `first` by equal name and type, or by equal resolved
/// init-site argument; suffix both sides of any remaining name collision.
pub fn reconcile_params(
    first: &[Param],
    second: &[Param],
    resolved1: Option<&[Expr]>,
    resolved2: Option<&[Expr]>,
) -> ParamPlan {
    let same_site = |i: usize, k: usize| match (resolved1, resolved2) {
        (Some(a), Some(b)) => matches!((a.get(i), b.get(k)), (Some(x), Some(y)) if x == y),
        _ => false,
    };

    let mut taken = vec![false; first.len()];
    let mut merged = vec![None; second.len()];
    let mut extra: Vec<usize> = Vec::new();
    for (k, q) in second.iter().enumerate() {
        let hit = (0..first.len()).find(|&i| {
            !taken[i] && first[i].ty == q.ty && (first[i].name == q.name || same_site(i, k))
        });
        match hit {
            Some(i) => {
                taken[i] = true;
                merged[k] = Some(i);
            }
            None => extra.push(k),
        }
    }

    let mut names1: Vec<String> = first.iter().map(|p| p.name.clone()).collect();
    let mut names2: Vec<String> = second.iter().map(|p| p.name.clone()).collect();
    let kept: IndexSet<&str> = extra.iter().map(|&k| second[k].name.as_str()).collect();
    let collisions: Vec<String> = first
        .iter()
        .map(|p| p.name.clone())
        .filter(|n| kept.contains(n.as_str()))
        .collect();
    for name in &collisions {
        for n in names1.iter_mut().filter(|n| n.as_str() == name.as_str()) {
            *n = format!("{name}$1");
        }
        for &k in &extra {
            if second[k].name == *name {
                names2[k] = format!("{name}$2");
            }
        }
    }

    let mut params: Vec<Param> = first
        .iter()
        .zip(&names1)
        .map(|(p, n)| Param::new(n.clone(), p.ty.clone()))
        .collect();
    params.extend(
        extra
            .iter()
            .map(|&k| Param::new(names2[k].clone(), second[k].ty.clone())),
    );
    let args1: Vec<Expr> = names1.iter().map(|n| Expr::var(n.clone())).collect();
    let args2: Vec<Expr> = merged
        .iter()
        .enumerate()
        .map(|(k, m)| match m {
            Some(i) => args1[*i].clone(),
            None => Expr::var(names2[k].clone()),
        })
        .collect();

    ParamPlan {
        params,
        args1,
        args2,
        merged,
    }
}

pub struct PairwiseCheckerGenerator<'a> {
    analyser: &'a dyn SharedStateAnalyser,
    init_calls: IndexMap<String, InitCallSite>,
}

impl<'a> PairwiseCheckerGenerator<'a> {
    pub fn new(ctx: &AnalysisContext<'_>, analyser: &'a dyn SharedStateAnalyser) -> Self {
        Self {
            analyser,
            init_calls: init_call_sites(ctx.program, &ctx.init_routine),
        }
    }

    /// Generate every pair checker; returns their names in generation order.
    pub fn run(&self, ctx: &mut AnalysisContext<'_>) -> Result<Vec<String>, IrError> {
        let names: Vec<String> = ctx.entry_points.iter().map(|ep| ep.name.clone()).collect();
        let mut generated = Vec::new();
        for (i, ep1) in names.iter().enumerate() {
            for ep2 in &names[i..] {
                self.checker_for(ctx, ep1, ep2)?;
                generated.push(checker_name(ep1, ep2));
            }
        }
        let assertions: usize = ctx
            .pair_regions
            .values()
            .map(|p| p.checked_regions.len())
            .sum();
        info!(pairs = generated.len(), assertions, "Pair checkers generated");
        Ok(generated)
    }

    /// The checker for `(ep1, ep2)`, built on first request.
    pub fn checker_for(
        &self,
        ctx: &mut AnalysisContext<'_>,
        ep1: &str,
        ep2: &str,
    ) -> Result<RoutineId, IrError> {
        let key = (ep1.to_string(), ep2.to_string());
        if let Some(existing) = ctx.pair_regions.get(&key) {
            return Ok(existing.routine);
        }

        let self_pair = ep1 == ep2;
        let first = ctx.program.routine(ctx.program.routine_id(ep1)?).params.clone();
        let plan = if self_pair {
            ParamPlan {
                args1: first.iter().map(|p| Expr::var(p.name.clone())).collect(),
                args2: first.iter().map(|p| Expr::var(p.name.clone())).collect(),
                merged: (0..first.len()).map(Some).collect(),
                params: first,
            }
        } else {
            let second = ctx.program.routine(ctx.program.routine_id(ep2)?).params.clone();
            reconcile_params(
                &first,
                &second,
                self.init_calls.get(ep1).map(|s| s.resolved.as_slice()),
                self.init_calls.get(ep2).map(|s| s.resolved.as_slice()),
            )
        };

        let name = checker_name(ep1, ep2);
        let mut blocks = Vec::new();
        if self_pair {
            blocks.push(Block::new(
                HEADER_BLOCK,
                Vec::new(),
                Transfer::Goto(vec!["$logger".into()]),
            ));
            blocks.push(Block::new(
                "$logger",
                vec![Instr::call(ep1, plan.args1.clone())],
                Transfer::Goto(vec![CHECKER_BLOCK.into()]),
            ));
        } else {
            blocks.push(Block::new(
                HEADER_BLOCK,
                Vec::new(),
                Transfer::Goto(vec!["$logger$1".into()]),
            ));
            blocks.push(Block::new(
                "$logger$1",
                vec![Instr::call(ep1, plan.args1.clone())],
                Transfer::Goto(vec!["$logger$2".into()]),
            ));
            blocks.push(Block::new(
                "$logger$2",
                vec![Instr::call(ep2, plan.args2.clone())],
                Transfer::Goto(vec![CHECKER_BLOCK.into()]),
            ));
        }

        let (checks, checked_regions) = self.race_checks(ctx, ep1, ep2);
        blocks.push(Block::new(CHECKER_BLOCK, checks, Transfer::Return));

        let mut routine = Routine::new(name.clone(), plan.params.clone()).with_blocks(blocks);
        routine.decorations.push(Decoration::Checker);
        routine.contract = self.contract(ctx, ep1, ep2, &checked_regions);
        let id = ctx.program.add_routine(routine)?;

        debug!(checker = %name, regions = checked_regions.len(), "Pair checker built");
        ctx.pair_regions.insert(
            key,
            PairCheckingRegion {
                name,
                routine: id,
                ep1: ep1.to_string(),
                ep2: ep2.to_string(),
                merged: plan.merged,
                checked_regions,
            },
        );
        Ok(id)
    }

    /// One capture marker and one assertion per shared region with state on
    /// both sides.
    fn race_checks(
        &self,
        ctx: &AnalysisContext<'_>,
        ep1: &str,
        ep2: &str,
    ) -> (Vec<Instr>, Vec<MemoryRegion>) {
        let self_pair = ep1 == ep2;
        let mut instrs = Vec::new();
        let mut checked = Vec::new();

        for region in self.analyser.pair_regions(ctx.program, ep1, ep2) {
            let (Some(w1), Some(w2)) = (
                ctx.access_var(ep1, &region, AccessKind::Write),
                ctx.access_var(ep2, &region, AccessKind::Write),
            ) else {
                debug!(%region, ep1, ep2, "Access-checking state missing, region not checked");
                continue;
            };

            let mut protection = Vec::with_capacity(ctx.locks.len());
            let mut complete = true;
            for lock in &ctx.locks {
                match (
                    ctx.memory_lockset(ep1, &region, lock),
                    ctx.memory_lockset(ep2, &region, lock),
                ) {
                    (Some(m1), _) if self_pair => protection.push(m1.as_expr()),
                    (Some(m1), Some(m2)) => protection.push(m1.as_expr().and(m2.as_expr())),
                    _ => complete = false,
                }
            }
            if !complete {
                debug!(%region, ep1, ep2, "Memory lockset missing, region not checked");
                continue;
            }

            let occurred = if self_pair {
                Expr::var(w1.has_occurred.clone())
            } else {
                Expr::var(w1.has_occurred.clone()).or(Expr::var(w2.has_occurred.clone()))
            };
            let resource = Decoration::Resource(region.to_string());
            instrs.push(
                Instr::assume(Expr::bool(true))
                    .with_decoration(Decoration::CaptureState(format!("check_state_{}", checked.len())))
                    .with_decoration(resource.clone()),
            );
            instrs.push(
                Instr::assert(occurred.implies(Expr::or_all(protection)))
                    .with_decoration(resource)
                    .with_decoration(Decoration::RaceChecking),
            );
            checked.push(region);
        }
        (instrs, checked)
    }

    fn contract(
        &self,
        ctx: &AnalysisContext<'_>,
        ep1: &str,
        ep2: &str,
        checked: &[MemoryRegion],
    ) -> Contract {
        let mut contract = Contract::default();
        for lock in &ctx.locks {
            contract.requires.push(lock.held().not());
            contract.ensures.push(lock.held().not());
        }

        let sides: Vec<&str> = if ep1 == ep2 { vec![ep1] } else { vec![ep1, ep2] };
        for ep in &sides {
            for region in checked {
                for lock in &ctx.locks {
                    if let Some(ls) = ctx.memory_lockset(ep, region, lock) {
                        contract.requires.push(ls.as_expr());
                    }
                }
                for kind in AccessKind::ALL {
                    if let Some(var) = ctx.access_var(ep, region, kind) {
                        contract.requires.push(Expr::var(var.has_occurred.clone()).not());
                    }
                }
            }
        }

        contract.modifies.insert(CURRENT_LOCKSET.to_string());
        for ep in &sides {
            for ls in ctx.memory_locksets_of(ep) {
                contract.modifies.insert(ls.variable.clone());
            }
            for var in ctx.access_vars_of(ep) {
                contract.modifies.insert(var.has_occurred.clone());
                contract.modifies.insert(var.offset.clone());
            }
            if let Some(routine) = ctx.program.routine_by_name(ep) {
                contract
                    .modifies
                    .extend(routine.contract.modifies.iter().cloned());
            }
        }
        contract
    }
}
