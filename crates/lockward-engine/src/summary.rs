//! Summary generation with existential candidates.
//!
//! Each candidate fact `F` is guarded as `e ==> F` by a fresh existential
//! boolean `e`. The refinement loop outside this crate drops the guards it
//! cannot prove; what survives becomes the routine's summary.

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use lockward_ir::program::Constant;
use lockward_ir::{AccessKind, Decoration, Expr, InstrKind, Program, Routine, Type};

use crate::context::AnalysisContext;
use crate::options::PipelineOptions;
use crate::region::Region;

/// Which kind of site a guard is shared across.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SiteKey {
    Plain,
    Implied(Expr),
}

/// Offset expressions known to address the same location.
#[derive(Debug, Clone, Default)]
pub struct EquivalenceClasses {
    classes: Vec<IndexSet<Expr>>,
}

impl EquivalenceClasses {
    pub fn from_sets(sets: &[Vec<Expr>]) -> Self {
        Self {
            classes: sets
                .iter()
                .map(|set| set.iter().cloned().collect())
                .collect(),
        }
    }

    pub fn class_of(&self, expr: &Expr) -> Option<&IndexSet<Expr>> {
        self.classes.iter().find(|c| c.contains(expr))
    }
}

/// Allocates and memoizes existential constants for one entry point.
pub struct ExistentialEngine {
    prefix: String,
    merge: bool,
    counter: usize,
    memo: IndexMap<(Expr, bool), IndexMap<SiteKey, String>>,
    classes: EquivalenceClasses,
    created: Vec<String>,
}

impl ExistentialEngine {
    pub fn new(entry_point: &str, merge: bool, classes: EquivalenceClasses) -> Self {
        Self {
            prefix: format!("_b${entry_point}"),
            merge,
            counter: 0,
            memo: IndexMap::new(),
            classes,
            created: Vec::new(),
        }
    }

    fn fresh(&mut self) -> String {
        let name = format!("{}${}", self.prefix, self.counter);
        self.counter += 1;
        self.created.push(name.clone());
        name
    }

    /// `e ==> atom` (or `e ==> !atom`).
    pub fn guard(&mut self, atom: &Expr, value: bool) -> Expr {
        let e = self.constant_for(atom, value, SiteKey::Plain);
        Expr::var(e).implies(atom.clone().polarity(value))
    }

    /// `e ==> (premise ==> atom)`, sharing `e` across equivalent premises.
    pub fn guard_implied(&mut self, premise: &Expr, atom: &Expr, value: bool) -> Expr {
        let e = self.constant_for(atom, value, SiteKey::Implied(premise.clone()));
        Expr::var(e).implies(premise.clone().implies(atom.clone().polarity(value)))
    }

    fn constant_for(&mut self, atom: &Expr, value: bool, site: SiteKey) -> String {
        if !self.merge {
            return self.fresh();
        }
        let key = (atom.clone(), value);
        if let Some(existing) = self.memo.get(&key).and_then(|sites| self.lookup(sites, &site)) {
            return existing;
        }
        let name = self.fresh();
        self.memo.entry(key).or_default().insert(site, name.clone());
        name
    }

    fn lookup(&self, sites: &IndexMap<SiteKey, String>, site: &SiteKey) -> Option<String> {
        if let Some(name) = sites.get(site) {
            return Some(name.clone());
        }
        let SiteKey::Implied(premise) = site else {
            return None;
        };
        let (lhs, rhs) = premise.as_equality()?;
        let class = self.classes.class_of(rhs)?;
        class.iter().find_map(|member| {
            sites
                .get(&SiteKey::Implied(lhs.clone().eq(member.clone())))
                .cloned()
        })
    }

    /// Declare every constant created so far; returns how many.
    pub fn finish(self, program: &mut Program) -> usize {
        let count = self.created.len();
        for name in self.created {
            program.declare_constant(Constant {
                name,
                ty: Type::Bool,
                unique: false,
                decorations: vec![Decoration::Existential],
            });
        }
        count
    }
}

pub struct SummaryGeneration<'o> {
    options: &'o PipelineOptions,
}

impl<'o> SummaryGeneration<'o> {
    pub fn new(options: &'o PipelineOptions) -> Self {
        Self { options }
    }

    /// Decorate every region of `entry_point`; returns the number of
    /// existential constants declared.
    pub fn run(&self, ctx: &mut AnalysisContext<'_>, entry_point: &str) -> usize {
        let mut engine = ExistentialEngine::new(
            entry_point,
            self.options.merge_existentials,
            EquivalenceClasses::from_sets(&ctx.matched_accesses),
        );
        let inlined_ep = ctx.entry_point(entry_point).map(|ep| ep.inlined).unwrap_or(false);
        let locks = ctx.locks.clone();
        // the entry point's own flags cover everything it reaches
        let root = ctx
            .regions_of(entry_point)
            .into_iter()
            .find(|&i| ctx.regions[i].is_entry_point);
        let memory: Vec<Expr> = ctx
            .memory_locksets_of(entry_point)
            .filter(|ls| root.is_some_and(|r| ctx.regions[r].calls_lock(&ls.lock.name)))
            .map(|ls| ls.as_expr())
            .collect();
        let access_vars: Vec<_> = ctx.access_vars_of(entry_point).cloned().collect();

        let mut candidates = 0;
        for i in ctx.regions_of(entry_point) {
            let region = ctx.regions[i].clone();
            if region.sliced {
                debug!(region = region.name(), "Sliced region, no candidates");
                continue;
            }
            let touched: Vec<Expr> = locks
                .iter()
                .filter(|l| region.calls_lock(&l.name))
                .map(|l| l.held())
                .collect();

            if !inlined_ep && !region.inlined {
                let mut requires = Vec::new();
                let mut ensures = Vec::new();
                for atom in &touched {
                    for value in [false, true] {
                        requires.push(engine.guard(atom, value));
                        ensures.push(engine.guard(atom, value));
                    }
                }
                for atom in &memory {
                    requires.push(engine.guard(atom, true));
                    ensures.push(engine.guard(atom, true));
                }
                let routine = ctx.program.routine(region.routine);
                for var in &access_vars {
                    let occurred = Expr::var(var.has_occurred.clone());
                    requires.push(engine.guard(&occurred, false));
                    ensures.push(engine.guard(&occurred, false));
                    for offset in accessed_offsets(routine, var.region.as_str(), var.kind) {
                        let premise = Expr::var(var.offset.clone()).eq(offset);
                        ensures.push(engine.guard_implied(&premise, &occurred, true));
                    }
                }
                candidates += requires.len() + ensures.len();
                let contract = &mut ctx.program.routine_mut(region.routine).contract;
                contract.requires.extend(requires);
                contract.ensures.extend(ensures);
            }

            for header in region.loop_headers(ctx.program) {
                let mut asserts = Vec::new();
                for atom in &touched {
                    for value in [false, true] {
                        asserts.push(engine.guard(atom, value));
                    }
                }
                for atom in &memory {
                    asserts.push(engine.guard(atom, true));
                }
                for var in access_vars.iter().filter(|v| v.kind == AccessKind::Write) {
                    asserts.push(engine.guard(&Expr::var(var.has_occurred.clone()), false));
                }
                candidates += region.add_invariants(ctx.program, header, asserts);
            }
        }

        let existentials = engine.finish(ctx.program);
        info!(entry_point, candidates, existentials, "Summary candidates generated");
        existentials
    }
}

/// Offsets of `kind` accesses to `region` expressed over parameters only.
fn accessed_offsets(routine: &Routine, region: &str, kind: AccessKind) -> Vec<Expr> {
    let mut offsets: IndexSet<Expr> = IndexSet::new();
    for instr in routine.instrs() {
        let InstrKind::Access(access) = &instr.kind else {
            continue;
        };
        if access.region != region || access.kind != kind {
            continue;
        }
        let over_params = access
            .offset
            .free_vars()
            .iter()
            .all(|v| routine.params.iter().any(|p| &p.name == v));
        if over_params {
            offsets.insert(access.offset.clone());
        }
    }
    offsets.into_iter().collect()
}
