//! Lockset model: lock constants, the current lockset, per-region memory
//! locksets, access-checking variables and the `updateLockset` function.

use serde::Serialize;
use tracing::info;

use lockward_ir::interp::UPDATE_LOCKSET_FN;
use lockward_ir::program::{Constant, Function, Param};
use lockward_ir::{AccessKind, Decoration, Expr, Type};

use crate::context::AnalysisContext;
use crate::options::PipelineOptions;
use crate::shared_state::MemoryRegion;

/// Global `[int]bool` map of locks currently held.
pub const CURRENT_LOCKSET: &str = "CLS";
pub const UPDATE_LOCKSET: &str = UPDATE_LOCKSET_FN;

/// Abstract lock, named by the lowering front end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Lock {
    pub name: String,
}

impl Lock {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Unique `int` constant identifying this lock in lockset maps.
    pub fn constant(&self) -> String {
        format!("lock${}", self.name)
    }

    /// `CLS[lock$name]`
    pub fn held(&self) -> Expr {
        Expr::var(CURRENT_LOCKSET).select(Expr::var(self.constant()))
    }
}

/// A lockset bit: the state variable, the lock it tracks, and the target
/// (the lock constant for the current lockset, a region for memory locksets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lockset {
    pub variable: String,
    pub lock: Lock,
    pub target: String,
    /// Owning entry point; `None` for the shared current lockset.
    pub entry_point: Option<String>,
}

impl Lockset {
    pub fn is_current(&self) -> bool {
        self.entry_point.is_none()
    }

    /// The boolean this lockset reads as: `CLS[l]` or the memory variable.
    pub fn as_expr(&self) -> Expr {
        if self.is_current() {
            self.lock.held()
        } else {
            Expr::var(self.variable.clone())
        }
    }
}

/// Has-occurred flag plus offset variable for one (entry point, region, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessCheckingVariable {
    pub entry_point: String,
    pub region: MemoryRegion,
    pub kind: AccessKind,
    pub has_occurred: String,
    pub offset: String,
}

pub fn memory_lockset_var(region: &MemoryRegion, lock: &Lock, entry_point: &str) -> String {
    format!("MLS${region}${}${entry_point}", lock.name)
}

pub fn has_occurred_var(kind: AccessKind, region: &MemoryRegion, entry_point: &str) -> String {
    format!("{}_HAS_OCCURRED${region}${entry_point}", kind.tag())
}

pub fn access_offset_var(kind: AccessKind, region: &MemoryRegion, entry_point: &str) -> String {
    format!("{}_ACCESS_OFFSET${region}${entry_point}", kind.tag())
}

/// `updateLockset(CLS, lock$l, value)`
pub fn update_expr(lock: &Lock, value: bool) -> Expr {
    Expr::apply(
        UPDATE_LOCKSET,
        vec![
            Expr::var(CURRENT_LOCKSET),
            Expr::var(lock.constant()),
            Expr::bool(value),
        ],
    )
}

/// `(forall l: int :: CLS[l] <==> false)`
pub fn no_lock_held() -> Expr {
    Expr::forall(
        vec![("l".to_string(), Type::Int)],
        Expr::var(CURRENT_LOCKSET)
            .select(Expr::var("l"))
            .iff(Expr::bool(false)),
    )
}

fn update_axioms() -> Vec<Expr> {
    let set_ty = Type::map(Type::Int, Type::Bool);
    let updated = Expr::apply(
        UPDATE_LOCKSET,
        vec![Expr::var("s"), Expr::var("l"), Expr::var("v")],
    );
    let targeted = Expr::forall(
        vec![
            ("s".to_string(), set_ty.clone()),
            ("l".to_string(), Type::Int),
            ("v".to_string(), Type::Bool),
        ],
        updated.clone().select(Expr::var("l")).eq(Expr::var("v")),
    );
    let preserved = Expr::forall(
        vec![
            ("s".to_string(), set_ty),
            ("l".to_string(), Type::Int),
            ("m".to_string(), Type::Int),
            ("v".to_string(), Type::Bool),
        ],
        Expr::var("m").neq(Expr::var("l")).implies(
            updated
                .select(Expr::var("m"))
                .eq(Expr::var("s").select(Expr::var("m"))),
        ),
    );
    vec![targeted, preserved]
}

/// Declares the lockset state; purely additive.
pub struct LocksetModel<'o> {
    options: &'o PipelineOptions,
}

impl<'o> LocksetModel<'o> {
    pub fn new(options: &'o PipelineOptions) -> Self {
        Self { options }
    }

    pub fn run(&self, ctx: &mut AnalysisContext<'_>) {
        let set_ty = Type::map(Type::Int, Type::Bool);
        for lock in &ctx.locks {
            ctx.program.declare_constant(Constant {
                name: lock.constant(),
                ty: Type::Int,
                unique: true,
                decorations: Vec::new(),
            });
        }
        ctx.program
            .declare_global(CURRENT_LOCKSET, set_ty.clone(), Vec::new());
        if ctx.program.find_function(UPDATE_LOCKSET).is_none() {
            ctx.program.declare_function(Function {
                name: UPDATE_LOCKSET.to_string(),
                params: vec![
                    Param::new("set", set_ty.clone()),
                    Param::new("lock", Type::Int),
                    Param::new("value", Type::Bool),
                ],
                result: set_ty,
            });
            ctx.program.axioms.extend(update_axioms());
        }

        let mut locksets: Vec<Lockset> = ctx
            .locks
            .iter()
            .map(|lock| Lockset {
                variable: CURRENT_LOCKSET.to_string(),
                lock: lock.clone(),
                target: lock.constant(),
                entry_point: None,
            })
            .collect();
        let mut access_vars = Vec::new();
        let offset_ty = self.options.memory_model.offset_type();

        for ep in &ctx.entry_points {
            for region in &ep.regions {
                for lock in &ctx.locks {
                    let variable = memory_lockset_var(region, lock, &ep.name);
                    ctx.program
                        .declare_global(variable.clone(), Type::Bool, Vec::new());
                    locksets.push(Lockset {
                        variable,
                        lock: lock.clone(),
                        target: region.to_string(),
                        entry_point: Some(ep.name.clone()),
                    });
                }
                for kind in AccessKind::ALL {
                    let var = AccessCheckingVariable {
                        entry_point: ep.name.clone(),
                        region: region.clone(),
                        kind,
                        has_occurred: has_occurred_var(kind, region, &ep.name),
                        offset: access_offset_var(kind, region, &ep.name),
                    };
                    ctx.program.declare_global(
                        var.has_occurred.clone(),
                        Type::Bool,
                        vec![Decoration::AccessChecking],
                    );
                    ctx.program.declare_global(
                        var.offset.clone(),
                        offset_ty.clone(),
                        vec![Decoration::AccessChecking],
                    );
                    access_vars.push(var);
                }
            }
        }

        info!(
            locks = ctx.locks.len(),
            locksets = locksets.len(),
            access_vars = access_vars.len(),
            "Lockset model declared"
        );
        ctx.locksets = locksets;
        ctx.access_vars = access_vars;
    }
}
