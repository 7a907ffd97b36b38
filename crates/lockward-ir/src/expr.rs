use serde::Serialize;
use std::fmt;

/// Value types of the verification IR.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    Bool,
    Int,
    /// Single-index map, e.g. `[int]bool` for the current lockset.
    Map(Box<Type>, Box<Type>),
}

impl Type {
    pub fn map(index: Type, value: Type) -> Self {
        Type::Map(Box::new(index), Box::new(value))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Map(index, value) => write!(f, "[{index}]{value}"),
        }
    }
}

/// Side-effect free expression.
///
/// Expressions hash structurally, which is what parameter reconciliation and
/// existential merging compare on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Expr {
    /// Variable, parameter or constant reference by name.
    Var(String),
    IntLit(i64),
    BoolLit(bool),

    // Arithmetic
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),

    // Comparison
    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),

    // Boolean logic
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Iff(Box<Expr>, Box<Expr>),

    // Maps
    Select(Box<Expr>, Box<Expr>),
    Store(Box<Expr>, Box<Expr>, Box<Expr>),

    /// Application of a declared (possibly uninterpreted) function.
    Apply(String, Vec<Expr>),
    ForAll(Vec<(String, Type)>, Box<Expr>),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        Expr::BoolLit(b)
    }

    pub fn add(self, other: Expr) -> Self {
        Expr::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: Expr) -> Self {
        Expr::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: Expr) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    pub fn neq(self, other: Expr) -> Self {
        Expr::Neq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: Expr) -> Self {
        Expr::Le(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn implies(self, other: Expr) -> Self {
        Expr::Implies(Box::new(self), Box::new(other))
    }

    pub fn iff(self, other: Expr) -> Self {
        Expr::Iff(Box::new(self), Box::new(other))
    }

    pub fn select(self, index: Expr) -> Self {
        Expr::Select(Box::new(self), Box::new(index))
    }

    pub fn store(self, index: Expr, value: Expr) -> Self {
        Expr::Store(Box::new(self), Box::new(index), Box::new(value))
    }

    pub fn apply(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Apply(function.into(), args)
    }

    pub fn forall(bound: Vec<(String, Type)>, body: Expr) -> Self {
        Expr::ForAll(bound, Box::new(body))
    }

    /// Left-nested conjunction; the empty conjunction is `true`.
    pub fn and_all(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms
            .into_iter()
            .reduce(Expr::and)
            .unwrap_or(Expr::BoolLit(true))
    }

    /// Left-nested disjunction; the empty disjunction is `false`.
    pub fn or_all(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms
            .into_iter()
            .reduce(Expr::or)
            .unwrap_or(Expr::BoolLit(false))
    }

    /// Literal `value` of a boolean atom: the atom itself or its negation.
    pub fn polarity(self, value: bool) -> Self {
        if value {
            self
        } else {
            self.not()
        }
    }

    /// Name of the variable if this is a bare variable reference.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Var(name) => Some(name),
            _ => None,
        }
    }

    /// Split `lhs == rhs` into its operands.
    pub fn as_equality(&self) -> Option<(&Expr, &Expr)> {
        match self {
            Expr::Eq(lhs, rhs) => Some((lhs, rhs)),
            _ => None,
        }
    }

    /// Every free variable name, in first-occurrence order.
    pub fn free_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&[], &mut out);
        out
    }

    fn collect_vars(&self, bound: &[String], out: &mut Vec<String>) {
        match self {
            Expr::Var(name) => {
                if !bound.contains(name) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::IntLit(_) | Expr::BoolLit(_) => {}
            Expr::Not(inner) => inner.collect_vars(bound, out),
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Eq(l, r)
            | Expr::Neq(l, r)
            | Expr::Lt(l, r)
            | Expr::Le(l, r)
            | Expr::And(l, r)
            | Expr::Or(l, r)
            | Expr::Implies(l, r)
            | Expr::Iff(l, r)
            | Expr::Select(l, r) => {
                l.collect_vars(bound, out);
                r.collect_vars(bound, out);
            }
            Expr::Store(map, index, value) => {
                map.collect_vars(bound, out);
                index.collect_vars(bound, out);
                value.collect_vars(bound, out);
            }
            Expr::Apply(_, args) => {
                for arg in args {
                    arg.collect_vars(bound, out);
                }
            }
            Expr::ForAll(vars, body) => {
                let mut inner: Vec<String> = bound.to_vec();
                inner.extend(vars.iter().map(|(n, _)| n.clone()));
                body.collect_vars(&inner, out);
            }
        }
    }

    /// Replace free occurrences of variables according to `rename`.
    pub fn rename_vars(&self, rename: &dyn Fn(&str) -> Option<String>) -> Expr {
        #[allow(clippy::borrowed_box)]
        let go = |e: &Box<Expr>| Box::new(e.rename_vars(rename));
        match self {
            Expr::Var(name) => Expr::Var(rename(name).unwrap_or_else(|| name.clone())),
            Expr::IntLit(_) | Expr::BoolLit(_) => self.clone(),
            Expr::Add(l, r) => Expr::Add(go(l), go(r)),
            Expr::Sub(l, r) => Expr::Sub(go(l), go(r)),
            Expr::Mul(l, r) => Expr::Mul(go(l), go(r)),
            Expr::Eq(l, r) => Expr::Eq(go(l), go(r)),
            Expr::Neq(l, r) => Expr::Neq(go(l), go(r)),
            Expr::Lt(l, r) => Expr::Lt(go(l), go(r)),
            Expr::Le(l, r) => Expr::Le(go(l), go(r)),
            Expr::Not(inner) => Expr::Not(go(inner)),
            Expr::And(l, r) => Expr::And(go(l), go(r)),
            Expr::Or(l, r) => Expr::Or(go(l), go(r)),
            Expr::Implies(l, r) => Expr::Implies(go(l), go(r)),
            Expr::Iff(l, r) => Expr::Iff(go(l), go(r)),
            Expr::Select(m, i) => Expr::Select(go(m), go(i)),
            Expr::Store(m, i, v) => Expr::Store(go(m), go(i), go(v)),
            Expr::Apply(f, args) => {
                Expr::Apply(f.clone(), args.iter().map(|a| a.rename_vars(rename)).collect())
            }
            Expr::ForAll(vars, body) => {
                let shadowed: Vec<&str> = vars.iter().map(|(n, _)| n.as_str()).collect();
                let inner = |name: &str| {
                    if shadowed.contains(&name) {
                        None
                    } else {
                        rename(name)
                    }
                };
                Expr::ForAll(vars.clone(), Box::new(body.rename_vars(&inner)))
            }
        }
    }
}
