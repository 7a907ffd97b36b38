use indexmap::{IndexMap, IndexSet};
use std::fmt;
use thiserror::Error;

use crate::decoration::{AccessKind, Decoration};
use crate::expr::{Expr, Type};

/// Stable handle of a routine in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(pub usize);

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("Routine '{0}' is already defined")]
    DuplicateRoutine(String),
    #[error("Unknown routine '{0}'")]
    UnknownRoutine(String),
}

/// A typed name: routine parameter, local or bound variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Mutable global variable.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub name: String,
    pub ty: Type,
    pub decorations: Vec<Decoration>,
}

/// Global constant, optionally `unique`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub ty: Type,
    pub unique: bool,
    pub decorations: Vec<Decoration>,
}

/// Uninterpreted function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub result: Type,
}

/// Routine contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contract {
    pub requires: Vec<Expr>,
    pub ensures: Vec<Expr>,
    pub modifies: IndexSet<String>,
}

/// Memory access produced by the lowering front end.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub kind: AccessKind,
    /// Global map variable modelling the region, e.g. `$M.0`.
    pub region: String,
    pub offset: Expr,
    /// Stored value for writes, destination local for reads.
    pub value: AccessValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessValue {
    Stored(Expr),
    Loaded(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: String,
    pub args: Vec<Expr>,
    pub outs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    Assign { target: String, value: Expr },
    Access(Access),
    /// Lock acquisition of an abstract lock name.
    Acquire { lock: String },
    Release { lock: String },
    Call(Call),
    Assert(Expr),
    Assume(Expr),
    Havoc(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub kind: InstrKind,
    pub decorations: Vec<Decoration>,
}

impl Instr {
    pub fn new(kind: InstrKind) -> Self {
        Self {
            kind,
            decorations: Vec::new(),
        }
    }

    pub fn assign(target: impl Into<String>, value: Expr) -> Self {
        Self::new(InstrKind::Assign {
            target: target.into(),
            value,
        })
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(InstrKind::Call(Call {
            callee: callee.into(),
            args,
            outs: Vec::new(),
        }))
    }

    pub fn assert(expr: Expr) -> Self {
        Self::new(InstrKind::Assert(expr))
    }

    pub fn assume(expr: Expr) -> Self {
        Self::new(InstrKind::Assume(expr))
    }

    pub fn acquire(lock: impl Into<String>) -> Self {
        Self::new(InstrKind::Acquire { lock: lock.into() })
    }

    pub fn release(lock: impl Into<String>) -> Self {
        Self::new(InstrKind::Release { lock: lock.into() })
    }

    pub fn write(region: impl Into<String>, offset: Expr, value: Expr) -> Self {
        Self::new(InstrKind::Access(Access {
            kind: AccessKind::Write,
            region: region.into(),
            offset,
            value: AccessValue::Stored(value),
        }))
    }

    pub fn read(region: impl Into<String>, offset: Expr, target: impl Into<String>) -> Self {
        Self::new(InstrKind::Access(Access {
            kind: AccessKind::Read,
            region: region.into(),
            offset,
            value: AccessValue::Loaded(target.into()),
        }))
    }

    pub fn with_decoration(mut self, decoration: Decoration) -> Self {
        self.decorations.push(decoration);
        self
    }

    pub fn as_call(&self) -> Option<&Call> {
        match &self.kind {
            InstrKind::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_call_mut(&mut self) -> Option<&mut Call> {
        match &mut self.kind {
            InstrKind::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn is_access_log(&self) -> bool {
        self.decorations.iter().any(Decoration::is_access_log)
    }

    /// Global or local names this instruction may write.
    pub fn written_vars(&self) -> Vec<&str> {
        match &self.kind {
            InstrKind::Assign { target, .. } => vec![target.as_str()],
            InstrKind::Access(access) => match &access.value {
                AccessValue::Stored(_) => vec![access.region.as_str()],
                AccessValue::Loaded(target) => vec![target.as_str()],
            },
            InstrKind::Call(call) => call.outs.iter().map(String::as_str).collect(),
            InstrKind::Havoc(vars) => vars.iter().map(String::as_str).collect(),
            InstrKind::Acquire { .. }
            | InstrKind::Release { .. }
            | InstrKind::Assert(_)
            | InstrKind::Assume(_) => Vec::new(),
        }
    }
}

/// Block terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Transfer {
    Goto(Vec<String>),
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: String,
    pub instrs: Vec<Instr>,
    pub transfer: Transfer,
}

impl Block {
    pub fn new(label: impl Into<String>, instrs: Vec<Instr>, transfer: Transfer) -> Self {
        Self {
            label: label.into(),
            instrs,
            transfer,
        }
    }

    pub fn successors(&self) -> &[String] {
        match &self.transfer {
            Transfer::Goto(targets) => targets,
            Transfer::Return => &[],
        }
    }

    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.instrs.iter().filter_map(Instr::as_call)
    }
}

/// A procedure; routines without blocks are declarations only.
#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub name: String,
    pub params: Vec<Param>,
    pub locals: Vec<Param>,
    pub blocks: Vec<Block>,
    pub contract: Contract,
    pub decorations: Vec<Decoration>,
}

impl Routine {
    pub fn new(name: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            params,
            locals: Vec::new(),
            blocks: Vec::new(),
            contract: Contract::default(),
            decorations: Vec::new(),
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn has_body(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn has_decoration(&self, decoration: &Decoration) -> bool {
        self.decorations.contains(decoration)
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instr> {
        self.blocks.iter().flat_map(|b| b.instrs.iter())
    }

    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.blocks.iter().flat_map(Block::calls)
    }

    pub fn calls_mut(&mut self) -> impl Iterator<Item = &mut Call> {
        self.blocks
            .iter_mut()
            .flat_map(|b| b.instrs.iter_mut())
            .filter_map(Instr::as_call_mut)
    }

    pub fn is_parameter_or_local(&self, name: &str) -> bool {
        self.params.iter().chain(self.locals.iter()).any(|p| p.name == name)
    }
}

/// The whole program: declarations plus a routine arena.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub globals: Vec<GlobalVar>,
    pub constants: Vec<Constant>,
    pub functions: Vec<Function>,
    pub axioms: Vec<Expr>,
    routines: Vec<Routine>,
    index: IndexMap<String, RoutineId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_routine(&mut self, routine: Routine) -> Result<RoutineId, IrError> {
        if self.index.contains_key(&routine.name) {
            return Err(IrError::DuplicateRoutine(routine.name));
        }
        let id = RoutineId(self.routines.len());
        self.index.insert(routine.name.clone(), id);
        self.routines.push(routine);
        Ok(id)
    }

    /// Declare a body-less routine unless one with this name exists.
    pub fn ensure_declared(&mut self, name: &str) -> RoutineId {
        if let Some(id) = self.find_routine(name) {
            return id;
        }
        let id = RoutineId(self.routines.len());
        self.index.insert(name.to_string(), id);
        self.routines.push(Routine::new(name, Vec::new()));
        id
    }

    pub fn find_routine(&self, name: &str) -> Option<RoutineId> {
        self.index.get(name).copied()
    }

    pub fn routine_id(&self, name: &str) -> Result<RoutineId, IrError> {
        self.find_routine(name)
            .ok_or_else(|| IrError::UnknownRoutine(name.to_string()))
    }

    pub fn routine(&self, id: RoutineId) -> &Routine {
        &self.routines[id.0]
    }

    pub fn routine_mut(&mut self, id: RoutineId) -> &mut Routine {
        &mut self.routines[id.0]
    }

    pub fn routine_by_name(&self, name: &str) -> Option<&Routine> {
        self.find_routine(name).map(|id| self.routine(id))
    }

    /// Routines in insertion order.
    pub fn routines(&self) -> impl Iterator<Item = (RoutineId, &Routine)> {
        self.routines
            .iter()
            .enumerate()
            .map(|(i, r)| (RoutineId(i), r))
    }

    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }

    pub fn find_global(&self, name: &str) -> Option<&GlobalVar> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn find_constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Add a global unless one with the same name exists.
    pub fn declare_global(&mut self, name: impl Into<String>, ty: Type, decorations: Vec<Decoration>) {
        let name = name.into();
        if self.find_global(&name).is_none() {
            self.globals.push(GlobalVar {
                name,
                ty,
                decorations,
            });
        }
    }

    /// Add a constant unless one with the same name exists.
    pub fn declare_constant(&mut self, constant: Constant) {
        if self.find_constant(&constant.name).is_none() {
            self.constants.push(constant);
        }
    }

    pub fn declare_function(&mut self, function: Function) {
        if self.find_function(&function.name).is_none() {
            self.functions.push(function);
        }
    }
}
