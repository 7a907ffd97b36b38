//! Concrete interpreter for deterministic programs.
//!
//! Executes a routine on a concrete store, taking the first target of every
//! goto, and records the outcome of each assertion together with its
//! decorations. Used to validate instrumented programs without a verifier.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::decoration::Decoration;
use crate::expr::{Expr, Type};
use crate::program::{AccessValue, InstrKind, Program, Transfer};

/// Name of the lockset update function the interpreter evaluates natively.
pub const UPDATE_LOCKSET_FN: &str = "updateLockset";

const DEFAULT_STEP_LIMIT: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Map(MapValue),
}

/// Int-indexed map with a default for unset indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapValue {
    pub default: Box<Value>,
    pub entries: BTreeMap<i64, Value>,
}

impl MapValue {
    pub fn get(&self, index: i64) -> Value {
        self.entries
            .get(&index)
            .cloned()
            .unwrap_or_else(|| (*self.default).clone())
    }
}

impl Value {
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Bool => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Map(_, value) => Value::Map(MapValue {
                default: Box::new(Value::default_for(value)),
                entries: BTreeMap::new(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, InterpError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(InterpError::TypeMismatch(format!("expected bool, got {other:?}"))),
        }
    }

    pub fn as_int(&self) -> Result<i64, InterpError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(InterpError::TypeMismatch(format!("expected int, got {other:?}"))),
        }
    }

    pub fn as_map(&self) -> Result<&MapValue, InterpError> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(InterpError::TypeMismatch(format!("expected map, got {other:?}"))),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpError {
    #[error("Unbound name '{0}'")]
    Unbound(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Unknown routine '{0}'")]
    UnknownRoutine(String),
    #[error("Routine '{routine}' jumps to unknown block '{label}'")]
    UnknownBlock { routine: String, label: String },
    #[error("Function '{0}' has no concrete interpretation")]
    Uninterpreted(String),
    #[error("Quantifiers cannot be evaluated concretely")]
    Quantifier,
    #[error("Step limit of {0} exceeded")]
    StepLimit(usize),
}

/// Outcome of one executed assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionOutcome {
    pub routine: String,
    pub holds: bool,
    pub decorations: Vec<Decoration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub assertions: Vec<AssertionOutcome>,
    /// An `assume` evaluated to false and cut the path.
    pub blocked: bool,
}

impl Execution {
    pub fn failed(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.assertions.iter().filter(|a| !a.holds)
    }
}

pub struct Interpreter<'p> {
    program: &'p Program,
    globals: HashMap<String, Value>,
    steps: usize,
    step_limit: usize,
}

impl<'p> Interpreter<'p> {
    /// Globals start at their type's default; unique int constants get
    /// distinct values in declaration order.
    pub fn new(program: &'p Program) -> Self {
        let mut globals = HashMap::new();
        for g in &program.globals {
            globals.insert(g.name.clone(), Value::default_for(&g.ty));
        }
        let mut next_unique = 1;
        for c in &program.constants {
            let value = if c.unique && c.ty == Type::Int {
                next_unique += 1;
                Value::Int(next_unique - 1)
            } else {
                Value::default_for(&c.ty)
            };
            globals.insert(c.name.clone(), value);
        }
        Self {
            program,
            globals,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Current value of `map[index_name]` where `index_name` is a constant.
    pub fn select(&self, map: &str, index_name: &str) -> Result<Value, InterpError> {
        let index = self
            .globals
            .get(index_name)
            .ok_or_else(|| InterpError::Unbound(index_name.to_string()))?
            .as_int()?;
        let map = self
            .globals
            .get(map)
            .ok_or_else(|| InterpError::Unbound(map.to_string()))?;
        Ok(map.as_map()?.get(index))
    }

    /// Make simple literal preconditions of `routine` true in the store.
    ///
    /// Handles conjunctions of `x`, `!x`, `m[c]` and `!m[c]`; other clauses
    /// are left to the caller.
    pub fn establish_preconditions(&mut self, routine: &str) -> Result<(), InterpError> {
        let id = self
            .program
            .find_routine(routine)
            .ok_or_else(|| InterpError::UnknownRoutine(routine.to_string()))?;
        let requires = self.program.routine(id).contract.requires.clone();
        for clause in &requires {
            self.establish(clause)?;
        }
        Ok(())
    }

    fn establish(&mut self, clause: &Expr) -> Result<(), InterpError> {
        let (atom, value) = match clause {
            Expr::Not(inner) => (inner.as_ref(), false),
            other => (other, true),
        };
        match atom {
            Expr::And(l, r) if value => {
                self.establish(l)?;
                self.establish(r)
            }
            Expr::Var(name) => {
                self.globals.insert(name.clone(), Value::Bool(value));
                Ok(())
            }
            Expr::Select(map, index) => {
                let Some(map_name) = map.as_var() else {
                    return Ok(());
                };
                let index = self.eval(index, &HashMap::new())?.as_int()?;
                if let Some(Value::Map(m)) = self.globals.get_mut(map_name) {
                    m.entries.insert(index, Value::Bool(value));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Run `routine` with positional `args`.
    pub fn run(&mut self, routine: &str, args: Vec<Value>) -> Result<Execution, InterpError> {
        let mut execution = Execution::default();
        self.call(routine, args, &mut execution)?;
        Ok(execution)
    }

    fn call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        execution: &mut Execution,
    ) -> Result<Vec<Value>, InterpError> {
        let program = self.program;
        let id = program
            .find_routine(name)
            .ok_or_else(|| InterpError::UnknownRoutine(name.to_string()))?;
        let routine = program.routine(id);
        if !routine.has_body() {
            return Ok(Vec::new());
        }

        let mut frame: HashMap<String, Value> = HashMap::new();
        for (param, arg) in routine.params.iter().zip(args) {
            frame.insert(param.name.clone(), arg);
        }
        for local in &routine.locals {
            frame
                .entry(local.name.clone())
                .or_insert_with(|| Value::default_for(&local.ty));
        }

        let mut current = 0usize;
        loop {
            let block = &routine.blocks[current];
            for instr in &block.instrs {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(InterpError::StepLimit(self.step_limit));
                }
                match &instr.kind {
                    InstrKind::Assign { target, value } => {
                        let v = self.eval(value, &frame)?;
                        self.write(target, v, &mut frame);
                    }
                    InstrKind::Access(access) => {
                        let offset = self.eval(&access.offset, &frame)?.as_int()?;
                        match &access.value {
                            AccessValue::Stored(value) => {
                                let v = self.eval(value, &frame)?;
                                let mut map = self.lookup(&access.region, &frame)?;
                                if let Value::Map(m) = &mut map {
                                    m.entries.insert(offset, v);
                                }
                                self.write(&access.region, map, &mut frame);
                            }
                            AccessValue::Loaded(target) => {
                                let map = self.lookup(&access.region, &frame)?;
                                let v = map.as_map()?.get(offset);
                                self.write(target, v, &mut frame);
                            }
                        }
                    }
                    InstrKind::Acquire { .. } | InstrKind::Release { .. } => {}
                    InstrKind::Call(call) => {
                        let mut values = Vec::with_capacity(call.args.len());
                        for arg in &call.args {
                            values.push(self.eval(arg, &frame)?);
                        }
                        self.call(&call.callee, values, execution)?;
                        if execution.blocked {
                            return Ok(Vec::new());
                        }
                    }
                    InstrKind::Assert(expr) => {
                        let holds = self.eval(expr, &frame)?.as_bool()?;
                        execution.assertions.push(AssertionOutcome {
                            routine: routine.name.clone(),
                            holds,
                            decorations: instr.decorations.clone(),
                        });
                    }
                    InstrKind::Assume(expr) => {
                        if !self.eval(expr, &frame)?.as_bool()? {
                            execution.blocked = true;
                            return Ok(Vec::new());
                        }
                    }
                    InstrKind::Havoc(_) => {}
                }
            }
            match &block.transfer {
                Transfer::Return => return Ok(Vec::new()),
                Transfer::Goto(targets) => {
                    let Some(label) = targets.first() else {
                        return Ok(Vec::new());
                    };
                    current = routine.block_index(label).ok_or_else(|| {
                        InterpError::UnknownBlock {
                            routine: routine.name.clone(),
                            label: label.clone(),
                        }
                    })?;
                }
            }
        }
    }

    fn lookup(&self, name: &str, frame: &HashMap<String, Value>) -> Result<Value, InterpError> {
        frame
            .get(name)
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| InterpError::Unbound(name.to_string()))
    }

    fn write(&mut self, name: &str, value: Value, frame: &mut HashMap<String, Value>) {
        if let Some(slot) = frame.get_mut(name) {
            *slot = value;
        } else {
            self.globals.insert(name.to_string(), value);
        }
    }

    fn eval(&self, expr: &Expr, frame: &HashMap<String, Value>) -> Result<Value, InterpError> {
        let int = |e: &Expr| -> Result<i64, InterpError> { self.eval(e, frame)?.as_int() };
        let boolean = |e: &Expr| -> Result<bool, InterpError> { self.eval(e, frame)?.as_bool() };
        Ok(match expr {
            Expr::Var(name) => self.lookup(name, frame)?,
            Expr::IntLit(n) => Value::Int(*n),
            Expr::BoolLit(b) => Value::Bool(*b),
            Expr::Add(l, r) => Value::Int(int(l)?.wrapping_add(int(r)?)),
            Expr::Sub(l, r) => Value::Int(int(l)?.wrapping_sub(int(r)?)),
            Expr::Mul(l, r) => Value::Int(int(l)?.wrapping_mul(int(r)?)),
            Expr::Eq(l, r) => Value::Bool(self.eval(l, frame)? == self.eval(r, frame)?),
            Expr::Neq(l, r) => Value::Bool(self.eval(l, frame)? != self.eval(r, frame)?),
            Expr::Lt(l, r) => Value::Bool(int(l)? < int(r)?),
            Expr::Le(l, r) => Value::Bool(int(l)? <= int(r)?),
            Expr::Not(inner) => Value::Bool(!boolean(inner)?),
            Expr::And(l, r) => Value::Bool(boolean(l)? && boolean(r)?),
            Expr::Or(l, r) => Value::Bool(boolean(l)? || boolean(r)?),
            Expr::Implies(l, r) => Value::Bool(!boolean(l)? || boolean(r)?),
            Expr::Iff(l, r) => Value::Bool(boolean(l)? == boolean(r)?),
            Expr::Select(map, index) => {
                let map = self.eval(map, frame)?;
                map.as_map()?.get(int(index)?)
            }
            Expr::Store(map, index, value) => {
                let mut map = self.eval(map, frame)?.as_map()?.clone();
                map.entries.insert(int(index)?, self.eval(value, frame)?);
                Value::Map(map)
            }
            Expr::Apply(function, args) if function == UPDATE_LOCKSET_FN && args.len() == 3 => {
                let mut map = self.eval(&args[0], frame)?.as_map()?.clone();
                map.entries
                    .insert(int(&args[1])?, Value::Bool(boolean(&args[2])?));
                Value::Map(map)
            }
            Expr::Apply(function, _) => return Err(InterpError::Uninterpreted(function.clone())),
            Expr::ForAll(..) => return Err(InterpError::Quantifier),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Block, Constant, Instr, Param, Routine};

    fn lockset_program() -> Program {
        let mut program = Program::new();
        program.constants.push(Constant {
            name: "lock$A".into(),
            ty: Type::Int,
            unique: true,
            decorations: Vec::new(),
        });
        program.declare_global("CLS", Type::map(Type::Int, Type::Bool), Vec::new());
        program.declare_global("$M.0", Type::map(Type::Int, Type::Int), Vec::new());
        let update = |v: bool| {
            Instr::assign(
                "CLS",
                Expr::apply(
                    UPDATE_LOCKSET_FN,
                    vec![Expr::var("CLS"), Expr::var("lock$A"), Expr::bool(v)],
                ),
            )
        };
        let routine = Routine::new("ep", vec![Param::new("p", Type::Int)]).with_blocks(vec![
            Block::new(
                "entry",
                vec![
                    update(true),
                    Instr::write("$M.0", Expr::var("p"), Expr::int(7)),
                    Instr::assert(Expr::var("CLS").select(Expr::var("lock$A"))),
                    update(false),
                ],
                Transfer::Goto(vec!["exit".into()]),
            ),
            Block::new(
                "exit",
                vec![Instr::assert(Expr::var("CLS").select(Expr::var("lock$A")))],
                Transfer::Return,
            ),
        ]);
        program.add_routine(routine).unwrap();
        program
    }

    #[test]
    fn lockset_updates_are_evaluated_natively() {
        let program = lockset_program();
        let mut interp = Interpreter::new(&program);
        let exec = interp.run("ep", vec![Value::Int(3)]).unwrap();
        let holds: Vec<bool> = exec.assertions.iter().map(|a| a.holds).collect();
        assert_eq!(holds, vec![true, false]);
        let mem = interp.get("$M.0").unwrap().as_map().unwrap().get(3);
        assert_eq!(mem, Value::Int(7));
    }

    #[test]
    fn false_assume_blocks_the_path() {
        let mut program = Program::new();
        let routine = Routine::new("f", Vec::new()).with_blocks(vec![Block::new(
            "entry",
            vec![Instr::assume(Expr::bool(false)), Instr::assert(Expr::bool(false))],
            Transfer::Return,
        )]);
        program.add_routine(routine).unwrap();
        let exec = Interpreter::new(&program).run("f", Vec::new()).unwrap();
        assert!(exec.blocked);
        assert!(exec.assertions.is_empty());
    }

    #[test]
    fn infinite_loop_hits_step_limit() {
        let mut program = Program::new();
        let routine = Routine::new("spin", Vec::new()).with_blocks(vec![Block::new(
            "head",
            vec![Instr::assume(Expr::bool(true))],
            Transfer::Goto(vec!["head".into()]),
        )]);
        program.add_routine(routine).unwrap();
        let err = Interpreter::new(&program)
            .with_step_limit(50)
            .run("spin", Vec::new())
            .unwrap_err();
        assert_eq!(err, InterpError::StepLimit(50));
    }
}
