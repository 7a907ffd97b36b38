#![doc = include_str!("../README.md")]

//! Lockward intermediate representation.
//!
//! This crate defines the routine arena and declarations the instrumentation
//! passes rewrite, graph utilities over blocks and calls, the printer that
//! renders programs for the external verifier, and a concrete interpreter.

pub mod decoration;
pub mod expr;
pub mod graph;
pub mod interp;
pub mod printer;
pub mod program;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;

pub use decoration::{AccessKind, Decoration};
pub use expr::{Expr, Type};
pub use program::{Block, Instr, InstrKind, Program, Routine, RoutineId, Transfer};
