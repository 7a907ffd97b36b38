//! Proptest strategies for driver-shaped programs with well-nested locking.

use proptest::prelude::*;

use crate::expr::{Expr, Type};
use crate::program::{Block, Instr, Param, Program, Routine, Transfer};

/// Single shared region every generated entry point touches.
pub const GENERATED_REGION: &str = "$M.0";
/// Name of the generated initialisation routine.
pub const GENERATED_INIT: &str = "probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    Write(i64),
    Read(i64),
}

/// Accesses performed while holding `locks`, acquired in order and released
/// in reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub locks: Vec<usize>,
    pub accesses: Vec<AccessOp>,
}

#[derive(Debug, Clone)]
pub struct GeneratedProgram {
    pub program: Program,
    pub entry_points: Vec<String>,
    pub locks: Vec<String>,
    /// Sections per entry point, in entry point order.
    pub sections: Vec<Vec<Section>>,
}

fn arb_access() -> impl Strategy<Value = AccessOp> {
    prop_oneof![(0..4i64).prop_map(AccessOp::Write), (0..4i64).prop_map(AccessOp::Read)]
}

fn arb_section(nlocks: usize) -> impl Strategy<Value = Section> {
    (
        proptest::sample::subsequence((0..nlocks).collect::<Vec<_>>(), 0..=nlocks),
        proptest::collection::vec(arb_access(), 1..=3),
    )
        .prop_map(|(locks, accesses)| Section { locks, accesses })
}

/// Strategy for a program with 1-3 entry points over 1-3 locks.
///
/// Every entry point takes one `int` parameter, and the init routine calls
/// each of them once with a literal argument.
pub fn arb_lock_program() -> impl Strategy<Value = GeneratedProgram> {
    (1..=3usize, 1..=3usize)
        .prop_flat_map(|(neps, nlocks)| {
            (
                Just(nlocks),
                proptest::collection::vec(
                    proptest::collection::vec(arb_section(nlocks), 1..=3),
                    neps..=neps,
                ),
            )
        })
        .prop_map(|(nlocks, sections)| build(nlocks, sections))
}

fn build(nlocks: usize, sections: Vec<Vec<Section>>) -> GeneratedProgram {
    let mut program = Program::new();
    program.declare_global(GENERATED_REGION, Type::map(Type::Int, Type::Int), Vec::new());
    let locks: Vec<String> = (0..nlocks).map(|i| format!("L{i}")).collect();
    let mut entry_points = Vec::new();

    for (i, ep_sections) in sections.iter().enumerate() {
        let name = format!("ep{i}");
        let mut instrs = Vec::new();
        for section in ep_sections {
            for &l in &section.locks {
                instrs.push(Instr::acquire(locks[l].clone()));
            }
            for access in &section.accesses {
                instrs.push(match *access {
                    AccessOp::Write(off) => Instr::write(
                        GENERATED_REGION,
                        Expr::var("p").add(Expr::int(off)),
                        Expr::int(1),
                    ),
                    AccessOp::Read(off) => {
                        Instr::read(GENERATED_REGION, Expr::var("p").add(Expr::int(off)), "v")
                    }
                });
            }
            for &l in section.locks.iter().rev() {
                instrs.push(Instr::release(locks[l].clone()));
            }
        }
        let mut routine = Routine::new(name.clone(), vec![Param::new("p", Type::Int)])
            .with_blocks(vec![Block::new("entry", instrs, Transfer::Return)]);
        routine.locals.push(Param::new("v", Type::Int));
        // Names are distinct by construction.
        let _ = program.add_routine(routine);
        entry_points.push(name);
    }

    let init_calls = entry_points
        .iter()
        .map(|ep| Instr::call(ep.clone(), vec![Expr::int(0)]))
        .collect();
    let _ = program.add_routine(
        Routine::new(GENERATED_INIT, Vec::new())
            .with_blocks(vec![Block::new("entry", init_calls, Transfer::Return)]),
    );

    GeneratedProgram {
        program,
        entry_points,
        locks,
        sections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::InstrKind;

    proptest! {
        #[test]
        fn generated_locking_is_well_nested(generated in arb_lock_program()) {
            for ep in &generated.entry_points {
                let routine = generated.program.routine_by_name(ep).unwrap();
                let mut held: Vec<&str> = Vec::new();
                for instr in routine.instrs() {
                    match &instr.kind {
                        InstrKind::Acquire { lock } => held.push(lock),
                        InstrKind::Release { lock } => prop_assert_eq!(held.pop(), Some(lock.as_str())),
                        _ => {}
                    }
                }
                prop_assert!(held.is_empty());
            }
        }
    }
}
