//! End-to-end pipeline runs over small driver programs.
//!
//! Race verdicts are checked by executing the generated pair checker in the
//! concrete interpreter after establishing its literal preconditions.

mod common;

use common::*;
use lockward_engine::driver::{DiscoveryError, DriverInfo};
use lockward_engine::options::PipelineOptions;
use lockward_engine::pipeline::{run_pipeline, PipelineError};
use lockward_engine::shared_state::AccessScanAnalyser;
use lockward_ir::interp::{Execution, Interpreter};
use lockward_ir::printer::{expr_to_boogie, to_boogie};
use lockward_ir::{Decoration, InstrKind, Program};

fn run_checker(program: &Program, checker: &str) -> Execution {
    let mut interp = Interpreter::new(program);
    interp.establish_preconditions(checker).unwrap();
    let execution = interp.run(checker, Vec::new()).unwrap();
    assert!(!execution.blocked);
    execution
}

fn race_outcomes(execution: &Execution) -> Vec<bool> {
    execution
        .assertions
        .iter()
        .filter(|a| a.decorations.contains(&Decoration::RaceChecking))
        .map(|a| a.holds)
        .collect()
}

// ---------------------------------------------------------------------------
// Race verdicts
// ---------------------------------------------------------------------------

#[test]
fn different_locks_race() {
    let mut program = two_writers(&["L1"], &["L2"]);
    let report = run(&mut program, &driver_for(&["A", "B"]));
    assert_eq!(report.locks, vec!["L1", "L2"]);
    assert!(report.pair_checkers.contains(&"check$A$B".to_string()));

    let execution = run_checker(&program, "check$A$B");
    assert_eq!(race_outcomes(&execution), vec![false]);
    let failed: Vec<_> = execution.failed().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .decorations
        .contains(&Decoration::Resource(REGION.to_string())));
}

#[test]
fn shared_lock_protects() {
    let mut program = two_writers(&["L"], &["L"]);
    run(&mut program, &driver_for(&["A", "B"]));

    let execution = run_checker(&program, "check$A$B");
    assert_eq!(race_outcomes(&execution), vec![true]);
    assert_eq!(execution.failed().count(), 0);
}

#[test]
fn one_common_lock_among_several_is_enough() {
    let mut program = two_writers(&["L1", "L"], &["L", "L2"]);
    run(&mut program, &driver_for(&["A", "B"]));
    assert_eq!(race_outcomes(&run_checker(&program, "check$A$B")), vec![true]);
}

#[test]
fn unlocked_self_pair_is_not_vacuous() {
    let mut program = empty_program();
    program.add_routine(locked_writer("irq", &[])).unwrap();
    program.add_routine(init_calling(&["irq"])).unwrap();
    let report = run(&mut program, &driver_for(&["irq"]));
    assert!(report.locks.is_empty());
    assert_eq!(report.pair_checkers, vec!["check$irq$irq".to_string()]);

    let checker = program.routine_by_name("check$irq$irq").unwrap();
    let assertion = checker
        .instrs()
        .find_map(|i| match &i.kind {
            InstrKind::Assert(e) if i.decorations.contains(&Decoration::RaceChecking) => Some(e),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        expr_to_boogie(assertion),
        "(WRITE_HAS_OCCURRED$$M.0$irq ==> false)"
    );
    assert_eq!(race_outcomes(&run_checker(&program, "check$irq$irq")), vec![false]);
}

#[test]
fn locked_self_pair_holds() {
    let mut program = empty_program();
    program.add_routine(locked_writer("irq", &["L"])).unwrap();
    program.add_routine(init_calling(&["irq"])).unwrap();
    run(&mut program, &driver_for(&["irq"]));
    assert_eq!(race_outcomes(&run_checker(&program, "check$irq$irq")), vec![true]);
}

#[test]
fn init_calls_every_checker() {
    let mut program = two_writers(&["L1"], &["L2"]);
    let report = run(&mut program, &driver_for(&["A", "B"]));
    assert_eq!(report.pair_checkers.len(), 3);

    let init = program.routine_by_name(INIT).unwrap();
    let called: Vec<&str> = init.calls().map(|c| c.callee.as_str()).collect();
    for checker in &report.pair_checkers {
        assert!(called.contains(&checker.as_str()), "{checker} not called from init");
    }
}

// ---------------------------------------------------------------------------
// Slicing
// ---------------------------------------------------------------------------

#[test]
fn accesses_after_unregister_are_sliced() {
    let mut program = empty_program();
    program.ensure_declared("_UNREGISTER_DEVICE_net");
    program.add_routine(remove_callback()).unwrap();
    let mut init = init_calling(&[]);
    init.blocks[0]
        .instrs
        .push(lockward_ir::Instr::call("remove", vec![lockward_ir::Expr::int(7)]));
    program.add_routine(init).unwrap();

    let report = run(&mut program, &driver_for(&["remove"]));
    assert!(report.slicing_changes > 0);

    let remove = program.routine_by_name("remove").unwrap();
    let logs = |label: &str| {
        let b = remove.block_index(label).unwrap();
        remove.blocks[b].instrs.iter().filter(|i| i.is_access_log()).count()
    };
    // two accesses, each logging has-occurred and offset
    assert_eq!(logs("entry"), 2);
    assert_eq!(logs("mid"), 4);
    assert_eq!(logs("post"), 0);

    let post = &remove.blocks[remove.block_index("post").unwrap()];
    let no_ops = post
        .instrs
        .iter()
        .filter(|i| i.as_call().is_some_and(|c| c.callee == "_NO_OP_$remove"))
        .count();
    // the accesses stay, so each one keeps its own no-op in front of it
    assert_eq!(no_ops, 2);
    assert_eq!(post.instrs.len(), 4);
    assert!(program.routine_by_name("_NO_OP_$remove").is_some());
}

// ---------------------------------------------------------------------------
// Summary candidates
// ---------------------------------------------------------------------------

#[test]
fn matched_offsets_share_one_existential() {
    use lockward_ir::program::Param;
    use lockward_ir::{Block, Expr, Instr, Routine, Transfer, Type};

    let build = || {
        let mut program = empty_program();
        let params = vec![Param::new("p", Type::Int), Param::new("q", Type::Int)];
        program
            .add_routine(Routine::new("cb", params).with_blocks(vec![Block::new(
                "entry",
                vec![
                    Instr::write(REGION, Expr::var("p"), Expr::int(1)),
                    Instr::write(REGION, Expr::var("q"), Expr::int(2)),
                ],
                Transfer::Return,
            )]))
            .unwrap();
        program.add_routine(init_calling(&[])).unwrap();
        program
    };
    let options = PipelineOptions::default();
    let driver = driver_for(&["cb"]);

    let mut plain = build();
    let unmatched = run_pipeline(&mut plain, &driver, &AccessScanAnalyser::new(), &options).unwrap();

    let mut linked = build();
    let analyser =
        AccessScanAnalyser::new().with_matched_accesses(vec![vec![Expr::var("p"), Expr::var("q")]]);
    let matched = run_pipeline(&mut linked, &driver, &analyser, &options).unwrap();

    assert_eq!(matched.existentials + 1, unmatched.existentials);
}

// ---------------------------------------------------------------------------
// Determinism and failure
// ---------------------------------------------------------------------------

#[test]
fn identical_inputs_give_identical_output() {
    let build = || two_writers(&["L1", "L2"], &["L2"]);
    let mut first = build();
    let mut second = build();
    let a = run(&mut first, &driver_for(&["A", "B"]));
    let b = run(&mut second, &driver_for(&["A", "B"]));
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(to_boogie(&first), to_boogie(&second));
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn missing_init_role_aborts_without_changes() {
    let mut program = two_writers(&["L1"], &["L2"]);
    let before = to_boogie(&program);
    let driver = DriverInfo::new()
        .with_role("drv", "cb_A", "A")
        .with_role("drv", "cb_B", "B");

    let err = run_pipeline(
        &mut program,
        &driver,
        &AccessScanAnalyser::new(),
        &PipelineOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Discovery(DiscoveryError::NoInitRole { .. })
    ));
    assert_eq!(to_boogie(&program), before);
}

#[test]
fn init_role_naming_a_missing_routine_aborts() {
    let mut program = two_writers(&["L1"], &["L2"]);
    let driver = DriverInfo::new()
        .with_role("drv", "probe", "absent_probe")
        .with_role("drv", "cb_A", "A");
    let err = run_pipeline(
        &mut program,
        &driver,
        &AccessScanAnalyser::new(),
        &PipelineOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Discovery(DiscoveryError::MissingInitRoutine { .. })
    ));
}
