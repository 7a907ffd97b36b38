#![allow(dead_code)]

use lockward_engine::driver::DriverInfo;
use lockward_engine::options::PipelineOptions;
use lockward_engine::pipeline::run_pipeline;
use lockward_engine::report::PipelineReport;
use lockward_engine::shared_state::AccessScanAnalyser;
use lockward_ir::program::Param;
use lockward_ir::{Block, Expr, Instr, Program, Routine, Transfer, Type};

pub const REGION: &str = "$M.0";
pub const INIT: &str = "probe";

pub fn goto(label: &str) -> Transfer {
    Transfer::Goto(vec![label.to_string()])
}

/// Program with the shared region declared and nothing else.
pub fn empty_program() -> Program {
    let mut program = Program::new();
    program.declare_global(REGION, Type::map(Type::Int, Type::Int), Vec::new());
    program
}

/// `acquire locks; REGION[0] := 1; release locks` as a single-block routine.
pub fn locked_writer(name: &str, locks: &[&str]) -> Routine {
    let mut instrs: Vec<Instr> = locks.iter().map(|l| Instr::acquire(*l)).collect();
    instrs.push(Instr::write(REGION, Expr::int(0), Expr::int(1)));
    instrs.extend(locks.iter().rev().map(|l| Instr::release(*l)));
    Routine::new(name, Vec::new()).with_blocks(vec![Block::new("entry", instrs, Transfer::Return)])
}

/// Init routine calling every entry point with no arguments.
pub fn init_calling(entry_points: &[&str]) -> Routine {
    let calls = entry_points
        .iter()
        .map(|ep| Instr::call(*ep, Vec::new()))
        .collect();
    Routine::new(INIT, Vec::new()).with_blocks(vec![Block::new("entry", calls, Transfer::Return)])
}

/// Driver metadata with `INIT` tagged as probe and each entry point under
/// its own role.
pub fn driver_for(entry_points: &[&str]) -> DriverInfo {
    let mut driver = DriverInfo::new().with_role("drv", "probe", INIT);
    for ep in entry_points {
        driver = driver.with_role("drv", &format!("cb_{ep}"), *ep);
    }
    driver
}

/// Two entry points writing the shared region, `A` under `locks_a` and `B`
/// under `locks_b`.
pub fn two_writers(locks_a: &[&str], locks_b: &[&str]) -> Program {
    let mut program = empty_program();
    program.add_routine(locked_writer("A", locks_a)).unwrap();
    program.add_routine(locked_writer("B", locks_b)).unwrap();
    program.add_routine(init_calling(&["A", "B"])).unwrap();
    program
}

/// Device removal callback: `entry -> mid -> unreg -> post`, each block
/// touching the shared region once.
pub fn remove_callback() -> Routine {
    let access = |off: i64| Instr::write(REGION, Expr::int(off), Expr::int(1));
    let mut routine = Routine::new("remove", vec![Param::new("dev", Type::Int)]).with_blocks(vec![
        Block::new("entry", vec![access(0)], goto("mid")),
        Block::new(
            "mid",
            vec![access(1), Instr::read(REGION, Expr::int(1), "v")],
            goto("unreg"),
        ),
        Block::new(
            "unreg",
            vec![Instr::call("_UNREGISTER_DEVICE_net", vec![Expr::var("dev")])],
            goto("post"),
        ),
        Block::new(
            "post",
            vec![access(2), Instr::read(REGION, Expr::int(2), "v")],
            Transfer::Return,
        ),
    ]);
    routine.locals.push(Param::new("v", Type::Int));
    routine
}

/// Route pipeline logs to the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn run(program: &mut Program, driver: &DriverInfo) -> PipelineReport {
    init_tracing();
    run_pipeline(
        program,
        driver,
        &AccessScanAnalyser::new(),
        &PipelineOptions::default(),
    )
    .unwrap_or_else(|e| panic!("pipeline failed: {e}"))
}
