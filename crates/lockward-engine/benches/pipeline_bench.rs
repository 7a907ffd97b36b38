use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lockward_engine::driver::DriverInfo;
use lockward_engine::options::PipelineOptions;
use lockward_engine::pipeline::run_pipeline;
use lockward_engine::shared_state::AccessScanAnalyser;
use lockward_ir::program::Param;
use lockward_ir::{Block, Expr, Instr, Program, Routine, Transfer, Type};

/// `callbacks` entry points, each calling a helper that writes `regions`
/// regions under one of `locks` locks, inside a loop.
fn driver_program(callbacks: usize, regions: usize, locks: usize) -> (Program, DriverInfo) {
    let mut program = Program::new();
    for r in 0..regions {
        program.declare_global(format!("$M.{r}"), Type::map(Type::Int, Type::Int), Vec::new());
    }
    let mut driver = DriverInfo::new().with_role("bench", "probe", "probe");
    let mut init_calls = Vec::new();

    for c in 0..callbacks {
        let lock = format!("L{}", c % locks);
        let helper = format!("helper{c}");
        let mut writes = vec![Instr::acquire(lock.clone())];
        for r in 0..regions {
            writes.push(Instr::write(
                format!("$M.{r}"),
                Expr::var("dev").add(Expr::int(r as i64)),
                Expr::int(1),
            ));
        }
        writes.push(Instr::release(lock));
        program
            .add_routine(
                Routine::new(helper.clone(), vec![Param::new("dev", Type::Int)])
                    .with_blocks(vec![Block::new("entry", writes, Transfer::Return)]),
            )
            .unwrap();

        let ep = format!("cb{c}");
        program
            .add_routine(
                Routine::new(ep.clone(), vec![Param::new("dev", Type::Int)]).with_blocks(vec![
                    Block::new("entry", Vec::new(), Transfer::Goto(vec!["loop".into()])),
                    Block::new(
                        "loop",
                        vec![Instr::call(helper, vec![Expr::var("dev")])],
                        Transfer::Goto(vec!["loop".into(), "exit".into()]),
                    ),
                    Block::new("exit", Vec::new(), Transfer::Return),
                ]),
            )
            .unwrap();
        init_calls.push(Instr::call(ep.clone(), vec![Expr::int(0)]));
        driver = driver.with_role("bench", format!("cb{c}"), ep);
    }
    program
        .add_routine(
            Routine::new("probe", Vec::new())
                .with_blocks(vec![Block::new("entry", init_calls, Transfer::Return)]),
        )
        .unwrap();
    (program, driver)
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

fn bench_pipeline_small(c: &mut Criterion) {
    let (program, driver) = driver_program(4, 2, 2);
    let options = PipelineOptions::default();
    c.bench_function("pipeline_4_callbacks_2_regions", |b| {
        b.iter(|| {
            let mut program = program.clone();
            run_pipeline(
                black_box(&mut program),
                black_box(&driver),
                &AccessScanAnalyser::new(),
                &options,
            )
            .unwrap()
        })
    });
}

fn bench_pipeline_pairs(c: &mut Criterion) {
    let (program, driver) = driver_program(12, 4, 3);
    let options = PipelineOptions::default();
    c.bench_function("pipeline_12_callbacks_4_regions", |b| {
        b.iter(|| {
            let mut program = program.clone();
            run_pipeline(
                black_box(&mut program),
                black_box(&driver),
                &AccessScanAnalyser::new(),
                &options,
            )
            .unwrap()
        })
    });
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

fn bench_print_instrumented(c: &mut Criterion) {
    let (mut program, driver) = driver_program(12, 4, 3);
    run_pipeline(
        &mut program,
        &driver,
        &AccessScanAnalyser::new(),
        &PipelineOptions::default(),
    )
    .unwrap();
    c.bench_function("print_instrumented_12_callbacks", |b| {
        b.iter(|| lockward_ir::printer::to_boogie(black_box(&program)))
    });
}

criterion_group!(
    benches,
    bench_pipeline_small,
    bench_pipeline_pairs,
    bench_print_instrumented
);
criterion_main!(benches);
