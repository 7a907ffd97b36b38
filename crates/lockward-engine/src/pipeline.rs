//! Pass pipeline.
//!
//! Passes run strictly in sequence over one program: lockset model,
//! entry-point instrumentation, registration analysis, pair checkers, init
//! instrumentation, slicing, summary generation. Only entry-point discovery
//! can fail the run, and it runs before anything is written.

use miette::Diagnostic;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

use lockward_ir::printer::to_boogie;
use lockward_ir::program::IrError;
use lockward_ir::Program;

use crate::context::AnalysisContext;
use crate::driver::{DiscoveryError, DriverInfo, MetadataError};
use crate::init_instrumentation::InitInstrumentation;
use crate::instrumentation::EntryPointInstrumentation;
use crate::lockset::LocksetModel;
use crate::options::{OptionsError, PipelineOptions};
use crate::pairwise::PairwiseCheckerGenerator;
use crate::registration::DeviceRegistrationAnalysis;
use crate::report::{sha256_hex, PassProfile, PipelineReport};
use crate::shared_state::SharedStateAnalyser;
use crate::slicing::DeviceDisableSlicing;
use crate::summary::SummaryGeneration;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("Discovery error: {0}")]
    #[diagnostic(
        code(lockward::discovery),
        help("tag the init routine with the configured init role in the driver metadata")
    )]
    Discovery(#[from] DiscoveryError),
    #[error("IR error: {0}")]
    #[diagnostic(code(lockward::ir))]
    Ir(#[from] IrError),
    #[error("Options error: {0}")]
    #[diagnostic(code(lockward::options))]
    Options(#[from] OptionsError),
    #[error("Metadata error: {0}")]
    #[diagnostic(code(lockward::metadata))]
    Metadata(#[from] MetadataError),
}

struct PassTimer {
    enabled: bool,
    profiles: Vec<PassProfile>,
}

impl PassTimer {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            profiles: Vec::new(),
        }
    }

    fn time<T>(&mut self, pass: &str, entry_point: Option<&str>, f: impl FnOnce() -> T) -> T {
        if !self.enabled {
            return f();
        }
        let started = Instant::now();
        let out = f();
        let elapsed_ms = started.elapsed().as_millis();
        info!(pass, entry_point, elapsed_ms = elapsed_ms as u64, "Pass timing");
        self.profiles.push(PassProfile {
            pass: pass.to_string(),
            entry_point: entry_point.map(str::to_string),
            elapsed_ms,
        });
        out
    }
}

/// Run every pass over `program` in place.
pub fn run_pipeline(
    program: &mut Program,
    driver: &DriverInfo,
    analyser: &dyn SharedStateAnalyser,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    let discovery = match driver.discover(program, &options.init_role) {
        Ok(discovery) => discovery,
        Err(err) => {
            error!(role = %options.init_role, "{err}");
            return Err(err.into());
        }
    };
    info!(
        init = %discovery.init_routine,
        entry_points = discovery.entry_points.len(),
        "Entry points discovered"
    );

    let mut timer = PassTimer::new(options.measure_pass_time);
    let mut ctx = AnalysisContext::new(program, discovery, analyser);
    let mut report = PipelineReport {
        init_routine: ctx.init_routine.clone(),
        entry_points: ctx.entry_points.iter().map(|ep| ep.name.clone()).collect(),
        locks: ctx.locks.iter().map(|l| l.name.clone()).collect(),
        memory_regions: ctx.memory_regions.iter().map(|r| r.to_string()).collect(),
        ..PipelineReport::default()
    };
    let entry_points = report.entry_points.clone();

    timer.time("lockset_model", None, || LocksetModel::new(options).run(&mut ctx));

    let instrumentation = EntryPointInstrumentation::new();
    for ep in &entry_points {
        timer.time("region_creation", Some(ep), || {
            instrumentation.create_regions(&mut ctx, ep)
        })?;
    }
    for ep in &entry_points {
        report.instrumentation_instrs += timer.time("instrumentation", Some(ep), || {
            instrumentation.instrument(&mut ctx, ep)
        });
    }
    timer.time("contracts", None, || instrumentation.propagate_contracts(&mut ctx));
    report.instrumentation_regions = ctx.regions.len();

    let registration = DeviceRegistrationAnalysis::new();
    for ep in &entry_points {
        timer.time("registration", Some(ep), || registration.run(&mut ctx, ep));
    }

    let generator = PairwiseCheckerGenerator::new(&ctx, analyser);
    report.pair_checkers = timer.time("pair_checkers", None, || generator.run(&mut ctx))?;
    report.race_assertions = ctx
        .pair_regions
        .values()
        .map(|p| p.checked_regions.len())
        .sum();

    timer.time("init_instrumentation", None, || {
        InitInstrumentation::new().run(&mut ctx)
    })?;

    let slicing = DeviceDisableSlicing::new();
    for ep in &entry_points {
        report.slicing_changes += timer.time("slicing", Some(ep), || slicing.run(&mut ctx, ep));
    }

    let summary = SummaryGeneration::new(options);
    for ep in &entry_points {
        report.existentials += timer.time("summary", Some(ep), || summary.run(&mut ctx, ep));
    }

    report.pass_profiles = timer.profiles;
    report.fingerprint = sha256_hex(to_boogie(&*ctx.program).as_bytes());
    info!(
        pairs = report.pair_checkers.len(),
        assertions = report.race_assertions,
        existentials = report.existentials,
        fingerprint = %report.fingerprint,
        "Pipeline complete"
    );
    Ok(report)
}

/// Like [`run_pipeline`], with driver metadata given as JSON.
pub fn run_pipeline_json(
    program: &mut Program,
    metadata: &str,
    analyser: &dyn SharedStateAnalyser,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    let driver = DriverInfo::from_json(metadata)?;
    run_pipeline(program, &driver, analyser, options)
}
