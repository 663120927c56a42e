//! lineage - resolve municipal lineage and aggregate vote tallies onto
//! stable analysis identities

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lineage_core::{
    AnalysisEngine,
    config::{Args, Command, InputArgs, RunArgs, TraceArgs},
    core::types::format_date,
    tables::{export, loader},
};

/// Exit code of a run that finished but withheld at least one event.
const EXIT_DEGRADED: i32 = 2;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lineage_core={},lineage={},info", log_level, log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Run(run) => {
            let degraded = run_pipeline(&run)?;
            if degraded {
                std::process::exit(EXIT_DEGRADED);
            }
        }
        Command::Trace(trace) => print_trace(&trace)?,
    }
    Ok(())
}

fn open_engine(input: &InputArgs, top: usize) -> anyhow::Result<AnalysisEngine> {
    let config = input.engine_config(top);

    let ledger = loader::load_ledger(&input.mutations)
        .with_context(|| format!("loading mutations from {}", input.mutations.display()))?;
    let measurements = loader::load_measurements(&input.measurements)
        .with_context(|| format!("loading measurements from {}", input.measurements.display()))?;

    let engine = AnalysisEngine::new(config, ledger, measurements).context("invalid configuration")?;
    Ok(engine)
}

fn run_pipeline(run: &RunArgs) -> anyhow::Result<bool> {
    info!("Mutations: {}", run.input.mutations.display());
    info!("Measurements: {}", run.input.measurements.display());
    info!("Max steps: {}", run.input.max_steps);
    info!("Halted policy: {:?}", run.input.halted_policy);

    let mut engine = open_engine(&run.input, run.top)?;
    let published = engine.publish();
    let report = engine.report();
    let snapshot = engine.snapshot();

    let artifacts = export::write_artifacts(&run.out, &published, &report, &snapshot.measurements)
        .with_context(|| format!("writing artifacts to {}", run.out.display()))?;

    info!("Identity map: {}", artifacts.identity_map.display());
    info!("Aggregates: {}", artifacts.aggregates.display());
    info!("Export: {}", artifacts.export.display());
    info!("Report: {}", artifacts.report.display());

    if published.degraded {
        warn!(
            "Run degraded: events {:?} withheld, see {}",
            published.withheld_events,
            artifacts.report.display()
        );
    }
    Ok(published.degraded)
}

fn print_trace(trace: &TraceArgs) -> anyhow::Result<()> {
    let mut engine = open_engine(&trace.input, 0)?;
    let t = engine
        .trace(trace.entity)
        .with_context(|| format!("tracing entity {}", trace.entity))?;

    println!(
        "{} {} (first seen {}, {} events)",
        t.entity.id,
        t.entity.name,
        format_date(t.entity.first_seen),
        t.entity.event_count
    );
    for edge in &t.resolution.path {
        println!(
            "  {} -> {} {} on {}",
            edge.from,
            edge.to,
            edge.to_name,
            format_date(edge.date)
        );
    }
    println!(
        "=> {} {} depth {} [{}]",
        t.resolution.analysis_id, t.resolution.analysis_name, t.resolution.depth, t.resolution.state
    );

    if !t.timeline.is_empty() {
        println!("ledger:");
        for r in &t.timeline {
            println!(
                "  {} {} {} -> {} {} ({})",
                format_date(r.mutation_date),
                r.old_id,
                r.old_name,
                r.new_id,
                r.new_name,
                r.category()
            );
        }
    }
    Ok(())
}
