//! voxelcore - diagnostics for the multi-dimensional image container.
//!
//! This binary runs concurrency stress tests and the slice composition
//! scenario against an in-memory image.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voxelcore::{
    config::{Cli, Command, OutputFormat, ScenarioArgs, StressArgs},
    stress::{run_scenario, run_stress, ScenarioReport, StressReport},
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Stress(args) => run_stress_command(args),
        Command::Scenario(args) => run_scenario_command(args),
    }
}

// =============================================================================
// Stress Command
// =============================================================================

fn run_stress_command(args: StressArgs) -> ExitCode {
    init_logging(args.verbose);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Stress run: {} threads x {} iterations on extents {:?}",
        args.threads, args.iterations, args.extent
    );

    let report = match run_stress(&args.to_stress_config()) {
        Ok(report) => report,
        Err(e) => {
            error!("Stress run failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match args.format {
        OutputFormat::Text => print_stress_report(&report),
        OutputFormat::Json => {
            if let Err(code) = print_json(&report) {
                return code;
            }
        }
    }

    if report.consistent {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_stress_report(report: &StressReport) {
    println!("threads:             {}", report.threads);
    println!("iterations:          {}", report.iterations);
    println!("extents:             {:?}", report.extents);
    println!("slice reads:         {}", report.slice_reads);
    println!("volume reads:        {}", report.volume_reads);
    println!("slice writes:        {}", report.slice_writes);
    println!("volume writes:       {}", report.volume_writes);
    println!("torn reads:          {}", report.torn_reads);
    println!("mismatched elements: {}", report.mismatched_elements);
    println!("elapsed:             {} ms", report.elapsed_ms);
    println!(
        "result:              {}",
        if report.consistent { "consistent" } else { "INCONSISTENT" }
    );
}

// =============================================================================
// Scenario Command
// =============================================================================

fn run_scenario_command(args: ScenarioArgs) -> ExitCode {
    init_logging(args.verbose);

    let report = match run_scenario() {
        Ok(report) => report,
        Err(e) => {
            error!("Scenario failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match args.format {
        OutputFormat::Text => print_scenario_report(&report),
        OutputFormat::Json => {
            if let Err(code) = print_json(&report) {
                return code;
            }
        }
    }
    ExitCode::SUCCESS
}

fn print_scenario_report(report: &ScenarioReport) {
    for (s, set) in report.volume_set_after_slice.iter().enumerate() {
        println!("after slice {}: volume set = {}", s, set);
    }
    println!("volume:       {:?}", report.volume);
    println!("first slice:  {:?}", report.first_slice);
    println!("slice 0 is a view into the volume: {}", report.first_slice_aliases_volume);
}

// =============================================================================
// Helpers
// =============================================================================

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ExitCode> {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            error!("Failed to serialize report: {}", e);
            Err(ExitCode::FAILURE)
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "voxelcore=debug"
    } else {
        "voxelcore=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
