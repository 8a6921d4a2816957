// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Microsim CLI Entry Point
//!
//! Parses the command line, installs the tracing subscriber, dispatches
//! the subcommand, and converts any framework error into the documented
//! exit code (0 success, 1 unhandled, 2 configuration, 3 dependency
//! resolution).

use anyhow::Context as _;
use clap::Parser;
use microsim::presentation::cli::{run_smoke_test, run_specification, Cli, Commands};
use microsim_bootstrap::ExitCode;
use microsim_domain::SimulationError;
use std::fs::File;
use std::sync::Arc;
use tracing::{debug, error};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(&cli) {
        eprintln!("failed to initialize logging: {err:#}");
        std::process::exit(ExitCode::Error.as_i32());
    }
    debug!("Microsim RS v1.0.0 starting");

    let outcome = dispatch(&cli);
    match outcome {
        Ok(()) => std::process::exit(ExitCode::Success.as_i32()),
        Err(simulation_error) => {
            error!(category = simulation_error.category(), "run failed: {}", simulation_error);
            eprintln!("Error: {}", simulation_error);
            let code = ExitCode::from_category(simulation_error.category());
            std::process::exit(code.as_i32());
        }
    }
}

fn dispatch(cli: &Cli) -> Result<(), SimulationError> {
    match &cli.command {
        Commands::Run { spec, output } => {
            let artifacts = run_specification(spec, output.as_deref())?;
            println!("results written to {}", artifacts.output_directory.display());
            Ok(())
        }
        Commands::Test => {
            let report = run_smoke_test()?;
            println!("smoke simulation passed ({} observations)", report.observations.len());
            Ok(())
        }
        Commands::Profile { spec } => {
            let artifacts = run_specification(spec, None)?;
            println!("phase timings (wall-clock seconds):");
            for (phase, seconds) in &artifacts.report.phase_timings {
                println!("  {:<28} {:.3}", phase, seconds);
            }
            Ok(())
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    match &cli.log {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
