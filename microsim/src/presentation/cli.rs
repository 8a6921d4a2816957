// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface
//!
//! The `microsim` binary surface:
//!
//! - `microsim run <spec.yaml> [-o DIR]` - run one simulation and write
//!   `final_state.json` and `output.json` under
//!   `<results_dir>/<spec-stem>/<timestamp>/`
//! - `microsim test` - run the bundled smoke simulation; exit 0 on
//!   success
//! - `microsim profile <spec.yaml>` - run and print per-phase wall-clock
//!   timings
//!
//! ## Model Specification
//!
//! A YAML document with three top-level sections: `plugins` (manager
//! implementations; only the built-ins ship today), `components`
//! (constructor expressions resolved against the bundled component
//! registry), and `configuration` (a nested map layered as the model
//! override).

use crate::application::component::Component;
use crate::application::context::{SimulationContext, SimulationReport};
use crate::infrastructure::components::{BasePopulation, ConstantMortality};
use microsim_domain::SimulationError;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "microsim")]
#[command(about = "Microsim RS - discrete-event, agent-based simulation engine")]
#[command(version = "1.0.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one simulation from a model specification
    Run {
        /// Model specification file (YAML)
        spec: PathBuf,

        /// Results directory root
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the bundled smoke simulation
    Test,

    /// Run a simulation and report per-phase wall-clock timings
    Profile {
        /// Model specification file (YAML)
        spec: PathBuf,
    },
}

/// The parsed model specification document.
#[derive(Debug, Deserialize)]
pub struct ModelSpecification {
    #[serde(default)]
    pub plugins: BTreeMap<String, String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl ModelSpecification {
    /// Reads and parses a specification file.
    pub fn load(path: &Path) -> Result<Self, SimulationError> {
        let raw = fs::read_to_string(path)
            .map_err(|error| SimulationError::Io(format!("cannot read {}: {}", path.display(), error)))?;
        let spec: ModelSpecification = serde_yaml::from_str(&raw).map_err(|error| {
            SimulationError::config_type(format!("malformed specification {}: {}", path.display(), error))
        })?;
        for (plugin, implementation) in &spec.plugins {
            if implementation != "builtin" {
                return Err(SimulationError::config_type(format!(
                    "plugin `{}` requests `{}`; only `builtin` managers ship with this binary",
                    plugin, implementation
                )));
            }
        }
        Ok(spec)
    }

    /// Instantiates the component list from its constructor expressions.
    pub fn build_components(&self) -> Result<Vec<Box<dyn Component>>, SimulationError> {
        self.components.iter().map(|expr| resolve_component(expr)).collect()
    }
}

/// Resolves one constructor expression (`name` or `name()`) against the
/// bundled component registry.
fn resolve_component(expression: &str) -> Result<Box<dyn Component>, SimulationError> {
    let trimmed = expression.trim();
    let (name, arguments) = match trimmed.split_once('(') {
        Some((name, rest)) => {
            let arguments = rest.strip_suffix(')').ok_or_else(|| {
                SimulationError::config_type(format!("malformed component expression `{}`", trimmed))
            })?;
            (name.trim(), arguments.trim())
        }
        None => (trimmed, ""),
    };
    match name {
        "base_population" => {
            require_no_arguments(name, arguments)?;
            Ok(Box::new(BasePopulation::new()))
        }
        "constant_mortality" => {
            require_no_arguments(name, arguments)?;
            Ok(Box::new(ConstantMortality::new()))
        }
        other => Err(SimulationError::config_type(format!(
            "unknown component `{}`; bundled components are base_population, constant_mortality",
            other
        ))),
    }
}

fn require_no_arguments(name: &str, arguments: &str) -> Result<(), SimulationError> {
    if arguments.is_empty() {
        Ok(())
    } else {
        Err(SimulationError::config_type(format!(
            "component `{}` takes no constructor arguments, got `{}`",
            name, arguments
        )))
    }
}

/// Where a finished run landed on disk.
#[derive(Debug)]
pub struct RunArtifacts {
    pub output_directory: PathBuf,
    pub report: SimulationReport,
}

/// Runs one specification and writes its outputs.
pub fn run_specification(
    spec_path: &Path,
    output_root: Option<&Path>,
) -> Result<RunArtifacts, SimulationError> {
    let specification = ModelSpecification::load(spec_path)?;
    let components = specification.build_components()?;
    let context = SimulationContext::new(specification.configuration.clone(), components)?;
    let report = context.run()?;

    let stem = spec_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("simulation");
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let directory = output_root
        .unwrap_or_else(|| Path::new("results"))
        .join(stem)
        .join(timestamp.to_string());
    write_report(&directory, &report)?;
    info!(directory = %directory.display(), "run artifacts written");
    Ok(RunArtifacts {
        output_directory: directory,
        report,
    })
}

fn write_report(directory: &Path, report: &SimulationReport) -> Result<(), SimulationError> {
    fs::create_dir_all(directory)
        .map_err(|error| SimulationError::Io(format!("cannot create {}: {}", directory.display(), error)))?;
    let final_state = serde_json::to_string_pretty(&report.final_state)?;
    fs::write(directory.join("final_state.json"), final_state)
        .map_err(|error| SimulationError::Io(error.to_string()))?;
    let output = serde_json::to_string_pretty(&report.observations)?;
    fs::write(directory.join("output.json"), output)
        .map_err(|error| SimulationError::Io(error.to_string()))?;
    Ok(())
}

/// Runs the bundled smoke simulation: a small population under constant
/// mortality for one simulated month.
pub fn run_smoke_test() -> Result<SimulationReport, SimulationError> {
    let configuration = json!({
        "population": {"population_size": 500},
        "time": {"start": "2025-01-01", "end": "2025-01-31", "step_days": 1.0},
        "mortality": {"rate": 0.5},
    });
    let components: Vec<Box<dyn Component>> = vec![
        Box::new(BasePopulation::new()),
        Box::new(ConstantMortality::new()),
    ];
    let context = SimulationContext::new(configuration, components)?;
    let report = context.run()?;
    if !report.observations.contains_key("deaths") {
        return Err(SimulationError::internal(
            "smoke simulation produced no deaths observation".to_string(),
        ));
    }
    Ok(report)
}
