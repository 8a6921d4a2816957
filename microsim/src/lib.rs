// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Microsim
//!
//! A discrete-event, agent-based simulation engine. Independent
//! components cooperate over a shared typed population table, composed
//! value pipelines, keyed randomness streams, and a phase-gated
//! lifecycle; the simulation context composes them into a single
//! reproducible run and produces stratified results.
//!
//! ## Architecture
//!
//! The crate keeps a three-layer internal structure:
//!
//! - [`application`] - the component contract, the per-component builder
//!   facade, the driving context, and the snapshot surface
//! - [`infrastructure`] - the managers: lifecycle, configuration, event
//!   bus, randomness, population, resource graph, value pipelines,
//!   lookup tables, results, clock, and the bundled components
//! - [`presentation`] - the command-line interface
//!
//! Pure domain types (errors, value objects, events, combinator math)
//! live in the `microsim-domain` crate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microsim::application::context::SimulationContext;
//! use microsim::infrastructure::components::{BasePopulation, ConstantMortality};
//! use serde_json::json;
//!
//! let configuration = json!({
//!     "population": {"population_size": 10_000},
//!     "time": {"start": "2025-01-01", "end": "2026-01-01", "step_days": 1.0},
//! });
//! let context = SimulationContext::new(
//!     configuration,
//!     vec![Box::new(BasePopulation::new()), Box::new(ConstantMortality::new())],
//! )?;
//! let report = context.run()?;
//! println!("{} observations", report.observations.len());
//! # Ok::<(), microsim_domain::SimulationError>(())
//! ```

pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use application::component::Component;
pub use application::context::{SimulationContext, SimulationReport};
pub use application::snapshot::SimulationSnapshot;
