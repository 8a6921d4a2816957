// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Combination Service
//!
//! The pure math behind value pipelines: how a source and its modifiers
//! are composed, and how the combined value is post-processed.
//!
//! ## Overview
//!
//! A pipeline composes one source with zero or more modifiers under a
//! [`Combiner`], then applies a [`PostProcessor`]:
//!
//! - **Replace** — each modifier receives the current value and returns the
//!   new one; the combined value after `k` modifiers depends only on the
//!   source and the first `k` modifiers in registration order
//! - **List** — the source returns a list; each modifier appends its own
//!   output; the combined value is the list
//!
//! Post-processors:
//!
//! - **Rescale** — converts annual rates to per-step rates through the
//!   [`RateConversion`] chosen at registration; the choice is recorded so
//!   restored runs reproduce the same conversion
//! - **Union** — combines independent proportions as `1 - Π(1 - p_i)`
//! - **Identity** — the default
//!
//! This module is stateless; the value manager owns registration and
//! dispatch.

use crate::error::SimulationError;
use crate::value_objects::AttributeColumn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a pipeline's source and modifiers are composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Combiner {
    /// Each modifier receives the prior value and replaces it.
    #[default]
    Replace,
    /// The source yields a list; each modifier appends an element.
    List,
}

impl fmt::Display for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combiner::Replace => write!(f, "replace"),
            Combiner::List => write!(f, "list"),
        }
    }
}

/// The annual-to-step rate conversion formula, chosen at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateConversion {
    /// `r_step = 1 - exp(-r_annual * step_years)`
    Exponential,
    /// `r_step = r_annual * step_years`
    Linear,
}

impl RateConversion {
    /// Converts one annual rate to a per-step rate.
    pub fn annual_to_step(&self, annual: f64, step_years: f64) -> f64 {
        match self {
            RateConversion::Exponential => 1.0 - (-annual * step_years).exp(),
            RateConversion::Linear => annual * step_years,
        }
    }
}

impl fmt::Display for RateConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateConversion::Exponential => write!(f, "exponential"),
            RateConversion::Linear => write!(f, "linear"),
        }
    }
}

/// The transformation applied to a pipeline's combined value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PostProcessor {
    #[default]
    Identity,
    /// Annual rates become per-step rates.
    Rescale(RateConversion),
    /// Independent proportions combine as `1 - prod(1 - p_i)`.
    Union,
}

impl fmt::Display for PostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostProcessor::Identity => write!(f, "identity"),
            PostProcessor::Rescale(conversion) => write!(f, "rescale({})", conversion),
            PostProcessor::Union => write!(f, "union"),
        }
    }
}

/// Rescales a float column of annual rates to per-step rates.
pub fn rescale(
    column: &AttributeColumn,
    conversion: RateConversion,
    step_years: f64,
) -> Result<AttributeColumn, SimulationError> {
    let annual = column.as_floats()?;
    Ok(AttributeColumn::from_floats(
        annual
            .iter()
            .map(|rate| conversion.annual_to_step(*rate, step_years))
            .collect(),
    ))
}

/// Combines float columns of independent proportions element-wise as
/// `1 - prod(1 - p_i)`. All columns must share one length.
pub fn union(columns: &[AttributeColumn]) -> Result<AttributeColumn, SimulationError> {
    let first = columns
        .first()
        .ok_or_else(|| SimulationError::internal("union post-processor applied to an empty list"))?;
    let len = first.len();
    let mut complement = vec![1.0_f64; len];
    for column in columns {
        let probs = column.as_floats()?;
        if probs.len() != len {
            return Err(SimulationError::internal(format!(
                "union post-processor given columns of unequal length ({} vs {})",
                probs.len(),
                len
            )));
        }
        for (acc, p) in complement.iter_mut().zip(probs) {
            *acc *= 1.0 - p;
        }
    }
    Ok(AttributeColumn::from_floats(
        complement.into_iter().map(|c| 1.0 - c).collect(),
    ))
}
