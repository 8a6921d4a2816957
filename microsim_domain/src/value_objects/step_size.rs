// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Size Value Object
//!
//! A strictly positive simulation step duration.
//!
//! The clock advances in steps; rate pipelines convert annual rates to
//! per-step rates through the fractional-year length this type exposes.
//! The value serializes as whole milliseconds so snapshots are stable
//! across platforms.

use crate::error::SimulationError;
use crate::services::datetime_serde;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

const DAYS_PER_YEAR: f64 = 365.25;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// A strictly positive step duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepSize(#[serde(with = "datetime_serde::duration_millis")] Duration);

impl StepSize {
    /// Creates a step size from a chrono duration, validating positivity.
    pub fn new(duration: Duration) -> Result<Self, SimulationError> {
        if duration <= Duration::zero() {
            return Err(SimulationError::config_type(format!(
                "step size must be strictly positive, got {} ms",
                duration.num_milliseconds()
            )));
        }
        Ok(Self(duration))
    }

    /// Creates a step size from a whole number of days.
    pub fn from_days(days: i64) -> Result<Self, SimulationError> {
        Self::new(Duration::days(days))
    }

    /// Creates a step size from a possibly fractional number of days.
    pub fn from_days_f64(days: f64) -> Result<Self, SimulationError> {
        if !days.is_finite() {
            return Err(SimulationError::config_type(format!(
                "step size in days must be finite, got {}",
                days
            )));
        }
        Self::new(Duration::milliseconds((days * MILLIS_PER_DAY).round() as i64))
    }

    /// Returns the underlying duration.
    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Returns the step length as fractional days.
    pub fn days_f64(&self) -> f64 {
        self.0.num_milliseconds() as f64 / MILLIS_PER_DAY
    }

    /// Returns the step length as fractional years, the unit rate
    /// conversions are expressed in.
    pub fn years_f64(&self) -> f64 {
        self.days_f64() / DAYS_PER_YEAR
    }
}

impl fmt::Display for StepSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step({} days)", self.days_f64())
    }
}
