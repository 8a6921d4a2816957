// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Lifecycle Phase Value Object
//!
//! The ordered enumeration of simulation states and the rules for moving
//! between them. Every framework operation is gated on the current phase;
//! the lifecycle manager owns the state machine, this module owns the
//! vocabulary.
//!
//! ## Phase Order
//!
//! ```text
//! Initialization → Setup → PostSetup → PopulationInitialization
//!   → { TimeStepPrepare → TimeStep → TimeStepCleanup → CollectMetrics }*
//!   → SimulationEnd → Report
//! ```
//!
//! The four main-loop sub-phases repeat once per tick. A simulation whose
//! start time equals its end time skips the main loop entirely:
//! `PopulationInitialization → SimulationEnd` is a legal transition.
//!
//! ## Framework Channels
//!
//! Each engine-driven phase has a reserved event channel of the same snake
//! case name. Components may not emit on reserved channels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the ordered simulation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LifecyclePhase {
    Initialization,
    Setup,
    PostSetup,
    PopulationInitialization,
    TimeStepPrepare,
    TimeStep,
    TimeStepCleanup,
    CollectMetrics,
    SimulationEnd,
    Report,
}

impl LifecyclePhase {
    /// Returns the phase's snake case name, which doubles as the reserved
    /// event channel name for engine-driven phases.
    pub fn channel_name(&self) -> &'static str {
        match self {
            LifecyclePhase::Initialization => "initialization",
            LifecyclePhase::Setup => "setup",
            LifecyclePhase::PostSetup => "post_setup",
            LifecyclePhase::PopulationInitialization => "population_initialization",
            LifecyclePhase::TimeStepPrepare => "time_step_prepare",
            LifecyclePhase::TimeStep => "time_step",
            LifecyclePhase::TimeStepCleanup => "time_step_cleanup",
            LifecyclePhase::CollectMetrics => "collect_metrics",
            LifecyclePhase::SimulationEnd => "simulation_end",
            LifecyclePhase::Report => "report",
        }
    }

    /// True for the four sub-phases of the main loop.
    pub fn is_main_loop(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::TimeStepPrepare
                | LifecyclePhase::TimeStep
                | LifecyclePhase::TimeStepCleanup
                | LifecyclePhase::CollectMetrics
        )
    }

    /// True once setup has completed.
    pub fn is_post_setup(&self) -> bool {
        *self >= LifecyclePhase::PostSetup
    }

    /// Checks whether `next` is a legal successor of this phase.
    ///
    /// The main loop closes back from `CollectMetrics` to
    /// `TimeStepPrepare`; `CollectMetrics` and `PopulationInitialization`
    /// may both step to `SimulationEnd`.
    pub fn may_transition_to(&self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (*self, next),
            (Initialization, Setup)
                | (Setup, PostSetup)
                | (PostSetup, PopulationInitialization)
                | (PopulationInitialization, TimeStepPrepare)
                | (PopulationInitialization, SimulationEnd)
                | (TimeStepPrepare, TimeStep)
                | (TimeStep, TimeStepCleanup)
                | (TimeStepCleanup, CollectMetrics)
                | (CollectMetrics, TimeStepPrepare)
                | (CollectMetrics, SimulationEnd)
                | (SimulationEnd, Report)
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channel_name())
    }
}

/// The sub-phases at which observations may be gathered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObservationPhase {
    TimeStepPrepare,
    TimeStep,
    TimeStepCleanup,
    CollectMetrics,
}

impl ObservationPhase {
    /// Resolves an event channel name to its observation phase, if any.
    pub fn from_channel(channel: &str) -> Option<Self> {
        match channel {
            "time_step_prepare" => Some(ObservationPhase::TimeStepPrepare),
            "time_step" => Some(ObservationPhase::TimeStep),
            "time_step_cleanup" => Some(ObservationPhase::TimeStepCleanup),
            "collect_metrics" => Some(ObservationPhase::CollectMetrics),
            _ => None,
        }
    }

    /// The lifecycle phase this observation phase corresponds to.
    pub fn lifecycle_phase(&self) -> LifecyclePhase {
        match self {
            ObservationPhase::TimeStepPrepare => LifecyclePhase::TimeStepPrepare,
            ObservationPhase::TimeStep => LifecyclePhase::TimeStep,
            ObservationPhase::TimeStepCleanup => LifecyclePhase::TimeStepCleanup,
            ObservationPhase::CollectMetrics => LifecyclePhase::CollectMetrics,
        }
    }
}

impl TryFrom<LifecyclePhase> for ObservationPhase {
    type Error = crate::error::SimulationError;

    fn try_from(phase: LifecyclePhase) -> Result<Self, Self::Error> {
        match phase {
            LifecyclePhase::TimeStepPrepare => Ok(ObservationPhase::TimeStepPrepare),
            LifecyclePhase::TimeStep => Ok(ObservationPhase::TimeStep),
            LifecyclePhase::TimeStepCleanup => Ok(ObservationPhase::TimeStepCleanup),
            LifecyclePhase::CollectMetrics => Ok(ObservationPhase::CollectMetrics),
            other => Err(crate::error::SimulationError::lifecycle(format!(
                "`{}` is not an observation phase",
                other
            ))),
        }
    }
}

impl fmt::Display for ObservationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lifecycle_phase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_total_order() {
        assert!(LifecyclePhase::Initialization < LifecyclePhase::Setup);
        assert!(LifecyclePhase::Setup < LifecyclePhase::PostSetup);
        assert!(LifecyclePhase::CollectMetrics < LifecyclePhase::SimulationEnd);
        assert!(LifecyclePhase::SimulationEnd < LifecyclePhase::Report);
    }

    #[test]
    fn test_main_loop_membership() {
        assert!(LifecyclePhase::TimeStep.is_main_loop());
        assert!(LifecyclePhase::CollectMetrics.is_main_loop());
        assert!(!LifecyclePhase::Setup.is_main_loop());
        assert!(!LifecyclePhase::SimulationEnd.is_main_loop());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(LifecyclePhase::Initialization.may_transition_to(LifecyclePhase::Setup));
        assert!(LifecyclePhase::CollectMetrics.may_transition_to(LifecyclePhase::TimeStepPrepare));
        assert!(LifecyclePhase::CollectMetrics.may_transition_to(LifecyclePhase::SimulationEnd));
        // A zero-length run skips the main loop entirely.
        assert!(LifecyclePhase::PopulationInitialization.may_transition_to(LifecyclePhase::SimulationEnd));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!LifecyclePhase::Setup.may_transition_to(LifecyclePhase::TimeStep));
        assert!(!LifecyclePhase::Report.may_transition_to(LifecyclePhase::Initialization));
        assert!(!LifecyclePhase::TimeStep.may_transition_to(LifecyclePhase::TimeStepPrepare));
    }

    #[test]
    fn test_observation_phase_conversion() {
        assert_eq!(
            ObservationPhase::try_from(LifecyclePhase::CollectMetrics).unwrap(),
            ObservationPhase::CollectMetrics
        );
        assert!(ObservationPhase::try_from(LifecyclePhase::Setup).is_err());
    }
}
