// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Listener Priority Value Object
//!
//! Validated priority tier for event bus subscriptions.
//!
//! Listeners on a channel fire in ascending priority order. Within a single
//! tier the firing order is unspecified and callers must not depend on it.
//! Valid tiers are `0..=9`; the default tier is 5, leaving room on both
//! sides for components that must observe an event before or after the
//! bulk of the population updates.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An event listener priority tier in `0..=9`. Lower fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerPriority(u8);

impl ListenerPriority {
    /// The lowest tier; fires before everything else on the channel.
    pub const FIRST: ListenerPriority = ListenerPriority(0);

    /// The highest tier; fires after everything else on the channel.
    pub const LAST: ListenerPriority = ListenerPriority(9);

    /// Creates a priority, validating the `0..=9` range.
    pub fn new(tier: u8) -> Result<Self, SimulationError> {
        if tier > 9 {
            return Err(SimulationError::component_contract(format!(
                "listener priority must be in 0..=9, got {}",
                tier
            )));
        }
        Ok(Self(tier))
    }

    /// Returns the raw tier.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for ListenerPriority {
    fn default() -> Self {
        Self(5)
    }
}

impl fmt::Display for ListenerPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "priority({})", self.0)
    }
}

/// Per-phase listener priorities for a component's standard hooks.
///
/// The context subscribes each component's phase hooks with these tiers.
/// Components override the default to move themselves ahead of or behind
/// their collaborators on specific channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhasePriorities {
    pub post_setup: ListenerPriority,
    pub time_step_prepare: ListenerPriority,
    pub time_step: ListenerPriority,
    pub time_step_cleanup: ListenerPriority,
    pub collect_metrics: ListenerPriority,
    pub simulation_end: ListenerPriority,
}
