// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Simulant Creation Data
//!
//! The record handed to every population initializer when a block of new
//! simulants is created.
//!
//! An initializer must populate exactly its declared columns over exactly
//! the index carried here. The creation window is the span of simulated
//! time the new arrivals are spread across (the current step during the
//! main loop, the configured entry window during population
//! initialization); `user_data` carries free-form arguments from whoever
//! invoked the simulant creator.

use crate::value_objects::{SimulantId, StepSize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Creation-scope data for one block of new simulants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulantData {
    /// The contiguous block of newly allocated indices.
    pub index: Vec<SimulantId>,
    /// The simulated time at which the block enters the population.
    pub creation_time: DateTime<Utc>,
    /// The span of simulated time the arrivals are spread across.
    pub creation_window: StepSize,
    /// Free-form arguments passed through the simulant creator.
    pub user_data: BTreeMap<String, serde_json::Value>,
}

impl SimulantData {
    /// Creates a record with no user data.
    pub fn new(index: Vec<SimulantId>, creation_time: DateTime<Utc>, creation_window: StepSize) -> Self {
        Self {
            index,
            creation_time,
            creation_window,
            user_data: BTreeMap::new(),
        }
    }

    /// Attaches user data, consuming self.
    pub fn with_user_data(mut self, user_data: BTreeMap<String, serde_json::Value>) -> Self {
        self.user_data = user_data;
        self
    }

    /// The number of simulants in the block.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulant_data_carries_block() {
        let index: Vec<SimulantId> = (10..14).map(SimulantId::new).collect();
        let data = SimulantData::new(
            index.clone(),
            Utc::now(),
            StepSize::from_days(1).unwrap(),
        );
        assert_eq!(data.len(), 4);
        assert_eq!(data.index, index);
        assert!(data.user_data.is_empty());
    }

    #[test]
    fn test_simulant_data_user_data_passthrough() {
        let mut user_data = BTreeMap::new();
        user_data.insert("cohort".to_string(), serde_json::json!("migrants"));
        let data = SimulantData::new(vec![SimulantId::new(0)], Utc::now(), StepSize::from_days(1).unwrap())
            .with_user_data(user_data);
        assert_eq!(data.user_data["cohort"], serde_json::json!("migrants"));
    }
}
