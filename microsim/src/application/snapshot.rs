// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Whole-Context Snapshot
//!
//! The backup/restore surface: a serializable capture of everything a
//! resumed run needs beyond its component set.
//!
//! A snapshot carries the state table, the configuration tree (with
//! provenance), the CRN key map and seed, the clock schedule, and every
//! observation accumulator. Pipelines, views, and listeners are *not*
//! captured - they are references rebuilt by running the same components
//! through setup again. Restoring therefore requires the same seed and
//! component set; the restored context resumes at the saved clock and
//! produces the same observation stream from there to the end.

use crate::infrastructure::config::LayeredConfigTree;
use crate::infrastructure::population::table::StateTable;
use microsim_domain::value_objects::SimulantId;
use microsim_domain::SimulationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A serializable whole-context capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    /// The process seed the run was keyed on.
    pub seed: u64,
    /// The clock reading at capture time.
    pub clock_current: DateTime<Utc>,
    /// Per-simulant next event times.
    pub next_event_times: Vec<DateTime<Utc>>,
    /// The full population column store.
    pub state_table: StateTable,
    /// The layered configuration tree, provenance included.
    pub configuration: LayeredConfigTree,
    /// The CRN key map.
    pub randomness_keys: BTreeMap<SimulantId, u64>,
    /// Observation accumulators by observation name.
    pub accumulators: BTreeMap<String, Value>,
}

impl SimulationSnapshot {
    /// Serializes the snapshot as JSON.
    pub fn to_json(&self) -> Result<String, SimulationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reads a snapshot back from JSON.
    pub fn from_json(payload: &str) -> Result<Self, SimulationError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigSource;
    use chrono::Utc;

    #[test]
    fn test_snapshot_json_roundtrip() {
        let configuration = LayeredConfigTree::new();
        configuration
            .set("randomness.seed", ConfigSource::BaseDefaults, "framework", 7.into())
            .unwrap();
        let now = Utc::now();
        let snapshot = SimulationSnapshot {
            seed: 7,
            clock_current: now,
            next_event_times: vec![now, now],
            state_table: StateTable::new(),
            configuration,
            randomness_keys: BTreeMap::from([(SimulantId::new(0), 42u64)]),
            accumulators: BTreeMap::from([("deaths".to_string(), Value::from(3.0))]),
        };
        let restored = SimulationSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(restored.seed, 7);
        assert_eq!(restored.clock_current, now);
        assert_eq!(restored.randomness_keys[&SimulantId::new(0)], 42);
        assert_eq!(restored.accumulators["deaths"], Value::from(3.0));
        assert_eq!(restored.configuration.get_int("randomness.seed").unwrap(), 7);
    }
}
