// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Randomness Manager (Common Random Numbers)
//!
//! Keyed randomness service guaranteeing that the same decisions happen to
//! the same simulant across parallel counterfactual runs.
//!
//! ## Overview
//!
//! Configuration declares a *key-columns* tuple - the attributes (for
//! example `entrance_time` and `age`) that uniquely identify a simulant
//! across runs. When a simulant is created it is *registered*: its key
//! tuple plus the process seed maps deterministically to a stable position
//! in the CRN key space. Every draw a stream hands out is then a pure
//! function of seed, stream name, key position, and the caller-supplied
//! additional key (usually the event time).
//!
//! Two runs sharing seed and key columns therefore agree on every draw
//! for every simulant present in both runs, regardless of what other
//! components or pipelines differ between them.
//!
//! ## Bootstrap Streams
//!
//! Streams that *create* the key columns themselves cannot be keyed on
//! them. A stream obtained with `for_initialization` is exempt from
//! registration and keys on the raw simulant index instead.
//!
//! ## Contracts
//!
//! - Re-registering a simulant is a no-op
//! - A CRN stream draw for an unregistered simulant fails
//! - Stream names are unique across the simulation

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use microsim_domain::services::crn;
use microsim_domain::value_objects::{AttributeColumn, PopulationSlice, SimulantId};
use microsim_domain::SimulationError;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::debug;

/// Owns the CRN key map and hands out draw streams.
pub struct RandomnessManager {
    seed: u64,
    key_columns: Vec<String>,
    keys: RefCell<BTreeMap<SimulantId, u64>>,
    stream_names: RefCell<BTreeSet<String>>,
    lifecycle: Rc<LifecycleHandle>,
}

impl RandomnessManager {
    pub fn new(seed: u64, key_columns: Vec<String>, lifecycle: Rc<LifecycleHandle>) -> Self {
        Self {
            seed,
            key_columns,
            keys: RefCell::new(BTreeMap::new()),
            stream_names: RefCell::new(BTreeSet::new()),
            lifecycle,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The attributes that identify a simulant across counterfactual runs.
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Creates a named draw stream. Setup only; names are unique.
    pub fn get_stream(
        self: &Rc<Self>,
        name: &str,
        for_initialization: bool,
    ) -> Result<RandomnessStream, SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        if !self.stream_names.borrow_mut().insert(name.to_string()) {
            return Err(SimulationError::component_contract(format!(
                "randomness stream `{}` is already registered",
                name
            )));
        }
        debug!(stream = name, for_initialization, "randomness stream registered");
        Ok(RandomnessStream {
            name: name.to_string(),
            for_initialization,
            manager: Rc::clone(self),
        })
    }

    /// Registers newly created simulants in the CRN key space.
    ///
    /// `slice` must carry the configured key columns for exactly the new
    /// simulants. Re-registration is a no-op.
    pub fn register_simulants(&self, slice: &PopulationSlice) -> Result<(), SimulationError> {
        let mut columns = Vec::with_capacity(self.key_columns.len());
        for name in &self.key_columns {
            columns.push(slice.column(name).ok_or_else(|| {
                SimulationError::randomness(format!(
                    "key column `{}` missing from registration data",
                    name
                ))
            })?);
        }
        let mut keys = self.keys.borrow_mut();
        for (position, id) in slice.index().iter().enumerate() {
            if keys.contains_key(id) {
                continue;
            }
            let parts: Vec<String> = columns
                .iter()
                .map(|column| {
                    column
                        .get(position)
                        .map(|value| value.canonical_repr())
                        .unwrap_or_default()
                })
                .collect();
            keys.insert(*id, crn::key_hash(self.seed, &parts));
        }
        Ok(())
    }

    fn crn_key(&self, id: SimulantId) -> Result<u64, SimulationError> {
        self.keys.borrow().get(&id).copied().ok_or_else(|| {
            SimulationError::randomness(format!("{} is not registered with the randomness manager", id))
        })
    }

    /// The key map, for snapshots.
    pub fn key_state(&self) -> BTreeMap<SimulantId, u64> {
        self.keys.borrow().clone()
    }

    /// Replaces the key map, for restores.
    pub fn restore_key_state(&self, keys: BTreeMap<SimulantId, u64>) {
        *self.keys.borrow_mut() = keys;
    }
}

/// A named keyed PRNG handle.
///
/// Handles are cheap to clone and remain valid for the life of the
/// simulation.
#[derive(Clone)]
pub struct RandomnessStream {
    name: String,
    for_initialization: bool,
    manager: Rc<RandomnessManager>,
}

impl std::fmt::Debug for RandomnessStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomnessStream")
            .field("name", &self.name)
            .field("for_initialization", &self.for_initialization)
            .finish_non_exhaustive()
    }
}

impl RandomnessStream {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One uniform draw on `[0, 1)` for one simulant.
    pub fn get_draw_one(&self, id: SimulantId, additional_key: &str) -> Result<f64, SimulationError> {
        let key = if self.for_initialization {
            // Bootstrapping streams create the key columns themselves and
            // key on the raw index instead.
            crn::key_hash(self.manager.seed, &[format!("idx:{}", id.value())])
        } else {
            self.manager.crn_key(id)?
        };
        Ok(crn::uniform_draw(self.manager.seed, &self.name, additional_key, key))
    }

    /// Uniform draws on `[0, 1)` for a block of simulants.
    pub fn get_draw(
        &self,
        index: &[SimulantId],
        additional_key: &str,
    ) -> Result<AttributeColumn, SimulationError> {
        let mut draws = Vec::with_capacity(index.len());
        for id in index {
            draws.push(self.get_draw_one(*id, additional_key)?);
        }
        Ok(AttributeColumn::from_floats(draws))
    }

    /// Keeps the simulants whose draw falls below their probability.
    ///
    /// The standard CRN decision helper: `probabilities` aligns with
    /// `index`, and a simulant is selected when `draw < p`.
    pub fn filter_for_probability(
        &self,
        index: &[SimulantId],
        probabilities: &[f64],
        additional_key: &str,
    ) -> Result<Vec<SimulantId>, SimulationError> {
        if probabilities.len() != index.len() {
            return Err(SimulationError::randomness(format!(
                "{} probabilities supplied for {} simulants",
                probabilities.len(),
                index.len()
            )));
        }
        let mut selected = Vec::new();
        for (id, probability) in index.iter().zip(probabilities) {
            if self.get_draw_one(*id, additional_key)? < *probability {
                selected.push(*id);
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::lifecycle::LifecycleManager;
    use microsim_domain::value_objects::LifecyclePhase;

    fn setup_manager(seed: u64) -> (LifecycleManager, Rc<RandomnessManager>) {
        let lifecycle = LifecycleManager::new();
        lifecycle.advance_to(LifecyclePhase::Setup).unwrap();
        let manager = Rc::new(RandomnessManager::new(
            seed,
            vec!["entrance_time".to_string(), "age".to_string()],
            lifecycle.handle(),
        ));
        (lifecycle, manager)
    }

    fn registration_slice(ids: &[u64], ages: &[f64]) -> PopulationSlice {
        let epoch = chrono::DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let mut slice = PopulationSlice::new(ids.iter().map(|i| SimulantId::new(*i)).collect());
        slice
            .insert_column(
                "entrance_time",
                AttributeColumn::from_timestamps(vec![epoch; ids.len()]),
            )
            .unwrap();
        slice
            .insert_column("age", AttributeColumn::from_floats(ages.to_vec()))
            .unwrap();
        slice
    }

    #[test]
    fn test_draws_reproduce_across_managers() {
        let (_l1, first) = setup_manager(7);
        let (_l2, second) = setup_manager(7);
        let slice = registration_slice(&[0, 1], &[25.0, 50.0]);
        first.register_simulants(&slice).unwrap();
        second.register_simulants(&slice).unwrap();
        let a = first.get_stream("mortality", false).unwrap();
        let b = second.get_stream("mortality", false).unwrap();
        let index = [SimulantId::new(0), SimulantId::new(1)];
        assert_eq!(
            a.get_draw(&index, "2025-06-01").unwrap(),
            b.get_draw(&index, "2025-06-01").unwrap()
        );
    }

    #[test]
    fn test_unregistered_simulant_fails() {
        let (_lifecycle, manager) = setup_manager(0);
        let stream = manager.get_stream("mortality", false).unwrap();
        let err = stream.get_draw_one(SimulantId::new(3), "t").unwrap_err();
        assert_eq!(err.category(), "randomness");
    }

    #[test]
    fn test_bootstrap_stream_needs_no_registration() {
        let (_lifecycle, manager) = setup_manager(0);
        let stream = manager.get_stream("age_bootstrap", true).unwrap();
        let draw = stream.get_draw_one(SimulantId::new(3), "t").unwrap();
        assert!((0.0..1.0).contains(&draw));
    }

    #[test]
    fn test_reregistration_is_noop() {
        let (_lifecycle, manager) = setup_manager(0);
        manager
            .register_simulants(&registration_slice(&[0], &[25.0]))
            .unwrap();
        let original = manager.key_state();
        // Same id with a different key tuple must not overwrite.
        manager
            .register_simulants(&registration_slice(&[0], &[99.0]))
            .unwrap();
        assert_eq!(manager.key_state(), original);
    }

    #[test]
    fn test_duplicate_stream_name_fails() {
        let (_lifecycle, manager) = setup_manager(0);
        manager.get_stream("mortality", false).unwrap();
        let err = manager.get_stream("mortality", false).unwrap_err();
        assert_eq!(err.category(), "component");
    }

    #[test]
    fn test_stream_registration_is_setup_only() {
        let (lifecycle, manager) = setup_manager(0);
        lifecycle.advance_to(LifecyclePhase::PostSetup).unwrap();
        let err = manager.get_stream("late", false).unwrap_err();
        assert_eq!(err.category(), "lifecycle");
    }

    #[test]
    fn test_filter_for_probability_boundaries() {
        let (_lifecycle, manager) = setup_manager(0);
        let slice = registration_slice(&[0, 1, 2], &[10.0, 20.0, 30.0]);
        manager.register_simulants(&slice).unwrap();
        let stream = manager.get_stream("mortality", false).unwrap();
        let index: Vec<SimulantId> = (0..3).map(SimulantId::new).collect();
        // p = 0 selects nobody, p = 1 selects everybody.
        assert!(stream
            .filter_for_probability(&index, &[0.0, 0.0, 0.0], "t")
            .unwrap()
            .is_empty());
        assert_eq!(
            stream.filter_for_probability(&index, &[1.0, 1.0, 1.0], "t").unwrap(),
            index
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_bootstrap_draws_stay_in_unit_interval(id in proptest::prelude::any::<u32>(), tick in 0u32..1000) {
            let (_lifecycle, manager) = setup_manager(42);
            let stream = manager.get_stream("bootstrap", true).unwrap();
            let draw = stream.get_draw_one(SimulantId::new(id as u64), &tick.to_string()).unwrap();
            proptest::prop_assert!((0.0..1.0).contains(&draw));
        }
    }

    #[test]
    fn test_key_state_roundtrip() {
        let (_lifecycle, manager) = setup_manager(3);
        manager
            .register_simulants(&registration_slice(&[0, 1], &[25.0, 50.0]))
            .unwrap();
        let saved = manager.key_state();
        let (_l2, restored) = setup_manager(3);
        restored.restore_key_state(saved.clone());
        assert_eq!(restored.key_state(), saved);
    }
}
