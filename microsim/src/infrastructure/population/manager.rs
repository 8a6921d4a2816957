// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Population Manager
//!
//! Owns the state table, hands out scoped views, and mediates growth.
//!
//! ## Column Lifecycle
//!
//! During setup a component declares the columns it creates, the columns
//! it requires, and its initialization dependencies. After setup the
//! column schema is frozen.
//!
//! ## Initializer Graph
//!
//! Initializers are declarative records; the resource graph linearizes
//! the columns they produce, and the manager derives the initializer
//! execution order from that linearization. An initializer receives the
//! creation-scope [`SimulantData`] and must populate *exactly* its
//! declared columns over *exactly* the new index.
//!
//! ## Simulant Creation
//!
//! The creation scope allocates a contiguous block of new indices, runs
//! each initializer in topological order, and joins results into the
//! state table. Any initializer failing rolls the whole allocation back -
//! no partial rows survive.

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use crate::infrastructure::population::table::StateTable;
use crate::infrastructure::population::view::{PopulationFilter, PopulationView};
use microsim_domain::entities::SimulantData;
use microsim_domain::value_objects::{AttributeKind, PopulationSlice, ResourceId, SimulantId, StepSize};
use microsim_domain::SimulationError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::debug;

/// Runs one component's initializer for a creation scope.
///
/// The context supplies this, dispatching to the owning component's
/// `on_initialize_simulants` hook.
pub type InitializerRunner<'a> =
    &'a dyn Fn(&str, &SimulantData) -> Result<PopulationSlice, SimulationError>;

/// One declared initializer: who runs, what it fills, what it needs.
#[derive(Debug, Clone)]
pub struct InitializerRecord {
    pub component: String,
    pub columns: Vec<String>,
    pub requires: Vec<ResourceId>,
}

/// Owns the state table, views, and the creation scope.
pub struct PopulationManager {
    table: Rc<RefCell<StateTable>>,
    lifecycle: Rc<LifecycleHandle>,
    initializers: RefCell<Vec<InitializerRecord>>,
    execution_order: RefCell<Option<Vec<usize>>>,
    creation_active: Cell<bool>,
}

impl PopulationManager {
    pub fn new(lifecycle: Rc<LifecycleHandle>) -> Self {
        Self {
            table: Rc::new(RefCell::new(StateTable::new())),
            lifecycle,
            initializers: RefCell::new(Vec::new()),
            execution_order: RefCell::new(None),
            creation_active: Cell::new(false),
        }
    }

    /// Shared access to the table for engine-internal subsystems.
    pub(crate) fn table(&self) -> Rc<RefCell<StateTable>> {
        Rc::clone(&self.table)
    }

    /// Declares a component's created columns and initializer. Setup only.
    pub fn register_initializer(
        &self,
        component: &str,
        columns: &[(String, AttributeKind)],
        requires: Vec<ResourceId>,
    ) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        let mut table = self.table.borrow_mut();
        for (name, kind) in columns {
            table.add_column(component, name, *kind)?;
        }
        self.initializers.borrow_mut().push(InitializerRecord {
            component: component.to_string(),
            columns: columns.iter().map(|(name, _)| name.clone()).collect(),
            requires,
        });
        Ok(())
    }

    /// The declared initializer records, in registration order.
    pub fn initializers(&self) -> Vec<InitializerRecord> {
        self.initializers.borrow().clone()
    }

    /// Builds a scoped view. Setup only for components; internal callers
    /// use [`PopulationManager::view_internal`].
    pub fn get_view(
        &self,
        requester: &str,
        columns: Vec<String>,
        filter: Option<PopulationFilter>,
    ) -> Result<PopulationView, SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        self.view_internal(requester, columns, filter, false)
    }

    pub(crate) fn view_internal(
        &self,
        requester: &str,
        columns: Vec<String>,
        filter: Option<PopulationFilter>,
        include_untracked: bool,
    ) -> Result<PopulationView, SimulationError> {
        PopulationView::new(
            requester.to_string(),
            columns,
            filter,
            include_untracked,
            Rc::clone(&self.table),
            Rc::clone(&self.lifecycle),
        )
    }

    /// Freezes the schema and derives the initializer execution order from
    /// the resource graph's topological order. Called at the setup →
    /// post-setup transition.
    pub fn finalize(&self, topological_order: &[ResourceId]) -> Result<(), SimulationError> {
        self.table.borrow_mut().freeze_schema();
        let position: BTreeMap<&ResourceId, usize> = topological_order
            .iter()
            .enumerate()
            .map(|(index, resource)| (resource, index))
            .collect();
        let initializers = self.initializers.borrow();
        let mut keyed: Vec<(usize, usize)> = Vec::with_capacity(initializers.len());
        for (record_index, record) in initializers.iter().enumerate() {
            let mut earliest = usize::MAX;
            for column in &record.columns {
                let resource = ResourceId::column(column.clone());
                let column_position = position.get(&resource).copied().ok_or_else(|| {
                    SimulationError::internal(format!(
                        "column `{}` missing from the topological order",
                        column
                    ))
                })?;
                earliest = earliest.min(column_position);
            }
            keyed.push((earliest, record_index));
        }
        keyed.sort();
        *self.execution_order.borrow_mut() = Some(keyed.into_iter().map(|(_, index)| index).collect());
        debug!(
            initializers = initializers.len(),
            "population initializer order finalized"
        );
        Ok(())
    }

    /// Allocates a block of new simulants and runs every initializer over
    /// it in topological order.
    ///
    /// Partial failure leaves no trace: any initializer error rolls the
    /// allocation back before propagating.
    pub fn create_simulants(
        &self,
        count: u64,
        creation_time: DateTime<Utc>,
        creation_window: StepSize,
        user_data: BTreeMap<String, Value>,
        run_initializer: InitializerRunner<'_>,
    ) -> Result<Vec<SimulantId>, SimulationError> {
        self.lifecycle.ensure_allowed(Operation::CreateSimulants)?;
        if self.creation_active.get() {
            return Err(SimulationError::population_schema(
                "simulant creation scopes cannot nest".to_string(),
            ));
        }
        let order = self.execution_order.borrow().clone().ok_or_else(|| {
            SimulationError::internal("simulant creation before initializer order was finalized".to_string())
        })?;
        self.creation_active.set(true);
        let rollback_row_count = self.table.borrow().row_count();
        let ids = self.table.borrow_mut().allocate_rows(count);
        let data = SimulantData::new(ids.clone(), creation_time, creation_window).with_user_data(user_data);
        let result = self.run_initializers(&order, &data, run_initializer);
        self.creation_active.set(false);
        match result {
            Ok(()) => {
                debug!(count, "simulants created");
                Ok(ids)
            }
            Err(error) => {
                self.table.borrow_mut().rollback_to(rollback_row_count);
                Err(error)
            }
        }
    }

    fn run_initializers(
        &self,
        order: &[usize],
        data: &SimulantData,
        run_initializer: InitializerRunner<'_>,
    ) -> Result<(), SimulationError> {
        let initializers = self.initializers.borrow().clone();
        for record_index in order {
            let record = &initializers[*record_index];
            let slice = run_initializer(&record.component, data)?;
            Self::validate_initializer_result(record, data.index.as_slice(), &slice)?;
            self.table.borrow_mut().write_slice(&slice)?;
        }
        Ok(())
    }

    fn validate_initializer_result(
        record: &InitializerRecord,
        expected_index: &[SimulantId],
        slice: &PopulationSlice,
    ) -> Result<(), SimulationError> {
        if slice.index() != expected_index {
            return Err(SimulationError::component_contract(format!(
                "initializer for `{}` populated {} rows instead of the {} allocated",
                record.component,
                slice.len(),
                expected_index.len()
            )));
        }
        let declared: BTreeSet<&String> = record.columns.iter().collect();
        let produced: Vec<String> = slice.column_names();
        let produced_set: BTreeSet<&String> = produced.iter().collect();
        if declared != produced_set {
            return Err(SimulationError::component_contract(format!(
                "initializer for `{}` produced columns {:?} but declared {:?}",
                record.component, produced, record.columns
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::lifecycle::LifecycleManager;
    use microsim_domain::value_objects::{AttributeColumn, LifecyclePhase};

    fn setup() -> (LifecycleManager, PopulationManager) {
        let lifecycle = LifecycleManager::new();
        lifecycle.advance_to(LifecyclePhase::Setup).unwrap();
        let manager = PopulationManager::new(lifecycle.handle());
        (lifecycle, manager)
    }

    fn advance_to_population_init(lifecycle: &LifecycleManager) {
        for phase in [LifecyclePhase::PostSetup, LifecyclePhase::PopulationInitialization] {
            lifecycle.advance_to(phase).unwrap();
        }
    }

    fn fill(columns: &[(&str, f64)], data: &SimulantData) -> PopulationSlice {
        let mut slice = PopulationSlice::new(data.index.clone());
        for (name, value) in columns {
            slice
                .insert_column(
                    name.to_string(),
                    AttributeColumn::from_floats(vec![*value; data.len()]),
                )
                .unwrap();
        }
        slice
    }

    #[test]
    fn test_initializers_run_in_topological_order() {
        let (lifecycle, manager) = setup();
        // Register b before a, but order a's column first topologically.
        manager
            .register_initializer("b_component", &[("b".to_string(), AttributeKind::Float)], vec![])
            .unwrap();
        manager
            .register_initializer("a_component", &[("a".to_string(), AttributeKind::Float)], vec![])
            .unwrap();
        manager
            .finalize(&[ResourceId::column("a"), ResourceId::column("b")])
            .unwrap();
        advance_to_population_init(&lifecycle);

        let calls = RefCell::new(Vec::new());
        let ids = manager
            .create_simulants(
                2,
                Utc::now(),
                StepSize::from_days(1).unwrap(),
                BTreeMap::new(),
                &|component, data| {
                    calls.borrow_mut().push(component.to_string());
                    Ok(match component {
                        "a_component" => fill(&[("a", 1.0)], data),
                        _ => fill(&[("b", 2.0)], data),
                    })
                },
            )
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(*calls.borrow(), vec!["a_component", "b_component"]);
    }

    #[test]
    fn test_failed_initializer_rolls_back_allocation() {
        let (lifecycle, manager) = setup();
        manager
            .register_initializer("base", &[("age".to_string(), AttributeKind::Float)], vec![])
            .unwrap();
        manager.finalize(&[ResourceId::column("age")]).unwrap();
        advance_to_population_init(&lifecycle);

        let err = manager
            .create_simulants(
                5,
                Utc::now(),
                StepSize::from_days(1).unwrap(),
                BTreeMap::new(),
                &|_, _| Err(SimulationError::internal("initializer exploded")),
            )
            .unwrap_err();
        assert!(err.to_string().contains("exploded"));
        assert_eq!(manager.table().borrow().row_count(), 0);
    }

    #[test]
    fn test_initializer_must_fill_declared_columns_exactly() {
        let (lifecycle, manager) = setup();
        manager
            .register_initializer("base", &[("age".to_string(), AttributeKind::Float)], vec![])
            .unwrap();
        manager.finalize(&[ResourceId::column("age")]).unwrap();
        advance_to_population_init(&lifecycle);

        let err = manager
            .create_simulants(
                1,
                Utc::now(),
                StepSize::from_days(1).unwrap(),
                BTreeMap::new(),
                &|_, data| Ok(fill(&[("age", 1.0), ("weight", 2.0)], data)),
            )
            .unwrap_err();
        assert_eq!(err.category(), "component");
        assert_eq!(manager.table().borrow().row_count(), 0);
    }

    #[test]
    fn test_creation_outside_allowed_phases_fails() {
        let (lifecycle, manager) = setup();
        manager.finalize(&[]).unwrap();
        lifecycle.advance_to(LifecyclePhase::PostSetup).unwrap();
        let err = manager
            .create_simulants(
                1,
                Utc::now(),
                StepSize::from_days(1).unwrap(),
                BTreeMap::new(),
                &|_, data| Ok(PopulationSlice::new(data.index.clone())),
            )
            .unwrap_err();
        assert_eq!(err.category(), "lifecycle");
    }

    #[test]
    fn test_column_registration_closed_after_setup() {
        let (lifecycle, manager) = setup();
        lifecycle.advance_to(LifecyclePhase::PostSetup).unwrap();
        let err = manager
            .register_initializer("late", &[("x".to_string(), AttributeKind::Int)], vec![])
            .unwrap_err();
        assert_eq!(err.category(), "lifecycle");
    }

    #[test]
    fn test_ids_continue_across_creation_scopes() {
        let (lifecycle, manager) = setup();
        manager
            .register_initializer("base", &[("age".to_string(), AttributeKind::Float)], vec![])
            .unwrap();
        manager.finalize(&[ResourceId::column("age")]).unwrap();
        advance_to_population_init(&lifecycle);

        let runner = |_: &str, data: &SimulantData| Ok(fill(&[("age", 0.0)], data));
        let first = manager
            .create_simulants(3, Utc::now(), StepSize::from_days(1).unwrap(), BTreeMap::new(), &runner)
            .unwrap();
        let second = manager
            .create_simulants(2, Utc::now(), StepSize::from_days(1).unwrap(), BTreeMap::new(), &runner)
            .unwrap();
        assert_eq!(first.last().unwrap().value() + 1, second[0].value());
    }
}
