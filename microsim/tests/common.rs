// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared helpers for the integration suite: tiny single-purpose
//! components and configuration shorthands.

#![allow(dead_code)]

use microsim::application::builder::Builder;
use microsim::application::component::Component;
use microsim::infrastructure::clock::SimulationClock;
use microsim_domain::entities::SimulantData;
use microsim_domain::events::SimEvent;
use microsim_domain::value_objects::{
    AttributeColumn, AttributeKind, PopulationSlice, ResourceId,
};
use microsim_domain::SimulationError;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// A one-column component: creates a float column filled with a constant,
/// with arbitrary declared initialization dependencies.
pub struct ColumnComponent {
    name: String,
    column: String,
    fill: f64,
    requires: Vec<ResourceId>,
}

impl ColumnComponent {
    pub fn new(name: &str, column: &str, fill: f64, requires: Vec<ResourceId>) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            fill,
            requires,
        }
    }
}

impl Component for ColumnComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns_created(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
        builder
            .population()
            .initializes_simulants(&[(self.column.as_str(), AttributeKind::Float)], &self.requires)
    }

    fn on_initialize_simulants(
        &self,
        data: &SimulantData,
    ) -> Result<Option<PopulationSlice>, SimulationError> {
        let mut slice = PopulationSlice::new(data.index.clone());
        slice.insert_column(
            self.column.clone(),
            AttributeColumn::from_floats(vec![self.fill; data.len()]),
        )?;
        Ok(Some(slice))
    }
}

/// Records which hooks fired, in order, into a shared log.
pub struct HookRecorder {
    name: String,
    log: Rc<RefCell<Vec<String>>>,
}

impl HookRecorder {
    pub fn new(name: &str, log: Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }

    fn record(&self, hook: &str) {
        self.log.borrow_mut().push(format!("{}:{}", self.name, hook));
    }
}

impl Component for HookRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, _builder: &mut Builder) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_post_setup(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        self.record("post_setup");
        Ok(())
    }

    fn on_time_step_prepare(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        self.record("time_step_prepare");
        Ok(())
    }

    fn on_time_step(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        self.record("time_step");
        Ok(())
    }

    fn on_time_step_cleanup(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        self.record("time_step_cleanup");
        Ok(())
    }

    fn on_collect_metrics(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        self.record("collect_metrics");
        Ok(())
    }

    fn on_simulation_end(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        self.record("simulation_end");
        Ok(())
    }
}

/// Keeps the clock handle from setup and misuses it during the main
/// loop: a registration attempted outside Setup.
pub struct LateRegistrar {
    clock: RefCell<Option<Rc<SimulationClock>>>,
}

impl LateRegistrar {
    pub fn new() -> Self {
        Self {
            clock: RefCell::new(None),
        }
    }
}

impl Default for LateRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for LateRegistrar {
    fn name(&self) -> &str {
        "late_registrar"
    }

    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
        *self.clock.borrow_mut() = Some(builder.time().clock());
        Ok(())
    }

    fn on_time_step(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        let clock = self.clock.borrow();
        let clock = clock
            .as_ref()
            .ok_or_else(|| SimulationError::internal("late_registrar used before setup"))?;
        // This must fail: registration is a Setup-only operation.
        clock.register_step_modifier("too_late", Rc::new(|scheduled| Ok(vec![None; scheduled.len()])))
    }
}

/// One-day-step configuration over `days` days.
pub fn daily_config(days: u32, population: u64, seed: u64) -> Value {
    json!({
        "randomness": {"seed": seed},
        "population": {"population_size": population},
        "time": {
            "start": "2025-01-01",
            "end": end_date(days),
            "step_days": 1.0,
        },
    })
}

fn end_date(days: u32) -> String {
    let start = chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let end = start + chrono::Duration::days(days as i64);
    end.format("%Y-%m-%d").to_string()
}
