// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Per-Simulant Clock Tests
//!
//! A step-size modifier gives a subset of simulants a shorter step; the
//! clock advances to the earliest next event and unscheduled simulants
//! drop out of the sub-phase events.

mod common;

use microsim::application::builder::Builder;
use microsim::application::component::Component;
use microsim::application::context::SimulationContext;
use microsim_domain::entities::SimulantData;
use microsim_domain::events::SimEvent;
use microsim_domain::value_objects::{
    AttributeColumn, AttributeKind, PopulationSlice, StepSize,
};
use microsim_domain::SimulationError;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

/// (tick step in days, scheduled simulant count) per `time_step` event.
type TickLog = Rc<RefCell<Vec<(f64, usize)>>>;

/// Marks the first two simulants infected and gives them half-day steps
/// while everyone else keeps the three-day global step.
struct InfectionStepper {
    log: TickLog,
}

impl Component for InfectionStepper {
    fn name(&self) -> &str {
        "infection_stepper"
    }

    fn columns_created(&self) -> Vec<String> {
        vec!["infected".to_string()]
    }

    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
        builder
            .population()
            .initializes_simulants(&[("infected", AttributeKind::Bool)], &[])?;
        let view = builder.population().get_view(&["infected"], None)?;
        builder.time().register_step_modifier(Rc::new(move |scheduled| {
            let flags = view.get(scheduled, None)?;
            let infected = flags
                .column("infected")
                .ok_or_else(|| SimulationError::internal("infected column missing"))?
                .as_bools()?
                .to_vec();
            infected
                .into_iter()
                .map(|infected| {
                    Ok(if infected {
                        Some(StepSize::from_days_f64(0.5)?)
                    } else {
                        None
                    })
                })
                .collect()
        }))
    }

    fn on_initialize_simulants(
        &self,
        data: &SimulantData,
    ) -> Result<Option<PopulationSlice>, SimulationError> {
        let flags: Vec<bool> = data.index.iter().map(|id| id.value() < 2).collect();
        let mut slice = PopulationSlice::new(data.index.clone());
        slice.insert_column("infected", AttributeColumn::from_bools(flags))?;
        Ok(Some(slice))
    }

    fn on_time_step(&self, event: &SimEvent) -> Result<(), SimulationError> {
        self.log
            .borrow_mut()
            .push((event.step_size().days_f64(), event.index().len()));
        Ok(())
    }
}

#[test]
fn test_infected_subset_drives_half_day_ticks() {
    let log: TickLog = Rc::new(RefCell::new(Vec::new()));
    let configuration = json!({
        "population": {"population_size": 4},
        "time": {
            "start": "2025-01-01",
            "end": "2025-01-04",
            "step_days": 3.0,
            "minimum_step_days": 0.5,
        },
    });
    let context = SimulationContext::new(
        configuration,
        vec![Box::new(InfectionStepper { log: Rc::clone(&log) })],
    )
    .unwrap();
    context.run().unwrap();

    let log = log.borrow();
    // First tick: everyone is due, and the infected pair pulls the step
    // down to half a day.
    assert_eq!(log[0], (0.5, 4));
    // Until the healthy simulants come due at day 3, only the infected
    // pair is scheduled.
    for entry in &log[1..] {
        assert_eq!(*entry, (0.5, 2));
    }
    assert_eq!(log.len(), 6);
}

/// Without modifiers every simulant keeps the global step and every tick
/// schedules the whole population.
#[test]
fn test_uniform_schedule_without_modifiers() {
    let log: TickLog = Rc::new(RefCell::new(Vec::new()));

    struct Recorder {
        log: TickLog,
    }

    impl Component for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn setup(&mut self, _builder: &mut Builder) -> Result<(), SimulationError> {
            Ok(())
        }

        fn on_time_step(&self, event: &SimEvent) -> Result<(), SimulationError> {
            self.log
                .borrow_mut()
                .push((event.step_size().days_f64(), event.index().len()));
            Ok(())
        }
    }

    let configuration = json!({
        "population": {"population_size": 3},
        "time": {"start": "2025-01-01", "end": "2025-01-07", "step_days": 2.0},
    });
    let context = SimulationContext::new(
        configuration,
        vec![Box::new(Recorder { log: Rc::clone(&log) })],
    )
    .unwrap();
    context.run().unwrap();
    assert_eq!(*log.borrow(), vec![(2.0, 3); 3]);
}
