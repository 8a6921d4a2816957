// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Random Numbers Counterfactual Tests
//!
//! Two runs differing only in a rate modifier share every draw for every
//! simulant alive in both: decisions on unrelated streams are identical,
//! and the halved-rate run's deaths are a subset of the baseline's.

mod common;

use microsim::application::builder::Builder;
use microsim::application::component::Component;
use microsim::application::context::{SimulationContext, SimulationReport};
use microsim::infrastructure::components::{BasePopulation, ConstantMortality};
use microsim::infrastructure::randomness::RandomnessStream;
use microsim::infrastructure::values::PipelineValue;
use microsim_domain::events::SimEvent;
use microsim_domain::value_objects::{AttributeColumn, ListenerPriority};
use microsim_domain::SimulationError;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Per-tick draw log: simulant id -> draw.
type DrawLog = Rc<RefCell<Vec<BTreeMap<u64, f64>>>>;

/// Draws from an unrelated CRN stream every tick and records the values.
struct DrawRecorder {
    stream: RefCell<Option<RandomnessStream>>,
    log: DrawLog,
}

impl DrawRecorder {
    fn new(log: DrawLog) -> Self {
        Self {
            stream: RefCell::new(None),
            log,
        }
    }
}

impl Component for DrawRecorder {
    fn name(&self) -> &str {
        "draw_recorder"
    }

    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
        *self.stream.borrow_mut() = Some(builder.randomness().get_stream("neutral")?);
        Ok(())
    }

    fn on_time_step(&self, event: &SimEvent) -> Result<(), SimulationError> {
        let stream = self.stream.borrow();
        let stream = stream
            .as_ref()
            .ok_or_else(|| SimulationError::internal("draw_recorder used before setup"))?;
        let draws = stream.get_draw(event.index(), &event.event_time().to_rfc3339())?;
        let mut tick = BTreeMap::new();
        for (id, draw) in event.index().iter().zip(draws.as_floats()?) {
            tick.insert(id.value(), *draw);
        }
        self.log.borrow_mut().push(tick);
        Ok(())
    }
}

/// The counterfactual intervention: halves the mortality rate pipeline.
struct RateHalver;

impl Component for RateHalver {
    fn name(&self) -> &str {
        "rate_halver"
    }

    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
        builder.value().register_value_modifier(
            "mortality_rate",
            ListenerPriority::default(),
            Vec::new(),
            Box::new(|_, prior| {
                let column = prior
                    .ok_or_else(|| SimulationError::internal("replace combiner passes the prior value"))?
                    .into_single()?;
                let halved: Vec<f64> = column.as_floats()?.iter().map(|rate| rate * 0.5).collect();
                Ok(PipelineValue::Single(AttributeColumn::from_floats(halved)))
            }),
        )
    }
}

fn config() -> Value {
    json!({
        "randomness": {"seed": 13},
        "population": {"population_size": 600},
        "time": {"start": "2025-01-01", "end": "2025-01-21", "step_days": 1.0},
        "mortality": {"rate": 3.0},
    })
}

fn run(with_intervention: bool, log: DrawLog) -> SimulationReport {
    let mut components: Vec<Box<dyn Component>> = vec![
        Box::new(BasePopulation::new()),
        Box::new(ConstantMortality::new()),
        Box::new(DrawRecorder::new(log)),
    ];
    if with_intervention {
        components.push(Box::new(RateHalver));
    }
    SimulationContext::new(config(), components).unwrap().run().unwrap()
}

fn dead_ids(report: &SimulationReport) -> Vec<u64> {
    let alive = report.final_state.column("alive").unwrap().as_bools().unwrap();
    report
        .final_state
        .index()
        .iter()
        .zip(alive)
        .filter(|(_, alive)| !**alive)
        .map(|(id, _)| id.value())
        .collect()
}

#[test]
fn test_counterfactual_runs_share_draws_and_nest_deaths() {
    let baseline_log: DrawLog = Rc::new(RefCell::new(Vec::new()));
    let intervention_log: DrawLog = Rc::new(RefCell::new(Vec::new()));
    let baseline = run(false, Rc::clone(&baseline_log));
    let intervention = run(true, Rc::clone(&intervention_log));

    // Decisions governed by the unrelated stream are identical for every
    // simulant alive in both runs at the same tick.
    let baseline_log = baseline_log.borrow();
    let intervention_log = intervention_log.borrow();
    assert_eq!(baseline_log.len(), intervention_log.len());
    let mut compared = 0usize;
    for (base_tick, intervention_tick) in baseline_log.iter().zip(intervention_log.iter()) {
        for (id, draw) in base_tick {
            if let Some(other) = intervention_tick.get(id) {
                assert_eq!(draw, other, "draw diverged for simulant {id}");
                compared += 1;
            }
        }
    }
    assert!(compared > 0, "no overlapping simulants were compared");

    // Halving the hazard can only remove deaths, never add them.
    let baseline_dead = dead_ids(&baseline);
    let intervention_dead = dead_ids(&intervention);
    assert!(intervention_dead.len() < baseline_dead.len());
    for id in &intervention_dead {
        assert!(baseline_dead.contains(id), "simulant {id} died only under the halved rate");
    }
}
