// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Constant Mortality Component
//!
//! The bundled hazard: a constant annual mortality rate exposed as the
//! `mortality_rate` pipeline, decided per simulant through a CRN stream,
//! and observed as a sex-stratified `deaths` count.
//!
//! ## Tick Shape
//!
//! - `time_step_prepare` (early tier): simulants that died last tick are
//!   untracked, after the previous tick's `collect_metrics` counted them
//! - `time_step`: the rate pipeline is called over the living scheduled
//!   simulants; draws below the per-step probability mark deaths
//!   (`alive = false`, `exit_time = event_time`)
//! - `collect_metrics`: the `deaths` adding observation counts dead,
//!   still-tracked simulants per sex stratum
//!
//! The annual-to-step conversion is chosen in configuration
//! (`mortality.conversion`: `exponential` or `linear`) and recorded on
//! the pipeline registration.

use crate::application::builder::Builder;
use crate::application::component::Component;
use crate::infrastructure::lookup::{Extrapolation, LookupSource};
use crate::infrastructure::population::table::TRACKED_COLUMN;
use crate::infrastructure::population::view::{FilterOp, PopulationFilter, PopulationView};
use crate::infrastructure::randomness::RandomnessStream;
use crate::infrastructure::results::StratificationMapper;
use crate::infrastructure::values::{PipelineHandle, PipelineValue};
use microsim_domain::entities::SimulantData;
use microsim_domain::events::SimEvent;
use microsim_domain::services::combiners::{Combiner, PostProcessor, RateConversion};
use microsim_domain::value_objects::{
    AttributeColumn, AttributeKind, AttributeValue, ListenerPriority, ObservationPhase, PhasePriorities,
    PopulationSlice, ResourceId, SimulantId,
};
use microsim_domain::SimulationError;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Kills simulants at a constant annual rate and observes the deaths.
pub struct ConstantMortality {
    stream: RefCell<Option<RandomnessStream>>,
    view: RefCell<Option<PopulationView>>,
    rate: RefCell<Option<PipelineHandle>>,
}

impl ConstantMortality {
    pub fn new() -> Self {
        Self {
            stream: RefCell::new(None),
            view: RefCell::new(None),
            rate: RefCell::new(None),
        }
    }

    fn sentinel_exit_time() -> DateTime<Utc> {
        DateTime::<Utc>::MAX_UTC
    }
}

impl Default for ConstantMortality {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for ConstantMortality {
    fn name(&self) -> &str {
        "constant_mortality"
    }

    fn configuration_defaults(&self) -> Value {
        json!({
            "mortality": {
                "rate": 0.01,
                "conversion": "exponential",
            }
        })
    }

    fn columns_created(&self) -> Vec<String> {
        vec!["exit_time".to_string()]
    }

    fn columns_required(&self) -> Vec<String> {
        vec!["alive".to_string(), "sex".to_string()]
    }

    fn priorities(&self) -> PhasePriorities {
        // Untracking must run before other prepare listeners see the index.
        PhasePriorities {
            time_step_prepare: ListenerPriority::FIRST,
            ..PhasePriorities::default()
        }
    }

    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
        let annual_rate = builder.configuration().get_float("mortality.rate")?;
        let conversion = match builder.configuration().get_str("mortality.conversion")?.as_str() {
            "exponential" => RateConversion::Exponential,
            "linear" => RateConversion::Linear,
            other => {
                return Err(SimulationError::config_type(format!(
                    "mortality.conversion must be `exponential` or `linear`, got `{}`",
                    other
                )));
            }
        };

        let table = builder.lookup().build_table(
            "mortality_rate_table",
            LookupSource::Scalar(AttributeValue::Float(annual_rate)),
            Extrapolation::Clamp,
        )?;
        let handle = builder.value().register_value_producer(
            "mortality_rate",
            0,
            Combiner::Replace,
            PostProcessor::Rescale(conversion),
            Vec::new(),
            Box::new(move |args| Ok(PipelineValue::Single(table.call(args.index)?))),
        )?;
        *self.rate.borrow_mut() = Some(handle);

        *self.stream.borrow_mut() = Some(builder.randomness().get_stream("mortality")?);

        builder
            .population()
            .initializes_simulants(&[("exit_time", AttributeKind::Timestamp)], &[])?;
        *self.view.borrow_mut() = Some(builder.population().get_view(
            &["alive", "exit_time", TRACKED_COLUMN],
            None,
        )?);

        builder.results().register_stratification(
            "sex",
            vec!["F".to_string(), "M".to_string()],
            Vec::new(),
            vec![ResourceId::column("sex")],
            StratificationMapper::ColumnPassthrough("sex".to_string()),
        )?;
        builder.results().register_adding_observation(
            "deaths",
            ObservationPhase::CollectMetrics,
            vec![
                PopulationFilter::new("alive", FilterOp::Eq, AttributeValue::Bool(false)),
                PopulationFilter::new(TRACKED_COLUMN, FilterOp::Eq, AttributeValue::Bool(true)),
            ],
            vec!["alive".to_string()],
            vec!["sex".to_string()],
            Rc::new(|group| Ok(group.len() as f64)),
        )?;
        Ok(())
    }

    fn on_initialize_simulants(
        &self,
        data: &SimulantData,
    ) -> Result<Option<PopulationSlice>, SimulationError> {
        let mut slice = PopulationSlice::new(data.index.clone());
        slice.insert_column(
            "exit_time",
            AttributeColumn::from_timestamps(vec![Self::sentinel_exit_time(); data.len()]),
        )?;
        Ok(Some(slice))
    }

    fn on_time_step_prepare(&self, event: &SimEvent) -> Result<(), SimulationError> {
        let view = self.view.borrow();
        let view = view
            .as_ref()
            .ok_or_else(|| SimulationError::internal("constant_mortality used before setup"))?;
        let current = view.get(
            event.index(),
            Some(&PopulationFilter::new(
                "alive",
                FilterOp::Eq,
                AttributeValue::Bool(false),
            )),
        )?;
        if current.is_empty() {
            return Ok(());
        }
        let mut untrack = PopulationSlice::new(current.index().to_vec());
        untrack.insert_column(
            TRACKED_COLUMN,
            AttributeColumn::from_bools(vec![false; current.len()]),
        )?;
        view.update(&untrack)
    }

    fn on_time_step(&self, event: &SimEvent) -> Result<(), SimulationError> {
        let view = self.view.borrow();
        let view = view
            .as_ref()
            .ok_or_else(|| SimulationError::internal("constant_mortality used before setup"))?;
        let living = view.get(
            event.index(),
            Some(&PopulationFilter::new(
                "alive",
                FilterOp::Eq,
                AttributeValue::Bool(true),
            )),
        )?;
        if living.is_empty() {
            return Ok(());
        }

        let rate = self.rate.borrow();
        let rate = rate
            .as_ref()
            .ok_or_else(|| SimulationError::internal("constant_mortality used before setup"))?;
        let probabilities = rate.call_single(living.index(), &[], event.event_time())?;

        let stream = self.stream.borrow();
        let stream = stream
            .as_ref()
            .ok_or_else(|| SimulationError::internal("constant_mortality used before setup"))?;
        let deaths: Vec<SimulantId> = stream.filter_for_probability(
            living.index(),
            probabilities.as_floats()?,
            &event.event_time().to_rfc3339(),
        )?;
        if deaths.is_empty() {
            return Ok(());
        }

        let mut update = PopulationSlice::new(deaths.clone());
        update.insert_column("alive", AttributeColumn::from_bools(vec![false; deaths.len()]))?;
        update.insert_column(
            "exit_time",
            AttributeColumn::from_timestamps(vec![event.event_time(); deaths.len()]),
        )?;
        view.update(&update)
    }
}
