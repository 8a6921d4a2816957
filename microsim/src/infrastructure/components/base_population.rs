// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Base Population Component
//!
//! Creates the demographic backbone every other bundled component builds
//! on: `entrance_time`, `age`, `sex`, and `alive`.
//!
//! Ages and sexes are drawn from bootstrap randomness streams - the
//! attributes being created here are the CRN key columns, so the streams
//! key on the raw simulant index. Each tick the component ages every
//! scheduled simulant by the event's step.
//!
//! This component doubles as the reference usage of the population and
//! randomness builder namespaces.

use crate::application::builder::Builder;
use crate::application::component::Component;
use crate::infrastructure::population::view::PopulationView;
use crate::infrastructure::randomness::RandomnessStream;
use microsim_domain::entities::SimulantData;
use microsim_domain::events::SimEvent;
use microsim_domain::value_objects::{
    AttributeColumn, AttributeKind, PopulationSlice, ResourceId,
};
use microsim_domain::SimulationError;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};

const DAYS_PER_YEAR: f64 = 365.25;

/// Creates and ages the base demographic columns.
pub struct BasePopulation {
    age_stream: RefCell<Option<RandomnessStream>>,
    sex_stream: RefCell<Option<RandomnessStream>>,
    age_view: RefCell<Option<PopulationView>>,
    age_range: Cell<(f64, f64)>,
}

impl BasePopulation {
    pub fn new() -> Self {
        Self {
            age_stream: RefCell::new(None),
            sex_stream: RefCell::new(None),
            age_view: RefCell::new(None),
            age_range: Cell::new((0.0, 100.0)),
        }
    }
}

impl Default for BasePopulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for BasePopulation {
    fn name(&self) -> &str {
        "base_population"
    }

    fn configuration_defaults(&self) -> Value {
        json!({
            "population": {
                "age_start": 0.0,
                "age_end": 100.0,
            }
        })
    }

    fn columns_created(&self) -> Vec<String> {
        vec![
            "entrance_time".to_string(),
            "age".to_string(),
            "sex".to_string(),
            "alive".to_string(),
        ]
    }

    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError> {
        let age_start = builder.configuration().get_float("population.age_start")?;
        let age_end = builder.configuration().get_float("population.age_end")?;
        if age_end <= age_start {
            return Err(SimulationError::config_type(format!(
                "population.age_end ({}) must exceed population.age_start ({})",
                age_end, age_start
            )));
        }
        self.age_range.set((age_start, age_end));

        *self.age_stream.borrow_mut() =
            Some(builder.randomness().get_initialization_stream("age_bootstrap")?);
        *self.sex_stream.borrow_mut() =
            Some(builder.randomness().get_initialization_stream("sex_bootstrap")?);

        builder.population().initializes_simulants(
            &[
                ("entrance_time", AttributeKind::Timestamp),
                ("age", AttributeKind::Float),
                ("sex", AttributeKind::Category),
                ("alive", AttributeKind::Bool),
            ],
            &[
                ResourceId::stream("age_bootstrap"),
                ResourceId::stream("sex_bootstrap"),
            ],
        )?;

        *self.age_view.borrow_mut() = Some(builder.population().get_view(&["age"], None)?);
        Ok(())
    }

    fn on_initialize_simulants(
        &self,
        data: &SimulantData,
    ) -> Result<Option<PopulationSlice>, SimulationError> {
        let (age_start, age_end) = self.age_range.get();
        let age_stream = self.age_stream.borrow();
        let age_stream = age_stream
            .as_ref()
            .ok_or_else(|| SimulationError::internal("base_population used before setup"))?;
        let sex_stream = self.sex_stream.borrow();
        let sex_stream = sex_stream
            .as_ref()
            .ok_or_else(|| SimulationError::internal("base_population used before setup"))?;

        let age_draws = age_stream.get_draw(&data.index, "age")?;
        let sex_draws = sex_stream.get_draw(&data.index, "sex")?;
        let ages: Vec<f64> = age_draws
            .as_floats()?
            .iter()
            .map(|draw| age_start + draw * (age_end - age_start))
            .collect();
        let sexes: Vec<String> = sex_draws
            .as_floats()?
            .iter()
            .map(|draw| if *draw < 0.5 { "F".to_string() } else { "M".to_string() })
            .collect();

        let mut slice = PopulationSlice::new(data.index.clone());
        slice.insert_column(
            "entrance_time",
            AttributeColumn::from_timestamps(vec![data.creation_time; data.len()]),
        )?;
        slice.insert_column("age", AttributeColumn::from_floats(ages))?;
        slice.insert_column("sex", AttributeColumn::from_categories(sexes))?;
        slice.insert_column("alive", AttributeColumn::from_bools(vec![true; data.len()]))?;
        Ok(Some(slice))
    }

    fn on_time_step(&self, event: &SimEvent) -> Result<(), SimulationError> {
        let view = self.age_view.borrow();
        let view = view
            .as_ref()
            .ok_or_else(|| SimulationError::internal("base_population used before setup"))?;
        let current = view.get(event.index(), None)?;
        if current.is_empty() {
            return Ok(());
        }
        let step_years = event.step_size().days_f64() / DAYS_PER_YEAR;
        let aged: Vec<f64> = current
            .column("age")
            .ok_or_else(|| SimulationError::internal("age column missing from view"))?
            .as_floats()?
            .iter()
            .map(|age| age + step_years)
            .collect();
        let mut update = PopulationSlice::new(current.index().to_vec());
        update.insert_column("age", AttributeColumn::from_floats(aged))?;
        view.update(&update)
    }
}
