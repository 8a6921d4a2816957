// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Results Manager
//!
//! Stratifications and observations: how measurements leave a simulation.
//!
//! ## Overview
//!
//! A **stratification** is a named categorical partition of the
//! population: source columns and pipelines, an exhaustive category list,
//! optional excluded categories, and a mapper (a pass-through column, a
//! vectorized function of the source slice, or a per-row function). A
//! mapper output outside the declared category set fails the simulation -
//! no coercion.
//!
//! An **observation** is a measurement gathered at a declared sub-phase:
//! a population filter, required columns, a gatherer, an updater folding
//! gathered chunks into the accumulator, a formatter producing the final
//! table, and an optional stratification tuple. Two convenience shapes
//! cover most uses:
//!
//! - *Adding* - stratified numeric aggregation; accumulator = previous +
//!   gathered
//! - *Concatenating* - unstratified row append
//!
//! ## Gather Step
//!
//! At each configured sub-phase event, every matching observation filters
//! the scheduled population, applies its stratifications (dropping rows in
//! excluded categories), calls the gatherer per stratum, and folds the
//! result into its accumulator. On `SimulationEnd → Report` formatters
//! run and results are emitted as a mapping from observation name to
//! table.

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use crate::infrastructure::population::manager::PopulationManager;
use crate::infrastructure::population::view::PopulationFilter;
use crate::infrastructure::values::ValueManager;
use microsim_domain::events::SimEvent;
use microsim_domain::value_objects::{
    AttributeValue, ObservationPhase, PopulationSlice, ResourceId, SimulantId,
};
use microsim_domain::SimulationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

/// Separators for composite stratum keys.
const STRATUM_PAIR_SEPARATOR: char = '|';
const STRATUM_KEY_SEPARATOR: char = '=';

/// A vectorized stratification mapper: source slice in, one label per row
/// out.
pub type VectorizedMapperFn = Rc<dyn Fn(&PopulationSlice) -> Result<Vec<String>, SimulationError>>;

/// A per-row stratification mapper.
pub type RowMapperFn =
    Rc<dyn Fn(&BTreeMap<String, AttributeValue>) -> Result<String, SimulationError>>;

/// How a stratification turns source values into category labels.
#[derive(Clone)]
pub enum StratificationMapper {
    /// Pass one category source column straight through.
    ColumnPassthrough(String),
    /// One call over the whole source slice.
    Vectorized(VectorizedMapperFn),
    /// One call per row.
    PerRow(RowMapperFn),
}

/// A named categorical partition of the population.
#[derive(Clone)]
pub struct Stratification {
    pub name: String,
    pub categories: Vec<String>,
    pub excluded_categories: Vec<String>,
    pub sources: Vec<ResourceId>,
    pub mapper: StratificationMapper,
}

impl Stratification {
    /// The categories observations actually see: declared minus excluded.
    pub fn active_categories(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter(|category| !self.excluded_categories.contains(category))
            .cloned()
            .collect()
    }
}

/// Gathers one chunk from a (possibly stratum-restricted) population
/// slice.
pub type GathererFn = Rc<dyn Fn(&PopulationSlice) -> Result<Value, SimulationError>>;

/// Folds a gathered chunk into the accumulator.
pub type UpdaterFn = Rc<dyn Fn(&Value, &Value) -> Result<Value, SimulationError>>;

/// Renders the final accumulator as a results table.
pub type FormatterFn = Rc<dyn Fn(&Value) -> Result<ResultsTable, SimulationError>>;

/// One registered observation.
#[derive(Clone)]
pub struct Observation {
    pub name: String,
    pub when: ObservationPhase,
    pub pop_filter: Vec<PopulationFilter>,
    pub requires: Vec<String>,
    pub stratifications: Vec<String>,
    pub gatherer: GathererFn,
    pub updater: UpdaterFn,
    pub formatter: FormatterFn,
}

/// A tabular result: named columns over value rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// The stratification and observation registry plus accumulators.
pub struct ResultsManager {
    stratifications: RefCell<BTreeMap<String, Stratification>>,
    observations: RefCell<Vec<Observation>>,
    accumulators: RefCell<BTreeMap<String, Value>>,
    population: Rc<PopulationManager>,
    values: Rc<ValueManager>,
    lifecycle: Rc<LifecycleHandle>,
}

impl ResultsManager {
    pub fn new(
        population: Rc<PopulationManager>,
        values: Rc<ValueManager>,
        lifecycle: Rc<LifecycleHandle>,
    ) -> Self {
        Self {
            stratifications: RefCell::new(BTreeMap::new()),
            observations: RefCell::new(Vec::new()),
            accumulators: RefCell::new(BTreeMap::new()),
            population,
            values,
            lifecycle,
        }
    }

    /// Registers a stratification. Setup only.
    pub fn register_stratification(&self, stratification: Stratification) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        if let Some(outsider) = stratification
            .excluded_categories
            .iter()
            .find(|excluded| !stratification.categories.contains(excluded))
        {
            return Err(SimulationError::stratification(format!(
                "`{}` excludes `{}` which is not a declared category",
                stratification.name, outsider
            )));
        }
        let mut registry = self.stratifications.borrow_mut();
        if registry.contains_key(&stratification.name) {
            return Err(SimulationError::stratification(format!(
                "stratification `{}` is already registered",
                stratification.name
            )));
        }
        registry.insert(stratification.name.clone(), stratification);
        Ok(())
    }

    /// The declared-minus-excluded categories of a stratification.
    pub fn categories_of(&self, name: &str) -> Result<Vec<String>, SimulationError> {
        self.stratifications
            .borrow()
            .get(name)
            .map(Stratification::active_categories)
            .ok_or_else(|| SimulationError::stratification(format!("unknown stratification `{}`", name)))
    }

    /// Registers a fully general observation. Setup only.
    pub fn register_observation(&self, observation: Observation) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        let mut observations = self.observations.borrow_mut();
        if observations.iter().any(|existing| existing.name == observation.name) {
            return Err(SimulationError::stratification(format!(
                "observation `{}` is already registered",
                observation.name
            )));
        }
        observations.push(observation);
        Ok(())
    }

    /// Registers a stratified numeric aggregation: accumulator = previous
    /// + gathered, one row per stratum in the output.
    pub fn register_adding_observation(
        &self,
        name: &str,
        when: ObservationPhase,
        pop_filter: Vec<PopulationFilter>,
        requires: Vec<String>,
        stratifications: Vec<String>,
        gatherer: Rc<dyn Fn(&PopulationSlice) -> Result<f64, SimulationError>>,
    ) -> Result<(), SimulationError> {
        let stratification_names = stratifications.clone();
        let wrapped: GathererFn = Rc::new(move |slice| Ok(Value::from(gatherer(slice)?)));
        let updater: UpdaterFn = Rc::new(|accumulator, chunk| merge_adding(accumulator, chunk));
        let formatter: FormatterFn =
            Rc::new(move |accumulator| format_adding(&stratification_names, accumulator));
        self.register_observation(Observation {
            name: name.to_string(),
            when,
            pop_filter,
            requires,
            stratifications,
            gatherer: wrapped,
            updater,
            formatter,
        })
    }

    /// Registers an unstratified row-appending observation.
    pub fn register_concatenating_observation(
        &self,
        name: &str,
        when: ObservationPhase,
        pop_filter: Vec<PopulationFilter>,
        requires: Vec<String>,
        gatherer: GathererFn,
    ) -> Result<(), SimulationError> {
        let updater: UpdaterFn = Rc::new(|accumulator, chunk| {
            let mut rows = match accumulator {
                Value::Array(rows) => rows.clone(),
                Value::Null => Vec::new(),
                other => {
                    return Err(SimulationError::internal(format!(
                        "concatenating accumulator corrupted: {}",
                        other
                    )));
                }
            };
            match chunk {
                Value::Array(new_rows) => rows.extend(new_rows.iter().cloned()),
                other => rows.push(other.clone()),
            }
            Ok(Value::Array(rows))
        });
        let formatter: FormatterFn = Rc::new(format_concatenated);
        self.register_observation(Observation {
            name: name.to_string(),
            when,
            pop_filter,
            requires,
            stratifications: Vec::new(),
            gatherer,
            updater,
            formatter,
        })
    }

    /// Checks every observation references registered stratifications.
    /// Called at the setup → post-setup transition.
    pub fn finalize(&self) -> Result<(), SimulationError> {
        let stratifications = self.stratifications.borrow();
        for observation in self.observations.borrow().iter() {
            for name in &observation.stratifications {
                if !stratifications.contains_key(name) {
                    return Err(SimulationError::stratification(format!(
                        "observation `{}` references unknown stratification `{}`",
                        observation.name, name
                    )));
                }
            }
        }
        debug!(
            observations = self.observations.borrow().len(),
            stratifications = stratifications.len(),
            "results registry finalized"
        );
        Ok(())
    }

    /// Gathers every observation whose `when` matches the event's
    /// sub-phase. Engine-internal.
    pub(crate) fn on_event(&self, event: &SimEvent) -> Result<(), SimulationError> {
        let phase = match ObservationPhase::from_channel(event.channel()) {
            Some(phase) => phase,
            None => return Ok(()),
        };
        let observations = self.observations.borrow().clone();
        for observation in observations {
            if observation.when == phase {
                self.gather(&observation, event)?;
            }
        }
        Ok(())
    }

    fn gather(&self, observation: &Observation, event: &SimEvent) -> Result<(), SimulationError> {
        let index = self.filtered_index(observation, event.index())?;
        let base = self.read_columns(&observation.requires, &index)?;

        let chunk = if observation.stratifications.is_empty() {
            (observation.gatherer)(&base)?
        } else {
            let groups = self.group_by_strata(observation, &base, event)?;
            let mut chunk = serde_json::Map::new();
            for (key, positions) in groups {
                let group = base.take_positions(&positions)?;
                chunk.insert(key, (observation.gatherer)(&group)?);
            }
            Value::Object(chunk)
        };

        let mut accumulators = self.accumulators.borrow_mut();
        let previous = accumulators.get(&observation.name).cloned().unwrap_or(Value::Null);
        let updated = (observation.updater)(&previous, &chunk)?;
        accumulators.insert(observation.name.clone(), updated);
        Ok(())
    }

    fn filtered_index(
        &self,
        observation: &Observation,
        scheduled: &[SimulantId],
    ) -> Result<Vec<SimulantId>, SimulationError> {
        if observation.pop_filter.is_empty() {
            return Ok(scheduled.to_vec());
        }
        let filter_columns: Vec<String> = observation
            .pop_filter
            .iter()
            .map(|filter| filter.column.clone())
            .collect();
        let cells = self.read_columns(&filter_columns, scheduled)?;
        let mut index = Vec::new();
        for (position, id) in scheduled.iter().enumerate() {
            let mut keep = true;
            for filter in &observation.pop_filter {
                let cell = cells
                    .column(&filter.column)
                    .and_then(|column| column.get(position))
                    .ok_or_else(|| {
                        SimulationError::internal(format!("filter column `{}` missing", filter.column))
                    })?;
                if !filter.matches(&cell)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                index.push(*id);
            }
        }
        Ok(index)
    }

    /// Maps every row to its composite stratum key, dropping rows in
    /// excluded categories. Returns key → row positions.
    fn group_by_strata(
        &self,
        observation: &Observation,
        base: &PopulationSlice,
        event: &SimEvent,
    ) -> Result<BTreeMap<String, Vec<usize>>, SimulationError> {
        let stratifications = self.stratifications.borrow();
        let mut labels_per_stratification: Vec<(String, Vec<String>, Vec<String>)> = Vec::new();
        for name in &observation.stratifications {
            let stratification = stratifications.get(name).ok_or_else(|| {
                SimulationError::stratification(format!("unknown stratification `{}`", name))
            })?;
            let labels = self.map_stratification(stratification, base.index(), event)?;
            for label in &labels {
                if !stratification.categories.contains(label) {
                    return Err(SimulationError::stratification(format!(
                        "`{}` mapped a row to `{}`, outside its declared categories",
                        stratification.name, label
                    )));
                }
            }
            labels_per_stratification.push((
                name.clone(),
                labels,
                stratification.excluded_categories.clone(),
            ));
        }

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        'rows: for position in 0..base.len() {
            let mut parts = Vec::with_capacity(labels_per_stratification.len());
            for (name, labels, excluded) in &labels_per_stratification {
                let label = &labels[position];
                if excluded.contains(label) {
                    continue 'rows;
                }
                parts.push(format!("{}{}{}", name, STRATUM_KEY_SEPARATOR, label));
            }
            groups
                .entry(parts.join(&STRATUM_PAIR_SEPARATOR.to_string()))
                .or_default()
                .push(position);
        }
        Ok(groups)
    }

    fn map_stratification(
        &self,
        stratification: &Stratification,
        index: &[SimulantId],
        event: &SimEvent,
    ) -> Result<Vec<String>, SimulationError> {
        let source_slice = self.read_sources(&stratification.sources, index, event)?;
        match &stratification.mapper {
            StratificationMapper::ColumnPassthrough(column) => {
                let labels = source_slice
                    .column(column)
                    .ok_or_else(|| {
                        SimulationError::stratification(format!(
                            "`{}` passes through missing column `{}`",
                            stratification.name, column
                        ))
                    })?
                    .as_categories()?;
                Ok(labels.to_vec())
            }
            StratificationMapper::Vectorized(mapper) => {
                let labels = mapper(&source_slice)?;
                if labels.len() != index.len() {
                    return Err(SimulationError::stratification(format!(
                        "`{}` mapped {} labels for {} rows",
                        stratification.name,
                        labels.len(),
                        index.len()
                    )));
                }
                Ok(labels)
            }
            StratificationMapper::PerRow(mapper) => {
                let mut labels = Vec::with_capacity(index.len());
                for position in 0..index.len() {
                    labels.push(mapper(&source_slice.row(position)?)?);
                }
                Ok(labels)
            }
        }
    }

    /// Reads stratification sources: columns from the table, pipelines by
    /// calling them over the index.
    fn read_sources(
        &self,
        sources: &[ResourceId],
        index: &[SimulantId],
        event: &SimEvent,
    ) -> Result<PopulationSlice, SimulationError> {
        let mut slice = PopulationSlice::new(index.to_vec());
        for source in sources {
            match source {
                ResourceId::Column(name) => {
                    let column_slice = self.read_columns(std::slice::from_ref(name), index)?;
                    if let Some(column) = column_slice.column(name) {
                        slice.insert_column(name.clone(), column.clone())?;
                    }
                }
                ResourceId::Pipeline(name) => {
                    let value = self
                        .values
                        .handle(name)
                        .call_single(index, &[], event.event_time())?;
                    slice.insert_column(name.clone(), value)?;
                }
                ResourceId::Stream(name) => {
                    return Err(SimulationError::stratification(format!(
                        "stream `{}` cannot source a stratification",
                        name
                    )));
                }
            }
        }
        Ok(slice)
    }

    fn read_columns(
        &self,
        columns: &[String],
        index: &[SimulantId],
    ) -> Result<PopulationSlice, SimulationError> {
        self.population.table().borrow().read(columns, index)
    }

    /// Runs every formatter. Called at Report.
    pub fn report(&self) -> Result<BTreeMap<String, ResultsTable>, SimulationError> {
        let accumulators = self.accumulators.borrow();
        let mut report = BTreeMap::new();
        for observation in self.observations.borrow().iter() {
            let accumulator = accumulators.get(&observation.name).cloned().unwrap_or(Value::Null);
            report.insert(observation.name.clone(), (observation.formatter)(&accumulator)?);
        }
        Ok(report)
    }

    /// Accumulator contents, for snapshots.
    pub fn accumulator_state(&self) -> BTreeMap<String, Value> {
        self.accumulators.borrow().clone()
    }

    /// Restores accumulators from a snapshot.
    pub fn restore_accumulator_state(&self, accumulators: BTreeMap<String, Value>) {
        *self.accumulators.borrow_mut() = accumulators;
    }
}

fn merge_adding(accumulator: &Value, chunk: &Value) -> Result<Value, SimulationError> {
    match (accumulator, chunk) {
        (Value::Null, chunk) => Ok(chunk.clone()),
        (Value::Number(previous), Value::Number(new)) => {
            let sum = previous.as_f64().unwrap_or(0.0) + new.as_f64().unwrap_or(0.0);
            Ok(Value::from(sum))
        }
        (Value::Object(previous), Value::Object(new)) => {
            let mut merged = previous.clone();
            for (key, value) in new {
                let updated = match merged.get(key) {
                    Some(existing) => {
                        Value::from(existing.as_f64().unwrap_or(0.0) + value.as_f64().unwrap_or(0.0))
                    }
                    None => value.clone(),
                };
                merged.insert(key.clone(), updated);
            }
            Ok(Value::Object(merged))
        }
        (previous, new) => Err(SimulationError::internal(format!(
            "adding accumulator cannot combine {} with {}",
            previous, new
        ))),
    }
}

fn format_adding(stratifications: &[String], accumulator: &Value) -> Result<ResultsTable, SimulationError> {
    let mut columns: Vec<String> = stratifications.to_vec();
    columns.push("value".to_string());
    let mut rows = Vec::new();
    match accumulator {
        Value::Null => {}
        Value::Number(total) => rows.push(vec![Value::Number(total.clone())]),
        Value::Object(map) => {
            for (key, value) in map {
                let mut row = Vec::with_capacity(columns.len());
                let mut labels: BTreeMap<&str, &str> = BTreeMap::new();
                for pair in key.split(STRATUM_PAIR_SEPARATOR) {
                    if let Some((name, label)) = pair.split_once(STRATUM_KEY_SEPARATOR) {
                        labels.insert(name, label);
                    }
                }
                for name in stratifications {
                    row.push(Value::from(*labels.get(name.as_str()).unwrap_or(&"")));
                }
                row.push(value.clone());
                rows.push(row);
            }
        }
        other => {
            return Err(SimulationError::internal(format!(
                "adding accumulator corrupted: {}",
                other
            )));
        }
    }
    Ok(ResultsTable { columns, rows })
}

fn format_concatenated(accumulator: &Value) -> Result<ResultsTable, SimulationError> {
    let rows_in = match accumulator {
        Value::Null => Vec::new(),
        Value::Array(rows) => rows.clone(),
        other => {
            return Err(SimulationError::internal(format!(
                "concatenating accumulator corrupted: {}",
                other
            )));
        }
    };
    let mut columns: Vec<String> = Vec::new();
    for row in &rows_in {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }
    columns.sort();
    let mut rows = Vec::with_capacity(rows_in.len());
    for row in &rows_in {
        match row {
            Value::Object(map) => {
                rows.push(
                    columns
                        .iter()
                        .map(|column| map.get(column).cloned().unwrap_or(Value::Null))
                        .collect(),
                );
            }
            other => rows.push(vec![other.clone()]),
        }
    }
    if columns.is_empty() && !rows.is_empty() {
        columns.push("value".to_string());
    }
    Ok(ResultsTable { columns, rows })
}
