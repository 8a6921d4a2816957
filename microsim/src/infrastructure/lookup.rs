// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Lookup Tables
//!
//! Population-indexed data: a lookup table maps a simulant index to a
//! value by reading the simulants' bound columns and interpolating over
//! the table's rows.
//!
//! ## Construction Forms
//!
//! 1. **Scalar** - a constant for everyone
//! 2. **Categorical** - rows keyed by equality on category columns
//! 3. **Binned** - rows with `[start, end)` half-open parameter intervals,
//!    optionally combined with categorical keys
//! 4. **Callable** - arbitrary function of the bound columns
//!
//! Interpolation is order-0: a parameter value selects the bin whose
//! half-open interval contains it. The extrapolation policy decides what
//! happens outside every bin: clamp to the nearest edge, or fail with an
//! `Interpolation` error.

use crate::infrastructure::population::view::PopulationView;
use microsim_domain::value_objects::{AttributeColumn, AttributeValue, PopulationSlice, SimulantId};
use microsim_domain::SimulationError;
use std::rc::Rc;

/// What to do when a parameter value falls outside every bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extrapolation {
    /// Use the row whose interval is nearest.
    Clamp,
    /// Fail the query.
    #[default]
    Fail,
}

/// One row of a binned table: equality keys, `[start, end)` intervals per
/// bin column, and the row's value.
#[derive(Debug, Clone)]
pub struct BinnedRow {
    pub keys: Vec<AttributeValue>,
    pub bins: Vec<(f64, f64)>,
    pub value: AttributeValue,
}

/// An arbitrary-callable lookup body.
pub type LookupFn = Rc<dyn Fn(&PopulationSlice) -> Result<AttributeColumn, SimulationError>>;

/// The data behind a lookup table.
pub enum LookupSource {
    Scalar(AttributeValue),
    Categorical {
        key_columns: Vec<String>,
        rows: Vec<(Vec<AttributeValue>, AttributeValue)>,
    },
    Binned {
        key_columns: Vec<String>,
        bin_columns: Vec<String>,
        rows: Vec<BinnedRow>,
    },
    Callable {
        columns: Vec<String>,
        body: LookupFn,
    },
}

impl LookupSource {
    /// The population columns the table binds.
    pub fn bound_columns(&self) -> Vec<String> {
        match self {
            LookupSource::Scalar(_) => Vec::new(),
            LookupSource::Categorical { key_columns, .. } => key_columns.clone(),
            LookupSource::Binned {
                key_columns,
                bin_columns,
                ..
            } => key_columns.iter().chain(bin_columns).cloned().collect(),
            LookupSource::Callable { columns, .. } => columns.clone(),
        }
    }
}

/// A population-indexed lookup table.
pub struct LookupTable {
    name: String,
    source: LookupSource,
    extrapolation: Extrapolation,
    view: PopulationView,
}

impl LookupTable {
    pub(crate) fn new(
        name: String,
        source: LookupSource,
        extrapolation: Extrapolation,
        view: PopulationView,
    ) -> Self {
        Self {
            name,
            source,
            extrapolation,
            view,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up one value per simulant in `index`.
    pub fn call(&self, index: &[SimulantId]) -> Result<AttributeColumn, SimulationError> {
        match &self.source {
            LookupSource::Scalar(value) => Ok(AttributeColumn::filled(value.clone(), index.len())),
            LookupSource::Callable { .. } | LookupSource::Categorical { .. } | LookupSource::Binned { .. } => {
                let bound = self.view.get(index, None)?;
                if bound.len() != index.len() {
                    return Err(SimulationError::interpolation(format!(
                        "lookup `{}` queried for simulants outside its view",
                        self.name
                    )));
                }
                match &self.source {
                    LookupSource::Callable { body, .. } => body(&bound),
                    LookupSource::Categorical { key_columns, rows } => {
                        self.lookup_categorical(&bound, key_columns, rows)
                    }
                    LookupSource::Binned {
                        key_columns,
                        bin_columns,
                        rows,
                    } => self.lookup_binned(&bound, key_columns, bin_columns, rows),
                    LookupSource::Scalar(_) => unreachable!("scalar handled above"),
                }
            }
        }
    }

    fn lookup_categorical(
        &self,
        bound: &PopulationSlice,
        key_columns: &[String],
        rows: &[(Vec<AttributeValue>, AttributeValue)],
    ) -> Result<AttributeColumn, SimulationError> {
        let mut out = Vec::with_capacity(bound.len());
        for position in 0..bound.len() {
            let keys = Self::row_keys(bound, key_columns, position)?;
            let matched = rows.iter().find(|(row_keys, _)| *row_keys == keys);
            match matched {
                Some((_, value)) => out.push(value.clone()),
                None => {
                    return Err(SimulationError::interpolation(format!(
                        "lookup `{}` has no row for keys {:?}",
                        self.name, keys
                    )));
                }
            }
        }
        Self::collect(out)
    }

    fn lookup_binned(
        &self,
        bound: &PopulationSlice,
        key_columns: &[String],
        bin_columns: &[String],
        rows: &[BinnedRow],
    ) -> Result<AttributeColumn, SimulationError> {
        let mut out = Vec::with_capacity(bound.len());
        for position in 0..bound.len() {
            let keys = Self::row_keys(bound, key_columns, position)?;
            let mut parameters = Vec::with_capacity(bin_columns.len());
            for column in bin_columns {
                let cell = bound
                    .column(column)
                    .and_then(|c| c.get(position))
                    .ok_or_else(|| {
                        SimulationError::interpolation(format!(
                            "lookup `{}` missing bound column `{}`",
                            self.name, column
                        ))
                    })?;
                parameters.push(Self::parameter_value(&cell)?);
            }

            let key_rows: Vec<&BinnedRow> = rows.iter().filter(|row| row.keys == keys).collect();
            if key_rows.is_empty() {
                return Err(SimulationError::interpolation(format!(
                    "lookup `{}` has no rows for keys {:?}",
                    self.name, keys
                )));
            }
            // Order-0 interpolation: the bin whose half-open interval
            // contains every parameter.
            let contained = key_rows.iter().find(|row| {
                row.bins
                    .iter()
                    .zip(&parameters)
                    .all(|((start, end), value)| value >= start && value < end)
            });
            match contained {
                Some(row) => out.push(row.value.clone()),
                None => match self.extrapolation {
                    Extrapolation::Fail => {
                        return Err(SimulationError::interpolation(format!(
                            "lookup `{}` has no bin containing {:?} and extrapolation is disabled",
                            self.name, parameters
                        )));
                    }
                    Extrapolation::Clamp => {
                        let nearest = key_rows
                            .iter()
                            .min_by(|a, b| {
                                let da = Self::distance(&a.bins, &parameters);
                                let db = Self::distance(&b.bins, &parameters);
                                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                            })
                            .ok_or_else(|| {
                                SimulationError::interpolation(format!(
                                    "lookup `{}` has no rows to clamp to",
                                    self.name
                                ))
                            })?;
                        out.push(nearest.value.clone());
                    }
                },
            }
        }
        Self::collect(out)
    }

    fn row_keys(
        bound: &PopulationSlice,
        key_columns: &[String],
        position: usize,
    ) -> Result<Vec<AttributeValue>, SimulationError> {
        key_columns
            .iter()
            .map(|column| {
                bound.column(column).and_then(|c| c.get(position)).ok_or_else(|| {
                    SimulationError::interpolation(format!("missing bound key column `{}`", column))
                })
            })
            .collect()
    }

    fn parameter_value(cell: &AttributeValue) -> Result<f64, SimulationError> {
        match cell {
            AttributeValue::Float(v) => Ok(*v),
            AttributeValue::Int(v) => Ok(*v as f64),
            AttributeValue::Timestamp(v) => Ok(v.timestamp_millis() as f64),
            other => Err(SimulationError::interpolation(format!(
                "{} columns cannot parameterize a binned lookup",
                other.kind()
            ))),
        }
    }

    fn distance(bins: &[(f64, f64)], parameters: &[f64]) -> f64 {
        bins.iter()
            .zip(parameters)
            .map(|((start, end), value)| {
                if value < start {
                    start - value
                } else if value >= end {
                    value - end
                } else {
                    0.0
                }
            })
            .sum()
    }

    fn collect(values: Vec<AttributeValue>) -> Result<AttributeColumn, SimulationError> {
        let mut iter = values.into_iter();
        let first = iter.next().ok_or_else(|| {
            SimulationError::interpolation("lookup over an empty index".to_string())
        })?;
        let mut column = AttributeColumn::empty(first.kind());
        column.push(first)?;
        for value in iter {
            column.push(value)?;
        }
        Ok(column)
    }
}
