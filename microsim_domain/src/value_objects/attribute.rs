// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Attribute Value System - Typed Columnar Data
//!
//! This module provides the typed cell, column, and slice types that every
//! tabular exchange in the framework is built from: the state table's
//! columns, population view reads and writes, initializer results, pipeline
//! values, lookup table outputs, and observation inputs.
//!
//! ## Overview
//!
//! The framework stores the population as a column store where each column
//! carries a type tag. Three layers make that safe:
//!
//! - [`AttributeValue`] — one typed cell (integer, floating, boolean,
//!   categorical, or timestamp)
//! - [`AttributeColumn`] — a homogeneous buffer of cells with dtype-checked
//!   mutation; the unit of columnar storage
//! - [`PopulationSlice`] — an ordered simulant index plus named columns of
//!   identical length; the tabular unit handed between subsystems
//!
//! ## Type Safety
//!
//! A column refuses writes of a mismatched kind, surfacing a
//! `PopulationSchema` error instead of silently widening the dtype. Typed
//! accessors (`as_floats`, `as_bools`, ...) refuse reads of the wrong kind
//! at the access site, so a caller that declared a column's type at view
//! construction can rely on it thereafter.
//!
//! ## Usage Examples
//!
//! ```rust
//! use microsim_domain::value_objects::{AttributeColumn, AttributeValue, PopulationSlice, SimulantId};
//!
//! let index: Vec<SimulantId> = (0..3).map(SimulantId::new).collect();
//! let mut slice = PopulationSlice::new(index);
//! slice
//!     .insert_column("age", AttributeColumn::from_floats(vec![12.0, 30.5, 61.2]))
//!     .unwrap();
//! let ages = slice.column("age").unwrap().as_floats().unwrap();
//! assert_eq!(ages[1], 30.5);
//! ```

use crate::error::SimulationError;
use crate::value_objects::SimulantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Type tag for a state table column or pipeline value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    Int,
    Float,
    Bool,
    Category,
    Timestamp,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeKind::Int => "int",
            AttributeKind::Float => "float",
            AttributeKind::Bool => "bool",
            AttributeKind::Category => "category",
            AttributeKind::Timestamp => "timestamp",
        };
        write!(f, "{}", name)
    }
}

/// One typed cell of the state table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Category(String),
    Timestamp(DateTime<Utc>),
}

impl AttributeValue {
    /// Returns the type tag of this cell.
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Int(_) => AttributeKind::Int,
            AttributeValue::Float(_) => AttributeKind::Float,
            AttributeValue::Bool(_) => AttributeKind::Bool,
            AttributeValue::Category(_) => AttributeKind::Category,
            AttributeValue::Timestamp(_) => AttributeKind::Timestamp,
        }
    }

    /// Reads the cell as a float, failing on any other kind.
    pub fn as_float(&self) -> Result<f64, SimulationError> {
        match self {
            AttributeValue::Float(v) => Ok(*v),
            other => Err(dtype_mismatch(AttributeKind::Float, other.kind())),
        }
    }

    /// Reads the cell as an integer, failing on any other kind.
    pub fn as_int(&self) -> Result<i64, SimulationError> {
        match self {
            AttributeValue::Int(v) => Ok(*v),
            other => Err(dtype_mismatch(AttributeKind::Int, other.kind())),
        }
    }

    /// Reads the cell as a boolean, failing on any other kind.
    pub fn as_bool(&self) -> Result<bool, SimulationError> {
        match self {
            AttributeValue::Bool(v) => Ok(*v),
            other => Err(dtype_mismatch(AttributeKind::Bool, other.kind())),
        }
    }

    /// Reads the cell as a category label, failing on any other kind.
    pub fn as_category(&self) -> Result<&str, SimulationError> {
        match self {
            AttributeValue::Category(v) => Ok(v),
            other => Err(dtype_mismatch(AttributeKind::Category, other.kind())),
        }
    }

    /// Reads the cell as a timestamp, failing on any other kind.
    pub fn as_timestamp(&self) -> Result<DateTime<Utc>, SimulationError> {
        match self {
            AttributeValue::Timestamp(v) => Ok(*v),
            other => Err(dtype_mismatch(AttributeKind::Timestamp, other.kind())),
        }
    }

    /// Renders the cell in the canonical form used for CRN key hashing.
    ///
    /// The representation must be stable across runs: floats use the `{:.9e}`
    /// scientific form, timestamps use RFC 3339.
    pub fn canonical_repr(&self) -> String {
        match self {
            AttributeValue::Int(v) => format!("i:{}", v),
            AttributeValue::Float(v) => format!("f:{:.9e}", v),
            AttributeValue::Bool(v) => format!("b:{}", v),
            AttributeValue::Category(v) => format!("c:{}", v),
            AttributeValue::Timestamp(v) => format!("t:{}", v.to_rfc3339()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::Category(v) => write!(f, "{}", v),
            AttributeValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

fn dtype_mismatch(expected: AttributeKind, actual: AttributeKind) -> SimulationError {
    SimulationError::population_schema(format!("dtype mismatch: expected {}, found {}", expected, actual))
}

/// A homogeneous, dtype-checked column buffer.
///
/// The storage is columnar: one vector per kind rather than a vector of
/// boxed cells. Mutation and typed access both validate the kind and
/// surface `PopulationSchema` errors on mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeColumn {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
    Category(Vec<String>),
    Timestamp(Vec<DateTime<Utc>>),
}

impl AttributeColumn {
    /// Creates an empty column of the given kind.
    pub fn empty(kind: AttributeKind) -> Self {
        match kind {
            AttributeKind::Int => AttributeColumn::Int(Vec::new()),
            AttributeKind::Float => AttributeColumn::Float(Vec::new()),
            AttributeKind::Bool => AttributeColumn::Bool(Vec::new()),
            AttributeKind::Category => AttributeColumn::Category(Vec::new()),
            AttributeKind::Timestamp => AttributeColumn::Timestamp(Vec::new()),
        }
    }

    /// Creates a column of `len` copies of `fill`.
    pub fn filled(fill: AttributeValue, len: usize) -> Self {
        match fill {
            AttributeValue::Int(v) => AttributeColumn::Int(vec![v; len]),
            AttributeValue::Float(v) => AttributeColumn::Float(vec![v; len]),
            AttributeValue::Bool(v) => AttributeColumn::Bool(vec![v; len]),
            AttributeValue::Category(v) => AttributeColumn::Category(vec![v; len]),
            AttributeValue::Timestamp(v) => AttributeColumn::Timestamp(vec![v; len]),
        }
    }

    pub fn from_ints(values: Vec<i64>) -> Self {
        AttributeColumn::Int(values)
    }

    pub fn from_floats(values: Vec<f64>) -> Self {
        AttributeColumn::Float(values)
    }

    pub fn from_bools(values: Vec<bool>) -> Self {
        AttributeColumn::Bool(values)
    }

    pub fn from_categories(values: Vec<String>) -> Self {
        AttributeColumn::Category(values)
    }

    pub fn from_timestamps(values: Vec<DateTime<Utc>>) -> Self {
        AttributeColumn::Timestamp(values)
    }

    /// Returns the type tag of this column.
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeColumn::Int(_) => AttributeKind::Int,
            AttributeColumn::Float(_) => AttributeKind::Float,
            AttributeColumn::Bool(_) => AttributeKind::Bool,
            AttributeColumn::Category(_) => AttributeKind::Category,
            AttributeColumn::Timestamp(_) => AttributeKind::Timestamp,
        }
    }

    /// Returns the number of cells.
    pub fn len(&self) -> usize {
        match self {
            AttributeColumn::Int(v) => v.len(),
            AttributeColumn::Float(v) => v.len(),
            AttributeColumn::Bool(v) => v.len(),
            AttributeColumn::Category(v) => v.len(),
            AttributeColumn::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads one cell by position.
    pub fn get(&self, position: usize) -> Option<AttributeValue> {
        match self {
            AttributeColumn::Int(v) => v.get(position).map(|x| AttributeValue::Int(*x)),
            AttributeColumn::Float(v) => v.get(position).map(|x| AttributeValue::Float(*x)),
            AttributeColumn::Bool(v) => v.get(position).map(|x| AttributeValue::Bool(*x)),
            AttributeColumn::Category(v) => v.get(position).map(|x| AttributeValue::Category(x.clone())),
            AttributeColumn::Timestamp(v) => v.get(position).map(|x| AttributeValue::Timestamp(*x)),
        }
    }

    /// Writes one cell by position; the value's kind must match the column's.
    pub fn set(&mut self, position: usize, value: AttributeValue) -> Result<(), SimulationError> {
        let expected = self.kind();
        if value.kind() != expected {
            return Err(dtype_mismatch(expected, value.kind()));
        }
        let len = self.len();
        if position >= len {
            return Err(SimulationError::population_schema(format!(
                "row position {} out of bounds for column of length {}",
                position, len
            )));
        }
        match (self, value) {
            (AttributeColumn::Int(v), AttributeValue::Int(x)) => v[position] = x,
            (AttributeColumn::Float(v), AttributeValue::Float(x)) => v[position] = x,
            (AttributeColumn::Bool(v), AttributeValue::Bool(x)) => v[position] = x,
            (AttributeColumn::Category(v), AttributeValue::Category(x)) => v[position] = x,
            (AttributeColumn::Timestamp(v), AttributeValue::Timestamp(x)) => v[position] = x,
            _ => unreachable!("kind checked above"),
        }
        Ok(())
    }

    /// Appends one cell; the value's kind must match the column's.
    pub fn push(&mut self, value: AttributeValue) -> Result<(), SimulationError> {
        let expected = self.kind();
        if value.kind() != expected {
            return Err(dtype_mismatch(expected, value.kind()));
        }
        match (self, value) {
            (AttributeColumn::Int(v), AttributeValue::Int(x)) => v.push(x),
            (AttributeColumn::Float(v), AttributeValue::Float(x)) => v.push(x),
            (AttributeColumn::Bool(v), AttributeValue::Bool(x)) => v.push(x),
            (AttributeColumn::Category(v), AttributeValue::Category(x)) => v.push(x),
            (AttributeColumn::Timestamp(v), AttributeValue::Timestamp(x)) => v.push(x),
            _ => unreachable!("kind checked above"),
        }
        Ok(())
    }

    /// Extends the column with `count` copies of the kind's placeholder
    /// value. Used by the creation scope before initializers fill real
    /// values; rollback truncates back.
    pub fn grow(&mut self, count: usize, epoch: DateTime<Utc>) {
        match self {
            AttributeColumn::Int(v) => v.extend(std::iter::repeat(0).take(count)),
            AttributeColumn::Float(v) => v.extend(std::iter::repeat(f64::NAN).take(count)),
            AttributeColumn::Bool(v) => v.extend(std::iter::repeat(false).take(count)),
            AttributeColumn::Category(v) => v.extend(std::iter::repeat(String::new()).take(count)),
            AttributeColumn::Timestamp(v) => v.extend(std::iter::repeat(epoch).take(count)),
        }
    }

    /// Truncates the column to `len` cells.
    pub fn truncate(&mut self, len: usize) {
        match self {
            AttributeColumn::Int(v) => v.truncate(len),
            AttributeColumn::Float(v) => v.truncate(len),
            AttributeColumn::Bool(v) => v.truncate(len),
            AttributeColumn::Category(v) => v.truncate(len),
            AttributeColumn::Timestamp(v) => v.truncate(len),
        }
    }

    /// Borrows the buffer as floats, failing on any other kind.
    pub fn as_floats(&self) -> Result<&[f64], SimulationError> {
        match self {
            AttributeColumn::Float(v) => Ok(v),
            other => Err(dtype_mismatch(AttributeKind::Float, other.kind())),
        }
    }

    /// Borrows the buffer as integers, failing on any other kind.
    pub fn as_ints(&self) -> Result<&[i64], SimulationError> {
        match self {
            AttributeColumn::Int(v) => Ok(v),
            other => Err(dtype_mismatch(AttributeKind::Int, other.kind())),
        }
    }

    /// Borrows the buffer as booleans, failing on any other kind.
    pub fn as_bools(&self) -> Result<&[bool], SimulationError> {
        match self {
            AttributeColumn::Bool(v) => Ok(v),
            other => Err(dtype_mismatch(AttributeKind::Bool, other.kind())),
        }
    }

    /// Borrows the buffer as category labels, failing on any other kind.
    pub fn as_categories(&self) -> Result<&[String], SimulationError> {
        match self {
            AttributeColumn::Category(v) => Ok(v),
            other => Err(dtype_mismatch(AttributeKind::Category, other.kind())),
        }
    }

    /// Borrows the buffer as timestamps, failing on any other kind.
    pub fn as_timestamps(&self) -> Result<&[DateTime<Utc>], SimulationError> {
        match self {
            AttributeColumn::Timestamp(v) => Ok(v),
            other => Err(dtype_mismatch(AttributeKind::Timestamp, other.kind())),
        }
    }

    /// Returns the subset of cells at the given positions, in order.
    pub fn take_positions(&self, positions: &[usize]) -> Result<Self, SimulationError> {
        let len = self.len();
        if let Some(bad) = positions.iter().find(|p| **p >= len) {
            return Err(SimulationError::population_schema(format!(
                "row position {} out of bounds for column of length {}",
                bad, len
            )));
        }
        Ok(match self {
            AttributeColumn::Int(v) => AttributeColumn::Int(positions.iter().map(|p| v[*p]).collect()),
            AttributeColumn::Float(v) => AttributeColumn::Float(positions.iter().map(|p| v[*p]).collect()),
            AttributeColumn::Bool(v) => AttributeColumn::Bool(positions.iter().map(|p| v[*p]).collect()),
            AttributeColumn::Category(v) => {
                AttributeColumn::Category(positions.iter().map(|p| v[*p].clone()).collect())
            }
            AttributeColumn::Timestamp(v) => {
                AttributeColumn::Timestamp(positions.iter().map(|p| v[*p]).collect())
            }
        })
    }
}

/// An ordered simulant index plus named columns of identical length.
///
/// This is the tabular unit exchanged between initializers, views,
/// pipelines, lookup tables, and observations. Column iteration order is
/// deterministic (name order).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PopulationSlice {
    index: Vec<SimulantId>,
    columns: BTreeMap<String, AttributeColumn>,
}

impl PopulationSlice {
    /// Creates an empty slice over the given index.
    pub fn new(index: Vec<SimulantId>) -> Self {
        Self {
            index,
            columns: BTreeMap::new(),
        }
    }

    /// Returns the simulant index, in order.
    pub fn index(&self) -> &[SimulantId] {
        &self.index
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the column names, in deterministic (sorted) order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Returns a column by name.
    pub fn column(&self, name: &str) -> Option<&AttributeColumn> {
        self.columns.get(name)
    }

    /// Inserts a column; its length must equal the index length.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        column: AttributeColumn,
    ) -> Result<(), SimulationError> {
        let name = name.into();
        if column.len() != self.index.len() {
            return Err(SimulationError::population_schema(format!(
                "column `{}` has {} rows but the slice index has {}",
                name,
                column.len(),
                self.index.len()
            )));
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Returns the row position of a simulant in this slice, if present.
    pub fn position_of(&self, id: SimulantId) -> Option<usize> {
        self.index.iter().position(|x| *x == id)
    }

    /// Returns a new slice restricted to the rows where `mask` is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self, SimulationError> {
        if mask.len() != self.index.len() {
            return Err(SimulationError::population_schema(format!(
                "filter mask has {} entries but the slice has {} rows",
                mask.len(),
                self.index.len()
            )));
        }
        let positions: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        self.take_positions(&positions)
    }

    /// Returns a new slice containing the given row positions, in order.
    pub fn take_positions(&self, positions: &[usize]) -> Result<Self, SimulationError> {
        let mut out = PopulationSlice::new(positions.iter().map(|p| self.index[*p]).collect());
        for (name, column) in &self.columns {
            out.insert_column(name.clone(), column.take_positions(positions)?)?;
        }
        Ok(out)
    }

    /// Returns one row as a name → cell mapping.
    pub fn row(&self, position: usize) -> Result<BTreeMap<String, AttributeValue>, SimulationError> {
        if position >= self.index.len() {
            return Err(SimulationError::population_schema(format!(
                "row position {} out of bounds for slice of length {}",
                position,
                self.index.len()
            )));
        }
        let mut row = BTreeMap::new();
        for (name, column) in &self.columns {
            if let Some(value) = column.get(position) {
                row.insert(name.clone(), value);
            }
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(n: u64) -> Vec<SimulantId> {
        (0..n).map(SimulantId::new).collect()
    }

    #[test]
    fn test_column_push_rejects_dtype_mismatch() {
        let mut col = AttributeColumn::empty(AttributeKind::Float);
        col.push(AttributeValue::Float(1.0)).unwrap();
        let err = col.push(AttributeValue::Int(1)).unwrap_err();
        assert_eq!(err.category(), "population");
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn test_column_set_rejects_out_of_bounds() {
        let mut col = AttributeColumn::from_bools(vec![true, false]);
        assert!(col.set(1, AttributeValue::Bool(true)).is_ok());
        assert!(col.set(2, AttributeValue::Bool(true)).is_err());
    }

    #[test]
    fn test_column_grow_and_truncate() {
        let epoch = Utc::now();
        let mut col = AttributeColumn::from_ints(vec![5]);
        col.grow(3, epoch);
        assert_eq!(col.len(), 4);
        col.truncate(1);
        assert_eq!(col.as_ints().unwrap(), &[5]);
    }

    #[test]
    fn test_slice_rejects_mismatched_column_length() {
        let mut slice = PopulationSlice::new(index(2));
        let err = slice
            .insert_column("age", AttributeColumn::from_floats(vec![1.0]))
            .unwrap_err();
        assert_eq!(err.category(), "population");
    }

    #[test]
    fn test_slice_filter_rows() {
        let mut slice = PopulationSlice::new(index(3));
        slice
            .insert_column("alive", AttributeColumn::from_bools(vec![true, false, true]))
            .unwrap();
        let filtered = slice.filter_rows(&[true, false, true]).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.index(), &[SimulantId::new(0), SimulantId::new(2)]);
        assert_eq!(filtered.column("alive").unwrap().as_bools().unwrap(), &[true, true]);
    }

    #[test]
    fn test_slice_row_access() {
        let mut slice = PopulationSlice::new(index(2));
        slice
            .insert_column("sex", AttributeColumn::from_categories(vec!["F".into(), "M".into()]))
            .unwrap();
        let row = slice.row(1).unwrap();
        assert_eq!(row["sex"], AttributeValue::Category("M".into()));
        assert!(slice.row(2).is_err());
    }

    #[test]
    fn test_canonical_repr_is_stable() {
        let a = AttributeValue::Float(0.25).canonical_repr();
        let b = AttributeValue::Float(0.25).canonical_repr();
        assert_eq!(a, b);
        assert_ne!(
            AttributeValue::Int(1).canonical_repr(),
            AttributeValue::Float(1.0).canonical_repr()
        );
    }
}
