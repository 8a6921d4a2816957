// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # State Table
//!
//! The row-addressable, column-typed store holding the entire simulated
//! population.
//!
//! ## Invariants
//!
//! - Every column has exactly one owning component
//! - The set of columns is frozen after setup
//! - The row index only grows; identifiers are dense and never reused
//! - A column's dtype never widens silently; mismatched writes surface
//! - Row additions happen only inside a simulant-creation scope, which
//!   rolls the allocation back if any initializer fails
//!
//! The framework owns one column itself: `tracked`, the boolean flag for
//! logical presence in the active index. Untracked rows are excluded from
//! the default active index but preserved forever.

use microsim_domain::value_objects::{
    AttributeColumn, AttributeKind, AttributeValue, PopulationSlice, SimulantId,
};
use microsim_domain::SimulationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The framework-owned logical-presence column.
pub const TRACKED_COLUMN: &str = "tracked";

/// The owner recorded for framework columns.
pub const FRAMEWORK_OWNER: &str = "population_manager";

/// Declared metadata for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: AttributeKind,
    pub owner: String,
}

/// The typed column store for the whole population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTable {
    specs: BTreeMap<String, ColumnSpec>,
    columns: BTreeMap<String, AttributeColumn>,
    row_count: u64,
    schema_frozen: bool,
}

impl StateTable {
    pub fn new() -> Self {
        let mut table = Self {
            specs: BTreeMap::new(),
            columns: BTreeMap::new(),
            row_count: 0,
            schema_frozen: false,
        };
        // The framework's own column is registered before any component's.
        table.specs.insert(
            TRACKED_COLUMN.to_string(),
            ColumnSpec {
                name: TRACKED_COLUMN.to_string(),
                kind: AttributeKind::Bool,
                owner: FRAMEWORK_OWNER.to_string(),
            },
        );
        table
            .columns
            .insert(TRACKED_COLUMN.to_string(), AttributeColumn::empty(AttributeKind::Bool));
        table
    }

    /// Declares a column with its owning component.
    ///
    /// Fails once the schema is frozen and when the name is already owned.
    pub fn add_column(
        &mut self,
        owner: &str,
        name: &str,
        kind: AttributeKind,
    ) -> Result<(), SimulationError> {
        if self.schema_frozen {
            return Err(SimulationError::population_schema(format!(
                "column schema is frozen; cannot add `{}`",
                name
            )));
        }
        if let Some(existing) = self.specs.get(name) {
            return Err(SimulationError::component_contract(format!(
                "column `{}` is already owned by `{}`",
                name, existing.owner
            )));
        }
        self.specs.insert(
            name.to_string(),
            ColumnSpec {
                name: name.to_string(),
                kind,
                owner: owner.to_string(),
            },
        );
        self.columns.insert(name.to_string(), AttributeColumn::empty(kind));
        Ok(())
    }

    /// Freezes the column schema. Called at the end of setup.
    pub fn freeze_schema(&mut self) {
        self.schema_frozen = true;
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.specs.get(name)
    }

    /// All declared column names, in deterministic order.
    pub fn column_names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    /// Extends every column with `count` placeholder rows and marks them
    /// tracked. Returns the new identifiers.
    ///
    /// Only the creation scope calls this; failure later in the scope
    /// rolls back through [`StateTable::rollback_to`].
    pub fn allocate_rows(&mut self, count: u64) -> Vec<SimulantId> {
        let epoch = placeholder_epoch();
        for column in self.columns.values_mut() {
            column.grow(count as usize, epoch);
        }
        let first = self.row_count;
        self.row_count += count;
        let ids: Vec<SimulantId> = (first..self.row_count).map(SimulantId::new).collect();
        if let Some(tracked) = self.columns.get_mut(TRACKED_COLUMN) {
            for id in &ids {
                let _ = tracked.set(id.position(), AttributeValue::Bool(true));
            }
        }
        ids
    }

    /// Truncates every column back to `row_count` rows.
    pub fn rollback_to(&mut self, row_count: u64) {
        for column in self.columns.values_mut() {
            column.truncate(row_count as usize);
        }
        self.row_count = row_count;
    }

    /// Writes a slice of cells. Every column must exist, every index must
    /// be in range, and dtypes must match.
    pub fn write_slice(&mut self, slice: &PopulationSlice) -> Result<(), SimulationError> {
        for name in slice.column_names() {
            if !self.specs.contains_key(&name) {
                return Err(SimulationError::population_schema(format!(
                    "write to undeclared column `{}`",
                    name
                )));
            }
        }
        for (position, id) in slice.index().iter().enumerate() {
            if id.value() >= self.row_count {
                return Err(SimulationError::population_schema(format!(
                    "write to {} beyond the row index ({} rows)",
                    id, self.row_count
                )));
            }
            for name in slice.column_names() {
                let value = slice
                    .column(&name)
                    .and_then(|column| column.get(position))
                    .ok_or_else(|| {
                        SimulationError::internal(format!("slice column `{}` missing row {}", name, position))
                    })?;
                let column = self.columns.get_mut(&name).ok_or_else(|| {
                    SimulationError::population_schema(format!("write to undeclared column `{}`", name))
                })?;
                column.set(id.position(), value)?;
            }
        }
        Ok(())
    }

    /// Reads the given columns for the given simulants.
    pub fn read(
        &self,
        columns: &[String],
        index: &[SimulantId],
    ) -> Result<PopulationSlice, SimulationError> {
        let positions: Vec<usize> = index.iter().map(|id| id.position()).collect();
        if let Some(bad) = index.iter().find(|id| id.value() >= self.row_count) {
            return Err(SimulationError::population_schema(format!(
                "read of {} beyond the row index ({} rows)",
                bad, self.row_count
            )));
        }
        let mut slice = PopulationSlice::new(index.to_vec());
        for name in columns {
            let column = self.columns.get(name).ok_or_else(|| {
                SimulationError::population_schema(format!("read of undeclared column `{}`", name))
            })?;
            slice.insert_column(name.clone(), column.take_positions(&positions)?)?;
        }
        Ok(slice)
    }

    /// The identifiers of tracked rows, or of all rows.
    pub fn active_index(&self, include_untracked: bool) -> Vec<SimulantId> {
        let all = (0..self.row_count).map(SimulantId::new);
        if include_untracked {
            return all.collect();
        }
        let tracked = self
            .columns
            .get(TRACKED_COLUMN)
            .and_then(|column| column.as_bools().ok().map(|flags| flags.to_vec()))
            .unwrap_or_default();
        all.filter(|id| tracked.get(id.position()).copied().unwrap_or(false))
            .collect()
    }

    /// Every column over every row, for final-state output and snapshots.
    pub fn full_dump(&self) -> Result<PopulationSlice, SimulationError> {
        let index: Vec<SimulantId> = (0..self.row_count).map(SimulantId::new).collect();
        self.read(&self.column_names(), &index)
    }
}

impl Default for StateTable {
    fn default() -> Self {
        Self::new()
    }
}

fn placeholder_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_columns() -> StateTable {
        let mut table = StateTable::new();
        table.add_column("base", "age", AttributeKind::Float).unwrap();
        table.add_column("base", "alive", AttributeKind::Bool).unwrap();
        table
    }

    #[test]
    fn test_column_ownership_is_unique() {
        let mut table = table_with_columns();
        let err = table.add_column("other", "age", AttributeKind::Float).unwrap_err();
        assert_eq!(err.category(), "component");
        assert!(err.to_string().contains("base"));
    }

    #[test]
    fn test_schema_freeze_blocks_new_columns() {
        let mut table = table_with_columns();
        table.freeze_schema();
        let err = table.add_column("base", "weight", AttributeKind::Float).unwrap_err();
        assert_eq!(err.category(), "population");
    }

    #[test]
    fn test_allocation_grows_monotonically() {
        let mut table = table_with_columns();
        let first = table.allocate_rows(3);
        let second = table.allocate_rows(2);
        assert_eq!(first.last().unwrap().value(), 2);
        assert_eq!(second.first().unwrap().value(), 3);
        assert_eq!(table.row_count(), 5);
    }

    #[test]
    fn test_new_rows_are_tracked() {
        let mut table = table_with_columns();
        table.allocate_rows(2);
        assert_eq!(table.active_index(false).len(), 2);
    }

    #[test]
    fn test_rollback_truncates_all_columns() {
        let mut table = table_with_columns();
        table.allocate_rows(4);
        table.rollback_to(1);
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.active_index(true).len(), 1);
    }

    #[test]
    fn test_write_to_undeclared_column_fails() {
        let mut table = table_with_columns();
        let ids = table.allocate_rows(1);
        let mut slice = PopulationSlice::new(ids);
        slice
            .insert_column("weight", AttributeColumn::from_floats(vec![70.0]))
            .unwrap();
        let err = table.write_slice(&slice).unwrap_err();
        assert!(err.to_string().contains("undeclared column"));
    }

    #[test]
    fn test_write_beyond_row_index_fails() {
        let mut table = table_with_columns();
        table.allocate_rows(1);
        let mut slice = PopulationSlice::new(vec![SimulantId::new(5)]);
        slice
            .insert_column("age", AttributeColumn::from_floats(vec![30.0]))
            .unwrap();
        let err = table.write_slice(&slice).unwrap_err();
        assert!(err.to_string().contains("beyond the row index"));
    }

    #[test]
    fn test_dtype_mismatch_surfaces_on_write() {
        let mut table = table_with_columns();
        let ids = table.allocate_rows(1);
        let mut slice = PopulationSlice::new(ids);
        slice
            .insert_column("age", AttributeColumn::from_ints(vec![30]))
            .unwrap();
        let err = table.write_slice(&slice).unwrap_err();
        assert_eq!(err.category(), "population");
    }

    #[test]
    fn test_roundtrip_read_after_write() {
        let mut table = table_with_columns();
        let ids = table.allocate_rows(2);
        let mut slice = PopulationSlice::new(ids.clone());
        slice
            .insert_column("age", AttributeColumn::from_floats(vec![10.0, 20.0]))
            .unwrap();
        table.write_slice(&slice).unwrap();
        let read = table.read(&["age".to_string()], &ids).unwrap();
        assert_eq!(read.column("age").unwrap().as_floats().unwrap(), &[10.0, 20.0]);
    }

    #[test]
    fn test_untracked_rows_are_preserved_but_inactive() {
        let mut table = table_with_columns();
        let ids = table.allocate_rows(3);
        let mut slice = PopulationSlice::new(vec![ids[1]]);
        slice
            .insert_column(TRACKED_COLUMN, AttributeColumn::from_bools(vec![false]))
            .unwrap();
        table.write_slice(&slice).unwrap();
        assert_eq!(table.active_index(false), vec![ids[0], ids[2]]);
        assert_eq!(table.active_index(true).len(), 3);
    }
}
