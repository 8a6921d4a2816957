// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Population View
//!
//! A scoped read/write window over the state table.
//!
//! ## Overview
//!
//! A view is the only way a component touches the population. It carries:
//!
//! - a declared column subset (reads and writes are confined to it),
//! - an optional row filter evaluated at query time, and
//! - the tracked-row policy (by default untracked rows are invisible).
//!
//! Writes outside the declared columns, and writes whose index is not a
//! subset of the view's current index, fail with `PopulationSchema`
//! errors. Dtype mismatches surface from the table itself.
//!
//! Views are cheap handles; their lifetime equals the simulation context.

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use crate::infrastructure::population::table::StateTable;
use microsim_domain::value_objects::{AttributeValue, PopulationSlice, SimulantId};
use microsim_domain::SimulationError;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// A comparison operator for row filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A query-time row predicate: `column op value`.
#[derive(Debug, Clone)]
pub struct PopulationFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: AttributeValue,
}

impl PopulationFilter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: AttributeValue) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    /// Evaluates the predicate against one cell.
    pub fn matches(&self, cell: &AttributeValue) -> Result<bool, SimulationError> {
        use AttributeValue::*;
        let ordering = match (cell, &self.value) {
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Category(a), Category(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (cell, value) => {
                return Err(SimulationError::population_schema(format!(
                    "filter on `{}` compares {} against {}",
                    self.column,
                    cell.kind(),
                    value.kind()
                )));
            }
        };
        let ordering = match ordering {
            Some(ordering) => ordering,
            // NaN comparisons never match.
            None => return Ok(false),
        };
        Ok(match self.op {
            FilterOp::Eq => ordering.is_eq(),
            FilterOp::Ne => !ordering.is_eq(),
            FilterOp::Lt => ordering.is_lt(),
            FilterOp::Le => ordering.is_le(),
            FilterOp::Gt => ordering.is_gt(),
            FilterOp::Ge => ordering.is_ge(),
        })
    }
}

/// A scoped read/write window over the state table.
#[derive(Clone)]
pub struct PopulationView {
    requester: String,
    columns: Vec<String>,
    filter: Option<PopulationFilter>,
    include_untracked: bool,
    table: Rc<RefCell<StateTable>>,
    lifecycle: Rc<LifecycleHandle>,
}

impl std::fmt::Debug for PopulationView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopulationView")
            .field("requester", &self.requester)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl PopulationView {
    pub(crate) fn new(
        requester: String,
        columns: Vec<String>,
        filter: Option<PopulationFilter>,
        include_untracked: bool,
        table: Rc<RefCell<StateTable>>,
        lifecycle: Rc<LifecycleHandle>,
    ) -> Result<Self, SimulationError> {
        {
            let table = table.borrow();
            for name in &columns {
                if !table.has_column(name) {
                    return Err(SimulationError::population_schema(format!(
                        "view for `{}` names unknown column `{}`",
                        requester, name
                    )));
                }
            }
            if let Some(filter) = &filter {
                if !table.has_column(&filter.column) {
                    return Err(SimulationError::population_schema(format!(
                        "view filter for `{}` names unknown column `{}`",
                        requester, filter.column
                    )));
                }
            }
        }
        Ok(Self {
            requester,
            columns,
            filter,
            include_untracked,
            table,
            lifecycle,
        })
    }

    /// The declared (readable and writable) columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The simulants currently visible through this view: tracked rows
    /// (unless untracked rows were requested) passing the view filter.
    pub fn index(&self) -> Result<Vec<SimulantId>, SimulationError> {
        self.lifecycle.ensure_allowed(Operation::AccessPopulation)?;
        let table = self.table.borrow();
        let candidates = table.active_index(self.include_untracked);
        match &self.filter {
            None => Ok(candidates),
            Some(filter) => {
                let cells = table.read(std::slice::from_ref(&filter.column), &candidates)?;
                let column = cells.column(&filter.column).ok_or_else(|| {
                    SimulationError::internal(format!("filter column `{}` vanished", filter.column))
                })?;
                let mut index = Vec::new();
                for (position, id) in candidates.iter().enumerate() {
                    let cell = column.get(position).ok_or_else(|| {
                        SimulationError::internal("filter column shorter than index".to_string())
                    })?;
                    if filter.matches(&cell)? {
                        index.push(*id);
                    }
                }
                Ok(index)
            }
        }
    }

    /// Reads the declared columns for `index`, optionally narrowed by a
    /// further query-time filter.
    pub fn get(
        &self,
        index: &[SimulantId],
        query: Option<&PopulationFilter>,
    ) -> Result<PopulationSlice, SimulationError> {
        self.lifecycle.ensure_allowed(Operation::AccessPopulation)?;
        let table = self.table.borrow();
        let mut slice = table.read(&self.columns, index)?;
        for filter in [self.filter.as_ref(), query].into_iter().flatten() {
            let cells = table.read(std::slice::from_ref(&filter.column), slice.index())?;
            let column = cells.column(&filter.column).ok_or_else(|| {
                SimulationError::internal(format!("filter column `{}` vanished", filter.column))
            })?;
            let mut mask = Vec::with_capacity(slice.len());
            for position in 0..slice.len() {
                let cell = column.get(position).ok_or_else(|| {
                    SimulationError::internal("filter column shorter than slice".to_string())
                })?;
                mask.push(filter.matches(&cell)?);
            }
            slice = slice.filter_rows(&mask)?;
        }
        Ok(slice)
    }

    /// Writes `slice` to the table.
    ///
    /// Every column of the slice must be declared on the view, and the
    /// slice's index must be a subset of the view's current index.
    pub fn update(&self, slice: &PopulationSlice) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::AccessPopulation)?;
        for name in slice.column_names() {
            if !self.columns.contains(&name) {
                return Err(SimulationError::population_schema(format!(
                    "`{}` wrote column `{}` not declared on its view",
                    self.requester, name
                )));
            }
        }
        let visible: BTreeSet<SimulantId> = self.index()?.into_iter().collect();
        if let Some(outside) = slice.index().iter().find(|id| !visible.contains(id)) {
            return Err(SimulationError::population_schema(format!(
                "`{}` wrote {} outside its view index",
                self.requester, outside
            )));
        }
        self.table.borrow_mut().write_slice(slice)
    }
}
