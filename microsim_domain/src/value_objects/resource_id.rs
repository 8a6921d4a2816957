// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resource Identifier Value Object
//!
//! Tagged identifier for anything whose availability must be ordered
//! relative to another resource: state-table columns, value pipelines, and
//! randomness streams.
//!
//! Each resource has at most one producer. The resource graph keys its
//! producer registry and dependency edges by this type, so the ordering is
//! total and deterministic (`Ord` derives over the tag, then the name).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One node in the resource dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceId {
    /// A state-table column, by name.
    Column(String),
    /// A value pipeline, by name.
    Pipeline(String),
    /// A randomness stream, by name.
    Stream(String),
}

impl ResourceId {
    pub fn column(name: impl Into<String>) -> Self {
        ResourceId::Column(name.into())
    }

    pub fn pipeline(name: impl Into<String>) -> Self {
        ResourceId::Pipeline(name.into())
    }

    pub fn stream(name: impl Into<String>) -> Self {
        ResourceId::Stream(name.into())
    }

    /// Returns the resource name without its tag.
    pub fn name(&self) -> &str {
        match self {
            ResourceId::Column(name) | ResourceId::Pipeline(name) | ResourceId::Stream(name) => name,
        }
    }

    /// Returns the tag as a lowercase label.
    pub fn tag(&self) -> &'static str {
        match self {
            ResourceId::Column(_) => "column",
            ResourceId::Pipeline(_) => "pipeline",
            ResourceId::Stream(_) => "stream",
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tag(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display() {
        assert_eq!(ResourceId::column("age").to_string(), "column(age)");
        assert_eq!(ResourceId::pipeline("mortality_rate").to_string(), "pipeline(mortality_rate)");
        assert_eq!(ResourceId::stream("mortality").to_string(), "stream(mortality)");
    }

    #[test]
    fn test_resource_id_ordering_is_total() {
        let mut ids = vec![
            ResourceId::stream("a"),
            ResourceId::column("b"),
            ResourceId::column("a"),
            ResourceId::pipeline("a"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ResourceId::column("a"),
                ResourceId::column("b"),
                ResourceId::pipeline("a"),
                ResourceId::stream("a"),
            ]
        );
    }
}
