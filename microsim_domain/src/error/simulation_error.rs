// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the hierarchical error system for the microsim
//! domain. It implements a fail-fast error handling strategy that categorizes
//! failures, provides actionable error messages, and carries enough context
//! for both automated exit-code mapping and human-readable diagnostics.
//!
//! ## Overview
//!
//! The error system is designed around Domain-Driven Design principles:
//!
//! - **Domain-Specific**: Errors are tailored to simulation framework
//!   concepts (lifecycle phases, resources, population schema)
//! - **Hierarchical**: Errors are organized into logical categories for
//!   systematic handling
//! - **Actionable**: Each error names the offending operation, resource, or
//!   component
//! - **Type-Safe**: Rust's type system ensures comprehensive error handling
//!
//! ## Error Architecture
//!
//! ### Error Categories
//!
//! The error system organizes failures into logical categories:
//!
//! #### Lifecycle Errors
//! - **LifecyclePhase**: Operation attempted in a disallowed phase
//!
//! #### Configuration Errors
//! - **ConfigurationMissing**: Reading an unset configuration key
//! - **ConfigurationFrozen**: Writing configuration after setup
//! - **ConfigurationConflict**: Two components declaring the same default
//!   leaf with different values
//! - **ConfigurationType**: Reading a leaf as the wrong scalar type
//!
//! #### Composition Errors
//! - **ComponentContract**: Missing required method, colliding name,
//!   non-unique column owner
//! - **UnresolvedDependency** / **CyclicDependency**: Resource graph
//!   failures discovered at the setup → post-setup transition
//! - **UnsourcedPipeline**: Pipeline called without a registered source
//!
//! #### Data Errors
//! - **PopulationSchema**: Write to an undeclared column, write to an index
//!   outside a view, dtype mismatch
//! - **Stratification**: Mapper returned a value outside the declared
//!   category set
//! - **Randomness**: CRN lookup of an unregistered simulant
//! - **Interpolation**: Lookup table query outside bounds with
//!   extrapolation disabled
//!
//! #### Infrastructure Errors
//! - **Io**: File system failures while reading specs or writing results
//! - **Serialization**: Snapshot or result encoding failures
//! - **Internal**: Unexpected framework failures
//!
//! ## Propagation Policy
//!
//! All errors are fatal to the current run; nothing in the core retries.
//! The driver catches at the top and converts the error category to an exit
//! code. Components may catch their own domain errors internally but must
//! not catch framework errors.

use crate::value_objects::ResourceId;
use thiserror::Error;

/// Domain-specific errors for the simulation framework.
///
/// This enum represents all possible errors that can occur within the
/// framework core. Each variant includes a descriptive message and is
/// designed to provide clear information about what went wrong and where.
///
/// ## Design Principles
///
/// - **Specific**: Each error type represents a specific failure mode
/// - **Actionable**: Error messages provide enough context for debugging
/// - **Categorized**: Errors are grouped by type for exit-code mapping
/// - **Fatal**: Every framework error aborts the current run
#[derive(Error, Debug, Clone)]
pub enum SimulationError {
    #[error("Lifecycle phase violation: {0}")]
    LifecyclePhase(String),

    #[error("Configuration key not set: {0}")]
    ConfigurationMissing(String),

    #[error("Configuration is frozen: {0}")]
    ConfigurationFrozen(String),

    #[error("Conflicting configuration defaults: {0}")]
    ConfigurationConflict(String),

    #[error("Configuration type mismatch: {0}")]
    ConfigurationType(String),

    #[error("Component contract violation: {0}")]
    ComponentContract(String),

    #[error("Unresolved dependency: {resource} required by `{required_by}`")]
    UnresolvedDependency {
        resource: ResourceId,
        required_by: String,
    },

    #[error("Cyclic dependency involving: {path:?}")]
    CyclicDependency { path: Vec<ResourceId> },

    #[error("Pipeline `{0}` was called without a registered source")]
    UnsourcedPipeline(String),

    #[error("Population schema violation: {0}")]
    PopulationSchema(String),

    #[error("Stratification error: {0}")]
    Stratification(String),

    #[error("Randomness error: {0}")]
    Randomness(String),

    #[error("Interpolation error: {0}")]
    Interpolation(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SimulationError {
    /// Creates a new lifecycle phase error
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::LifecyclePhase(msg.into())
    }

    /// Creates a new missing-configuration error
    pub fn config_missing(msg: impl Into<String>) -> Self {
        Self::ConfigurationMissing(msg.into())
    }

    /// Creates a new frozen-configuration error
    pub fn config_frozen(msg: impl Into<String>) -> Self {
        Self::ConfigurationFrozen(msg.into())
    }

    /// Creates a new conflicting-defaults error
    pub fn config_conflict(msg: impl Into<String>) -> Self {
        Self::ConfigurationConflict(msg.into())
    }

    /// Creates a new configuration type-mismatch error
    pub fn config_type(msg: impl Into<String>) -> Self {
        Self::ConfigurationType(msg.into())
    }

    /// Creates a new component contract error
    pub fn component_contract(msg: impl Into<String>) -> Self {
        Self::ComponentContract(msg.into())
    }

    /// Creates a new population schema error
    pub fn population_schema(msg: impl Into<String>) -> Self {
        Self::PopulationSchema(msg.into())
    }

    /// Creates a new stratification error
    pub fn stratification(msg: impl Into<String>) -> Self {
        Self::Stratification(msg.into())
    }

    /// Creates a new randomness error
    pub fn randomness(msg: impl Into<String>) -> Self {
        Self::Randomness(msg.into())
    }

    /// Creates a new interpolation error
    pub fn interpolation(msg: impl Into<String>) -> Self {
        Self::Interpolation(msg.into())
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Checks if the error is a configuration error
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SimulationError::ConfigurationMissing(_)
                | SimulationError::ConfigurationFrozen(_)
                | SimulationError::ConfigurationConflict(_)
                | SimulationError::ConfigurationType(_)
        )
    }

    /// Checks if the error is a resource graph resolution error
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            SimulationError::UnresolvedDependency { .. } | SimulationError::CyclicDependency { .. }
        )
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            SimulationError::LifecyclePhase(_) => "lifecycle",
            SimulationError::ConfigurationMissing(_) => "configuration",
            SimulationError::ConfigurationFrozen(_) => "configuration",
            SimulationError::ConfigurationConflict(_) => "configuration",
            SimulationError::ConfigurationType(_) => "configuration",
            SimulationError::ComponentContract(_) => "component",
            SimulationError::UnresolvedDependency { .. } => "dependency",
            SimulationError::CyclicDependency { .. } => "dependency",
            SimulationError::UnsourcedPipeline(_) => "pipeline",
            SimulationError::PopulationSchema(_) => "population",
            SimulationError::Stratification(_) => "stratification",
            SimulationError::Randomness(_) => "randomness",
            SimulationError::Interpolation(_) => "interpolation",
            SimulationError::Io(_) => "io",
            SimulationError::Serialization(_) => "serialization",
            SimulationError::Internal(_) => "internal",
        }
    }
}

// Implement conversion from standard library errors
impl From<std::io::Error> for SimulationError {
    fn from(err: std::io::Error) -> Self {
        SimulationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SimulationError {
    fn from(err: serde_json::Error) -> Self {
        SimulationError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(SimulationError::lifecycle("x").category(), "lifecycle");
        assert_eq!(SimulationError::config_missing("x").category(), "configuration");
        assert_eq!(SimulationError::config_frozen("x").category(), "configuration");
        assert_eq!(SimulationError::component_contract("x").category(), "component");
        assert_eq!(SimulationError::UnsourcedPipeline("p".into()).category(), "pipeline");
        assert_eq!(SimulationError::population_schema("x").category(), "population");
    }

    #[test]
    fn test_dependency_errors_are_classified() {
        let err = SimulationError::UnresolvedDependency {
            resource: ResourceId::column("age"),
            required_by: "mortality".to_string(),
        };
        assert!(err.is_dependency_error());
        assert_eq!(err.category(), "dependency");

        let err = SimulationError::CyclicDependency {
            path: vec![
                ResourceId::column("a"),
                ResourceId::column("b"),
                ResourceId::column("a"),
            ],
        };
        assert!(err.is_dependency_error());
    }

    #[test]
    fn test_configuration_errors_are_classified() {
        assert!(SimulationError::config_missing("time.start").is_configuration_error());
        assert!(SimulationError::config_frozen("time.start").is_configuration_error());
        assert!(SimulationError::config_conflict("x").is_configuration_error());
        assert!(!SimulationError::lifecycle("x").is_configuration_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing spec");
        let err: SimulationError = io.into();
        assert_eq!(err.category(), "io");
        assert!(err.to_string().contains("missing spec"));
    }
}
