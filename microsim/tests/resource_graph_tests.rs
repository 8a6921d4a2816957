// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resource Graph Integration Tests
//!
//! Dependency resolution failures as whole simulations hit them.

mod common;

use common::{daily_config, ColumnComponent};
use microsim::application::component::Component;
use microsim::application::context::SimulationContext;
use microsim_bootstrap::ExitCode;
use microsim_domain::value_objects::ResourceId;
use microsim_domain::SimulationError;

/// Column A depends on column B and vice versa: the cycle is reported at
/// the setup → post-setup transition with its path, and the error maps
/// to exit code 3.
#[test]
fn test_initializer_cycle_is_reported_with_path() {
    let components: Vec<Box<dyn Component>> = vec![
        Box::new(ColumnComponent::new("a_component", "a", 1.0, vec![ResourceId::column("b")])),
        Box::new(ColumnComponent::new("b_component", "b", 2.0, vec![ResourceId::column("a")])),
    ];
    let context = SimulationContext::new(daily_config(1, 10, 0), components).unwrap();
    let err = context.setup().unwrap_err();
    match &err {
        SimulationError::CyclicDependency { path } => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&ResourceId::column("a")));
            assert!(path.contains(&ResourceId::column("b")));
        }
        other => panic!("expected CyclicDependency, got {other:?}"),
    }
    assert_eq!(ExitCode::from_category(err.category()), ExitCode::DependencyResolution);
}

/// A dependency nobody produces fails setup and maps to exit code 3.
#[test]
fn test_unresolved_dependency_fails_setup() {
    let components: Vec<Box<dyn Component>> = vec![Box::new(ColumnComponent::new(
        "dependent",
        "derived",
        0.0,
        vec![ResourceId::pipeline("never_registered")],
    ))];
    let context = SimulationContext::new(daily_config(1, 10, 0), components).unwrap();
    let err = context.setup().unwrap_err();
    match &err {
        SimulationError::UnresolvedDependency { resource, required_by } => {
            assert_eq!(*resource, ResourceId::pipeline("never_registered"));
            assert_eq!(required_by, "dependent");
        }
        other => panic!("expected UnresolvedDependency, got {other:?}"),
    }
    assert_eq!(ExitCode::from_category(err.category()), ExitCode::DependencyResolution);
}

/// Two components creating the same column violate single ownership.
#[test]
fn test_column_ownership_collision_fails_setup() {
    let components: Vec<Box<dyn Component>> = vec![
        Box::new(ColumnComponent::new("first", "weight", 1.0, vec![])),
        Box::new(ColumnComponent::new("second", "weight", 2.0, vec![])),
    ];
    let context = SimulationContext::new(daily_config(1, 10, 0), components).unwrap();
    let err = context.setup().unwrap_err();
    assert_eq!(err.category(), "component");
    assert!(err.to_string().contains("weight"));
}

/// Dependency-respecting initializer order: a column whose initializer
/// depends on another column is filled after it.
#[test]
fn test_dependent_initializers_run_after_their_dependencies() {
    let components: Vec<Box<dyn Component>> = vec![
        // Registered first but depends on `base_value`.
        Box::new(ColumnComponent::new(
            "derived_component",
            "derived_value",
            2.0,
            vec![ResourceId::column("base_value")],
        )),
        Box::new(ColumnComponent::new("base_component", "base_value", 1.0, vec![])),
    ];
    let context = SimulationContext::new(daily_config(1, 5, 0), components).unwrap();
    let report = context.run().unwrap();
    let state = &report.final_state;
    assert_eq!(state.column("base_value").unwrap().as_floats().unwrap(), &[1.0; 5]);
    assert_eq!(state.column("derived_value").unwrap().as_floats().unwrap(), &[2.0; 5]);
}
