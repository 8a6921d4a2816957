// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Component Contract
//!
//! The unified trait every simulation component implements, whether it is
//! bundled with the framework or user-defined.
//!
//! ## Overview
//!
//! A component exposes:
//!
//! - a unique `name`,
//! - `configuration_defaults` (a nested map; leaves must not collide with
//!   other components' defaults),
//! - `columns_created` and `columns_required` declarations,
//! - a `setup(builder)` hook, run once with the per-component [`Builder`]
//!   facade, and
//! - optional phase hooks with fixed names, discovered by capability: the
//!   defaults are no-ops, so a small component opts into exactly the
//!   phases it cares about.
//!
//! Phase hooks take `&self`: the engine dispatches them through shared
//! handles, and a hook may re-enter the framework (call pipelines, draw
//! randomness, create simulants) without aliasing trouble. Components
//! keep their own mutable state behind `Cell`/`RefCell` fields
//! initialized during `setup`.

use crate::application::builder::Builder;
use microsim_domain::entities::SimulantData;
use microsim_domain::events::SimEvent;
use microsim_domain::value_objects::{PhasePriorities, PopulationSlice};
use microsim_domain::SimulationError;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// The contract every component implements.
pub trait Component {
    /// The component's unique name.
    fn name(&self) -> &str;

    /// Nested default configuration. Leaves must not collide with another
    /// component's defaults at a different value.
    fn configuration_defaults(&self) -> Value {
        Value::Null
    }

    /// The columns this component owns and initializes.
    fn columns_created(&self) -> Vec<String> {
        Vec::new()
    }

    /// The columns this component reads but does not own.
    fn columns_required(&self) -> Vec<String> {
        Vec::new()
    }

    /// Listener priorities for the standard phase hooks.
    fn priorities(&self) -> PhasePriorities {
        PhasePriorities::default()
    }

    /// One-time registration with the framework.
    fn setup(&mut self, builder: &mut Builder) -> Result<(), SimulationError>;

    fn on_post_setup(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_time_step_prepare(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_time_step(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_time_step_cleanup(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_collect_metrics(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_simulation_end(&self, _event: &SimEvent) -> Result<(), SimulationError> {
        Ok(())
    }

    /// Populates this component's declared columns for a block of new
    /// simulants. Required when the component registered an initializer.
    fn on_initialize_simulants(
        &self,
        _data: &SimulantData,
    ) -> Result<Option<PopulationSlice>, SimulationError> {
        Ok(None)
    }
}

impl std::fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component").field("name", &self.name()).finish()
    }
}

/// A shared, interiorly mutable component handle.
pub type SharedComponent = Rc<RefCell<Box<dyn Component>>>;

/// The registration-order component queue.
///
/// Setup processes the queue front to back; a component's setup may append
/// sub-components, which join the back of the queue and are processed in
/// the same pass.
pub struct ComponentRegistry {
    components: Vec<(String, SharedComponent)>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self { components: Vec::new() }
    }

    /// Appends a component, enforcing name uniqueness.
    pub fn add(&mut self, component: Box<dyn Component>) -> Result<(), SimulationError> {
        let name = component.name().to_string();
        if name.is_empty() {
            return Err(SimulationError::component_contract(
                "component names must be non-empty".to_string(),
            ));
        }
        if self.components.iter().any(|(existing, _)| *existing == name) {
            return Err(SimulationError::component_contract(format!(
                "component name `{}` is already registered",
                name
            )));
        }
        self.components.push((name, Rc::new(RefCell::new(component))));
        Ok(())
    }

    /// Looks a component up by name.
    pub fn get(&self, name: &str) -> Option<SharedComponent> {
        self.components
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, component)| Rc::clone(component))
    }

    /// The component at a queue position, for the setup drain.
    pub fn at(&self, position: usize) -> Option<(String, SharedComponent)> {
        self.components
            .get(position)
            .map(|(name, component)| (name.clone(), Rc::clone(component)))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Component names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.components.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        name: String,
    }

    impl Component for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn setup(&mut self, _builder: &mut Builder) -> Result<(), SimulationError> {
            Ok(())
        }
    }

    fn probe(name: &str) -> Box<dyn Component> {
        Box::new(Probe { name: name.to_string() })
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let mut registry = ComponentRegistry::new();
        registry.add(probe("base")).unwrap();
        registry.add(probe("mortality")).unwrap();
        registry.add(probe("observer")).unwrap();
        assert_eq!(registry.names(), vec!["base", "mortality", "observer"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.add(probe("base")).unwrap();
        let err = registry.add(probe("base")).unwrap_err();
        assert_eq!(err.category(), "component");
    }

    #[test]
    fn test_lookup_by_name() {
        let mut registry = ComponentRegistry::new();
        registry.add(probe("base")).unwrap();
        assert!(registry.get("base").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let component = Probe { name: "p".to_string() };
        assert_eq!(component.configuration_defaults(), Value::Null);
        assert!(component.columns_created().is_empty());
        let data = SimulantData::new(
            vec![],
            chrono::Utc::now(),
            microsim_domain::value_objects::StepSize::from_days(1).unwrap(),
        );
        assert!(component.on_initialize_simulants(&data).unwrap().is_none());
    }
}
