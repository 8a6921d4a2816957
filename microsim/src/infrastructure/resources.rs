// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Resource Graph
//!
//! The typed producer/dependency DAG over columns, pipelines, and streams.
//!
//! ## Overview
//!
//! Each resource has at most one producer and a set of declared
//! dependencies. At the setup → post-setup transition the graph is
//! finalized:
//!
//! 1. Every declared dependency must resolve to a registered producer,
//!    otherwise `UnresolvedDependency`.
//! 2. A deterministic topological order is computed (dependencies first);
//!    a cycle is reported with the offending path as `CyclicDependency`.
//!
//! The order feeds the population manager (initializer execution) and is
//! available to any subsystem that needs dependency-respecting iteration.

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use microsim_domain::value_objects::ResourceId;
use microsim_domain::SimulationError;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone)]
struct ProducerRecord {
    /// The producing component. `None` while only dependencies have been
    /// declared (a modifier can register before its pipeline's source).
    owner: Option<String>,
    requires: Vec<ResourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

/// The producer/dependency DAG, finalized once after setup.
pub struct ResourceGraph {
    producers: RefCell<BTreeMap<ResourceId, ProducerRecord>>,
    order: RefCell<Option<Vec<ResourceId>>>,
    lifecycle: Rc<LifecycleHandle>,
}

impl ResourceGraph {
    pub fn new(lifecycle: Rc<LifecycleHandle>) -> Self {
        Self {
            producers: RefCell::new(BTreeMap::new()),
            order: RefCell::new(None),
            lifecycle,
        }
    }

    /// Registers `owner` as the single producer of `resource`. Setup only.
    pub fn register_producer(
        &self,
        resource: ResourceId,
        owner: &str,
        requires: Vec<ResourceId>,
    ) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        let mut producers = self.producers.borrow_mut();
        match producers.get_mut(&resource) {
            Some(record) => match &record.owner {
                Some(existing) => Err(SimulationError::component_contract(format!(
                    "{} already has producer `{}`; `{}` cannot produce it too",
                    resource, existing, owner
                ))),
                None => {
                    record.owner = Some(owner.to_string());
                    record.requires.extend(requires);
                    Ok(())
                }
            },
            None => {
                producers.insert(
                    resource,
                    ProducerRecord {
                        owner: Some(owner.to_string()),
                        requires,
                    },
                );
                Ok(())
            }
        }
    }

    /// Adds dependencies to a resource, creating its node if nothing has
    /// been declared for it yet (a modifier may register before the
    /// producer). Setup only.
    pub fn add_dependencies(
        &self,
        resource: &ResourceId,
        requires: Vec<ResourceId>,
    ) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        let mut producers = self.producers.borrow_mut();
        producers
            .entry(resource.clone())
            .or_insert_with(|| ProducerRecord {
                owner: None,
                requires: Vec::new(),
            })
            .requires
            .extend(requires);
        Ok(())
    }

    /// Resolves dependencies and computes the topological order.
    ///
    /// Called once at the setup → post-setup transition.
    pub fn finalize(&self) -> Result<Vec<ResourceId>, SimulationError> {
        let producers = self.producers.borrow();
        for record in producers.values() {
            for dependency in &record.requires {
                if !producers.contains_key(dependency) {
                    return Err(SimulationError::UnresolvedDependency {
                        resource: dependency.clone(),
                        required_by: record.owner.clone().unwrap_or_else(|| "<modifier>".to_string()),
                    });
                }
            }
        }

        let mut states: BTreeMap<&ResourceId, VisitState> = BTreeMap::new();
        let mut path: Vec<ResourceId> = Vec::new();
        let mut order: Vec<ResourceId> = Vec::with_capacity(producers.len());
        for resource in producers.keys() {
            Self::visit(resource, &producers, &mut states, &mut path, &mut order)?;
        }
        debug!(resources = order.len(), "resource graph finalized");
        *self.order.borrow_mut() = Some(order.clone());
        Ok(order)
    }

    fn visit<'a>(
        resource: &'a ResourceId,
        producers: &'a BTreeMap<ResourceId, ProducerRecord>,
        states: &mut BTreeMap<&'a ResourceId, VisitState>,
        path: &mut Vec<ResourceId>,
        order: &mut Vec<ResourceId>,
    ) -> Result<(), SimulationError> {
        match states.get(resource) {
            Some(VisitState::Done) => return Ok(()),
            Some(VisitState::InProgress) => {
                // Close the loop for the report: [a, b, a].
                let start = path.iter().position(|r| r == resource).unwrap_or(0);
                let mut cycle: Vec<ResourceId> = path[start..].to_vec();
                cycle.push(resource.clone());
                return Err(SimulationError::CyclicDependency { path: cycle });
            }
            None => {}
        }
        states.insert(resource, VisitState::InProgress);
        path.push(resource.clone());
        if let Some(record) = producers.get(resource) {
            for dependency in &record.requires {
                // The registry key, not the borrowed requires entry, keeps
                // the lifetime tied to the producers map.
                if let Some((key, _)) = producers.get_key_value(dependency) {
                    Self::visit(key, producers, states, path, order)?;
                }
            }
        }
        path.pop();
        states.insert(resource, VisitState::Done);
        order.push(resource.clone());
        Ok(())
    }

    /// The finalized topological order.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>, SimulationError> {
        self.order
            .borrow()
            .clone()
            .ok_or_else(|| SimulationError::internal("resource graph has not been finalized".to_string()))
    }

    /// The owner of a resource, if one has claimed it.
    pub fn producer_of(&self, resource: &ResourceId) -> Option<String> {
        self.producers
            .borrow()
            .get(resource)
            .and_then(|record| record.owner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::lifecycle::LifecycleManager;
    use microsim_domain::value_objects::LifecyclePhase;

    fn graph() -> (LifecycleManager, ResourceGraph) {
        let lifecycle = LifecycleManager::new();
        lifecycle.advance_to(LifecyclePhase::Setup).unwrap();
        let graph = ResourceGraph::new(lifecycle.handle());
        (lifecycle, graph)
    }

    #[test]
    fn test_dependencies_come_first_in_order() {
        let (_lifecycle, graph) = graph();
        graph
            .register_producer(
                ResourceId::column("age"),
                "base",
                vec![ResourceId::stream("age_bootstrap")],
            )
            .unwrap();
        graph
            .register_producer(ResourceId::stream("age_bootstrap"), "base", vec![])
            .unwrap();
        graph
            .register_producer(
                ResourceId::pipeline("mortality_rate"),
                "mortality",
                vec![ResourceId::column("age")],
            )
            .unwrap();
        let order = graph.finalize().unwrap();
        let position = |resource: &ResourceId| order.iter().position(|r| r == resource).unwrap();
        assert!(position(&ResourceId::stream("age_bootstrap")) < position(&ResourceId::column("age")));
        assert!(position(&ResourceId::column("age")) < position(&ResourceId::pipeline("mortality_rate")));
    }

    #[test]
    fn test_single_producer_enforced() {
        let (_lifecycle, graph) = graph();
        graph
            .register_producer(ResourceId::column("age"), "base", vec![])
            .unwrap();
        let err = graph
            .register_producer(ResourceId::column("age"), "other", vec![])
            .unwrap_err();
        assert_eq!(err.category(), "component");
        assert!(err.to_string().contains("base"));
    }

    #[test]
    fn test_unresolved_dependency_reported() {
        let (_lifecycle, graph) = graph();
        graph
            .register_producer(
                ResourceId::column("age"),
                "base",
                vec![ResourceId::pipeline("missing")],
            )
            .unwrap();
        let err = graph.finalize().unwrap_err();
        match err {
            SimulationError::UnresolvedDependency { resource, required_by } => {
                assert_eq!(resource, ResourceId::pipeline("missing"));
                assert_eq!(required_by, "base");
            }
            other => panic!("expected UnresolvedDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let (_lifecycle, graph) = graph();
        graph
            .register_producer(ResourceId::column("a"), "one", vec![ResourceId::column("b")])
            .unwrap();
        graph
            .register_producer(ResourceId::column("b"), "two", vec![ResourceId::column("a")])
            .unwrap();
        let err = graph.finalize().unwrap_err();
        match err {
            SimulationError::CyclicDependency { path } => {
                assert_eq!(path.len(), 3);
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&ResourceId::column("a")));
                assert!(path.contains(&ResourceId::column("b")));
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_registration_closed_after_setup() {
        let (lifecycle, graph) = graph();
        lifecycle.advance_to(LifecyclePhase::PostSetup).unwrap();
        let err = graph
            .register_producer(ResourceId::column("late"), "late", vec![])
            .unwrap_err();
        assert_eq!(err.category(), "lifecycle");
    }

    #[test]
    fn test_modifier_dependencies_join_the_pipeline_node() {
        let (_lifecycle, graph) = graph();
        graph
            .register_producer(ResourceId::pipeline("rate"), "source_component", vec![])
            .unwrap();
        graph
            .register_producer(ResourceId::column("age"), "base", vec![])
            .unwrap();
        graph
            .add_dependencies(&ResourceId::pipeline("rate"), vec![ResourceId::column("age")])
            .unwrap();
        let order = graph.finalize().unwrap();
        let position = |resource: &ResourceId| order.iter().position(|r| r == resource).unwrap();
        assert!(position(&ResourceId::column("age")) < position(&ResourceId::pipeline("rate")));
    }

    #[test]
    fn test_order_is_deterministic() {
        let build = || {
            let (_lifecycle, graph) = graph();
            graph.register_producer(ResourceId::column("c"), "x", vec![]).unwrap();
            graph.register_producer(ResourceId::column("a"), "x", vec![]).unwrap();
            graph.register_producer(ResourceId::column("b"), "x", vec![]).unwrap();
            graph.finalize().unwrap()
        };
        assert_eq!(build(), build());
    }
}
