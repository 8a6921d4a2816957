// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Builder Facade
//!
//! The per-component handle to every framework service, passed to each
//! component's `setup` hook.
//!
//! ## Overview
//!
//! The builder is namespaced the way the engine is factored:
//! `configuration()`, `lookup()`, `value()`, `event()`, `population()`,
//! `randomness()`, `time()`, `components()`, `results()`, and
//! `lifecycle()`. Every method delegates to a phase-gated manager, so the
//! §-table phase policy holds no matter which facade path an operation
//! takes.
//!
//! Registrations made through the builder are attributed to the component
//! the builder was issued for: column ownership, resource producers, and
//! listener names all carry it.

use crate::application::component::Component;
use crate::infrastructure::clock::{SimulationClock, StepModifierFn};
use crate::infrastructure::config::LayeredConfigTree;
use crate::infrastructure::event_bus::{EventBus, ListenerCallback};
use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use crate::infrastructure::lookup::{Extrapolation, LookupSource, LookupTable};
use crate::infrastructure::population::manager::PopulationManager;
use crate::infrastructure::population::view::{PopulationFilter, PopulationView};
use crate::infrastructure::randomness::{RandomnessManager, RandomnessStream};
use crate::infrastructure::resources::ResourceGraph;
use crate::infrastructure::results::{
    GathererFn, Observation, ResultsManager, Stratification, StratificationMapper,
};
use crate::infrastructure::values::{ModifierFn, PipelineHandle, SourceFn, ValueManager};
use microsim_domain::events::SimEvent;
use microsim_domain::services::combiners::{Combiner, PostProcessor};
use microsim_domain::value_objects::{
    AttributeKind, LifecyclePhase, ListenerPriority, ObservationPhase, PopulationSlice, ResourceId,
    SimulantId,
};
use microsim_domain::SimulationError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

/// The bundle of shared manager handles behind a builder.
#[derive(Clone)]
pub(crate) struct Managers {
    pub lifecycle: Rc<LifecycleHandle>,
    pub configuration: Rc<LayeredConfigTree>,
    pub events: Rc<EventBus>,
    pub randomness: Rc<RandomnessManager>,
    pub population: Rc<PopulationManager>,
    pub resources: Rc<ResourceGraph>,
    pub values: Rc<ValueManager>,
    pub results: Rc<ResultsManager>,
    pub clock: Rc<SimulationClock>,
    pub creator: SimulantCreator,
}

/// The callable that allocates and initializes new simulants.
///
/// Invocable only inside PopulationInitialization and TimeStepPrepare;
/// the underlying creation scope enforces the phase and the rollback
/// semantics.
#[derive(Clone)]
pub struct SimulantCreator {
    inner: Rc<dyn Fn(u64, BTreeMap<String, Value>) -> Result<Vec<SimulantId>, SimulationError>>,
}

impl SimulantCreator {
    pub(crate) fn new(
        inner: Rc<dyn Fn(u64, BTreeMap<String, Value>) -> Result<Vec<SimulantId>, SimulationError>>,
    ) -> Self {
        Self { inner }
    }

    /// Creates `count` simulants, passing `user_data` through to every
    /// initializer.
    pub fn create(
        &self,
        count: u64,
        user_data: BTreeMap<String, Value>,
    ) -> Result<Vec<SimulantId>, SimulationError> {
        (self.inner)(count, user_data)
    }
}

/// An emission handle for one custom channel.
#[derive(Clone)]
pub struct EventEmitter {
    channel: String,
    events: Rc<EventBus>,
}

impl EventEmitter {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Emits a derived event on this emitter's channel, sharing the base
    /// event's time, step, and index.
    pub fn emit_from(&self, base: &SimEvent) -> Result<(), SimulationError> {
        self.events.emit(&base.derive(self.channel.clone()))
    }
}

/// The per-component facade over all framework services.
pub struct Builder {
    managers: Managers,
    component: String,
    pending: Vec<Box<dyn Component>>,
}

impl Builder {
    pub(crate) fn new(managers: Managers, component: String) -> Self {
        Self {
            managers,
            component,
            pending: Vec::new(),
        }
    }

    pub(crate) fn take_pending(&mut self) -> Vec<Box<dyn Component>> {
        std::mem::take(&mut self.pending)
    }

    pub fn configuration(&self) -> ConfigurationInterface<'_> {
        ConfigurationInterface { builder: self }
    }

    pub fn lookup(&self) -> LookupInterface<'_> {
        LookupInterface { builder: self }
    }

    pub fn value(&self) -> ValueInterface<'_> {
        ValueInterface { builder: self }
    }

    pub fn event(&self) -> EventInterface<'_> {
        EventInterface { builder: self }
    }

    pub fn population(&self) -> PopulationInterface<'_> {
        PopulationInterface { builder: self }
    }

    pub fn randomness(&self) -> RandomnessInterface<'_> {
        RandomnessInterface { builder: self }
    }

    pub fn time(&self) -> TimeInterface<'_> {
        TimeInterface { builder: self }
    }

    pub fn components(&mut self) -> ComponentsInterface<'_> {
        ComponentsInterface { builder: self }
    }

    pub fn results(&self) -> ResultsInterface<'_> {
        ResultsInterface { builder: self }
    }

    pub fn lifecycle(&self) -> LifecycleInterface<'_> {
        LifecycleInterface { builder: self }
    }
}

/// Read access to the layered configuration tree.
pub struct ConfigurationInterface<'a> {
    builder: &'a Builder,
}

impl ConfigurationInterface<'_> {
    pub fn get(&self, key: &str) -> Result<Value, SimulationError> {
        self.builder.managers.configuration.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64, SimulationError> {
        self.builder.managers.configuration.get_int(key)
    }

    pub fn get_float(&self, key: &str) -> Result<f64, SimulationError> {
        self.builder.managers.configuration.get_float(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, SimulationError> {
        self.builder.managers.configuration.get_bool(key)
    }

    pub fn get_str(&self, key: &str) -> Result<String, SimulationError> {
        self.builder.managers.configuration.get_str(key)
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<Value>, SimulationError> {
        self.builder.managers.configuration.get_list(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.builder.managers.configuration.has(key)
    }

    /// The effective values under `prefix` as one nested mapping.
    pub fn subtree(&self, prefix: &str) -> Result<Value, SimulationError> {
        self.builder.managers.configuration.subtree(prefix)
    }

    /// The full provenance rendering, for diagnostics.
    pub fn provenance(&self) -> String {
        self.builder.managers.configuration.to_string()
    }
}

/// Lookup table construction.
pub struct LookupInterface<'a> {
    builder: &'a Builder,
}

impl LookupInterface<'_> {
    /// Builds a lookup table bound to this component's population columns.
    /// Setup only.
    pub fn build_table(
        &self,
        name: &str,
        source: LookupSource,
        extrapolation: Extrapolation,
    ) -> Result<Rc<LookupTable>, SimulationError> {
        self.builder.managers.lifecycle.ensure_allowed(Operation::Register)?;
        let view = self.builder.managers.population.view_internal(
            &self.builder.component,
            source.bound_columns(),
            None,
            false,
        )?;
        Ok(Rc::new(LookupTable::new(
            name.to_string(),
            source,
            extrapolation,
            view,
        )))
    }
}

/// Value pipeline registration and access.
pub struct ValueInterface<'a> {
    builder: &'a Builder,
}

impl ValueInterface<'_> {
    /// Registers this component as the source of a pipeline.
    pub fn register_value_producer(
        &self,
        name: &str,
        arity: usize,
        combiner: Combiner,
        post_processor: PostProcessor,
        requires: Vec<ResourceId>,
        source: SourceFn,
    ) -> Result<PipelineHandle, SimulationError> {
        self.builder.managers.resources.register_producer(
            ResourceId::pipeline(name),
            &self.builder.component,
            requires,
        )?;
        self.builder
            .managers
            .values
            .register_producer(name, arity, combiner, post_processor, source)
    }

    /// Registers a modifier on a pipeline, with its dependencies.
    pub fn register_value_modifier(
        &self,
        pipeline: &str,
        priority: ListenerPriority,
        requires: Vec<ResourceId>,
        modifier: ModifierFn,
    ) -> Result<(), SimulationError> {
        self.builder
            .managers
            .resources
            .add_dependencies(&ResourceId::pipeline(pipeline), requires)?;
        self.builder
            .managers
            .values
            .register_modifier(pipeline, &self.builder.component, priority, modifier)
    }

    /// A shared handle for calling a pipeline.
    pub fn get_value(&self, name: &str) -> PipelineHandle {
        self.builder.managers.values.handle(name)
    }
}

/// Event bus access.
pub struct EventInterface<'a> {
    builder: &'a Builder,
}

impl EventInterface<'_> {
    /// Subscribes a listener callback on any channel. Setup only.
    pub fn subscribe(
        &self,
        channel: &str,
        priority: ListenerPriority,
        callback: ListenerCallback,
    ) -> Result<(), SimulationError> {
        self.builder
            .managers
            .events
            .subscribe(channel, &self.builder.component, priority, callback)
    }

    /// An emission handle for a custom (non-framework) channel.
    pub fn emitter(&self, channel: &str) -> Result<EventEmitter, SimulationError> {
        if microsim_domain::events::is_framework_channel(channel) {
            return Err(SimulationError::component_contract(format!(
                "`{}` may not emit on the framework channel `{}`",
                self.builder.component, channel
            )));
        }
        Ok(EventEmitter {
            channel: channel.to_string(),
            events: Rc::clone(&self.builder.managers.events),
        })
    }
}

/// Population registration and access.
pub struct PopulationInterface<'a> {
    builder: &'a Builder,
}

impl PopulationInterface<'_> {
    /// Declares the columns this component creates and its initialization
    /// dependencies. Setup only.
    pub fn initializes_simulants(
        &self,
        columns: &[(&str, AttributeKind)],
        requires: &[ResourceId],
    ) -> Result<(), SimulationError> {
        let owned: Vec<(String, AttributeKind)> = columns
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect();
        self.builder
            .managers
            .population
            .register_initializer(&self.builder.component, &owned, requires.to_vec())?;
        for (name, _) in columns {
            self.builder.managers.resources.register_producer(
                ResourceId::column(*name),
                &self.builder.component,
                requires.to_vec(),
            )?;
        }
        Ok(())
    }

    /// A scoped view over the given columns. Setup only.
    pub fn get_view(
        &self,
        columns: &[&str],
        filter: Option<PopulationFilter>,
    ) -> Result<PopulationView, SimulationError> {
        self.builder.managers.population.get_view(
            &self.builder.component,
            columns.iter().map(|name| name.to_string()).collect(),
            filter,
        )
    }

    /// The simulant creator callable.
    pub fn simulant_creator(&self) -> SimulantCreator {
        self.builder.managers.creator.clone()
    }
}

/// Randomness stream access.
pub struct RandomnessInterface<'a> {
    builder: &'a Builder,
}

impl RandomnessInterface<'_> {
    /// A CRN-keyed draw stream. Setup only.
    pub fn get_stream(&self, name: &str) -> Result<RandomnessStream, SimulationError> {
        let stream = self.builder.managers.randomness.get_stream(name, false)?;
        self.builder.managers.resources.register_producer(
            ResourceId::stream(name),
            &self.builder.component,
            Vec::new(),
        )?;
        Ok(stream)
    }

    /// A bootstrap stream, exempt from CRN registration because it
    /// creates the key columns themselves. Setup only.
    pub fn get_initialization_stream(&self, name: &str) -> Result<RandomnessStream, SimulationError> {
        let stream = self.builder.managers.randomness.get_stream(name, true)?;
        self.builder.managers.resources.register_producer(
            ResourceId::stream(name),
            &self.builder.component,
            Vec::new(),
        )?;
        Ok(stream)
    }
}

/// Clock access.
pub struct TimeInterface<'a> {
    builder: &'a Builder,
}

impl TimeInterface<'_> {
    /// The shared clock handle.
    pub fn clock(&self) -> Rc<SimulationClock> {
        Rc::clone(&self.builder.managers.clock)
    }

    /// Installs a per-simulant step-size modifier. Setup only.
    pub fn register_step_modifier(&self, callable: StepModifierFn) -> Result<(), SimulationError> {
        self.builder
            .managers
            .clock
            .register_step_modifier(&self.builder.component, callable)
    }
}

/// Sub-component registration.
pub struct ComponentsInterface<'a> {
    builder: &'a mut Builder,
}

impl ComponentsInterface<'_> {
    /// Appends sub-components to the back of the setup queue.
    pub fn add_components(&mut self, components: Vec<Box<dyn Component>>) {
        self.builder.pending.extend(components);
    }
}

/// Stratification and observation registration.
pub struct ResultsInterface<'a> {
    builder: &'a Builder,
}

impl ResultsInterface<'_> {
    pub fn register_stratification(
        &self,
        name: &str,
        categories: Vec<String>,
        excluded_categories: Vec<String>,
        sources: Vec<ResourceId>,
        mapper: StratificationMapper,
    ) -> Result<(), SimulationError> {
        self.builder.managers.results.register_stratification(Stratification {
            name: name.to_string(),
            categories,
            excluded_categories,
            sources,
            mapper,
        })
    }

    pub fn register_observation(&self, observation: Observation) -> Result<(), SimulationError> {
        self.builder.managers.results.register_observation(observation)
    }

    pub fn register_adding_observation(
        &self,
        name: &str,
        when: ObservationPhase,
        pop_filter: Vec<PopulationFilter>,
        requires: Vec<String>,
        stratifications: Vec<String>,
        gatherer: Rc<dyn Fn(&PopulationSlice) -> Result<f64, SimulationError>>,
    ) -> Result<(), SimulationError> {
        self.builder.managers.results.register_adding_observation(
            name,
            when,
            pop_filter,
            requires,
            stratifications,
            gatherer,
        )
    }

    pub fn register_concatenating_observation(
        &self,
        name: &str,
        when: ObservationPhase,
        pop_filter: Vec<PopulationFilter>,
        requires: Vec<String>,
        gatherer: GathererFn,
    ) -> Result<(), SimulationError> {
        self.builder
            .managers
            .results
            .register_concatenating_observation(name, when, pop_filter, requires, gatherer)
    }
}

/// Lifecycle diagnostics.
pub struct LifecycleInterface<'a> {
    builder: &'a Builder,
}

impl LifecycleInterface<'_> {
    /// The phase the simulation is currently in.
    pub fn current_phase(&self) -> LifecyclePhase {
        self.builder.managers.lifecycle.current_phase()
    }

    /// The component currently executing, if any.
    pub fn current_component(&self) -> Option<String> {
        self.builder.managers.lifecycle.current_component()
    }
}
