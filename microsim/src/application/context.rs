// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Simulation Context
//!
//! The driver: constructs every manager, wires components together, and
//! moves the simulation through its lifecycle.
//!
//! ## Phase Order
//!
//! 1. **Initialize** - construct managers, apply configuration layering
//! 2. **Setup** - invoke each component's setup hook with a [`Builder`];
//!    sub-components registered during setup join the back of the queue
//!    and are processed until the queue drains
//! 3. **Post-setup** - freeze configuration, finalize the resource graph,
//!    emit the `post_setup` event
//! 4. **Population initialization** - create the initial population
//!    through the simulant creator
//! 5. **Main loop** - until the clock reaches its end: emit
//!    `time_step_prepare`, `time_step`, `time_step_cleanup`,
//!    `collect_metrics` over the scheduled index, then advance the clock
//! 6. **Finalization** - emit `simulation_end`, run report formatters,
//!    hand the results to the caller
//!
//! ## Determinism
//!
//! Two contexts constructed with identical seed, key columns, component
//! set, and configuration produce bit-identical observation output. All
//! registries iterate in name or registration order; every draw is a CRN
//! keyed hash.

use crate::application::builder::{Builder, Managers, SimulantCreator};
use crate::application::component::{Component, ComponentRegistry};
use crate::application::snapshot::SimulationSnapshot;
use crate::infrastructure::clock::SimulationClock;
use crate::infrastructure::config::{ConfigSource, LayeredConfigTree};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::lifecycle::LifecycleManager;
use crate::infrastructure::population::manager::PopulationManager;
use crate::infrastructure::randomness::RandomnessManager;
use crate::infrastructure::resources::ResourceGraph;
use crate::infrastructure::results::{ResultsManager, ResultsTable};
use crate::infrastructure::values::ValueManager;
use microsim_domain::events::SimEvent;
use microsim_domain::value_objects::{LifecyclePhase, PopulationSlice, StepSize};
use microsim_domain::SimulationError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info};

/// What a finished run hands back: observation tables, the final state
/// table, and wall-clock phase timings.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub observations: BTreeMap<String, ResultsTable>,
    pub final_state: PopulationSlice,
    pub phase_timings: BTreeMap<String, f64>,
}

/// The assembled simulation: managers, components, and the drive loop.
pub struct SimulationContext {
    lifecycle: Rc<LifecycleManager>,
    configuration: Rc<LayeredConfigTree>,
    events: Rc<EventBus>,
    randomness: Rc<RandomnessManager>,
    population: Rc<PopulationManager>,
    resources: Rc<ResourceGraph>,
    values: Rc<ValueManager>,
    results: Rc<ResultsManager>,
    clock: Rc<SimulationClock>,
    registry: Rc<RefCell<ComponentRegistry>>,
    creator: SimulantCreator,
    population_initialized: Cell<bool>,
    phase_timings: RefCell<BTreeMap<String, f64>>,
}

impl std::fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext").finish_non_exhaustive()
    }
}

impl SimulationContext {
    /// Builds a context from a model-override configuration mapping and a
    /// component list.
    pub fn new(
        model_configuration: Value,
        components: Vec<Box<dyn Component>>,
    ) -> Result<Self, SimulationError> {
        Self::with_overrides(model_configuration, Value::Null, components)
    }

    /// Builds a context with an additional interactive runtime-override
    /// layer on top of the model configuration.
    pub fn with_overrides(
        model_configuration: Value,
        runtime_overrides: Value,
        components: Vec<Box<dyn Component>>,
    ) -> Result<Self, SimulationError> {
        let configuration = Rc::new(LayeredConfigTree::new());
        configuration.update(&base_defaults(), ConfigSource::BaseDefaults, "framework")?;
        configuration.update(&model_configuration, ConfigSource::ModelOverride, "model")?;
        configuration.update(&runtime_overrides, ConfigSource::RuntimeOverride, "interactive")?;
        Self::from_tree(configuration, components)
    }

    fn from_tree(
        configuration: Rc<LayeredConfigTree>,
        components: Vec<Box<dyn Component>>,
    ) -> Result<Self, SimulationError> {
        let lifecycle = Rc::new(LifecycleManager::new());
        let handle = lifecycle.handle();

        let seed = configuration.get_int("randomness.seed")? as u64;
        let key_columns: Vec<String> = configuration
            .get_list("randomness.key_columns")?
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();
        let randomness = Rc::new(RandomnessManager::new(seed, key_columns, Rc::clone(&handle)));

        let start = parse_time(&configuration, "time.start")?;
        let end = parse_time(&configuration, "time.end")?;
        let step = StepSize::from_days_f64(configuration.get_float("time.step_days")?)?;
        let minimum_step = if configuration.has("time.minimum_step_days") {
            StepSize::from_days_f64(configuration.get_float("time.minimum_step_days")?)?
        } else {
            step
        };
        let clock = Rc::new(SimulationClock::new(
            start,
            end,
            step,
            minimum_step,
            Rc::clone(&handle),
        )?);

        let events = Rc::new(EventBus::new(Rc::clone(&handle)));
        let population = Rc::new(PopulationManager::new(Rc::clone(&handle)));
        let resources = Rc::new(ResourceGraph::new(Rc::clone(&handle)));
        let values = Rc::new(ValueManager::new(Rc::clone(&handle)));
        {
            let clock = Rc::clone(&clock);
            values.set_step_provider(Rc::new(move || clock.step_size()));
        }
        let results = Rc::new(ResultsManager::new(
            Rc::clone(&population),
            Rc::clone(&values),
            Rc::clone(&handle),
        ));

        let registry = Rc::new(RefCell::new(ComponentRegistry::new()));
        for component in components {
            registry.borrow_mut().add(component)?;
        }

        let creator = Self::build_creator(&population, &registry, &randomness, &clock);

        info!(seed, start = %start, end = %end, "simulation context constructed");
        Ok(Self {
            lifecycle,
            configuration,
            events,
            randomness,
            population,
            resources,
            values,
            results,
            clock,
            registry,
            creator,
            population_initialized: Cell::new(false),
            phase_timings: RefCell::new(BTreeMap::new()),
        })
    }

    fn build_creator(
        population: &Rc<PopulationManager>,
        registry: &Rc<RefCell<ComponentRegistry>>,
        randomness: &Rc<RandomnessManager>,
        clock: &Rc<SimulationClock>,
    ) -> SimulantCreator {
        let population = Rc::clone(population);
        let registry = Rc::clone(registry);
        let randomness = Rc::clone(randomness);
        let clock = Rc::clone(clock);
        SimulantCreator::new(Rc::new(move |count, user_data| {
            let ids = population.create_simulants(
                count,
                clock.current_time(),
                clock.step_size(),
                user_data,
                &|component, data| {
                    let shared = registry.borrow().get(component).ok_or_else(|| {
                        SimulationError::component_contract(format!(
                            "initializer owner `{}` is not a registered component",
                            component
                        ))
                    })?;
                    let produced = shared.borrow().on_initialize_simulants(data)?;
                    produced.ok_or_else(|| {
                        SimulationError::component_contract(format!(
                            "`{}` declared an initializer but returned no simulant data",
                            component
                        ))
                    })
                },
            )?;
            clock.on_simulants_created(ids.len());

            // Register the new simulants in the CRN key space when every
            // key column exists in the schema; a simulation without the
            // key columns simply has no registered simulants, and CRN
            // streams fail on access as specified.
            let key_columns = randomness.key_columns().to_vec();
            let table = population.table();
            let all_present = {
                let table = table.borrow();
                key_columns.iter().all(|column| table.has_column(column))
            };
            if all_present {
                let key_slice = table.borrow().read(&key_columns, &ids)?;
                randomness.register_simulants(&key_slice)?;
            } else {
                debug!("key columns missing; skipping CRN registration");
            }
            Ok(ids)
        }))
    }

    fn managers(&self) -> Managers {
        Managers {
            lifecycle: self.lifecycle.handle(),
            configuration: Rc::clone(&self.configuration),
            events: Rc::clone(&self.events),
            randomness: Rc::clone(&self.randomness),
            population: Rc::clone(&self.population),
            resources: Rc::clone(&self.resources),
            values: Rc::clone(&self.values),
            results: Rc::clone(&self.results),
            clock: Rc::clone(&self.clock),
            creator: self.creator.clone(),
        }
    }

    /// Runs Setup and the Setup → Post-setup transition.
    pub fn setup(&self) -> Result<(), SimulationError> {
        let started = Instant::now();
        self.lifecycle.advance_to(LifecyclePhase::Setup)?;

        // Drain the queue; setup may append sub-components at the back.
        let mut position = 0;
        loop {
            let entry = self.registry.borrow().at(position);
            let (name, component) = match entry {
                Some(entry) => entry,
                None => break,
            };
            position += 1;

            let defaults = component.borrow().configuration_defaults();
            if !defaults.is_null() {
                self.configuration.declare_component_defaults(&name, &defaults)?;
            }

            debug!(component = %name, "running component setup");
            self.lifecycle.enter_component(&name);
            let mut builder = Builder::new(self.managers(), name.clone());
            let outcome = component.borrow_mut().setup(&mut builder);
            self.lifecycle.exit_component();
            outcome?;

            for pending in builder.take_pending() {
                self.registry.borrow_mut().add(pending)?;
            }
        }

        self.validate_component_declarations()?;
        self.subscribe_standard_hooks()?;
        self.configuration.freeze();

        self.lifecycle.advance_to(LifecyclePhase::PostSetup)?;
        let order = self.resources.finalize()?;
        self.population.finalize(&order)?;
        self.results.finalize()?;
        self.emit_framework_event("post_setup", Vec::new())?;

        self.record_timing("setup", started);
        Ok(())
    }

    /// Cross-checks each component's declared columns against what it
    /// actually registered.
    fn validate_component_declarations(&self) -> Result<(), SimulationError> {
        let registry = self.registry.borrow();
        let table = self.population.table();
        let table = table.borrow();
        for name in registry.names() {
            let component = registry.get(&name).ok_or_else(|| {
                SimulationError::internal(format!("component `{}` vanished during setup", name))
            })?;
            let component = component.borrow();
            for column in component.columns_created() {
                match table.spec(&column) {
                    Some(spec) if spec.owner == name => {}
                    Some(spec) => {
                        return Err(SimulationError::component_contract(format!(
                            "`{}` declares it creates `{}` but `{}` registered it",
                            name, column, spec.owner
                        )));
                    }
                    None => {
                        return Err(SimulationError::component_contract(format!(
                            "`{}` declares it creates `{}` but never registered an initializer for it",
                            name, column
                        )));
                    }
                }
            }
            for column in component.columns_required() {
                if !table.has_column(&column) {
                    return Err(SimulationError::component_contract(format!(
                        "`{}` requires column `{}` which no component creates",
                        name, column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Subscribes every component's standard phase hooks at its declared
    /// priorities. Default hooks are no-ops, so opting out costs nothing.
    fn subscribe_standard_hooks(&self) -> Result<(), SimulationError> {
        let entries: Vec<(String, crate::application::component::SharedComponent)> = {
            let registry = self.registry.borrow();
            registry
                .names()
                .into_iter()
                .filter_map(|name| registry.get(&name).map(|component| (name, component)))
                .collect()
        };
        for (name, component) in entries {
            let priorities = component.borrow().priorities();
            type Hook = fn(
                &dyn Component,
                &SimEvent,
            ) -> Result<(), SimulationError>;
            let hooks: [(&str, microsim_domain::value_objects::ListenerPriority, Hook); 6] = [
                ("post_setup", priorities.post_setup, |c, e| c.on_post_setup(e)),
                ("time_step_prepare", priorities.time_step_prepare, |c, e| {
                    c.on_time_step_prepare(e)
                }),
                ("time_step", priorities.time_step, |c, e| c.on_time_step(e)),
                ("time_step_cleanup", priorities.time_step_cleanup, |c, e| {
                    c.on_time_step_cleanup(e)
                }),
                ("collect_metrics", priorities.collect_metrics, |c, e| {
                    c.on_collect_metrics(e)
                }),
                ("simulation_end", priorities.simulation_end, |c, e| c.on_simulation_end(e)),
            ];
            for (channel, priority, hook) in hooks {
                let component = Rc::clone(&component);
                let lifecycle = Rc::clone(&self.lifecycle);
                let hook_name = name.clone();
                self.events.subscribe(
                    channel,
                    &name,
                    priority,
                    Box::new(move |event| {
                        lifecycle.enter_component(&hook_name);
                        let guard = component.borrow();
                        let outcome = hook(&**guard, event);
                        drop(guard);
                        lifecycle.exit_component();
                        outcome
                    }),
                )?;
            }
        }
        Ok(())
    }

    /// Allocates and initializes the starting population.
    pub fn initialize_population(&self) -> Result<(), SimulationError> {
        let started = Instant::now();
        self.lifecycle.advance_to(LifecyclePhase::PopulationInitialization)?;
        let size = self.configuration.get_int("population.population_size")? as u64;
        self.creator.create(size, BTreeMap::new())?;
        self.population_initialized.set(true);
        self.record_timing("population_initialization", started);
        info!(size, "initial population created");
        Ok(())
    }

    /// One main-loop tick: the four sub-phase events over the scheduled
    /// index, then the clock advance.
    pub fn step(&self) -> Result<(), SimulationError> {
        let (scheduled, step) = self.clock.begin_tick()?;
        // Untracked rows stay in the schedule but leave the events.
        let scheduled = {
            let table = self.population.table();
            let tracked: std::collections::BTreeSet<_> =
                table.borrow().active_index(false).into_iter().collect();
            scheduled
                .into_iter()
                .filter(|id| tracked.contains(id))
                .collect::<Vec<_>>()
        };
        let sub_phases = [
            LifecyclePhase::TimeStepPrepare,
            LifecyclePhase::TimeStep,
            LifecyclePhase::TimeStepCleanup,
            LifecyclePhase::CollectMetrics,
        ];
        for phase in sub_phases {
            self.lifecycle.advance_to(phase)?;
            let event = SimEvent::new(
                phase.channel_name(),
                self.clock.current_time(),
                step,
                scheduled.clone(),
            );
            self.events.emit_framework(&event)?;
            self.results.on_event(&event)?;
        }
        self.clock.end_tick();
        Ok(())
    }

    /// Emits `simulation_end`, runs formatters, and produces the report.
    pub fn finalize(&self) -> Result<SimulationReport, SimulationError> {
        let started = Instant::now();
        self.lifecycle.advance_to(LifecyclePhase::SimulationEnd)?;
        let active = self.population.table().borrow().active_index(false);
        self.emit_framework_event("simulation_end", active)?;

        self.lifecycle.advance_to(LifecyclePhase::Report)?;
        let observations = self.results.report()?;
        let final_state = self.population.table().borrow().full_dump()?;
        self.record_timing("finalization", started);
        Ok(SimulationReport {
            observations,
            final_state,
            phase_timings: self.phase_timings.borrow().clone(),
        })
    }

    /// Drives the whole lifecycle front to back.
    pub fn run(&self) -> Result<SimulationReport, SimulationError> {
        if self.lifecycle.handle().current_phase() == LifecyclePhase::Initialization {
            self.setup()?;
        }
        if !self.population_initialized.get() {
            self.initialize_population()?;
        }
        let started = Instant::now();
        let mut ticks = 0u64;
        while self.clock.should_continue() {
            self.step()?;
            ticks += 1;
        }
        self.record_timing("main_loop", started);
        debug!(ticks, "main loop finished");
        self.finalize()
    }

    /// Captures the whole-context snapshot at the current clock.
    pub fn save_snapshot(&self) -> Result<SimulationSnapshot, SimulationError> {
        let (clock_current, next_event_times) = self.clock.schedule_state();
        Ok(SimulationSnapshot {
            seed: self.randomness.seed(),
            clock_current,
            next_event_times,
            state_table: self.population.table().borrow().clone(),
            configuration: (*self.configuration).clone(),
            randomness_keys: self.randomness.key_state(),
            accumulators: self.results.accumulator_state(),
        })
    }

    /// Rebuilds a context from a snapshot and the same component set,
    /// resumed at the saved clock.
    pub fn restore(
        snapshot: SimulationSnapshot,
        components: Vec<Box<dyn Component>>,
    ) -> Result<Self, SimulationError> {
        let configuration = Rc::new(snapshot.configuration.clone());
        configuration.thaw();
        let context = Self::from_tree(configuration, components)?;
        context.setup()?;
        {
            let table = context.population.table();
            *table.borrow_mut() = snapshot.state_table;
        }
        context
            .clock
            .restore_schedule_state(snapshot.clock_current, snapshot.next_event_times);
        context.randomness.restore_key_state(snapshot.randomness_keys);
        context.results.restore_accumulator_state(snapshot.accumulators);
        context.lifecycle.advance_to(LifecyclePhase::PopulationInitialization)?;
        context.population_initialized.set(true);
        info!(clock = %snapshot.clock_current, "context restored from snapshot");
        Ok(context)
    }

    /// The current clock reading, for drivers and tests.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.clock.current_time()
    }

    /// The configuration tree, for drivers and tests.
    pub fn configuration(&self) -> Rc<LayeredConfigTree> {
        Rc::clone(&self.configuration)
    }

    fn emit_framework_event(
        &self,
        channel: &str,
        index: Vec<microsim_domain::value_objects::SimulantId>,
    ) -> Result<(), SimulationError> {
        let event = SimEvent::new(channel, self.clock.current_time(), self.clock.step_size(), index);
        self.events.emit_framework(&event)
    }

    fn record_timing(&self, phase: &str, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        debug!(phase, seconds = elapsed, "phase finished");
        *self.phase_timings.borrow_mut().entry(phase.to_string()).or_insert(0.0) += elapsed;
    }
}

/// Built-in framework defaults, the lowest configuration layer.
fn base_defaults() -> Value {
    json!({
        "randomness": {
            "seed": 0,
            "key_columns": ["entrance_time", "age"],
        },
        "time": {
            "start": "2025-01-01",
            "end": "2026-01-01",
            "step_days": 1.0,
        },
        "population": {
            "population_size": 1000,
        },
    })
}

fn parse_time(configuration: &LayeredConfigTree, key: &str) -> Result<DateTime<Utc>, SimulationError> {
    let raw = configuration.get_str(key)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| {
            SimulationError::config_type(format!(
                "`{}` must be an RFC 3339 timestamp or YYYY-MM-DD date, got `{}`",
                key, raw
            ))
        })
}
