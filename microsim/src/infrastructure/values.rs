// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Value Pipeline System
//!
//! Named multi-party computations: one source, zero or more modifiers,
//! composed by a combiner and finished by a post-processor. The engine's
//! main extensibility mechanism.
//!
//! ## Call Semantics
//!
//! A pipeline call takes a simulant index plus the positional argument
//! frames declared at registration (the arity is checked both at
//! registration and at call time):
//!
//! - **Replace combiner** - the value starts at the source's output; each
//!   modifier receives the source's arguments plus the current value and
//!   returns the replacement. After `k` modifiers the value depends only
//!   on the source and the first `k` modifiers in registration order.
//! - **List combiner** - the source returns a list; each modifier has the
//!   source's signature and appends its output.
//!
//! The combined value then passes through the post-processor (identity,
//! annual-to-step rescale, or independent-proportion union).
//!
//! ## Contracts
//!
//! - A pipeline called without a registered source fails with
//!   `UnsourcedPipeline`
//! - Registration after setup fails
//! - Calls are reentrant, but a call-cycle between pipelines is detected
//!   and fails with `CyclicDependency`

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use microsim_domain::services::combiners::{self, Combiner, PostProcessor};
use microsim_domain::value_objects::{
    AttributeColumn, ListenerPriority, PopulationSlice, ResourceId, SimulantId, StepSize,
};
use microsim_domain::SimulationError;
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

/// The call-time inputs a source or modifier sees.
pub struct PipelineCallArgs<'a> {
    /// The simulants the value is requested for.
    pub index: &'a [SimulantId],
    /// The positional argument frames, keyed by the same index.
    pub arguments: &'a [PopulationSlice],
    /// The time at which the produced value takes effect.
    pub event_time: DateTime<Utc>,
}

/// A pipeline's combined value: one column, or a list of columns under
/// the list combiner.
#[derive(Debug, Clone)]
pub enum PipelineValue {
    Single(AttributeColumn),
    Many(Vec<AttributeColumn>),
}

impl PipelineValue {
    /// Unwraps a single column, failing on a list value.
    pub fn into_single(self) -> Result<AttributeColumn, SimulationError> {
        match self {
            PipelineValue::Single(column) => Ok(column),
            PipelineValue::Many(_) => Err(SimulationError::internal(
                "expected a single-column pipeline value, got a list".to_string(),
            )),
        }
    }
}

/// A source callable.
pub type SourceFn = Box<dyn Fn(&PipelineCallArgs<'_>) -> Result<PipelineValue, SimulationError>>;

/// A modifier callable. Under the replace combiner `prior` carries the
/// current value; under the list combiner it is `None`.
pub type ModifierFn =
    Box<dyn Fn(&PipelineCallArgs<'_>, Option<PipelineValue>) -> Result<PipelineValue, SimulationError>>;

struct ModifierRecord {
    name: String,
    priority: ListenerPriority,
    sequence: usize,
    callable: ModifierFn,
}

struct PipelineInner {
    name: String,
    arity: Cell<usize>,
    source: RefCell<Option<SourceFn>>,
    modifiers: RefCell<Vec<ModifierRecord>>,
    combiner: Cell<Combiner>,
    post_processor: Cell<PostProcessor>,
}

impl PipelineInner {
    fn shell(name: &str) -> Self {
        Self {
            name: name.to_string(),
            arity: Cell::new(0),
            source: RefCell::new(None),
            modifiers: RefCell::new(Vec::new()),
            combiner: Cell::new(Combiner::Replace),
            post_processor: Cell::new(PostProcessor::Identity),
        }
    }
}

/// Provides the current step size at call time, for the rescale
/// post-processor.
pub type StepProvider = Rc<dyn Fn() -> StepSize>;

/// Owns every pipeline and mediates calls.
pub struct ValueManager {
    pipelines: RefCell<BTreeMap<String, Rc<PipelineInner>>>,
    call_stack: RefCell<Vec<String>>,
    step_provider: RefCell<Option<StepProvider>>,
    next_sequence: Cell<usize>,
    lifecycle: Rc<LifecycleHandle>,
}

impl ValueManager {
    pub fn new(lifecycle: Rc<LifecycleHandle>) -> Self {
        Self {
            pipelines: RefCell::new(BTreeMap::new()),
            call_stack: RefCell::new(Vec::new()),
            step_provider: RefCell::new(None),
            next_sequence: Cell::new(0),
            lifecycle,
        }
    }

    /// Wires the clock's step into rescale post-processing. Engine-internal.
    pub(crate) fn set_step_provider(&self, provider: StepProvider) {
        *self.step_provider.borrow_mut() = Some(provider);
    }

    fn pipeline(&self, name: &str) -> Rc<PipelineInner> {
        Rc::clone(
            self.pipelines
                .borrow_mut()
                .entry(name.to_string())
                .or_insert_with(|| Rc::new(PipelineInner::shell(name))),
        )
    }

    /// Registers a pipeline's source with its arity, combiner, and
    /// post-processor. Setup only; a pipeline has at most one source.
    pub fn register_producer(
        self: &Rc<Self>,
        name: &str,
        arity: usize,
        combiner: Combiner,
        post_processor: PostProcessor,
        source: SourceFn,
    ) -> Result<PipelineHandle, SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        let pipeline = self.pipeline(name);
        {
            let mut slot = pipeline.source.borrow_mut();
            if slot.is_some() {
                return Err(SimulationError::component_contract(format!(
                    "pipeline `{}` already has a registered source",
                    name
                )));
            }
            *slot = Some(source);
        }
        pipeline.arity.set(arity);
        pipeline.combiner.set(combiner);
        pipeline.post_processor.set(post_processor);
        debug!(pipeline = name, arity, %combiner, post = %post_processor, "value producer registered");
        Ok(self.handle(name))
    }

    /// Registers a modifier. Setup only. Modifiers apply in registration
    /// order within their priority tier.
    pub fn register_modifier(
        &self,
        name: &str,
        modifier_name: &str,
        priority: ListenerPriority,
        callable: ModifierFn,
    ) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        let pipeline = self.pipeline(name);
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);
        pipeline.modifiers.borrow_mut().push(ModifierRecord {
            name: modifier_name.to_string(),
            priority,
            sequence,
            callable,
        });
        Ok(())
    }

    /// A callable handle on a pipeline. The handle stays valid (and
    /// immutable) for the life of the simulation.
    pub fn handle(self: &Rc<Self>, name: &str) -> PipelineHandle {
        let _ = self.pipeline(name);
        PipelineHandle {
            name: name.to_string(),
            manager: Rc::clone(self),
        }
    }

    /// The registered pipeline names, for diagnostics.
    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines.borrow().keys().cloned().collect()
    }

    fn call(
        &self,
        name: &str,
        index: &[SimulantId],
        arguments: &[PopulationSlice],
        event_time: DateTime<Utc>,
    ) -> Result<PipelineValue, SimulationError> {
        self.lifecycle.ensure_allowed(Operation::CallPipeline)?;
        {
            let stack = self.call_stack.borrow();
            if stack.iter().any(|caller| caller == name) {
                let mut path: Vec<ResourceId> =
                    stack.iter().map(|p| ResourceId::pipeline(p.clone())).collect();
                path.push(ResourceId::pipeline(name));
                return Err(SimulationError::CyclicDependency { path });
            }
        }
        let pipeline = {
            let pipelines = self.pipelines.borrow();
            match pipelines.get(name) {
                Some(pipeline) => Rc::clone(pipeline),
                None => return Err(SimulationError::UnsourcedPipeline(name.to_string())),
            }
        };
        self.call_stack.borrow_mut().push(name.to_string());
        let result = self.call_inner(&pipeline, index, arguments, event_time);
        self.call_stack.borrow_mut().pop();
        result
    }

    fn call_inner(
        &self,
        pipeline: &PipelineInner,
        index: &[SimulantId],
        arguments: &[PopulationSlice],
        event_time: DateTime<Utc>,
    ) -> Result<PipelineValue, SimulationError> {
        if arguments.len() != pipeline.arity.get() {
            return Err(SimulationError::component_contract(format!(
                "pipeline `{}` takes {} argument frames, got {}",
                pipeline.name,
                pipeline.arity.get(),
                arguments.len()
            )));
        }
        let args = PipelineCallArgs {
            index,
            arguments,
            event_time,
        };
        let source = pipeline.source.borrow();
        let source = source
            .as_ref()
            .ok_or_else(|| SimulationError::UnsourcedPipeline(pipeline.name.clone()))?;

        let modifiers = pipeline.modifiers.borrow();
        let mut firing: Vec<&ModifierRecord> = modifiers.iter().collect();
        firing.sort_by_key(|record| (record.priority, record.sequence));

        let combined = match pipeline.combiner.get() {
            Combiner::Replace => {
                let mut value = source(&args)?;
                for record in &firing {
                    value = (record.callable)(&args, Some(value))?;
                }
                value
            }
            Combiner::List => {
                let mut list = match source(&args)? {
                    PipelineValue::Many(list) => list,
                    PipelineValue::Single(_) => {
                        return Err(SimulationError::component_contract(format!(
                            "list-combined pipeline `{}` has a source returning a single value",
                            pipeline.name
                        )));
                    }
                };
                for record in &firing {
                    let element = (record.callable)(&args, None)?.into_single().map_err(|_| {
                        SimulationError::component_contract(format!(
                            "modifier `{}` on list-combined pipeline `{}` must return one column",
                            record.name, pipeline.name
                        ))
                    })?;
                    list.push(element);
                }
                PipelineValue::Many(list)
            }
        };
        self.post_process(pipeline, combined)
    }

    fn post_process(
        &self,
        pipeline: &PipelineInner,
        value: PipelineValue,
    ) -> Result<PipelineValue, SimulationError> {
        match pipeline.post_processor.get() {
            PostProcessor::Identity => Ok(value),
            PostProcessor::Rescale(conversion) => {
                let step = self.current_step()?;
                let column = value.into_single()?;
                Ok(PipelineValue::Single(combiners::rescale(
                    &column,
                    conversion,
                    step.years_f64(),
                )?))
            }
            PostProcessor::Union => {
                let columns = match value {
                    PipelineValue::Many(columns) => columns,
                    PipelineValue::Single(column) => vec![column],
                };
                Ok(PipelineValue::Single(combiners::union(&columns)?))
            }
        }
    }

    fn current_step(&self) -> Result<StepSize, SimulationError> {
        let provider = self.step_provider.borrow();
        let provider = provider.as_ref().ok_or_else(|| {
            SimulationError::internal("rescale post-processor called before the clock was wired".to_string())
        })?;
        Ok(provider())
    }
}

/// A shared, immutable handle for calling one pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    name: String,
    manager: Rc<ValueManager>,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle").field("name", &self.name).finish_non_exhaustive()
    }
}

impl PipelineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the pipeline for `index` with the declared argument frames.
    pub fn call(
        &self,
        index: &[SimulantId],
        arguments: &[PopulationSlice],
        event_time: DateTime<Utc>,
    ) -> Result<PipelineValue, SimulationError> {
        self.manager.call(&self.name, index, arguments, event_time)
    }

    /// Calls the pipeline and unwraps a single-column value.
    pub fn call_single(
        &self,
        index: &[SimulantId],
        arguments: &[PopulationSlice],
        event_time: DateTime<Utc>,
    ) -> Result<AttributeColumn, SimulationError> {
        self.call(index, arguments, event_time)?.into_single()
    }
}
