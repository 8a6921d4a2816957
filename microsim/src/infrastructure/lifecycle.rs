// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Lifecycle Manager
//!
//! The phase state machine that gates every subsystem call.
//!
//! ## Overview
//!
//! The simulation moves through the fixed phase order declared by
//! [`LifecyclePhase`]. Every framework operation belongs to an
//! [`Operation`] class with an allowed phase set; managers call
//! [`LifecycleHandle::ensure_allowed`] before doing anything, so a
//! component invoking a framework service outside its allowed phases gets
//! a `LifecyclePhase` error rather than silently corrupting state.
//!
//! ## Operation Policy
//!
//! | Operation | Allowed in |
//! |---|---|
//! | Write configuration | Initialization, Setup |
//! | Register column, initializer, pipeline, modifier, stream, listener, stratification, observation | Setup only |
//! | Create simulants | PopulationInitialization, TimeStepPrepare |
//! | Read/write population via view | PopulationInitialization onward |
//! | Call pipeline | PostSetup onward |
//! | Emit custom event | main-loop sub-phases only |
//!
//! ## Diagnostics
//!
//! The manager records which component instance is currently executing so
//! violation messages can name the offender, and refuses recursive phase
//! transitions (a listener must never drive the lifecycle from inside a
//! lifecycle-driven callback).

use microsim_domain::value_objects::LifecyclePhase;
use microsim_domain::SimulationError;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A class of framework operation with an allowed phase set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Mutating the layered configuration tree.
    WriteConfiguration,
    /// Registering columns, initializers, pipelines, modifiers, streams,
    /// listeners, stratifications, or observations.
    Register,
    /// Invoking the simulant creator.
    CreateSimulants,
    /// Reading or writing the population through a view.
    AccessPopulation,
    /// Calling a value pipeline.
    CallPipeline,
    /// Emitting an event on a non-framework channel.
    EmitCustomEvent,
}

impl Operation {
    /// Checks the operation's allowed phase set.
    pub fn is_allowed_in(&self, phase: LifecyclePhase) -> bool {
        match self {
            Operation::WriteConfiguration => {
                matches!(phase, LifecyclePhase::Initialization | LifecyclePhase::Setup)
            }
            Operation::Register => phase == LifecyclePhase::Setup,
            Operation::CreateSimulants => matches!(
                phase,
                LifecyclePhase::PopulationInitialization | LifecyclePhase::TimeStepPrepare
            ),
            Operation::AccessPopulation => phase >= LifecyclePhase::PopulationInitialization,
            Operation::CallPipeline => phase >= LifecyclePhase::PostSetup,
            Operation::EmitCustomEvent => phase.is_main_loop(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::WriteConfiguration => "write configuration",
            Operation::Register => "register",
            Operation::CreateSimulants => "create simulants",
            Operation::AccessPopulation => "access population",
            Operation::CallPipeline => "call pipeline",
            Operation::EmitCustomEvent => "emit custom event",
        };
        write!(f, "{}", name)
    }
}

/// The shared, cheaply clonable view of the lifecycle state.
///
/// Every manager holds one of these and consults it before acting.
#[derive(Debug)]
pub struct LifecycleHandle {
    phase: Cell<LifecyclePhase>,
    current_component: RefCell<Option<String>>,
}

impl LifecycleHandle {
    fn new() -> Self {
        Self {
            phase: Cell::new(LifecyclePhase::Initialization),
            current_component: RefCell::new(None),
        }
    }

    /// The phase the simulation is currently in.
    pub fn current_phase(&self) -> LifecyclePhase {
        self.phase.get()
    }

    /// The component currently executing, if the engine is inside a
    /// component callback.
    pub fn current_component(&self) -> Option<String> {
        self.current_component.borrow().clone()
    }

    /// Fails with a `LifecyclePhase` error unless `operation` is allowed
    /// in the current phase. The message names the executing component
    /// when one is on the stack.
    pub fn ensure_allowed(&self, operation: Operation) -> Result<(), SimulationError> {
        let phase = self.phase.get();
        if operation.is_allowed_in(phase) {
            return Ok(());
        }
        let offender = self
            .current_component
            .borrow()
            .clone()
            .unwrap_or_else(|| "<framework>".to_string());
        Err(SimulationError::lifecycle(format!(
            "`{}` attempted `{}` during {}",
            offender, operation, phase
        )))
    }
}

/// Owns the phase state machine and drives transitions.
pub struct LifecycleManager {
    handle: Rc<LifecycleHandle>,
    in_transition: Cell<bool>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            handle: Rc::new(LifecycleHandle::new()),
            in_transition: Cell::new(false),
        }
    }

    /// The shared handle managers gate their operations on.
    pub fn handle(&self) -> Rc<LifecycleHandle> {
        Rc::clone(&self.handle)
    }

    /// Moves the simulation into `next`.
    ///
    /// Fails when the transition is not legal in the phase order, and
    /// refuses recursion: a transition may not be initiated while another
    /// transition's listeners are still running.
    pub fn advance_to(&self, next: LifecyclePhase) -> Result<(), SimulationError> {
        if self.in_transition.get() {
            return Err(SimulationError::lifecycle(format!(
                "recursive lifecycle transition into {} refused",
                next
            )));
        }
        let current = self.handle.current_phase();
        if !current.may_transition_to(next) {
            return Err(SimulationError::lifecycle(format!(
                "illegal transition {} -> {}",
                current, next
            )));
        }
        debug!(previous = %current, next = %next, "lifecycle transition");
        self.in_transition.set(true);
        self.handle.phase.set(next);
        self.in_transition.set(false);
        Ok(())
    }

    /// Runs `body` with the phase advanced to `next`, holding the
    /// transition guard for the duration so listeners cannot re-enter the
    /// state machine.
    pub fn transition_scope<T>(
        &self,
        next: LifecyclePhase,
        body: impl FnOnce() -> Result<T, SimulationError>,
    ) -> Result<T, SimulationError> {
        if self.in_transition.get() {
            return Err(SimulationError::lifecycle(format!(
                "recursive lifecycle transition into {} refused",
                next
            )));
        }
        let current = self.handle.current_phase();
        if !current.may_transition_to(next) {
            return Err(SimulationError::lifecycle(format!(
                "illegal transition {} -> {}",
                current, next
            )));
        }
        debug!(previous = %current, next = %next, "lifecycle transition");
        self.handle.phase.set(next);
        self.in_transition.set(true);
        let result = body();
        self.in_transition.set(false);
        result
    }

    /// Records the component the engine is about to call into.
    pub fn enter_component(&self, name: &str) {
        *self.handle.current_component.borrow_mut() = Some(name.to_string());
    }

    /// Clears the executing-component record.
    pub fn exit_component(&self) {
        *self.handle.current_component.borrow_mut() = None;
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
