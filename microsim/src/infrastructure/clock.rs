// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Simulation Clock
//!
//! Global time plus optional per-simulant step sizes.
//!
//! ## Overview
//!
//! The clock carries a start time, an end time, and a global step. On
//! each main-loop pass it determines:
//!
//! - the **scheduled index** - the simulants whose next event time has
//!   arrived; simulants not scheduled this tick are excluded from the
//!   sub-phase events, and
//! - the **tick step** - the smallest step proposed for any scheduled
//!   simulant, which the emitted events carry.
//!
//! Step-size modifiers map a subset of simulants to a proposed step; the
//! clock takes the per-simulant minimum, bounded below by the global
//! minimum step. After the tick the clock advances to the earliest next
//! event time over all simulants (the global step when no modifiers are
//! installed).
//!
//! ## Event Time vs Clock Time
//!
//! The *event time* carried by a sub-phase event is
//! `current_clock + tick_step` - the time at which changes made during
//! this tick take effect. Components computing time-dependent values use
//! event time, never the raw clock.

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use microsim_domain::value_objects::{SimulantId, StepSize};
use microsim_domain::SimulationError;
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

/// Proposes per-simulant steps for a subset of the scheduled index.
/// `None` entries make no proposal for that simulant.
pub type StepModifierFn = Rc<dyn Fn(&[SimulantId]) -> Result<Vec<Option<StepSize>>, SimulationError>>;

struct StepModifierRecord {
    name: String,
    callable: StepModifierFn,
}

/// The global clock with per-simulant scheduling.
pub struct SimulationClock {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    global_step: StepSize,
    minimum_step: StepSize,
    current: Cell<DateTime<Utc>>,
    tick_step: Cell<StepSize>,
    next_event: RefCell<Vec<DateTime<Utc>>>,
    tick_scheduled: RefCell<Vec<SimulantId>>,
    tick_proposed: RefCell<Vec<StepSize>>,
    modifiers: RefCell<Vec<StepModifierRecord>>,
    lifecycle: Rc<LifecycleHandle>,
}

impl SimulationClock {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        global_step: StepSize,
        minimum_step: StepSize,
        lifecycle: Rc<LifecycleHandle>,
    ) -> Result<Self, SimulationError> {
        if end < start {
            return Err(SimulationError::config_type(format!(
                "simulation end {} precedes start {}",
                end, start
            )));
        }
        if minimum_step > global_step {
            return Err(SimulationError::config_type(format!(
                "minimum step {} exceeds the global step {}",
                minimum_step, global_step
            )));
        }
        Ok(Self {
            start,
            end,
            global_step,
            minimum_step,
            current: Cell::new(start),
            tick_step: Cell::new(global_step),
            next_event: RefCell::new(Vec::new()),
            tick_scheduled: RefCell::new(Vec::new()),
            tick_proposed: RefCell::new(Vec::new()),
            modifiers: RefCell::new(Vec::new()),
            lifecycle,
        })
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end
    }

    /// The clock reading "now".
    pub fn current_time(&self) -> DateTime<Utc> {
        self.current.get()
    }

    /// The step the current tick is taking.
    pub fn step_size(&self) -> StepSize {
        self.tick_step.get()
    }

    /// The time at which changes made during this tick take effect.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.current.get() + self.step_size().duration()
    }

    /// True while the main loop has ticks left to run.
    pub fn should_continue(&self) -> bool {
        self.current.get() < self.end
    }

    /// Installs a per-simulant step-size modifier. Setup only.
    pub fn register_step_modifier(
        &self,
        name: &str,
        callable: StepModifierFn,
    ) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        self.modifiers.borrow_mut().push(StepModifierRecord {
            name: name.to_string(),
            callable,
        });
        Ok(())
    }

    /// Extends the schedule for newly created simulants. They become due
    /// at the current clock reading, so they join the next scheduling
    /// decision.
    pub(crate) fn on_simulants_created(&self, count: usize) {
        let now = self.current.get();
        self.next_event
            .borrow_mut()
            .extend(std::iter::repeat(now).take(count));
    }

    /// Opens a tick: computes the scheduled index and the tick step.
    /// Engine-internal.
    pub(crate) fn begin_tick(&self) -> Result<(Vec<SimulantId>, StepSize), SimulationError> {
        let now = self.current.get();
        let next_event = self.next_event.borrow();
        let scheduled: Vec<SimulantId> = next_event
            .iter()
            .enumerate()
            .filter(|(_, due)| **due <= now)
            .map(|(position, _)| SimulantId::new(position as u64))
            .collect();
        drop(next_event);

        let mut proposed = vec![self.global_step; scheduled.len()];
        for record in self.modifiers.borrow().iter() {
            let proposals = (record.callable)(&scheduled)?;
            if proposals.len() != scheduled.len() {
                return Err(SimulationError::internal(format!(
                    "step modifier `{}` returned {} proposals for {} scheduled simulants",
                    record.name,
                    proposals.len(),
                    scheduled.len()
                )));
            }
            for (slot, proposal) in proposed.iter_mut().zip(proposals) {
                if let Some(step) = proposal {
                    // Bounded below by the configured minimum.
                    *slot = (*slot).min(step.max(self.minimum_step));
                }
            }
        }
        let tick_step = proposed.iter().copied().min().unwrap_or(self.global_step);
        self.tick_step.set(tick_step);
        *self.tick_scheduled.borrow_mut() = scheduled.clone();
        *self.tick_proposed.borrow_mut() = proposed;
        trace!(scheduled = scheduled.len(), step_days = tick_step.days_f64(), "tick opened");
        Ok((scheduled, tick_step))
    }

    /// Closes a tick: records per-simulant next event times and advances
    /// the clock to the earliest one. Engine-internal.
    pub(crate) fn end_tick(&self) {
        let now = self.current.get();
        {
            let scheduled = self.tick_scheduled.borrow();
            let proposed = self.tick_proposed.borrow();
            let mut next_event = self.next_event.borrow_mut();
            for (id, step) in scheduled.iter().zip(proposed.iter()) {
                next_event[id.position()] = now + step.duration();
            }
        }
        let next = self
            .next_event
            .borrow()
            .iter()
            .copied()
            .filter(|due| *due > now)
            .min()
            .unwrap_or(now + self.global_step.duration());
        self.current.set(next);
    }

    /// The schedule state, for snapshots.
    pub(crate) fn schedule_state(&self) -> (DateTime<Utc>, Vec<DateTime<Utc>>) {
        (self.current.get(), self.next_event.borrow().clone())
    }

    /// Restores the schedule state from a snapshot.
    pub(crate) fn restore_schedule_state(&self, current: DateTime<Utc>, next_event: Vec<DateTime<Utc>>) {
        self.current.set(current);
        *self.next_event.borrow_mut() = next_event;
    }
}
