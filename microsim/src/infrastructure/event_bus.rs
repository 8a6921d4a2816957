// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Bus
//!
//! Named channels with priority-ordered, synchronous listeners.
//!
//! ## Overview
//!
//! The engine drives lifecycle sub-phases by emitting framework events;
//! components subscribe listeners during setup. On emit, listeners fire in
//! ascending priority order. Within a single priority tier the order is
//! unspecified - callers must not rely on it, and tests may only assert
//! cross-priority ordering.
//!
//! Emission is synchronous and error-propagating: the first listener
//! returning an error aborts the emission and the error surfaces to the
//! driver.
//!
//! ## Custom Events
//!
//! Components may emit their own events, with two restrictions enforced
//! here: never on a framework-reserved channel, and only while the main
//! loop is inside a sub-phase. This keeps custom signals between
//! cooperating components possible while closing the cross-tick goto
//! pattern.

use crate::infrastructure::lifecycle::{LifecycleHandle, Operation};
use microsim_domain::events::{is_framework_channel, SimEvent};
use microsim_domain::value_objects::ListenerPriority;
use microsim_domain::SimulationError;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::trace;

/// A listener callback. Mutation of component state goes through the
/// interior mutability the listener captured.
pub type ListenerCallback = Box<dyn FnMut(&SimEvent) -> Result<(), SimulationError>>;

struct Subscription {
    name: String,
    priority: ListenerPriority,
    sequence: usize,
    callback: Rc<RefCell<ListenerCallback>>,
}

/// Named channels with priority-ordered listeners.
pub struct EventBus {
    channels: RefCell<BTreeMap<String, Vec<Subscription>>>,
    lifecycle: Rc<LifecycleHandle>,
    next_sequence: Cell<usize>,
}

impl EventBus {
    pub fn new(lifecycle: Rc<LifecycleHandle>) -> Self {
        Self {
            channels: RefCell::new(BTreeMap::new()),
            lifecycle,
            next_sequence: Cell::new(0),
        }
    }

    /// Subscribes a listener to a channel. Setup only.
    pub fn subscribe(
        &self,
        channel: &str,
        listener_name: &str,
        priority: ListenerPriority,
        callback: ListenerCallback,
    ) -> Result<(), SimulationError> {
        self.lifecycle.ensure_allowed(Operation::Register)?;
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);
        self.channels
            .borrow_mut()
            .entry(channel.to_string())
            .or_default()
            .push(Subscription {
                name: listener_name.to_string(),
                priority,
                sequence,
                callback: Rc::new(RefCell::new(callback)),
            });
        Ok(())
    }

    /// Emits a component event.
    ///
    /// Fails on framework-reserved channels and outside main-loop
    /// sub-phases.
    pub fn emit(&self, event: &SimEvent) -> Result<(), SimulationError> {
        if is_framework_channel(event.channel()) {
            return Err(SimulationError::component_contract(format!(
                "channel `{}` is reserved for the framework",
                event.channel()
            )));
        }
        self.lifecycle.ensure_allowed(Operation::EmitCustomEvent)?;
        self.dispatch(event)
    }

    /// Emits a framework event. Engine-internal.
    pub(crate) fn emit_framework(&self, event: &SimEvent) -> Result<(), SimulationError> {
        debug_assert!(is_framework_channel(event.channel()));
        self.dispatch(event)
    }

    fn dispatch(&self, event: &SimEvent) -> Result<(), SimulationError> {
        // Snapshot the firing order before releasing the registry borrow,
        // so a listener that emits a further event cannot invalidate the
        // iteration.
        let mut firing: Vec<(ListenerPriority, usize, String, Rc<RefCell<ListenerCallback>>)> = {
            let channels = self.channels.borrow();
            match channels.get(event.channel()) {
                Some(subscriptions) => subscriptions
                    .iter()
                    .map(|s| (s.priority, s.sequence, s.name.clone(), Rc::clone(&s.callback)))
                    .collect(),
                None => return Ok(()),
            }
        };
        firing.sort_by_key(|(priority, sequence, _, _)| (*priority, *sequence));
        for (priority, _, name, callback) in firing {
            trace!(channel = event.channel(), listener = %name, priority = priority.value(), "firing listener");
            let mut callback = callback.try_borrow_mut().map_err(|_| {
                SimulationError::internal(format!(
                    "listener `{}` on `{}` re-entered while already running",
                    name,
                    event.channel()
                ))
            })?;
            (callback)(event)?;
        }
        Ok(())
    }

    /// The number of listeners on a channel. Diagnostic.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .borrow()
            .get(channel)
            .map(|subscriptions| subscriptions.len())
            .unwrap_or(0)
    }
}
