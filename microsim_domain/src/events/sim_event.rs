// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Simulation Event Record
//!
//! The immutable record delivered to event bus listeners.
//!
//! ## Overview
//!
//! An event carries:
//!
//! - **Identity**: A unique event id for tracing and diagnostics
//! - **Channel**: The name it was emitted on
//! - **Time**: Both the clock time ("now") and the event time (what the
//!   clock will read after this tick); components computing time-dependent
//!   values should use the event time
//! - **Index**: The simulants scheduled for this tick
//! - **Payload**: Optional free-form data for custom channels
//!
//! Events have value semantics: the bus hands each listener a shared
//! reference and nothing a listener does can alter what later listeners
//! see.
//!
//! ## Framework Channels
//!
//! The engine reserves the channels it drives the lifecycle with
//! (`post_setup`, `time_step_prepare`, `time_step`, `time_step_cleanup`,
//! `collect_metrics`, `simulation_end`). Components may emit custom events
//! but must not emit on a reserved channel.

use crate::value_objects::{SimulantId, StepSize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The event channels reserved for engine emission.
pub const FRAMEWORK_CHANNELS: [&str; 6] = [
    "post_setup",
    "time_step_prepare",
    "time_step",
    "time_step_cleanup",
    "collect_metrics",
    "simulation_end",
];

/// True when `channel` is reserved for the engine.
pub fn is_framework_channel(channel: &str) -> bool {
    FRAMEWORK_CHANNELS.contains(&channel)
}

/// An immutable event delivered to listeners on a named channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    event_id: Uuid,
    channel: String,
    clock_time: DateTime<Utc>,
    event_time: DateTime<Utc>,
    step_size: StepSize,
    index: Vec<SimulantId>,
    payload: BTreeMap<String, serde_json::Value>,
}

impl SimEvent {
    /// Creates an event. The event time is the time at which changes made
    /// during this tick take effect: `clock_time + step_size`.
    pub fn new(
        channel: impl Into<String>,
        clock_time: DateTime<Utc>,
        step_size: StepSize,
        index: Vec<SimulantId>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            channel: channel.into(),
            clock_time,
            event_time: clock_time + step_size.duration(),
            step_size,
            index,
            payload: BTreeMap::new(),
        }
    }

    /// Attaches one payload entry, consuming self.
    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Derives an event on another channel sharing this event's time,
    /// step, and index. Used by components re-emitting within their
    /// sub-phase.
    pub fn derive(&self, channel: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            channel: channel.into(),
            clock_time: self.clock_time,
            event_time: self.event_time,
            step_size: self.step_size,
            index: self.index.clone(),
            payload: BTreeMap::new(),
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The clock reading when the event was emitted ("now").
    pub fn clock_time(&self) -> DateTime<Utc> {
        self.clock_time
    }

    /// The time at which changes made during this tick take effect.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn step_size(&self) -> StepSize {
        self.step_size
    }

    /// The simulants scheduled for this tick.
    pub fn index(&self) -> &[SimulantId] {
        &self.index
    }

    pub fn payload(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.payload
    }

    /// True when the event was emitted on an engine-reserved channel.
    pub fn is_framework_event(&self) -> bool {
        is_framework_channel(&self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(channel: &str) -> SimEvent {
        SimEvent::new(
            channel,
            Utc::now(),
            StepSize::from_days(1).unwrap(),
            vec![SimulantId::new(0), SimulantId::new(1)],
        )
    }

    #[test]
    fn test_event_time_is_clock_plus_step() {
        let e = event("time_step");
        assert_eq!(e.event_time(), e.clock_time() + chrono::Duration::days(1));
    }

    #[test]
    fn test_framework_channel_detection() {
        assert!(event("time_step").is_framework_event());
        assert!(event("collect_metrics").is_framework_event());
        assert!(!event("infection_spread").is_framework_event());
        assert!(is_framework_channel("post_setup"));
        assert!(!is_framework_channel("setup"));
    }

    #[test]
    fn test_derived_event_shares_time_and_index() {
        let base = event("time_step");
        let derived = base.derive("infection_spread");
        assert_eq!(derived.channel(), "infection_spread");
        assert_eq!(derived.clock_time(), base.clock_time());
        assert_eq!(derived.event_time(), base.event_time());
        assert_eq!(derived.index(), base.index());
        assert_ne!(derived.event_id(), base.event_id());
    }

    #[test]
    fn test_payload_attachment() {
        let e = event("custom").with_payload("count", serde_json::json!(3));
        assert_eq!(e.payload()["count"], serde_json::json!(3));
    }
}
