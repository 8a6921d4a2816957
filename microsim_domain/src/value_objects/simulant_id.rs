// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Simulant Identifier Value Object
//!
//! Type-safe identifier for a single simulant (one agent, one row in the
//! state table).
//!
//! ## Overview
//!
//! Simulant identifiers are dense 64-bit row indices assigned at creation
//! time by the population manager. They provide:
//!
//! - **Compile-Time Safety**: Cannot be confused with other numeric types
//! - **Stability**: An identifier is never reused, even after a simulant
//!   leaves the tracked population
//! - **Monotonicity**: Identifiers only grow; the row index is append-only
//! - **Serialization**: Transparent serde representation for snapshots
//!
//! ## Usage Examples
//!
//! ```rust
//! use microsim_domain::value_objects::SimulantId;
//!
//! let first = SimulantId::new(0);
//! let second = SimulantId::new(1);
//! assert!(first < second);
//! assert_eq!(second.value(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable 64-bit simulant index assigned at creation. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulantId(u64);

impl SimulantId {
    /// Creates a new simulant identifier from a raw row index.
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns the raw row index.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the row position in the state table's column buffers.
    ///
    /// Identifiers are dense, so the position is the index itself.
    pub fn position(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SimulantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulant({})", self.0)
    }
}

impl From<u64> for SimulantId {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

impl From<SimulantId> for u64 {
    fn from(id: SimulantId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulant_id_ordering() {
        let ids: Vec<SimulantId> = (0..4).map(SimulantId::new).collect();
        for window in ids.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn test_simulant_id_display() {
        assert_eq!(SimulantId::new(42).to_string(), "simulant(42)");
    }

    #[test]
    fn test_simulant_id_roundtrip() {
        let id = SimulantId::new(7);
        assert_eq!(u64::from(id), 7);
        assert_eq!(SimulantId::from(7u64), id);
        assert_eq!(id.position(), 7);
    }
}
