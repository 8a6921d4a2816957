// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Configuration infrastructure: the layered, provenance-tracking tree.

pub mod layered_config;

pub use layered_config::{ConfigSource, LayerEntry, LayeredConfigTree};
