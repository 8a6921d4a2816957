// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain services: stateless logic that does not belong to a single
//! entity or value object.

pub mod combiners;
pub mod crn;
pub mod datetime_serde;

pub use combiners::{rescale, union, Combiner, PostProcessor, RateConversion};
