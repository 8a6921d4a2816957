// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Exit Code Management
//!
//! Provides the standardized process exit codes the simulation driver
//! reports.
//!
//! ## Exit Code Conventions
//!
//! - **0**: Success
//! - **1**: Unhandled error
//! - **2**: Invalid configuration
//! - **3**: Unresolved or cyclic dependency
//!
//! ## Usage
//!
//! ```rust,no_run
//! use microsim_bootstrap::exit_code::ExitCode;
//!
//! fn run_application() -> Result<(), Box<dyn std::error::Error>> {
//!     // Application logic here
//!     Ok(())
//! }
//!
//! fn main() {
//!     let result = run_application();
//!     let exit_code = match result {
//!         Ok(()) => ExitCode::Success,
//!         Err(_) => ExitCode::Error,
//!     };
//!     std::process::exit(exit_code.as_i32());
//! }
//! ```

use std::fmt;

/// Process exit codes reported by the simulation driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful termination (0)
    #[default]
    Success = 0,

    /// Unhandled error (1)
    /// - Runtime framework errors
    /// - Component failures during the run
    Error = 1,

    /// Invalid configuration (2)
    /// - Missing or mis-typed configuration keys
    /// - Conflicting component defaults
    /// - Malformed model specification
    InvalidConfiguration = 2,

    /// Unresolved or cyclic dependency (3)
    /// - A declared dependency has no registered producer
    /// - The resource graph contains a cycle
    DependencyResolution = 3,
}

impl ExitCode {
    /// Returns the raw process exit code.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Maps a framework error category to an exit code.
    ///
    /// Categories come from `SimulationError::category()`; anything not
    /// specifically classified is an unhandled error.
    pub fn from_category(category: &str) -> Self {
        match category {
            "configuration" => ExitCode::InvalidConfiguration,
            "dependency" => ExitCode::DependencyResolution,
            _ => ExitCode::Error,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Success => "success",
            ExitCode::Error => "error",
            ExitCode::InvalidConfiguration => "invalid configuration",
            ExitCode::DependencyResolution => "dependency resolution",
        };
        write!(f, "{} ({})", name, self.as_i32())
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::Error.as_i32(), 1);
        assert_eq!(ExitCode::InvalidConfiguration.as_i32(), 2);
        assert_eq!(ExitCode::DependencyResolution.as_i32(), 3);
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(ExitCode::from_category("configuration"), ExitCode::InvalidConfiguration);
        assert_eq!(ExitCode::from_category("dependency"), ExitCode::DependencyResolution);
        assert_eq!(ExitCode::from_category("lifecycle"), ExitCode::Error);
        assert_eq!(ExitCode::from_category("population"), ExitCode::Error);
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::DependencyResolution.to_string(), "dependency resolution (3)");
    }
}
