// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Logger
//!
//! Lightweight logging abstraction for the bootstrap phase.
//!
//! ## Design Rationale
//!
//! The bootstrap logger is a **simplified logging interface** specifically
//! for operations that happen before the application's tracing subscriber
//! is installed. It provides:
//!
//! - **Minimal API** - Only essential log levels
//! - **Trait-based** - Testable with a no-op implementation
//! - **Integration-ready** - The console implementation routes through
//!   tracing once the subscriber exists
//!
//! ## Usage
//!
//! ```rust
//! use microsim_bootstrap::logger::{BootstrapLogger, ConsoleLogger};
//!
//! let logger = ConsoleLogger::new();
//! logger.info("Starting application bootstrap");
//! logger.debug("Parsing command line arguments");
//! ```

/// Bootstrap logging abstraction
///
/// Provides a simple logging interface for bootstrap operations.
pub trait BootstrapLogger {
    /// Log an error message
    ///
    /// Used for fatal errors during bootstrap that will cause termination.
    fn error(&self, message: &str);

    /// Log a warning message
    ///
    /// Used for non-fatal issues that may affect operation.
    fn warn(&self, message: &str);

    /// Log an info message
    ///
    /// Used for normal bootstrap progress messages.
    fn info(&self, message: &str);

    /// Log a debug message
    ///
    /// Used for detailed diagnostic information during bootstrap.
    fn debug(&self, message: &str);
}

/// Console logger implementation using tracing
///
/// Routes bootstrap logs through the tracing crate for consistent logging.
pub struct ConsoleLogger {
    prefix: String,
}

impl ConsoleLogger {
    /// Create a new console logger with the default prefix
    pub fn new() -> Self {
        Self::with_prefix("bootstrap")
    }

    /// Create a new console logger with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapLogger for ConsoleLogger {
    fn error(&self, message: &str) {
        tracing::error!("[{}] {}", self.prefix, message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("[{}] {}", self.prefix, message);
    }

    fn info(&self, message: &str) {
        tracing::info!("[{}] {}", self.prefix, message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!("[{}] {}", self.prefix, message);
    }
}

/// No-op logger for tests
pub struct NullLogger;

impl BootstrapLogger for NullLogger {
    fn error(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_logger_construction() {
        let logger = ConsoleLogger::new();
        assert_eq!(logger.prefix, "bootstrap");
        let custom = ConsoleLogger::with_prefix("setup");
        assert_eq!(custom.prefix, "setup");
    }

    #[test]
    fn test_null_logger_is_silent() {
        let logger = NullLogger;
        logger.error("ignored");
        logger.warn("ignored");
        logger.info("ignored");
        logger.debug("ignored");
    }
}
