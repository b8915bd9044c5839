//! Telemetry port.
//!
//! A narrow capability for reporting handled failures. Passed by dependency
//! injection; when absent, reporting is disabled.

use crate::error::EngineError;

/// Sink for handled exceptions.
pub trait TelemetryClient: Send + Sync {
    /// Report a failure the engine handled, with free-form tags.
    fn track_exception(&self, error: &EngineError, tags: &[(&str, &str)]);
}
