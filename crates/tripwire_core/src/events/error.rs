use thiserror::Error;

use super::settings::SettingsError;

/// Errors raised while building events or validating their settings.
///
/// All of them surface before the first continuation step.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EventError {
    #[error("arity mismatch: declared {declared} outputs, evaluator produces {actual}")]
    ArityMismatch { declared: usize, actual: usize },

    #[error("expected {expected} labels, got {actual}")]
    LabelMismatch { expected: usize, actual: usize },

    #[error("an event must produce at least one output")]
    EmptyEvent,

    #[error("a set of events needs at least one member")]
    EmptySet,

    #[error("invalid event settings: {0}")]
    Settings(#[from] SettingsError),
}
