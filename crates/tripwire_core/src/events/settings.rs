use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::continuation::types::{ContinuationState, CorrectionTarget};

/// How much work is spent on events after each accepted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DetectEvent {
    /// Probes are never evaluated.
    Off,
    /// Events are reported at the step where they were flagged.
    Detect,
    /// Events are flagged and then located by bisection.
    Locate,
}

impl TryFrom<u8> for DetectEvent {
    type Error = SettingsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Detect),
            2 => Ok(Self::Locate),
            other => Err(SettingsError::DetectMode(other)),
        }
    }
}

impl From<DetectEvent> for u8 {
    fn from(mode: DetectEvent) -> Self {
        match mode {
            DetectEvent::Off => 0,
            DetectEvent::Detect => 1,
            DetectEvent::Locate => 2,
        }
    }
}

/// Coordinate that bisection halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BisectionVariable {
    /// The continuation parameter. Cannot resolve events located at folds.
    #[default]
    Parameter,
    /// The pseudo-arclength along the branch.
    Arclength,
}

impl BisectionVariable {
    pub fn coordinate<U>(self, state: &ContinuationState<U>) -> f64 {
        match self {
            BisectionVariable::Parameter => state.param,
            BisectionVariable::Arclength => state.arclength,
        }
    }

    pub fn target(self, value: f64) -> CorrectionTarget {
        match self {
            BisectionVariable::Parameter => CorrectionTarget::Parameter(value),
            BisectionVariable::Arclength => CorrectionTarget::Arclength(value),
        }
    }
}

/// Errors that can occur when validating event settings.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unknown detect_event mode {0}, expected 0, 1 or 2")]
    DetectMode(u8),

    #[error("n_inversion must be positive")]
    NInversion,

    #[error("max_bisection_steps must be positive")]
    MaxBisectionSteps,

    #[error("tol_param_bisection_event must be finite and positive")]
    Tolerance,

    #[error("parameter domain must satisfy p_min < p_max")]
    Domain,
}

/// Configuration of event detection and localization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub detect_event: DetectEvent,
    /// Side inversions after which a bisection counts as converged. The default is high
    /// enough that the bracket tolerance is reached first.
    pub n_inversion: usize,
    /// Hard cap on corrector-backed bisection steps per event.
    pub max_bisection_steps: usize,
    /// Target width of the final bracket, also the zero threshold for probe values.
    pub tol_param_bisection_event: f64,
    /// Parameter domain events are confined to, intersected with the stepper's own.
    pub p_min: f64,
    pub p_max: f64,
    pub bisection_variable: BisectionVariable,
    /// Shortened retries after a failed correction before giving up on a bracket.
    pub corrector_retries: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            detect_event: DetectEvent::Locate,
            n_inversion: 64,
            max_bisection_steps: 64,
            tol_param_bisection_event: 1e-10,
            p_min: f64::NEG_INFINITY,
            p_max: f64::INFINITY,
            bisection_variable: BisectionVariable::Parameter,
            corrector_retries: 3,
        }
    }
}

impl EventSettings {
    /// Checks counts, tolerances and the parameter domain.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.n_inversion == 0 {
            return Err(SettingsError::NInversion);
        }
        if self.max_bisection_steps == 0 {
            return Err(SettingsError::MaxBisectionSteps);
        }
        if !self.tol_param_bisection_event.is_finite() || self.tol_param_bisection_event <= 0.0 {
            return Err(SettingsError::Tolerance);
        }
        if !(self.p_min < self.p_max) {
            return Err(SettingsError::Domain);
        }
        Ok(())
    }
}
