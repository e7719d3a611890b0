//! Core types for continuation analysis.
//!
//! This module contains the data structures shared between the continuation engine
//! and the event core: the per-step state snapshot, corrector targets and failures,
//! and the settings of the reference stepper.

use std::fmt;

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::SolutionVector;

/// Direction of the branch at a state, split into its parameter and solution parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tangent<U> {
    pub dp: f64,
    pub du: U,
}

/// Immutable snapshot of one accepted continuation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContinuationState<U> {
    pub param: f64,
    pub solution: U,
    /// Index of the accepted step that produced this state.
    pub step: usize,
    /// Pseudo-arclength measured from the start of the branch.
    pub arclength: f64,
    pub tangent: Tangent<U>,
    /// Eigenvalues of the state Jacobian, present only when the stepper was asked for them.
    #[serde(default)]
    pub eigenvalues: Vec<Complex<f64>>,
}

impl<U: SolutionVector> ContinuationState<U> {
    pub fn new(step: usize, param: f64, solution: U, tangent: Tangent<U>) -> Self {
        Self {
            param,
            solution,
            step,
            arclength: 0.0,
            tangent,
            eigenvalues: Vec::new(),
        }
    }

    pub fn with_arclength(mut self, arclength: f64) -> Self {
        self.arclength = arclength;
        self
    }

    pub fn with_eigenvalues(mut self, eigenvalues: Vec<Complex<f64>>) -> Self {
        self.eigenvalues = eigenvalues;
        self
    }
}

/// Where the corrector is asked to land.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum CorrectionTarget {
    /// Fixed parameter value.
    Parameter(f64),
    /// Fixed pseudo-arclength, measured along the guess tangent.
    Arclength(f64),
}

impl CorrectionTarget {
    pub fn value(&self) -> f64 {
        match *self {
            CorrectionTarget::Parameter(value) | CorrectionTarget::Arclength(value) => value,
        }
    }
}

impl fmt::Display for CorrectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionTarget::Parameter(p) => write!(f, "p = {p}"),
            CorrectionTarget::Arclength(s) => write!(f, "s = {s}"),
        }
    }
}

/// The corrector could not produce a solution at the requested target.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("corrector did not converge at {target}: {reason}")]
pub struct ConvergenceFailure {
    pub target: CorrectionTarget,
    pub reason: String,
}

impl ConvergenceFailure {
    pub fn new(target: CorrectionTarget, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }
}

/// Result of asking a stepper for its next step.
#[derive(Debug, Clone)]
pub enum StepOutcome<U> {
    Accepted(ContinuationState<U>),
    /// The corrector failed; the stepper will retry with a different step.
    Rejected(ConvergenceFailure),
    Finished,
}

/// Settings controlling the pseudo-arclength continuation algorithm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContinuationSettings {
    pub step_size: f64,
    pub min_step_size: f64,
    pub max_step_size: f64,
    pub max_steps: usize,
    pub corrector_steps: usize,
    pub corrector_tolerance: f64,
    /// Newton updates shorter than this also end a correction.
    pub step_tolerance: f64,
    pub p_min: f64,
    pub p_max: f64,
    /// Continue towards increasing parameter values at the start.
    pub forward: bool,
    #[serde(default)]
    pub compute_eigenvalues: bool,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            step_size: 0.01,
            min_step_size: 1e-6,
            max_step_size: 0.1,
            max_steps: 1000,
            corrector_steps: 10,
            corrector_tolerance: 1e-9,
            step_tolerance: 1e-10,
            p_min: f64::NEG_INFINITY,
            p_max: f64::INFINITY,
            forward: true,
            compute_eigenvalues: false,
        }
    }
}

impl ContinuationSettings {
    pub fn contains(&self, param: f64) -> bool {
        param >= self.p_min && param <= self.p_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(param: f64) -> ContinuationState<Vec<f64>> {
        ContinuationState::new(
            3,
            param,
            vec![param, 1.0],
            Tangent {
                dp: 1.0,
                du: vec![1.0, 0.0],
            },
        )
    }

    #[test]
    fn builder_sets_optional_fields() {
        let s = state(0.5)
            .with_arclength(2.0)
            .with_eigenvalues(vec![Complex::new(-1.0, 0.0)]);
        assert_eq!(s.step, 3);
        assert_eq!(s.arclength, 2.0);
        assert_eq!(s.eigenvalues.len(), 1);
    }

    #[test]
    fn convergence_failure_names_target() {
        let failure = ConvergenceFailure::new(CorrectionTarget::Parameter(0.25), "singular");
        let message = format!("{failure}");
        assert!(message.contains("p = 0.25"));
        assert!(message.contains("singular"));
        assert_eq!(failure.target.value(), 0.25);
    }

    #[test]
    fn settings_domain_is_inclusive() {
        let settings = ContinuationSettings {
            p_min: -1.0,
            p_max: 1.0,
            ..ContinuationSettings::default()
        };
        assert!(settings.contains(1.0));
        assert!(settings.contains(-1.0));
        assert!(!settings.contains(1.0 + 1e-12));
    }

    #[test]
    fn state_serializes_without_eigenvalues() {
        let json = serde_json::to_string(&state(0.0)).expect("serialize");
        let back: ContinuationState<Vec<f64>> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state(0.0));
    }
}
