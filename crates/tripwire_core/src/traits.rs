use nalgebra::DVector;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

use crate::continuation::types::{
    ContinuationState, ConvergenceFailure, CorrectionTarget, StepOutcome,
};

/// A trait for types that can be stored as solution components.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Minimal capability set the event core needs from a solution representation.
///
/// Dense vectors, sparse storage and matrix-free states all qualify as long as they can
/// be copied, report a length, expose individual components and form a scalar product.
/// Probes only ever read a solution through this interface.
pub trait SolutionVector: Clone {
    /// Number of components.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads component `i` as `f64`. Out-of-range indices read as NaN.
    fn component(&self, i: usize) -> f64;

    /// Euclidean scalar product with another solution of the same length.
    fn dot(&self, other: &Self) -> f64;

    fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
}

impl<T: Scalar> SolutionVector for Vec<T> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn component(&self, i: usize) -> f64 {
        self.as_slice()
            .get(i)
            .and_then(|value| value.to_f64())
            .unwrap_or(f64::NAN)
    }

    fn dot(&self, other: &Self) -> f64 {
        self.iter()
            .zip(other.iter())
            .map(|(&a, &b)| (a * b).to_f64().unwrap_or(f64::NAN))
            .sum()
    }
}

impl<T: Scalar + nalgebra::Scalar> SolutionVector for DVector<T> {
    fn len(&self) -> usize {
        self.nrows()
    }

    fn component(&self, i: usize) -> f64 {
        self.as_slice()
            .get(i)
            .and_then(|value| value.to_f64())
            .unwrap_or(f64::NAN)
    }

    fn dot(&self, other: &Self) -> f64 {
        self.iter()
            .zip(other.iter())
            .map(|(&a, &b)| (a * b).to_f64().unwrap_or(f64::NAN))
            .sum()
    }
}

/// A continuation engine that produces one step per call.
pub trait Stepper<U> {
    /// Attempts the next predictor-corrector step.
    ///
    /// The first call reports the starting point as an accepted state.
    fn advance(&mut self) -> StepOutcome<U>;

    /// Parameter interval `[p_min, p_max]` the stepper is confined to.
    fn domain(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Asks the stepper to attach eigenvalues to every state it produces.
    /// Steppers that never compute eigenvalues may ignore the request.
    fn require_eigenvalues(&mut self, _required: bool) {}
}

/// The nonlinear corrector, used to land on the solution curve at a prescribed
/// parameter or arclength value.
pub trait Corrector<U> {
    /// Corrects onto the curve at `target`, starting from `guess` and its tangent.
    fn correct_at(
        &mut self,
        target: CorrectionTarget,
        guess: &ContinuationState<U>,
    ) -> Result<ContinuationState<U>, ConvergenceFailure>;
}
