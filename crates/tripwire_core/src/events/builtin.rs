//! Probes for the special points every branch can carry.

use super::error::EventError;
use super::function::{ContinuousEvent, ProbeContext, ProbeKind};
use crate::continuation::types::ContinuationState;
use crate::continuation::util::count_unstable;
use crate::traits::SolutionVector;

fn parity(count: usize) -> f64 {
    if count % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Fires where the parameter component of the tangent changes sign.
///
/// Locating a fold needs arclength bisection, since the parameter is not monotone there.
pub fn fold_event<U: SolutionVector + 'static>() -> ContinuousEvent<U> {
    ContinuousEvent::from_boxed(
        1,
        ProbeKind::Fold,
        Box::new(|_: &ProbeContext, state: &ContinuationState<U>| vec![state.tangent.dp]),
    )
}

/// Fires when the number of unstable eigenvalues changes.
///
/// The first output tracks real eigenvalues crossing the imaginary axis (branch points),
/// the second tracks complex pairs (Hopf points). Each is the parity of its count, so a
/// single crossing flips the sign.
pub fn bifurcation_event<U: SolutionVector + 'static>() -> ContinuousEvent<U> {
    ContinuousEvent::from_boxed(
        2,
        ProbeKind::Bifurcation,
        Box::new(|_: &ProbeContext, state: &ContinuationState<U>| {
            let (real, pairs) = count_unstable(&state.eigenvalues);
            vec![parity(real), parity(pairs)]
        }),
    )
    .requiring_eigenvalues()
}

/// Fires when the parameter passes any of `params`, one output per value.
///
/// # Errors
///
/// Returns `EventError::EmptyEvent` if `params` is empty.
pub fn save_at_event<U: SolutionVector + 'static>(
    params: &[f64],
) -> Result<ContinuousEvent<U>, EventError> {
    if params.is_empty() {
        return Err(EventError::EmptyEvent);
    }
    let params = params.to_vec();
    Ok(ContinuousEvent::from_boxed(
        params.len(),
        ProbeKind::SaveAt,
        Box::new(move |_: &ProbeContext, state: &ContinuationState<U>| {
            params.iter().map(|p| state.param - p).collect::<Vec<f64>>()
        }),
    ))
}
