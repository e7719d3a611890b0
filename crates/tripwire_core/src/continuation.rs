pub mod palc;
pub mod problem;
pub mod types;
pub mod util;

pub use palc::PalcStepper;
pub use problem::ContinuationProblem;
pub use types::{
    ContinuationSettings, ContinuationState, ConvergenceFailure, CorrectionTarget, StepOutcome,
    Tangent,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{EventKind, EventMonitor, EventObservation, EventRecord, EventSet, EventSettings};
use crate::traits::{Corrector, SolutionVector, Stepper};

/// Summary of one accepted step on a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchPoint {
    pub step: usize,
    pub param: f64,
    pub arclength: f64,
    pub solution_norm: f64,
    /// Event values at this step; absent when event detection is off.
    #[serde(default)]
    pub observation: Option<EventObservation>,
}

/// A traced branch together with its special points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBranch<U> {
    pub points: Vec<BranchPoint>,
    /// Detected or located events, in step order.
    pub special_points: Vec<EventRecord<U>>,
}

impl<U> EventBranch<U> {
    pub fn events_of_kind(&self, kind: EventKind) -> impl Iterator<Item = &EventRecord<U>> {
        self.special_points
            .iter()
            .filter(move |record| record.kind == kind)
    }
}

/// Runs `stepper` to completion, checking `events` after every accepted step.
///
/// Settings are validated before the first step; after that nothing in the event
/// machinery aborts the run.
pub fn continuation<U, S>(
    stepper: &mut S,
    events: &EventSet<U>,
    settings: EventSettings,
) -> Result<EventBranch<U>>
where
    U: SolutionVector,
    S: Stepper<U> + Corrector<U>,
{
    let mut monitor = EventMonitor::new(events, settings, stepper.domain())
        .context("Invalid event configuration")?;
    stepper.require_eigenvalues(events.needs_eigenvalues());

    let mut points = Vec::new();
    let mut rejected = 0usize;
    loop {
        match stepper.advance() {
            StepOutcome::Accepted(state) => {
                monitor.observe(&state, &mut *stepper);
                points.push(BranchPoint {
                    step: state.step,
                    param: state.param,
                    arclength: state.arclength,
                    solution_norm: state.solution.norm(),
                    observation: monitor.last_observation().cloned(),
                });
            }
            StepOutcome::Rejected(failure) => {
                rejected += 1;
                debug!(%failure, "step rejected");
            }
            StepOutcome::Finished => break,
        }
    }

    let special_points = monitor.into_records();
    info!(
        steps = points.len(),
        rejected,
        events = special_points.len(),
        "continuation finished"
    );
    Ok(EventBranch {
        points,
        special_points,
    })
}
