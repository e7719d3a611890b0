use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::continuation::types::ContinuationState;

/// Classification of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Output `k` (1-based) of a user continuous event.
    UserContinuous(usize),
    /// Output `k` (1-based) of a user discrete event.
    UserDiscrete(usize),
    Fold,
    Bifurcation,
    /// Passage through the `k`-th requested parameter value.
    SaveAt(usize),
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::UserContinuous(k) => write!(f, "userC-{k}"),
            EventKind::UserDiscrete(k) => write!(f, "userD-{k}"),
            EventKind::Fold => write!(f, "fold"),
            EventKind::Bifurcation => write!(f, "bifurcation"),
            EventKind::SaveAt(k) => write!(f, "save-{k}"),
        }
    }
}

/// How much trust to put in a record's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Localization {
    /// Reported at the step where it was flagged, no bisection attempted.
    Step,
    /// Bisection met its tolerance or its inversion count.
    Confirmed,
    /// Bisection ran out of steps before the inversion count was reached.
    Unconfirmed,
    /// The corrector failed; the location is the unrefined bracket midpoint.
    Approximate,
    /// The bracket reached the edge of the parameter domain.
    DomainEdge,
}

impl Localization {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Localization::Confirmed)
    }
}

/// One special point on a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord<U> {
    pub kind: EventKind,
    pub label: Option<String>,
    /// Leaf event the firing slot belongs to.
    pub sub_event: usize,
    /// Flattened slot index.
    pub slot: usize,
    /// Step at which the event was flagged.
    pub step: usize,
    /// Accepted step the flagged step was compared against.
    pub previous_step: Option<usize>,
    /// Best estimate of the event parameter.
    pub param: f64,
    /// Closest corrected state to the event.
    pub state: ContinuationState<U>,
    pub localization: Localization,
    /// Final bracket in the bisection variable, when bisection ran.
    pub interval: Option<(f64, f64)>,
    pub bisection_steps: usize,
    pub inversions: usize,
}

impl<U> EventRecord<U> {
    pub fn name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.kind.to_string())
    }
}

/// Append-only log of event records in step order.
#[derive(Debug, Clone)]
pub struct EventRecorder<U> {
    records: Vec<EventRecord<U>>,
}

impl<U> Default for EventRecorder<U> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<U> EventRecorder<U> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EventRecord<U>) {
        debug_assert!(
            self.records.last().map_or(true, |last| last.step <= record.step),
            "event records must arrive in step order"
        );
        debug!(
            kind = %record.kind,
            step = record.step,
            param = record.param,
            localization = ?record.localization,
            "event recorded"
        );
        self.records.push(record);
    }

    pub fn records(&self) -> &[EventRecord<U>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<EventRecord<U>> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::types::Tangent;

    fn record(step: usize, kind: EventKind, label: Option<&str>) -> EventRecord<Vec<f64>> {
        EventRecord {
            kind,
            label: label.map(str::to_string),
            sub_event: 0,
            slot: 0,
            step,
            previous_step: step.checked_sub(1),
            param: step as f64,
            state: ContinuationState::new(
                step,
                step as f64,
                vec![0.0],
                Tangent {
                    dp: 1.0,
                    du: vec![0.0],
                },
            ),
            localization: Localization::Step,
            interval: None,
            bisection_steps: 0,
            inversions: 0,
        }
    }

    #[test]
    fn kinds_display_with_local_index() {
        assert_eq!(EventKind::UserContinuous(2).to_string(), "userC-2");
        assert_eq!(EventKind::UserDiscrete(1).to_string(), "userD-1");
        assert_eq!(EventKind::Fold.to_string(), "fold");
    }

    #[test]
    fn recorder_preserves_arrival_order() {
        let mut recorder = EventRecorder::new();
        recorder.push(record(3, EventKind::UserContinuous(1), None));
        recorder.push(record(3, EventKind::UserDiscrete(1), Some("gate")));
        recorder.push(record(7, EventKind::Fold, None));

        let names: Vec<_> = recorder.records().iter().map(EventRecord::name).collect();
        assert_eq!(names, vec!["userC-1", "gate", "fold"]);
        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.into_records()[2].step, 7);
    }
}
