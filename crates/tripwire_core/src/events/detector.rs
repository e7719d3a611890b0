use serde::{Deserialize, Serialize};

use super::set::{EventSet, SlotKind};

/// Flattened probe values at one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventObservation {
    pub continuous: Vec<f64>,
    pub discrete: Vec<bool>,
}

impl EventObservation {
    /// Continuous value at `offset`, NaN if absent.
    pub fn real(&self, offset: usize) -> f64 {
        self.continuous.get(offset).copied().unwrap_or(f64::NAN)
    }

    pub fn flag(&self, offset: usize) -> Option<bool> {
        self.discrete.get(offset).copied()
    }
}

/// Side of zero a probe value sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Negative,
    Positive,
}

impl Sign {
    /// Zero counts as positive. Non-finite values are undefined and have no sign.
    pub fn of(value: f64) -> Option<Self> {
        if !value.is_finite() {
            None
        } else if value < 0.0 {
            Some(Self::Negative)
        } else {
            Some(Self::Positive)
        }
    }
}

/// Compares consecutive observations and reports which slots fired.
///
/// Holds the previous observation as its only state, so each run owns its own detector.
#[derive(Debug, Clone)]
pub struct SignChangeDetector {
    layout: Vec<(SlotKind, usize)>,
    previous: Option<EventObservation>,
}

impl SignChangeDetector {
    pub fn new<U>(events: &EventSet<U>) -> Self {
        Self {
            layout: events
                .slots()
                .iter()
                .map(|slot| (slot.kind, slot.offset))
                .collect(),
            previous: None,
        }
    }

    pub fn previous(&self) -> Option<&EventObservation> {
        self.previous.as_ref()
    }

    /// Returns the flat indices that fired between the stored observation and `current`,
    /// in ascending order, then stores `current`.
    ///
    /// The first call never fires.
    pub fn detect(&mut self, current: EventObservation) -> Vec<usize> {
        let fired = match &self.previous {
            None => Vec::new(),
            Some(previous) => self
                .layout
                .iter()
                .enumerate()
                .filter(|&(_, &(kind, offset))| slot_fired(kind, offset, previous, &current))
                .map(|(index, _)| index)
                .collect(),
        };
        self.previous = Some(current);
        fired
    }
}

pub(crate) fn slot_fired(
    kind: SlotKind,
    offset: usize,
    previous: &EventObservation,
    current: &EventObservation,
) -> bool {
    match kind {
        SlotKind::Continuous => {
            match (
                Sign::of(previous.real(offset)),
                Sign::of(current.real(offset)),
            ) {
                (Some(before), Some(after)) => before != after,
                _ => false,
            }
        }
        SlotKind::Discrete => match (previous.flag(offset), current.flag(offset)) {
            (Some(before), Some(after)) => before != after,
            _ => false,
        },
    }
}
