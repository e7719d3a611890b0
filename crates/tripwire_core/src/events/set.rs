use std::fmt;

use serde::{Deserialize, Serialize};

use super::detector::EventObservation;
use super::error::EventError;
use super::function::{ContinuousEvent, DiscreteEvent, ProbeContext, ProbeKind};
use super::recorder::EventKind;
use crate::continuation::types::ContinuationState;

/// Shape of an [`EventSet`] as built by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSetKind {
    Continuous,
    Discrete,
    /// One continuous and one discrete event, continuous first.
    Pair,
    /// Any mixture, flattened left to right.
    Composite,
}

/// Detection semantics of one flattened slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Fires on a sign change.
    Continuous,
    /// Fires on a boolean flip.
    Discrete,
}

/// One entry of the offset table: where a flattened output comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Position of the originating leaf event in flattened order.
    pub sub_event: usize,
    /// 1-based output index within the leaf.
    pub local_index: usize,
    pub kind: SlotKind,
    /// Position inside the observation's continuous or discrete vector.
    pub offset: usize,
    pub record_kind: EventKind,
    pub label: Option<String>,
}

impl Slot {
    /// The caller's label if one was given, the record kind otherwise.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.record_kind.to_string())
    }
}

enum Leaf<U> {
    Continuous(ContinuousEvent<U>),
    Discrete(DiscreteEvent<U>),
}

/// An ordered collection of events evaluated together.
///
/// The slot table is computed once at construction, so the observation width never
/// changes during a run.
pub struct EventSet<U> {
    kind: EventSetKind,
    leaves: Vec<Leaf<U>>,
    slots: Vec<Slot>,
    continuous_width: usize,
    discrete_width: usize,
}

impl<U> EventSet<U> {
    pub fn continuous(event: ContinuousEvent<U>) -> Self {
        Self::from_leaves(EventSetKind::Continuous, vec![Leaf::Continuous(event)])
    }

    pub fn discrete(event: DiscreteEvent<U>) -> Self {
        Self::from_leaves(EventSetKind::Discrete, vec![Leaf::Discrete(event)])
    }

    /// Evaluates `continuous` and `discrete` together, continuous outputs first.
    pub fn pair(continuous: ContinuousEvent<U>, discrete: DiscreteEvent<U>) -> Self {
        Self::from_leaves(
            EventSetKind::Pair,
            vec![Leaf::Continuous(continuous), Leaf::Discrete(discrete)],
        )
    }

    /// Flattens `members` (which may themselves be pairs or sets) left to right.
    ///
    /// # Errors
    ///
    /// Returns `EventError::EmptySet` if `members` is empty.
    pub fn set(members: Vec<EventSet<U>>) -> Result<Self, EventError> {
        if members.is_empty() {
            return Err(EventError::EmptySet);
        }
        let leaves = members.into_iter().flat_map(|member| member.leaves).collect();
        Ok(Self::from_leaves(EventSetKind::Composite, leaves))
    }

    fn from_leaves(kind: EventSetKind, leaves: Vec<Leaf<U>>) -> Self {
        let mut slots = Vec::new();
        let mut continuous_width = 0;
        let mut discrete_width = 0;

        for (sub_event, leaf) in leaves.iter().enumerate() {
            match leaf {
                Leaf::Continuous(event) => {
                    for local in 1..=event.width() {
                        let record_kind = match event.kind() {
                            ProbeKind::User => EventKind::UserContinuous(local),
                            ProbeKind::Fold => EventKind::Fold,
                            ProbeKind::Bifurcation => EventKind::Bifurcation,
                            ProbeKind::SaveAt => EventKind::SaveAt(local),
                        };
                        slots.push(Slot {
                            sub_event,
                            local_index: local,
                            kind: SlotKind::Continuous,
                            offset: continuous_width,
                            record_kind,
                            label: event.labels().map(|labels| labels[local - 1].clone()),
                        });
                        continuous_width += 1;
                    }
                }
                Leaf::Discrete(event) => {
                    for local in 1..=event.width() {
                        slots.push(Slot {
                            sub_event,
                            local_index: local,
                            kind: SlotKind::Discrete,
                            offset: discrete_width,
                            record_kind: EventKind::UserDiscrete(local),
                            label: event.labels().map(|labels| labels[local - 1].clone()),
                        });
                        discrete_width += 1;
                    }
                }
            }
        }

        Self {
            kind,
            leaves,
            slots,
            continuous_width,
            discrete_width,
        }
    }

    pub fn kind(&self) -> EventSetKind {
        self.kind
    }

    /// Total number of flattened slots.
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Display names of all slots in flattened order.
    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(Slot::display_name).collect()
    }

    pub fn needs_eigenvalues(&self) -> bool {
        self.leaves.iter().any(|leaf| match leaf {
            Leaf::Continuous(event) => event.needs_eigenvalues(),
            Leaf::Discrete(event) => event.needs_eigenvalues(),
        })
    }

    /// Evaluates every leaf at `state`.
    pub fn evaluate(&self, ctx: &ProbeContext, state: &ContinuationState<U>) -> EventObservation {
        let mut continuous = Vec::with_capacity(self.continuous_width);
        let mut discrete = Vec::with_capacity(self.discrete_width);
        for leaf in &self.leaves {
            match leaf {
                Leaf::Continuous(event) => event.evaluate_into(ctx, state, &mut continuous),
                Leaf::Discrete(event) => event.evaluate_into(ctx, state, &mut discrete),
            }
        }
        EventObservation {
            continuous,
            discrete,
        }
    }
}

impl<U> From<ContinuousEvent<U>> for EventSet<U> {
    fn from(event: ContinuousEvent<U>) -> Self {
        Self::continuous(event)
    }
}

impl<U> From<DiscreteEvent<U>> for EventSet<U> {
    fn from(event: DiscreteEvent<U>) -> Self {
        Self::discrete(event)
    }
}

impl<U> fmt::Debug for EventSet<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSet")
            .field("kind", &self.kind)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}
