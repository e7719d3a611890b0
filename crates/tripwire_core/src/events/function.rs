use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::EventError;
use crate::continuation::types::ContinuationState;

type ContinuousProbe<U> =
    Box<dyn Fn(&ProbeContext, &ContinuationState<U>) -> Vec<f64> + Send + Sync>;
type DiscreteProbe<U> =
    Box<dyn Fn(&ProbeContext, &ContinuationState<U>) -> Vec<bool> + Send + Sync>;

/// Read-only view of the run handed to every probe alongside the state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeContext {
    /// Step index of the accepted state the check belongs to.
    pub step: usize,
    pub p_min: f64,
    pub p_max: f64,
    /// True while a bisection is evaluating intermediate states.
    pub in_bisection: bool,
}

/// What a probe monitors, which decides the kind of record a firing produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeKind {
    User,
    Fold,
    Bifurcation,
    SaveAt,
}

fn check_arity(declared: usize, actual: usize) -> Result<(), EventError> {
    if actual == 0 {
        return Err(EventError::EmptyEvent);
    }
    if declared != actual {
        return Err(EventError::ArityMismatch { declared, actual });
    }
    Ok(())
}

fn collect_labels<I, S>(width: usize, labels: I) -> Result<Vec<String>, EventError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
    if labels.len() != width {
        return Err(EventError::LabelMismatch {
            expected: width,
            actual: labels.len(),
        });
    }
    Ok(labels)
}

/// A vector of real-valued probes; each component fires when it changes sign.
pub struct ContinuousEvent<U> {
    width: usize,
    probe: ContinuousProbe<U>,
    labels: Option<Vec<String>>,
    kind: ProbeKind,
    needs_eigenvalues: bool,
}

impl<U: 'static> ContinuousEvent<U> {
    /// Wraps `probe`, which must produce exactly `width` values.
    ///
    /// # Errors
    ///
    /// Returns `EventError::ArityMismatch` if `width` differs from the length of the array
    /// `probe` returns, and `EventError::EmptyEvent` for zero-width probes.
    pub fn new<const K: usize, F>(width: usize, probe: F) -> Result<Self, EventError>
    where
        F: Fn(&ProbeContext, &ContinuationState<U>) -> [f64; K] + Send + Sync + 'static,
    {
        check_arity(width, K)?;
        Ok(Self::from_boxed(
            width,
            ProbeKind::User,
            Box::new(move |ctx: &ProbeContext, state: &ContinuationState<U>| {
                probe(ctx, state).to_vec()
            }),
        ))
    }

    pub(crate) fn from_boxed(width: usize, kind: ProbeKind, probe: ContinuousProbe<U>) -> Self {
        Self {
            width,
            probe,
            labels: None,
            kind,
            needs_eigenvalues: false,
        }
    }
}

impl<U> ContinuousEvent<U> {
    /// Attaches one display name per output.
    pub fn with_labels<I, S>(mut self, labels: I) -> Result<Self, EventError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(collect_labels(self.width, labels)?);
        Ok(self)
    }

    /// Marks the probe as reading `ContinuationState::eigenvalues`.
    pub fn requiring_eigenvalues(mut self) -> Self {
        self.needs_eigenvalues = true;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn needs_eigenvalues(&self) -> bool {
        self.needs_eigenvalues
    }

    pub(crate) fn evaluate_into(
        &self,
        ctx: &ProbeContext,
        state: &ContinuationState<U>,
        out: &mut Vec<f64>,
    ) {
        let values = (self.probe)(ctx, state);
        // Widths are fixed at construction; a boxed probe that disagrees is padded as undefined.
        out.extend(
            values
                .into_iter()
                .chain(std::iter::repeat(f64::NAN))
                .take(self.width),
        );
    }
}

impl<U> fmt::Debug for ContinuousEvent<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousEvent")
            .field("width", &self.width)
            .field("labels", &self.labels)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A vector of boolean probes; each component fires when it flips.
pub struct DiscreteEvent<U> {
    width: usize,
    probe: DiscreteProbe<U>,
    labels: Option<Vec<String>>,
    needs_eigenvalues: bool,
}

impl<U: 'static> DiscreteEvent<U> {
    /// Wraps `probe`, which must produce exactly `width` flags.
    ///
    /// # Errors
    ///
    /// Same contract as [`ContinuousEvent::new`].
    pub fn new<const K: usize, F>(width: usize, probe: F) -> Result<Self, EventError>
    where
        F: Fn(&ProbeContext, &ContinuationState<U>) -> [bool; K] + Send + Sync + 'static,
    {
        check_arity(width, K)?;
        Ok(Self {
            width,
            probe: Box::new(move |ctx: &ProbeContext, state: &ContinuationState<U>| {
                probe(ctx, state).to_vec()
            }),
            labels: None,
            needs_eigenvalues: false,
        })
    }
}

impl<U> DiscreteEvent<U> {
    pub fn with_labels<I, S>(mut self, labels: I) -> Result<Self, EventError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(collect_labels(self.width, labels)?);
        Ok(self)
    }

    pub fn requiring_eigenvalues(mut self) -> Self {
        self.needs_eigenvalues = true;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn needs_eigenvalues(&self) -> bool {
        self.needs_eigenvalues
    }

    pub(crate) fn evaluate_into(
        &self,
        ctx: &ProbeContext,
        state: &ContinuationState<U>,
        out: &mut Vec<bool>,
    ) {
        out.extend((self.probe)(ctx, state));
    }
}

impl<U> fmt::Debug for DiscreteEvent<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscreteEvent")
            .field("width", &self.width)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}
