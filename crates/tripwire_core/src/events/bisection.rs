//! Bisection localization of fired events.
//!
//! A bracket starts from the two accepted states the detector compared. Each iteration
//! corrects onto the branch at the midpoint of the bisection variable and keeps the half
//! whose endpoints still disagree. Continuous slots stop early once the side being
//! replaced has alternated `n_inversion` times: a genuine isolated crossing alternates
//! sides as the bracket shrinks, while a drifting probe keeps collapsing towards one end
//! and runs into `max_bisection_steps` instead.

use tracing::{trace, warn};

use super::detector::{EventObservation, Sign};
use super::function::ProbeContext;
use super::recorder::Localization;
use super::set::{EventSet, SlotKind};
use super::settings::{BisectionVariable, EventSettings};
use crate::continuation::types::{ContinuationState, ConvergenceFailure, CorrectionTarget};
use crate::traits::{Corrector, SolutionVector};

/// A corrected state together with the event values observed there.
#[derive(Debug, Clone)]
pub struct Sample<U> {
    pub state: ContinuationState<U>,
    pub observation: EventObservation,
}

/// Outcome of refining one fired slot.
#[derive(Debug, Clone)]
pub struct Located<U> {
    pub slot: usize,
    pub param: f64,
    pub state: ContinuationState<U>,
    pub localization: Localization,
    /// Final bracket in the bisection variable.
    pub interval: (f64, f64),
    pub bisection_steps: usize,
    pub inversions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Lo,
    Hi,
}

struct BisectionBracket<U> {
    lo: Sample<U>,
    hi: Sample<U>,
    inversions: usize,
    steps: usize,
    last_side: Option<Side>,
}

impl<U: Clone> BisectionBracket<U> {
    fn new(lo: &Sample<U>, hi: &Sample<U>) -> Self {
        Self {
            lo: lo.clone(),
            hi: hi.clone(),
            inversions: 0,
            steps: 0,
            last_side: None,
        }
    }

    fn interval(&self, variable: BisectionVariable) -> (f64, f64) {
        (
            variable.coordinate(&self.lo.state),
            variable.coordinate(&self.hi.state),
        )
    }

    fn width(&self, variable: BisectionVariable) -> f64 {
        let (a, b) = self.interval(variable);
        (b - a).abs()
    }

    fn midpoint(&self, variable: BisectionVariable) -> f64 {
        let (a, b) = self.interval(variable);
        0.5 * (a + b)
    }

    fn side(&self, side: Side) -> &Sample<U> {
        match side {
            Side::Lo => &self.lo,
            Side::Hi => &self.hi,
        }
    }

    /// Replaces one end, counting an inversion when the side differs from last time.
    fn replace(&mut self, side: Side, sample: Sample<U>) {
        if self.last_side.is_some_and(|last| last != side) {
            self.inversions += 1;
        }
        self.last_side = Some(side);
        match side {
            Side::Lo => self.lo = sample,
            Side::Hi => self.hi = sample,
        }
    }

    /// End whose continuous value at `offset` is closest to zero, `Lo` on ties.
    fn closest(&self, offset: usize) -> Side {
        let lo = self.lo.observation.real(offset).abs();
        let hi = self.hi.observation.real(offset).abs();
        if hi < lo {
            Side::Hi
        } else {
            Side::Lo
        }
    }
}

/// Narrows the brackets of fired slots by repeated corrector calls.
///
/// Refinements started from the same bracket share a midpoint cache, so slots that
/// fired together only pay for the corrections where their brackets diverge.
pub struct BisectionRefiner<'a, U> {
    events: &'a EventSet<U>,
    settings: &'a EventSettings,
    context: ProbeContext,
    cache: Vec<(CorrectionTarget, Sample<U>)>,
    corrector_calls: usize,
}

impl<'a, U: SolutionVector> BisectionRefiner<'a, U> {
    pub fn new(events: &'a EventSet<U>, settings: &'a EventSettings, context: ProbeContext) -> Self {
        Self {
            events,
            settings,
            context: ProbeContext {
                in_bisection: true,
                ..context
            },
            cache: Vec::new(),
            corrector_calls: 0,
        }
    }

    /// Number of corrector invocations so far, retries included.
    pub fn corrector_calls(&self) -> usize {
        self.corrector_calls
    }

    /// Refines every slot in `fired` between `lo` and `hi`, in the order given.
    pub fn refine<C>(
        &mut self,
        lo: &Sample<U>,
        hi: &Sample<U>,
        fired: &[usize],
        corrector: &mut C,
    ) -> Vec<Located<U>>
    where
        C: Corrector<U> + ?Sized,
    {
        let mut located = Vec::with_capacity(fired.len());
        for &slot in fired {
            let Some((kind, offset)) = self.events.slot(slot).map(|s| (s.kind, s.offset)) else {
                warn!(slot, "fired slot is not part of the event set");
                continue;
            };
            let outcome = match kind {
                SlotKind::Continuous => self.refine_continuous(slot, offset, lo, hi, corrector),
                SlotKind::Discrete => self.refine_discrete(slot, offset, lo, hi, corrector),
            };
            located.push(outcome);
        }
        located
    }

    fn refine_continuous<C>(
        &mut self,
        slot: usize,
        offset: usize,
        lo: &Sample<U>,
        hi: &Sample<U>,
        corrector: &mut C,
    ) -> Located<U>
    where
        C: Corrector<U> + ?Sized,
    {
        let variable = self.settings.bisection_variable;
        let tol = self.settings.tol_param_bisection_event;
        let mut bracket = BisectionBracket::new(lo, hi);

        // A probe sitting exactly on zero at an end is already located there.
        for side in [Side::Lo, Side::Hi] {
            if bracket.side(side).observation.real(offset) == 0.0 {
                return self.located(slot, &bracket, bracket.side(side), Localization::Confirmed);
            }
        }

        let localization = loop {
            if bracket.inversions >= self.settings.n_inversion || bracket.width(variable) <= tol {
                break Localization::Confirmed;
            }
            if bracket.steps >= self.settings.max_bisection_steps {
                break Localization::Unconfirmed;
            }

            let (sample, on_edge) = match self.bracket_sample(&bracket, corrector) {
                Ok(found) => found,
                Err(failure) => {
                    warn!(slot, %failure, "bisection abandoned; reporting bracket midpoint");
                    let closest = bracket.side(bracket.closest(offset));
                    return self.approximate(slot, &bracket, closest);
                }
            };
            bracket.steps += 1;

            let value = sample.observation.real(offset);
            if !value.is_finite() {
                warn!(slot, at = sample.state.param, "event value undefined inside bracket");
                let closest = bracket.side(bracket.closest(offset));
                return self.approximate(slot, &bracket, closest);
            }
            if value.abs() <= tol {
                return self.located(slot, &bracket, &sample, Localization::Confirmed);
            }

            let lo_value = bracket.lo.observation.real(offset);
            let side = if Sign::of(value) == Sign::of(lo_value) {
                Side::Lo
            } else {
                Side::Hi
            };
            trace!(
                slot,
                at = sample.state.param,
                value,
                ?side,
                inversions = bracket.inversions,
                "bisection step"
            );
            bracket.replace(side, sample);
            if on_edge && side == Side::Lo {
                // No sign change up to the edge: the crossing lies outside the domain.
                return self.located(slot, &bracket, &bracket.lo, Localization::DomainEdge);
            }
        };

        if localization == Localization::Unconfirmed {
            warn!(
                slot,
                inversions = bracket.inversions,
                width = bracket.width(variable),
                "bisection budget exhausted before the inversion count was reached"
            );
        }
        let closest = bracket.closest(offset);
        self.located(slot, &bracket, bracket.side(closest), localization)
    }

    fn refine_discrete<C>(
        &mut self,
        slot: usize,
        offset: usize,
        lo: &Sample<U>,
        hi: &Sample<U>,
        corrector: &mut C,
    ) -> Located<U>
    where
        C: Corrector<U> + ?Sized,
    {
        let variable = self.settings.bisection_variable;
        let mut bracket = BisectionBracket::new(lo, hi);
        let before = bracket.lo.observation.flag(offset);

        let localization = loop {
            if bracket.width(variable) <= self.settings.tol_param_bisection_event {
                break Localization::Confirmed;
            }
            if bracket.steps >= self.settings.max_bisection_steps {
                break Localization::Unconfirmed;
            }

            let (sample, on_edge) = match self.bracket_sample(&bracket, corrector) {
                Ok(found) => found,
                Err(failure) => {
                    warn!(slot, %failure, "bisection abandoned; reporting bracket midpoint");
                    return self.approximate(slot, &bracket, &bracket.hi);
                }
            };
            bracket.steps += 1;

            let side = if sample.observation.flag(offset) == before {
                Side::Lo
            } else {
                Side::Hi
            };
            trace!(slot, at = sample.state.param, ?side, "bisection step");
            bracket.replace(side, sample);
            if on_edge && side == Side::Lo {
                return self.located(slot, &bracket, &bracket.lo, Localization::DomainEdge);
            }
        };

        // The first state showing the new value marks the transition.
        self.located(slot, &bracket, &bracket.hi, localization)
    }

    /// Edge of the domain that `param` lies beyond, if any.
    fn edge_beyond(&self, param: f64) -> Option<f64> {
        if param > self.context.p_max {
            Some(self.context.p_max)
        } else if param < self.context.p_min {
            Some(self.context.p_min)
        } else {
            None
        }
    }

    /// Corrects at the bracket midpoint. A midpoint outside the domain is replaced by the
    /// state on the domain edge, flagged by the returned `bool`.
    fn bracket_sample<C>(
        &mut self,
        bracket: &BisectionBracket<U>,
        corrector: &mut C,
    ) -> Result<(Sample<U>, bool), ConvergenceFailure>
    where
        C: Corrector<U> + ?Sized,
    {
        let midpoint = bracket.midpoint(self.settings.bisection_variable);
        match self.settings.bisection_variable {
            BisectionVariable::Parameter => {
                let edge = self.edge_beyond(midpoint);
                let target = CorrectionTarget::Parameter(edge.unwrap_or(midpoint));
                let sample = self.sample_at(target, &bracket.lo.state, corrector)?;
                // A shortened retry can stop short of the edge.
                let reached = edge.is_some_and(|edge| sample.state.param == edge);
                Ok((sample, reached))
            }
            BisectionVariable::Arclength => {
                let sample = self.sample_at(
                    CorrectionTarget::Arclength(midpoint),
                    &bracket.lo.state,
                    corrector,
                )?;
                let Some(edge) = self.edge_beyond(sample.state.param) else {
                    return Ok((sample, false));
                };
                let target = CorrectionTarget::Parameter(edge);
                let sample = self.sample_at(target, &bracket.lo.state, corrector)?;
                let reached = sample.state.param == edge;
                Ok((sample, reached))
            }
        }
    }

    /// Corrects at `target`, retrying with the step from `guess` halved on failure.
    fn sample_at<C>(
        &mut self,
        target: CorrectionTarget,
        guess: &ContinuationState<U>,
        corrector: &mut C,
    ) -> Result<Sample<U>, ConvergenceFailure>
    where
        C: Corrector<U> + ?Sized,
    {
        if let Some((_, cached)) = self.cache.iter().find(|(key, _)| *key == target) {
            return Ok(cached.clone());
        }

        let (origin, goal) = match target {
            CorrectionTarget::Parameter(p) => (guess.param, p),
            CorrectionTarget::Arclength(s) => (guess.arclength, s),
        };
        let mut shrink = 1.0;
        let mut attempt = 0;
        loop {
            let value = origin + (goal - origin) * shrink;
            let attempt_target = match target {
                CorrectionTarget::Parameter(_) => CorrectionTarget::Parameter(value),
                CorrectionTarget::Arclength(_) => CorrectionTarget::Arclength(value),
            };
            self.corrector_calls += 1;
            match corrector.correct_at(attempt_target, guess) {
                Ok(state) => {
                    let observation = self.events.evaluate(&self.context, &state);
                    let sample = Sample { state, observation };
                    if attempt == 0 {
                        self.cache.push((target, sample.clone()));
                    }
                    return Ok(sample);
                }
                Err(failure) if attempt < self.settings.corrector_retries => {
                    trace!(%failure, attempt, "retrying correction with a shorter step");
                    attempt += 1;
                    shrink *= 0.5;
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    fn located(
        &self,
        slot: usize,
        bracket: &BisectionBracket<U>,
        at: &Sample<U>,
        localization: Localization,
    ) -> Located<U> {
        Located {
            slot,
            param: at.state.param,
            state: at.state.clone(),
            localization,
            interval: bracket.interval(self.settings.bisection_variable),
            bisection_steps: bracket.steps,
            inversions: bracket.inversions,
        }
    }

    /// Reports the bracket midpoint in parameter space, paired with the state `at`.
    fn approximate(
        &self,
        slot: usize,
        bracket: &BisectionBracket<U>,
        at: &Sample<U>,
    ) -> Located<U> {
        let mut located = self.located(slot, bracket, at, Localization::Approximate);
        located.param = 0.5 * (bracket.lo.state.param + bracket.hi.state.param);
        located
    }
}
