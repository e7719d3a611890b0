use tracing::debug;

use super::bisection::{BisectionRefiner, Sample};
use super::detector::{EventObservation, SignChangeDetector};
use super::error::EventError;
use super::function::ProbeContext;
use super::recorder::{EventRecord, EventRecorder, Localization};
use super::set::EventSet;
use super::settings::{DetectEvent, EventSettings, SettingsError};
use crate::continuation::types::ContinuationState;
use crate::traits::{Corrector, SolutionVector};

/// Per-run glue between the step loop and the event machinery.
///
/// Owns the detector state and the records, so every run gets a fresh monitor while the
/// borrowed [`EventSet`] may be shared.
#[derive(Debug)]
pub struct EventMonitor<'a, U> {
    events: &'a EventSet<U>,
    settings: EventSettings,
    domain: (f64, f64),
    detector: SignChangeDetector,
    recorder: EventRecorder<U>,
    previous: Option<Sample<U>>,
}

impl<'a, U: SolutionVector> EventMonitor<'a, U> {
    /// Validates `settings` and intersects their domain with the stepper's `domain`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Settings` if a count or tolerance is invalid or the domains
    /// do not overlap.
    pub fn new(
        events: &'a EventSet<U>,
        settings: EventSettings,
        domain: (f64, f64),
    ) -> Result<Self, EventError> {
        settings.validate()?;
        let domain = (settings.p_min.max(domain.0), settings.p_max.min(domain.1));
        if !(domain.0 < domain.1) {
            return Err(SettingsError::Domain.into());
        }
        Ok(Self {
            events,
            settings,
            domain,
            detector: SignChangeDetector::new(events),
            recorder: EventRecorder::new(),
            previous: None,
        })
    }

    pub fn settings(&self) -> &EventSettings {
        &self.settings
    }

    /// Probe context for checks belonging to `step`.
    pub fn context(&self, step: usize) -> ProbeContext {
        ProbeContext {
            step,
            p_min: self.domain.0,
            p_max: self.domain.1,
            in_bisection: false,
        }
    }

    /// Checks one accepted state and records whatever fired since the previous one.
    ///
    /// Returns the fired slot indices. With detection off the probes are not evaluated.
    pub fn observe<C>(&mut self, state: &ContinuationState<U>, corrector: &mut C) -> Vec<usize>
    where
        C: Corrector<U> + ?Sized,
    {
        if self.settings.detect_event == DetectEvent::Off {
            return Vec::new();
        }

        let context = self.context(state.step);
        let observation = self.events.evaluate(&context, state);
        let fired = self.detector.detect(observation.clone());
        let current = Sample {
            state: state.clone(),
            observation,
        };
        let previous = self.previous.take();

        if let Some(previous) = previous.as_ref().filter(|_| !fired.is_empty()) {
            debug!(step = state.step, fired = ?fired, "events flagged");
            match self.settings.detect_event {
                DetectEvent::Locate => self.locate(previous, &current, &fired, context, corrector),
                DetectEvent::Detect => self.flag(previous, &current, &fired),
                DetectEvent::Off => {}
            }
        }

        self.previous = Some(current);
        fired
    }

    fn locate<C>(
        &mut self,
        previous: &Sample<U>,
        current: &Sample<U>,
        fired: &[usize],
        context: ProbeContext,
        corrector: &mut C,
    ) where
        C: Corrector<U> + ?Sized,
    {
        let located = BisectionRefiner::new(self.events, &self.settings, context)
            .refine(previous, current, fired, corrector);
        for hit in located {
            let Some(slot) = self.events.slot(hit.slot) else {
                continue;
            };
            self.recorder.push(EventRecord {
                kind: slot.record_kind,
                label: slot.label.clone(),
                sub_event: slot.sub_event,
                slot: hit.slot,
                step: current.state.step,
                previous_step: Some(previous.state.step),
                param: hit.param,
                state: hit.state,
                localization: hit.localization,
                interval: Some(hit.interval),
                bisection_steps: hit.bisection_steps,
                inversions: hit.inversions,
            });
        }
    }

    fn flag(&mut self, previous: &Sample<U>, current: &Sample<U>, fired: &[usize]) {
        for &index in fired {
            let Some(slot) = self.events.slot(index) else {
                continue;
            };
            self.recorder.push(EventRecord {
                kind: slot.record_kind,
                label: slot.label.clone(),
                sub_event: slot.sub_event,
                slot: index,
                step: current.state.step,
                previous_step: Some(previous.state.step),
                param: current.state.param,
                state: current.state.clone(),
                localization: Localization::Step,
                interval: None,
                bisection_steps: 0,
                inversions: 0,
            });
        }
    }

    /// Observation taken at the most recent accepted state.
    pub fn last_observation(&self) -> Option<&EventObservation> {
        self.previous.as_ref().map(|sample| &sample.observation)
    }

    pub fn records(&self) -> &[EventRecord<U>] {
        self.recorder.records()
    }

    pub fn into_records(self) -> Vec<EventRecord<U>> {
        self.recorder.into_records()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::continuation::types::{ConvergenceFailure, CorrectionTarget, Tangent};
    use crate::events::function::ContinuousEvent;
    use crate::events::recorder::EventKind;

    type State = ContinuationState<Vec<f64>>;

    fn state(step: usize, p: f64) -> State {
        ContinuationState::new(
            step,
            p,
            vec![p],
            Tangent {
                dp: 1.0,
                du: vec![1.0],
            },
        )
        .with_arclength(p)
    }

    struct Line;

    impl Corrector<Vec<f64>> for Line {
        fn correct_at(
            &mut self,
            target: CorrectionTarget,
            guess: &State,
        ) -> Result<State, ConvergenceFailure> {
            Ok(state(guess.step, target.value()))
        }
    }

    fn root_at(root: f64) -> EventSet<Vec<f64>> {
        ContinuousEvent::new(1, move |_, s: &State| [s.param - root])
            .expect("event")
            .into()
    }

    #[test]
    fn repeated_state_fires_once() {
        let events = root_at(0.5);
        let mut monitor =
            EventMonitor::new(&events, EventSettings::default(), (f64::MIN, f64::MAX))
                .expect("monitor");

        assert!(monitor.observe(&state(0, 0.0), &mut Line).is_empty());
        assert_eq!(monitor.observe(&state(1, 1.0), &mut Line), vec![0]);
        assert!(monitor.observe(&state(1, 1.0), &mut Line).is_empty());

        let records = monitor.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::UserContinuous(1));
        assert_eq!(records[0].previous_step, Some(0));
        assert!((records[0].param - 0.5).abs() <= 1e-10);
    }

    #[test]
    fn detect_mode_reports_at_the_flagging_step() {
        let events = root_at(0.5);
        let settings = EventSettings {
            detect_event: DetectEvent::Detect,
            ..EventSettings::default()
        };
        let mut monitor = EventMonitor::new(&events, settings, (-1.0, 2.0)).expect("monitor");
        monitor.observe(&state(0, 0.0), &mut Line);
        monitor.observe(&state(1, 1.0), &mut Line);

        let record = &monitor.records()[0];
        assert_eq!(record.localization, Localization::Step);
        assert_eq!(record.param, 1.0);
        assert_eq!(record.interval, None);
    }

    #[test]
    fn off_never_evaluates_probes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let events: EventSet<Vec<f64>> = ContinuousEvent::new(1, move |_, s: &State| {
            counter.fetch_add(1, Ordering::SeqCst);
            [s.param]
        })
        .expect("event")
        .into();
        let settings = EventSettings {
            detect_event: DetectEvent::Off,
            ..EventSettings::default()
        };
        let mut monitor = EventMonitor::new(&events, settings, (-1.0, 1.0)).expect("monitor");

        monitor.observe(&state(0, -0.5), &mut Line);
        monitor.observe(&state(1, 0.5), &mut Line);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(monitor.records().is_empty());
        assert!(monitor.last_observation().is_none());
    }

    #[test]
    fn disjoint_domains_are_rejected() {
        let events = root_at(0.0);
        let settings = EventSettings {
            p_min: 2.0,
            ..EventSettings::default()
        };
        let err = EventMonitor::new(&events, settings, (0.0, 1.0)).expect_err("domain");
        assert_eq!(err, EventError::Settings(SettingsError::Domain));

        let settings = EventSettings {
            n_inversion: 0,
            ..EventSettings::default()
        };
        let err = EventMonitor::new(&events, settings, (0.0, 1.0)).expect_err("settings");
        assert_eq!(err, EventError::Settings(SettingsError::NInversion));
    }
}
