//! Event detection along a continuation branch.
//!
//! Probes are wrapped in [`ContinuousEvent`] (zero crossings) or [`DiscreteEvent`]
//! (predicate flips) and combined into an [`EventSet`], which is flattened once into a
//! slot table. After every accepted step the [`EventMonitor`] evaluates the set, asks the
//! [`SignChangeDetector`] which slots fired, optionally narrows each firing with the
//! [`BisectionRefiner`], and appends the outcome to the [`EventRecorder`].

mod bisection;
mod builtin;
mod detector;
mod error;
mod function;
mod monitor;
mod recorder;
mod set;
mod settings;

pub use bisection::{BisectionRefiner, Located, Sample};
pub use builtin::{bifurcation_event, fold_event, save_at_event};
pub use detector::{EventObservation, Sign, SignChangeDetector};
pub use error::EventError;
pub use function::{ContinuousEvent, DiscreteEvent, ProbeContext, ProbeKind};
pub use monitor::EventMonitor;
pub use recorder::{EventKind, EventRecord, EventRecorder, Localization};
pub use set::{EventSet, EventSetKind, Slot, SlotKind};
pub use settings::{BisectionVariable, DetectEvent, EventSettings, SettingsError};
