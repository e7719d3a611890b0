/// The `tripwire_core` crate watches a continuation branch for events.
///
/// A predictor-corrector stepper produces a sequence of accepted solution states;
/// this crate evaluates user-defined probes on each of them, flags zero crossings and
/// predicate flips, and optionally pins the crossing down by bisection using the
/// stepper's own corrector.
///
/// Key components:
/// - **Traits**: `SolutionVector` (opaque solution capability set), `Stepper` and `Corrector`
///   (the external continuation engine).
/// - **Events**: composable probes (`ContinuousEvent`, `DiscreteEvent`, `EventSet`), the
///   `SignChangeDetector`, the `BisectionRefiner` and the append-only `EventRecorder`.
/// - **Continuation**: the `continuation` driver loop plus a reference pseudo-arclength
///   stepper (`PalcStepper`) for problems expressed through `ContinuationProblem`.
pub mod continuation;
pub mod events;
pub mod traits;
