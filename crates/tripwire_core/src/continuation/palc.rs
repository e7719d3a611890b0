//! Reference pseudo-arclength stepper.
//!
//! `PalcStepper` drives a [`ContinuationProblem`] along its solution curve and doubles as
//! the corrector used by event bisection, correcting either at a fixed parameter value
//! (Newton in the state variables) or at a fixed pseudo-arclength (PALC).

use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use super::problem::ContinuationProblem;
use super::types::{
    ContinuationSettings, ContinuationState, ConvergenceFailure, CorrectionTarget, StepOutcome,
    Tangent,
};
use super::util::nullspace_tangent;
use crate::traits::{Corrector, Stepper};

const STEP_GROWTH: f64 = 1.5;

pub struct PalcStepper<P> {
    problem: P,
    settings: ContinuationSettings,
    pending: Option<ContinuationState<DVector<f64>>>,
    current: Option<ContinuationState<DVector<f64>>>,
    step_size: f64,
    steps: usize,
    compute_eigenvalues: bool,
    finished: bool,
}

impl<P: ContinuationProblem> PalcStepper<P> {
    /// Corrects the starting point at fixed parameter and prepares the first tangent.
    pub fn new(
        mut problem: P,
        initial_state: &[f64],
        initial_param: f64,
        settings: ContinuationSettings,
    ) -> Result<Self> {
        validate_settings(&settings)?;
        let dim = problem.dimension();
        if initial_state.len() != dim {
            bail!(
                "Initial state dimension mismatch. Expected {}, got {}.",
                dim,
                initial_state.len()
            );
        }

        let mut aug = DVector::zeros(dim + 1);
        aug[0] = initial_param;
        for (i, &value) in initial_state.iter().enumerate() {
            aug[i + 1] = value;
        }
        let aug = newton_at_param(&mut problem, aug, &settings)?
            .ok_or_else(|| anyhow!("Initial point did not converge at p = {initial_param}"))?;

        let j_ext = problem.extended_jacobian(&aug)?;
        let mut tangent = nullspace_tangent(&j_ext, None)?;
        let wants_positive = settings.forward;
        if (tangent[0] < 0.0) == wants_positive {
            tangent = -tangent;
        }

        let mut stepper = Self {
            problem,
            settings,
            pending: None,
            current: None,
            step_size: settings.step_size,
            steps: 0,
            compute_eigenvalues: settings.compute_eigenvalues,
            finished: false,
        };
        let initial = stepper.build_state(aug, tangent, 0, 0.0)?;
        stepper.pending = Some(initial);
        Ok(stepper)
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    pub fn settings(&self) -> &ContinuationSettings {
        &self.settings
    }

    /// The last accepted state, if any.
    pub fn current(&self) -> Option<&ContinuationState<DVector<f64>>> {
        self.current.as_ref()
    }

    fn build_state(
        &mut self,
        aug: DVector<f64>,
        tangent: DVector<f64>,
        step: usize,
        arclength: f64,
    ) -> Result<ContinuationState<DVector<f64>>> {
        let dim = self.problem.dimension();
        let eigenvalues = if self.compute_eigenvalues {
            self.problem.jacobian_eigenvalues(&aug)?
        } else {
            Vec::new()
        };
        let state = ContinuationState::new(
            step,
            aug[0],
            aug.rows(1, dim).into_owned(),
            Tangent {
                dp: tangent[0],
                du: tangent.rows(1, dim).into_owned(),
            },
        );
        Ok(state.with_arclength(arclength).with_eigenvalues(eigenvalues))
    }

    fn reject(&mut self, target: CorrectionTarget, reason: String) -> StepOutcome<DVector<f64>> {
        self.step_size *= 0.5;
        if self.step_size < self.settings.min_step_size {
            warn!(
                step_size = self.step_size,
                "step size fell below minimum; stopping continuation"
            );
            self.finished = true;
        }
        StepOutcome::Rejected(ConvergenceFailure::new(target, reason))
    }

    fn try_step(
        &mut self,
        prev: &ContinuationState<DVector<f64>>,
    ) -> Result<Option<ContinuationState<DVector<f64>>>> {
        let prev_aug = augmented(prev.param, &prev.solution);
        let prev_tangent = augmented(prev.tangent.dp, &prev.tangent.du);
        let pred_aug = &prev_aug + &prev_tangent * self.step_size;

        let Some((corrected, tangent)) =
            solve_palc(&mut self.problem, &pred_aug, &prev_tangent, &self.settings)?
        else {
            return Ok(None);
        };
        let state = self.build_state(
            corrected,
            tangent,
            prev.step + 1,
            prev.arclength + self.step_size,
        )?;
        Ok(Some(state))
    }
}

impl<P: ContinuationProblem> Stepper<DVector<f64>> for PalcStepper<P> {
    fn advance(&mut self) -> StepOutcome<DVector<f64>> {
        if self.finished {
            return StepOutcome::Finished;
        }
        if let Some(initial) = self.pending.take() {
            self.current = Some(initial.clone());
            return StepOutcome::Accepted(initial);
        }
        let Some(prev) = self.current.clone() else {
            return StepOutcome::Finished;
        };
        if self.steps >= self.settings.max_steps {
            debug!(steps = self.steps, "step budget exhausted");
            self.finished = true;
            return StepOutcome::Finished;
        }

        let target = CorrectionTarget::Arclength(prev.arclength + self.step_size);
        match self.try_step(&prev) {
            Ok(Some(state)) => {
                self.steps += 1;
                self.step_size = (self.step_size * STEP_GROWTH).min(self.settings.max_step_size);
                if !self.settings.contains(state.param) {
                    debug!(param = state.param, "left the parameter domain");
                    self.finished = true;
                }
                self.current = Some(state.clone());
                StepOutcome::Accepted(state)
            }
            Ok(None) => self.reject(target, "PALC corrector did not converge".to_string()),
            Err(err) => self.reject(target, format!("{err:#}")),
        }
    }

    fn domain(&self) -> (f64, f64) {
        (self.settings.p_min, self.settings.p_max)
    }

    fn require_eigenvalues(&mut self, required: bool) {
        self.compute_eigenvalues |= required;
        if required {
            if let Some(pending) = self.pending.take() {
                let aug = augmented(pending.param, &pending.solution);
                match self.problem.jacobian_eigenvalues(&aug) {
                    Ok(eigenvalues) => self.pending = Some(pending.with_eigenvalues(eigenvalues)),
                    Err(err) => {
                        warn!(error = %err, "eigenvalues unavailable at the initial point");
                        self.pending = Some(pending);
                    }
                }
            }
        }
    }
}

impl<P: ContinuationProblem> Corrector<DVector<f64>> for PalcStepper<P> {
    fn correct_at(
        &mut self,
        target: CorrectionTarget,
        guess: &ContinuationState<DVector<f64>>,
    ) -> Result<ContinuationState<DVector<f64>>, ConvergenceFailure> {
        let failure = |reason: String| ConvergenceFailure::new(target, reason);
        let guess_aug = augmented(guess.param, &guess.solution);
        let guess_tangent = augmented(guess.tangent.dp, &guess.tangent.du);

        let (corrected, arclength) = match target {
            CorrectionTarget::Parameter(p) => {
                // Secant prediction along the guess tangent, then pin the parameter.
                let mut initial = guess_aug.clone();
                if guess_tangent[0].abs() > 1e-12 {
                    initial += &guess_tangent * ((p - guess.param) / guess_tangent[0]);
                }
                initial[0] = p;
                let corrected = newton_at_param(&mut self.problem, initial, &self.settings)
                    .map_err(|err| failure(format!("{err:#}")))?
                    .ok_or_else(|| failure("Newton corrector did not converge".to_string()))?;
                let arclength = guess.arclength + guess_tangent.dot(&(&corrected - &guess_aug));
                (corrected, arclength)
            }
            CorrectionTarget::Arclength(s) => {
                let pred = &guess_aug + &guess_tangent * (s - guess.arclength);
                let (corrected, _) =
                    solve_palc(&mut self.problem, &pred, &guess_tangent, &self.settings)
                        .map_err(|err| failure(format!("{err:#}")))?
                        .ok_or_else(|| failure("PALC corrector did not converge".to_string()))?;
                (corrected, s)
            }
        };

        let j_ext = self
            .problem
            .extended_jacobian(&corrected)
            .map_err(|err| failure(format!("{err:#}")))?;
        let tangent = nullspace_tangent(&j_ext, Some(&guess_tangent))
            .map_err(|err| failure(format!("{err:#}")))?;
        self.build_state(corrected, tangent, guess.step, arclength)
            .map_err(|err| failure(format!("{err:#}")))
    }
}

fn validate_settings(settings: &ContinuationSettings) -> Result<()> {
    if !(settings.step_size > 0.0) {
        bail!("step_size must be positive.");
    }
    if !(settings.min_step_size > 0.0) || settings.min_step_size > settings.max_step_size {
        bail!("min_step_size must be positive and not exceed max_step_size.");
    }
    if settings.step_size > settings.max_step_size {
        bail!("step_size must not exceed max_step_size.");
    }
    if settings.corrector_steps == 0 {
        bail!("corrector_steps must be greater than zero.");
    }
    if !(settings.corrector_tolerance > 0.0) {
        bail!("corrector_tolerance must be positive.");
    }
    if !(settings.step_tolerance >= 0.0) {
        bail!("step_tolerance must be non-negative.");
    }
    if !(settings.p_min < settings.p_max) {
        bail!("p_min must be below p_max.");
    }
    Ok(())
}

fn augmented(head: f64, tail: &DVector<f64>) -> DVector<f64> {
    let mut aug = DVector::zeros(tail.len() + 1);
    aug[0] = head;
    aug.rows_mut(1, tail.len()).copy_from(tail);
    aug
}

fn all_finite(values: &DVector<f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Newton iteration in the state variables with the parameter held at `aug[0]`.
fn newton_at_param<P: ContinuationProblem>(
    problem: &mut P,
    mut aug: DVector<f64>,
    settings: &ContinuationSettings,
) -> Result<Option<DVector<f64>>> {
    let dim = problem.dimension();
    let mut f_val = DVector::zeros(dim);

    for _ in 0..settings.corrector_steps {
        problem.residual(&aug, &mut f_val)?;
        if f_val.norm() < settings.corrector_tolerance {
            return Ok(Some(aug));
        }

        let j_x: DMatrix<f64> = problem.extended_jacobian(&aug)?.columns(1, dim).into_owned();
        let delta = j_x
            .lu()
            .solve(&(-&f_val))
            .ok_or_else(|| anyhow!("Singular state Jacobian in parameter corrector"))?;
        for i in 0..dim {
            aug[i + 1] += delta[i];
        }

        if !all_finite(&aug) {
            return Ok(None);
        }
        if delta.norm() < settings.step_tolerance {
            return Ok(Some(aug));
        }
    }

    problem.residual(&aug, &mut f_val)?;
    Ok((f_val.norm() < settings.corrector_tolerance).then_some(aug))
}

/// PALC corrector: solves `F = 0` together with `t · (x - pred) = 0`.
fn solve_palc<P: ContinuationProblem>(
    problem: &mut P,
    pred_aug: &DVector<f64>,
    prev_tangent: &DVector<f64>,
    settings: &ContinuationSettings,
) -> Result<Option<(DVector<f64>, DVector<f64>)>> {
    let dim = problem.dimension();
    let mut current_aug = pred_aug.clone();
    let mut f_val = DVector::zeros(dim);

    for _ in 0..=settings.corrector_steps {
        problem.residual(&current_aug, &mut f_val)?;
        let constraint_val = prev_tangent.dot(&(&current_aug - pred_aug));

        let mut rhs = DVector::zeros(dim + 1);
        rhs.rows_mut(0, dim).copy_from(&(-&f_val));
        rhs[dim] = -constraint_val;

        let j_ext = problem.extended_jacobian(&current_aug)?;
        if rhs.norm() < settings.corrector_tolerance {
            let tangent = nullspace_tangent(&j_ext, Some(prev_tangent))?;
            if !all_finite(&current_aug) || !all_finite(&tangent) {
                return Ok(None);
            }
            return Ok(Some((current_aug, tangent)));
        }

        let mut a = DMatrix::zeros(dim + 1, dim + 1);
        a.view_mut((0, 0), (dim, dim + 1)).copy_from(&j_ext);
        a.row_mut(dim).copy_from(&prev_tangent.transpose());

        let delta = a
            .lu()
            .solve(&rhs)
            .ok_or_else(|| anyhow!("Singular matrix in PALC corrector"))?;
        current_aug += &delta;

        if !all_finite(&current_aug) {
            return Ok(None);
        }
        if delta.norm() < settings.step_tolerance {
            let j_ext = problem.extended_jacobian(&current_aug)?;
            let tangent = nullspace_tangent(&j_ext, Some(prev_tangent))?;
            if !all_finite(&tangent) {
                return Ok(None);
            }
            return Ok(Some((current_aug, tangent)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// p - x^2 = 0, a fold at the origin.
    struct Parabola;

    impl ContinuationProblem for Parabola {
        fn dimension(&self) -> usize {
            1
        }

        fn residual(&mut self, aug: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
            out[0] = aug[0] - aug[1] * aug[1];
            Ok(())
        }

        fn extended_jacobian(&mut self, aug: &DVector<f64>) -> Result<DMatrix<f64>> {
            Ok(DMatrix::from_row_slice(1, 2, &[1.0, -2.0 * aug[1]]))
        }
    }

    fn settings() -> ContinuationSettings {
        ContinuationSettings {
            step_size: 0.05,
            min_step_size: 1e-6,
            max_step_size: 0.1,
            max_steps: 200,
            corrector_steps: 12,
            corrector_tolerance: 1e-10,
            step_tolerance: 1e-12,
            p_min: -1.0,
            p_max: 2.0,
            forward: false,
            compute_eigenvalues: false,
        }
    }

    fn accepted(outcome: StepOutcome<DVector<f64>>) -> ContinuationState<DVector<f64>> {
        match outcome {
            StepOutcome::Accepted(state) => state,
            other => panic!("expected accepted step, got {other:?}"),
        }
    }

    #[test]
    fn first_advance_reports_corrected_start() {
        let mut stepper = PalcStepper::new(Parabola, &[-1.01], 1.0, settings()).expect("stepper");
        let start = accepted(stepper.advance());
        assert_eq!(start.step, 0);
        assert!((start.solution[0] + 1.0).abs() < 1e-9);
        assert!(start.tangent.dp < 0.0);
        assert_eq!(start.arclength, 0.0);
    }

    #[test]
    fn stepper_rounds_the_fold_and_leaves_the_domain() {
        let mut stepper = PalcStepper::new(Parabola, &[-1.0], 1.0, settings()).expect("stepper");
        let mut states = Vec::new();
        loop {
            match stepper.advance() {
                StepOutcome::Accepted(state) => states.push(state),
                StepOutcome::Rejected(_) => {}
                StepOutcome::Finished => break,
            }
        }

        let last = states.last().expect("states");
        assert!(last.param > 2.0);
        assert!(last.solution[0] > 0.0);
        assert!(states.iter().any(|s| s.tangent.dp < 0.0));
        assert!(states.iter().any(|s| s.tangent.dp > 0.0));
        for pair in states.windows(2) {
            assert_eq!(pair[1].step, pair[0].step + 1);
            assert!(pair[1].arclength > pair[0].arclength);
        }
    }

    #[test]
    fn correct_at_parameter_lands_on_curve() {
        let mut stepper = PalcStepper::new(Parabola, &[-1.0], 1.0, settings()).expect("stepper");
        let start = accepted(stepper.advance());
        let corrected = stepper
            .correct_at(CorrectionTarget::Parameter(0.81), &start)
            .expect("corrected");
        assert!((corrected.param - 0.81).abs() < 1e-14);
        assert!((corrected.solution[0] + 0.9).abs() < 1e-9);
        assert!(corrected.tangent.dp < 0.0);
        assert!(corrected.arclength > 0.0);
    }

    #[test]
    fn correct_at_arclength_keeps_target() {
        let mut stepper = PalcStepper::new(Parabola, &[-1.0], 1.0, settings()).expect("stepper");
        let start = accepted(stepper.advance());
        let corrected = stepper
            .correct_at(CorrectionTarget::Arclength(0.02), &start)
            .expect("corrected");
        assert_eq!(corrected.arclength, 0.02);
        assert!((corrected.param - corrected.solution[0].powi(2)).abs() < 1e-9);
    }

    #[test]
    fn small_newton_step_counts_as_converged() {
        // The residual of p - x^2 at p = 2 never reaches 1e-300 in floating point.
        let strict = ContinuationSettings {
            corrector_tolerance: 1e-300,
            step_tolerance: 1e-8,
            ..settings()
        };
        let mut stepper = PalcStepper::new(Parabola, &[-1.5], 2.0, strict).expect("stepper");
        let start = accepted(stepper.advance());
        assert!((start.solution[0] + 2f64.sqrt()).abs() < 1e-12);

        let no_step_check = ContinuationSettings {
            step_tolerance: 0.0,
            ..strict
        };
        assert!(PalcStepper::new(Parabola, &[-1.5], 2.0, no_step_check).is_err());
    }

    #[test]
    fn new_rejects_bad_settings() {
        let bad = ContinuationSettings {
            p_min: 1.0,
            p_max: 0.0,
            ..settings()
        };
        let err = PalcStepper::new(Parabola, &[-1.0], 1.0, bad)
            .err()
            .expect("expected error");
        assert!(format!("{err}").contains("p_min"));
    }

    #[test]
    fn new_rejects_dimension_mismatch() {
        let err = PalcStepper::new(Parabola, &[-1.0, 0.0], 1.0, settings())
            .err()
            .expect("expected error");
        assert!(format!("{err}").contains("dimension mismatch"));
    }
}
