use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

use super::util::compute_eigenvalues;

/// Core interface implemented by any system that can be continued via PALC.
///
/// Augmented states are laid out as `[p, u_0, ..., u_{n-1}]`.
pub trait ContinuationProblem {
    /// Number of state variables (excluding the continuation parameter).
    fn dimension(&self) -> usize;

    /// Evaluate the residual F(aug_state) and write into `out`.
    fn residual(&mut self, aug_state: &DVector<f64>, out: &mut DVector<f64>) -> Result<()>;

    /// Compute the extended Jacobian (derivative of F w.r.t. [p, u]).
    fn extended_jacobian(&mut self, aug_state: &DVector<f64>) -> Result<DMatrix<f64>>;

    /// Eigenvalues of the state Jacobian `F_u`, used by the stability probes.
    fn jacobian_eigenvalues(&mut self, aug_state: &DVector<f64>) -> Result<Vec<Complex<f64>>> {
        let dim = self.dimension();
        let j_ext = self.extended_jacobian(aug_state)?;
        compute_eigenvalues(&j_ext.columns(1, dim).into_owned())
    }
}
