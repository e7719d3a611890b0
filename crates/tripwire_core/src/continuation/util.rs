//! Utility functions for continuation analysis.
//!
//! Tangent computation for the reference stepper and eigenvalue bookkeeping for
//! the stability probes.

use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use num_complex::Complex;

const IMAG_EPS: f64 = 1e-8;

/// Computes the unit tangent to the solution curve from the extended Jacobian `[F_p | F_u]`.
///
/// With a `reference` direction the tangent solves the bordered system
/// `[J; r^T] t = [0; 1]`, which also orients it along `r`. Without one (or if the bordered
/// system is singular) the eigenvector of `J^T J` with the smallest eigenvalue is used.
pub fn nullspace_tangent(
    j_ext: &DMatrix<f64>,
    reference: Option<&DVector<f64>>,
) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    if dim == 0 {
        bail!("Failed to compute tangent: zero-dimensional system");
    }
    if j_ext.ncols() != dim + 1 {
        bail!(
            "Failed to compute tangent: expected {} columns, got {}",
            dim + 1,
            j_ext.ncols()
        );
    }

    let mut tangent = match reference {
        Some(r) => bordered_tangent(j_ext, r).or_else(|_| gram_tangent(j_ext))?,
        None => gram_tangent(j_ext)?,
    };

    let norm = tangent.norm();
    if norm == 0.0 || !norm.is_finite() {
        bail!("Failed to compute tangent: degenerate null vector");
    }
    tangent /= norm;

    if let Some(r) = reference {
        if tangent.dot(r) < 0.0 {
            tangent = -tangent;
        }
    }
    Ok(tangent)
}

fn bordered_tangent(j_ext: &DMatrix<f64>, reference: &DVector<f64>) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    if reference.len() != dim + 1 {
        bail!("Reference direction has length {}, expected {}", reference.len(), dim + 1);
    }

    let mut a = DMatrix::zeros(dim + 1, dim + 1);
    a.view_mut((0, 0), (dim, dim + 1)).copy_from(j_ext);
    a.row_mut(dim).copy_from(&reference.transpose());
    let mut rhs = DVector::zeros(dim + 1);
    rhs[dim] = 1.0;

    let solution = a
        .lu()
        .solve(&rhs)
        .ok_or_else(|| anyhow!("Bordered tangent system is singular"))?;
    if solution.iter().any(|v| !v.is_finite()) {
        bail!("Bordered tangent system produced non-finite values");
    }
    Ok(solution)
}

fn gram_tangent(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let gram = j_ext.transpose() * j_ext;
    if gram.iter().any(|v| !v.is_finite()) {
        bail!("Failed to compute tangent: non-finite Jacobian");
    }

    let eig = SymmetricEigen::new(gram);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .ok_or_else(|| anyhow!("Failed to compute tangent: no finite eigenvalues"))?;

    Ok(eig.eigenvectors.column(min_idx).into_owned())
}

/// Computes eigenvalues from a matrix.
pub fn compute_eigenvalues(mat: &DMatrix<f64>) -> Result<Vec<Complex<f64>>> {
    if mat.nrows() == 0 {
        return Ok(Vec::new());
    }
    if !mat.is_square() {
        bail!("Eigenvalues need a square matrix, got {}x{}", mat.nrows(), mat.ncols());
    }

    let eigen = mat.clone().complex_eigenvalues();
    Ok(eigen.iter().cloned().collect())
}

/// Counts eigenvalues with positive real part as `(real, complex pairs)`.
///
/// Each conjugate pair is counted once, through its member with positive imaginary part.
pub fn count_unstable(eigenvalues: &[Complex<f64>]) -> (usize, usize) {
    eigenvalues
        .iter()
        .filter(|eig| eig.re > 0.0)
        .fold((0, 0), |(real, pairs), eig| {
            if eig.im.abs() < IMAG_EPS {
                (real + 1, pairs)
            } else if eig.im > 0.0 {
                (real, pairs + 1)
            } else {
                (real, pairs)
            }
        })
}
