//! Covariance numerics shared by the filter engine.
//!
//! Covariance matrices drift away from exact symmetry and positive
//! semidefiniteness under repeated predict/update cycles. The helpers here
//! keep the engine on the feasible set: a square root that retries with
//! diagonal jitter before falling back to a clamped eigendecomposition, and
//! an SPD solve with the same retry policy used for the Kalman gain and the
//! Mahalanobis distance.

use nalgebra::DMatrix;

/// Diagonal jitter added per retry when a factorization fails.
const JITTER: f64 = 1e-9;
/// Number of jitter retries before giving up on Cholesky.
const JITTER_RETRIES: usize = 3;
/// Eigenvalues below this are treated as genuinely negative rather than
/// round-off.
const EIGENVALUE_TOLERANCE: f64 = -1e-9;

/// Average a matrix with its transpose.
pub fn symmetrize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    (matrix + matrix.transpose()) * 0.5
}

/// Square root of a symmetric positive semidefinite matrix.
///
/// Attempts Cholesky on the symmetrized input, retrying with `+1e-9·I` up
/// to three times. If that keeps failing the matrix may be semidefinite
/// rather than definite, so a symmetric eigendecomposition with clamped
/// eigenvalues is used instead. Returns `None` when the matrix has
/// significantly negative eigenvalues.
pub fn psd_sqrt(matrix: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return None;
    }
    let mut candidate = symmetrize(matrix);
    for _ in 0..=JITTER_RETRIES {
        if let Some(cholesky) = candidate.clone().cholesky() {
            return Some(cholesky.l());
        }
        for i in 0..n {
            candidate[(i, i)] += JITTER;
        }
    }
    let eigen = symmetrize(matrix).symmetric_eigen();
    if eigen.eigenvalues.iter().any(|&v| v < EIGENVALUE_TOLERANCE) {
        return None;
    }
    let sqrt_diagonal = DMatrix::from_diagonal(&eigen.eigenvalues.map(|v| v.max(0.0).sqrt()));
    Some(&eigen.eigenvectors * sqrt_diagonal * eigen.eigenvectors.transpose())
}

/// Solve `A · X = B` for symmetric positive definite `A`.
///
/// Cholesky with the same jitter retry policy as [`psd_sqrt`]. Returns
/// `None` when `A` stays singular after the retries.
pub fn robust_spd_solve(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = a.nrows();
    let mut candidate = symmetrize(a);
    for _ in 0..=JITTER_RETRIES {
        if let Some(cholesky) = candidate.clone().cholesky() {
            return Some(cholesky.solve(b));
        }
        for i in 0..n {
            candidate[(i, i)] += JITTER;
        }
    }
    None
}
