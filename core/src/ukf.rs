//! Unscented Kalman filtering on product manifolds.
//!
//! The engine keeps the mean as a point on the state manifold and the
//! covariance over its tangent space. Sigma points are generated with the
//! scaled symmetric set (2·DOF+1 points, Merwe weights), propagated through
//! an arbitrary process or measurement function, and recombined with the
//! boxplus/boxminus operators of the [`Manifold`] trait: the mean through an
//! iterated weighted tangent average, the covariance from tangent residuals
//! about that mean.
//!
//! All covariance numerics route through [`crate::linalg`], which retries
//! failed factorizations with diagonal jitter; a step whose factorization
//! still fails is skipped and reported as [`FilterError::Singular`] without
//! touching the state.

use nalgebra::{DMatrix, DVector};

use crate::gating::InnovationGate;
use crate::linalg::{psd_sqrt, robust_spd_solve, symmetrize};
use crate::manifold::Manifold;
use crate::FilterError;

/// Default spread parameter of the scaled sigma set.
pub const DEFAULT_ALPHA: f64 = 1e-3;
/// Default distribution parameter (2 is optimal for Gaussian priors).
pub const DEFAULT_BETA: f64 = 2.0;
/// Default secondary scaling parameter.
pub const DEFAULT_KAPPA: f64 = 0.0;

/// Iteration cap of the weighted tangent-mean recombination.
const MEAN_MAX_ITERATIONS: usize = 8;
/// Convergence threshold on the mean update norm.
const MEAN_TOLERANCE: f64 = 1e-9;

/// Result of an accepted measurement update.
#[derive(Clone, Copy, Debug)]
pub struct Innovation {
    /// Euclidean norm of the innovation in the measurement tangent space.
    pub norm: f64,
    /// Squared Mahalanobis distance `νᵀ S⁻¹ ν` of the innovation.
    pub mahalanobis2: f64,
}

/// Unscented Kalman filter over the manifold `S`.
#[derive(Clone, Debug)]
pub struct Ukf<S: Manifold> {
    mean: S,
    covariance: DMatrix<f64>,
    lambda: f64,
    weights_mean: DVector<f64>,
    weights_cov: DVector<f64>,
}

impl<S: Manifold> Ukf<S> {
    /// Create a filter with the default (α, β, κ) sigma weights.
    pub fn new(mean: S, covariance: DMatrix<f64>) -> Ukf<S> {
        Self::with_weights(mean, covariance, DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_KAPPA)
    }

    /// Create a filter with explicit sigma weight parameters.
    pub fn with_weights(
        mean: S,
        covariance: DMatrix<f64>,
        alpha: f64,
        beta: f64,
        kappa: f64,
    ) -> Ukf<S> {
        let n = S::DOF;
        assert!(
            covariance.nrows() == n && covariance.ncols() == n,
            "covariance must be {}x{}, got {}x{}",
            n,
            n,
            covariance.nrows(),
            covariance.ncols()
        );
        assert!(
            covariance.iter().all(|v| v.is_finite()),
            "covariance must be finite"
        );
        let n_f = n as f64;
        let lambda = alpha * alpha * (n_f + kappa) - n_f;
        let mut weights_mean = DVector::zeros(2 * n + 1);
        let mut weights_cov = DVector::zeros(2 * n + 1);
        weights_mean[0] = lambda / (n_f + lambda);
        weights_cov[0] = lambda / (n_f + lambda) + (1.0 - alpha * alpha + beta);
        for i in 1..(2 * n + 1) {
            let w = 1.0 / (2.0 * (n_f + lambda));
            weights_mean[i] = w;
            weights_cov[i] = w;
        }
        Ukf {
            mean,
            covariance: symmetrize(&covariance),
            lambda,
            weights_mean,
            weights_cov,
        }
    }

    pub fn mean(&self) -> &S {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Replace the estimate, keeping the sigma weights.
    ///
    /// Used when a posterior computed on an augmented manifold is projected
    /// back onto this filter's state.
    pub fn reset(&mut self, mean: S, covariance: DMatrix<f64>) {
        assert!(
            covariance.nrows() == S::DOF && covariance.ncols() == S::DOF,
            "covariance must be {0}x{0}",
            S::DOF
        );
        self.mean = mean;
        self.covariance = symmetrize(&covariance);
    }

    /// Generate the symmetric 2·DOF+1 sigma set around the current mean.
    fn sigma_points(&self) -> Result<Vec<S>, FilterError> {
        let n = S::DOF;
        let scaled = &self.covariance * (n as f64 + self.lambda);
        let root = psd_sqrt(&scaled).ok_or(FilterError::Singular)?;
        let mut points = Vec::with_capacity(2 * n + 1);
        points.push(self.mean.clone());
        for i in 0..n {
            let column = root.column(i).clone_owned();
            let mut plus = self.mean.clone();
            plus.boxplus(column.as_slice(), 1.0);
            points.push(plus);
            let mut minus = self.mean.clone();
            minus.boxplus(column.as_slice(), -1.0);
            points.push(minus);
        }
        Ok(points)
    }

    /// Propagate the estimate through the process function `f` and add the
    /// (already discretized) process noise.
    pub fn predict<F>(&mut self, f: F, process_noise: &DMatrix<f64>) -> Result<(), FilterError>
    where
        F: Fn(&S) -> S,
    {
        let propagated: Vec<S> = self.sigma_points()?.iter().map(|p| f(p)).collect();
        let mean = karcher_mean(&propagated, &self.weights_mean);
        let covariance =
            tangent_covariance(&propagated, &mean, &self.weights_cov) + process_noise;
        self.mean = mean;
        self.covariance = symmetrize(&covariance);
        Ok(())
    }

    /// Update the estimate with an observation on the manifold `Z`.
    ///
    /// The innovation is gated on its squared Mahalanobis distance before
    /// the gain is formed; a rejected update leaves the estimate untouched
    /// and reports [`FilterError::GateRejected`].
    pub fn update<Z, H>(
        &mut self,
        observation: &Z,
        measurement_model: H,
        measurement_noise: &DMatrix<f64>,
        gate: InnovationGate,
    ) -> Result<Innovation, FilterError>
    where
        Z: Manifold,
        H: Fn(&S) -> Z,
    {
        let points = self.sigma_points()?;
        let predicted: Vec<Z> = points.iter().map(|p| measurement_model(p)).collect();
        let predicted_mean = karcher_mean(&predicted, &self.weights_mean);
        let innovation_cov = symmetrize(
            &(tangent_covariance(&predicted, &predicted_mean, &self.weights_cov)
                + measurement_noise),
        );
        let cross_cov = cross_covariance(
            &points,
            &self.mean,
            &predicted,
            &predicted_mean,
            &self.weights_cov,
        );

        let mut innovation = DVector::zeros(Z::DOF);
        observation.boxminus(&predicted_mean, innovation.as_mut_slice());

        let innovation_matrix = DMatrix::from_column_slice(Z::DOF, 1, innovation.as_slice());
        let whitened =
            robust_spd_solve(&innovation_cov, &innovation_matrix).ok_or(FilterError::Singular)?;
        let mahalanobis2 = innovation.dot(&whitened.column(0).clone_owned());
        if !gate.accepts(mahalanobis2) {
            return Err(FilterError::GateRejected(mahalanobis2));
        }

        let gain_t = robust_spd_solve(&innovation_cov, &cross_cov.transpose())
            .ok_or(FilterError::Singular)?;
        let gain = gain_t.transpose();
        let correction = &gain * &innovation;
        self.mean.boxplus(correction.as_slice(), 1.0);
        self.covariance =
            symmetrize(&(&self.covariance - &gain * &innovation_cov * gain.transpose()));

        Ok(Innovation {
            norm: innovation.norm(),
            mahalanobis2,
        })
    }
}

/// Weighted mean of manifold points by iterated tangent averaging.
///
/// Starts from the first point and repeatedly moves the estimate by the
/// weighted tangent residual until the step drops below tolerance.
fn karcher_mean<M: Manifold>(points: &[M], weights: &DVector<f64>) -> M {
    let n = M::DOF;
    let mut mean = points[0].clone();
    let mut residual = vec![0.0; n];
    for _ in 0..MEAN_MAX_ITERATIONS {
        let mut step = DVector::zeros(n);
        for (i, point) in points.iter().enumerate() {
            point.boxminus(&mean, &mut residual);
            for j in 0..n {
                step[j] += weights[i] * residual[j];
            }
        }
        mean.boxplus(step.as_slice(), 1.0);
        if step.norm() < MEAN_TOLERANCE {
            break;
        }
    }
    mean
}

/// Weighted outer-product covariance of tangent residuals about `mean`.
fn tangent_covariance<M: Manifold>(
    points: &[M],
    mean: &M,
    weights: &DVector<f64>,
) -> DMatrix<f64> {
    let n = M::DOF;
    let mut covariance = DMatrix::zeros(n, n);
    let mut residual = vec![0.0; n];
    for (i, point) in points.iter().enumerate() {
        point.boxminus(mean, &mut residual);
        let delta = DVector::from_column_slice(&residual);
        covariance += weights[i] * &delta * delta.transpose();
    }
    covariance
}

/// Weighted cross-covariance between state and measurement residuals.
fn cross_covariance<S: Manifold, Z: Manifold>(
    states: &[S],
    state_mean: &S,
    measurements: &[Z],
    measurement_mean: &Z,
    weights: &DVector<f64>,
) -> DMatrix<f64> {
    let mut cross = DMatrix::zeros(S::DOF, Z::DOF);
    let mut state_residual = vec![0.0; S::DOF];
    let mut measurement_residual = vec![0.0; Z::DOF];
    for i in 0..states.len() {
        states[i].boxminus(state_mean, &mut state_residual);
        measurements[i].boxminus(measurement_mean, &mut measurement_residual);
        let ds = DVector::from_column_slice(&state_residual);
        let dz = DVector::from_column_slice(&measurement_residual);
        cross += weights[i] * &ds * dz.transpose();
    }
    cross
}
