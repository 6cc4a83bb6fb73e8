//! Hydrodynamic collaborator contracts.
//!
//! The filter treats the rigid-body hydrodynamic model and the learned
//! 3-DoF regression model as external collaborators: both are consulted
//! through the traits below and receive every parameter per call, so the
//! measurement functions stay pure and no shared model instance is mutated
//! between sigma points.

use nalgebra::{Matrix6, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Feature-table names consumed by the 3-DoF regression model, in the
/// order the model expects them.
pub const SVR_FEATURE_NAMES: [&str; 10] = [
    "scaler_params",
    "params_x",
    "params_y",
    "params_yaw",
    "fitout_x",
    "fitout_y",
    "fitout_yaw",
    "s_x",
    "s_y",
    "s_yaw",
];

/// Baseline rigid-body hydrodynamic parameters of the vehicle.
///
/// `damping_matrices[0]` is the linear damping matrix, `[1]` the quadratic
/// one. All three matrices are 6×6 over (surge, sway, heave, roll, pitch,
/// yaw).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UWVParameters {
    pub inertia_matrix: Matrix6<f64>,
    pub damping_matrices: [Matrix6<f64>; 2],
}

impl Default for UWVParameters {
    fn default() -> Self {
        UWVParameters {
            inertia_matrix: Matrix6::identity(),
            damping_matrices: [Matrix6::zeros(), Matrix6::zeros()],
        }
    }
}

/// Rigid-body hydrodynamic model mapping body-frame kinematics to efforts.
pub trait HydrodynamicModel {
    /// Expected forces and torques (6-vector, body frame) for the given
    /// body-frame acceleration and velocity under `parameters`.
    fn calc_efforts(
        &self,
        parameters: &UWVParameters,
        acceleration: &Vector6<f64>,
        velocity: &Vector6<f64>,
        orientation: &UnitQuaternion<f64>,
    ) -> Vector6<f64>;
}

/// Learned regression model predicting surge, sway and yaw efforts.
pub trait ThreeDofRegression {
    /// Predict `(surge, sway, yaw)` efforts from
    /// `x = (v_surge, v_sway, r, a_surge, a_sway, alpha_yaw)`.
    ///
    /// `feature_names` selects the parameter tables of the fitted model;
    /// see [`SVR_FEATURE_NAMES`] for the expected ordering.
    fn predict_efforts(&self, x: &Vector6<f64>, feature_names: &[&str; 10]) -> Vector3<f64>;
}

/// Reference rigid-body model: `τ = M·a + D_l·v + D_q·(|v|∘v)`.
///
/// Restoring forces are not modeled; the filter estimates buoyancy effects
/// through the acceleration state instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct RigidBodyModel;

impl HydrodynamicModel for RigidBodyModel {
    fn calc_efforts(
        &self,
        parameters: &UWVParameters,
        acceleration: &Vector6<f64>,
        velocity: &Vector6<f64>,
        _orientation: &UnitQuaternion<f64>,
    ) -> Vector6<f64> {
        let quadratic = velocity.component_mul(&velocity.abs());
        parameters.inertia_matrix * acceleration
            + parameters.damping_matrices[0] * velocity
            + parameters.damping_matrices[1] * quadratic
    }
}

/// Linear stand-in for the fitted regression model.
///
/// Useful for simulation and tests where no trained model is available:
/// predicts efforts as a fixed linear map of the kinematic features.
#[derive(Clone, Debug)]
pub struct LinearThreeDof {
    pub weights: nalgebra::SMatrix<f64, 3, 6>,
}

impl LinearThreeDof {
    pub fn new(weights: nalgebra::SMatrix<f64, 3, 6>) -> Self {
        LinearThreeDof { weights }
    }
}

impl ThreeDofRegression for LinearThreeDof {
    fn predict_efforts(&self, x: &Vector6<f64>, _feature_names: &[&str; 10]) -> Vector3<f64> {
        self.weights * x
    }
}
