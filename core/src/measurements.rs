//! Measurement entities and measurement models.
//!
//! A measurement is a mean/covariance pair on the sensor's own space;
//! [`Measurement::check`] performs the sanity checks every sample must pass
//! before it may touch the filter. The `measurement_*` functions are the
//! deterministic, side-effect-free models `h: state → expected measurement`
//! the unscented update propagates the sigma points through.

use nalgebra::{DMatrix, Isometry3, SMatrix, SVector, UnitQuaternion, Vector3, Vector6};

use crate::dynamics::{
    HydrodynamicModel, ThreeDofRegression, UWVParameters, SVR_FEATURE_NAMES,
};
use crate::linalg::symmetrize;
use crate::manifold::{Euclidean, UnitSphere};
use crate::state::{PoseState, PoseStateWithMarker};
use crate::FilterError;

/// Eigenvalues of a measurement covariance below this are treated as
/// genuinely negative.
const COVARIANCE_TOLERANCE: f64 = -1e-9;

/// A sensor sample: mean and covariance of dimension `D`.
#[derive(Clone, Copy, Debug)]
pub struct Measurement<const D: usize> {
    pub mu: SVector<f64, D>,
    pub cov: SMatrix<f64, D, D>,
}

impl<const D: usize> Measurement<D> {
    pub fn new(mu: SVector<f64, D>, cov: SMatrix<f64, D, D>) -> Self {
        Measurement { mu, cov }
    }

    /// Reject samples containing NaN/Inf or a non-PSD covariance.
    pub fn check(&self) -> Result<(), FilterError> {
        if self.mu.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::BadMeasurement("non-finite measurement mean"));
        }
        if self.cov.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::BadMeasurement(
                "non-finite measurement covariance",
            ));
        }
        let symmetric = symmetrize(&DMatrix::from_iterator(D, D, self.cov.iter().cloned()));
        let eigenvalues = symmetric.symmetric_eigenvalues();
        if eigenvalues.iter().any(|&v| v < COVARIANCE_TOLERANCE) {
            return Err(FilterError::BadMeasurement(
                "measurement covariance is not positive semidefinite",
            ));
        }
        Ok(())
    }
}

/// WGS84 latitude/longitude in radians; uncertainty in meters on the earth
/// surface.
pub type GeographicPosition = Measurement<2>;
/// 2D position in the navigation frame.
pub type XyPosition = Measurement<2>;
/// Altitude of the IMU in the navigation frame.
pub type ZPosition = Measurement<1>;
/// Liquid pressure in pascal.
pub type Pressure = Measurement<1>;
/// Rotation rates of the IMU in the IMU frame.
pub type RotationRate = Measurement<3>;
/// Accelerations of the IMU in the IMU frame.
pub type Acceleration = Measurement<3>;
/// Velocities in the IMU frame.
pub type Velocity = Measurement<3>;
/// Forces and torques in the body frame.
pub type BodyEffortsMeasurement = Measurement<6>;
/// Horizontal water velocity from the ADCP, IMU frame.
pub type WaterVelocityMeasurement = Measurement<2>;
/// A visual feature in undistorted image coordinates (pixels).
pub type VisualFeatureMeasurement = Measurement<2>;

/// First two components of the position.
pub fn measurement_xy_position(state: &PoseState) -> Euclidean<2> {
    Euclidean(state.position.0.fixed_rows::<2>(0).into_owned())
}

/// Third component of the position.
pub fn measurement_z_position(state: &PoseState) -> Euclidean<1> {
    Euclidean(nalgebra::Vector1::new(state.position.0[2]))
}

/// Hydrostatic pressure at the pressure sensor.
///
/// The sensor sits at `pressure_sensor_in_imu` relative to the IMU; depth
/// is negative z in the navigation frame.
pub fn measurement_pressure(
    state: &PoseState,
    pressure_sensor_in_imu: &Vector3<f64>,
    atmospheric_pressure: f64,
) -> Euclidean<1> {
    let sensor_in_nav = state.position.0 + state.orientation.0 * pressure_sensor_in_imu;
    let pressure = atmospheric_pressure
        - sensor_in_nav[2] * state.gravity.0[0] * state.water_density.0[0];
    Euclidean(nalgebra::Vector1::new(pressure))
}

/// Expected DVL velocities in the IMU frame.
pub fn measurement_velocity(state: &PoseState) -> Euclidean<3> {
    Euclidean(state.orientation.0.inverse() * state.velocity.0)
}

/// Expected accelerometer reading in the IMU frame.
pub fn measurement_acceleration(state: &PoseState) -> Euclidean<3> {
    let gravity = Vector3::new(0.0, 0.0, state.gravity.0[0]);
    Euclidean(
        state.orientation.0.inverse() * (state.acceleration.0 + gravity) + state.bias_acc.0,
    )
}

/// Expected ADCP water-current reading in the IMU frame.
///
/// `cell_weighting` blends the lower cell (weight `α`) with the upper cell
/// (weight `1−α`).
pub fn measurement_water_currents(state: &PoseState, cell_weighting: f64) -> Euclidean<2> {
    let below = Vector3::new(
        state.water_velocity_below.0[0],
        state.water_velocity_below.0[1],
        0.0,
    );
    let relative_below = state.orientation.0.inverse() * (state.velocity.0 - below);

    let upper = Vector3::new(state.water_velocity.0[0], state.water_velocity.0[1], 0.0);
    let relative_upper = state.orientation.0.inverse() * (state.velocity.0 - upper);

    Euclidean(nalgebra::Vector2::new(
        cell_weighting * relative_below[0]
            + (1.0 - cell_weighting) * relative_upper[0]
            + state.bias_adcp.0[0],
        cell_weighting * relative_below[1]
            + (1.0 - cell_weighting) * relative_upper[1]
            + state.bias_adcp.0[1],
    ))
}

/// Overlay the horizontal-plus-yaw parameter blocks estimated in the state
/// onto the baseline 6×6 matrices.
///
/// Rows/columns {0, 1, 5} of each 6×6 matrix map to the 3×3 state block.
fn overlay_parameters(baseline: &UWVParameters, state: &PoseState) -> UWVParameters {
    const MAPPED: [usize; 3] = [0, 1, 5];
    let mut parameters = baseline.clone();
    let [lin_damping, quad_damping] = &mut parameters.damping_matrices;
    let blocks = [
        (&mut parameters.inertia_matrix, &state.inertia.0),
        (lin_damping, &state.lin_damping.0),
        (quad_damping, &state.quad_damping.0),
    ];
    for (target, block) in blocks {
        for (bi, &ti) in MAPPED.iter().enumerate() {
            for (bj, &tj) in MAPPED.iter().enumerate() {
                target[(ti, tj)] = block[(bi, bj)];
            }
        }
    }
    parameters
}

/// Body-frame velocity of the vehicle relative to the surrounding water.
///
/// Compensates the IMU lever arm and subtracts the (horizontal) current.
fn body_velocity(
    velocity_nav: &Vector3<f64>,
    orientation: &UnitQuaternion<f64>,
    water_velocity: &Vector3<f64>,
    imu_in_body: &Vector3<f64>,
    rotation_rate_body: &Vector3<f64>,
) -> Vector3<f64> {
    orientation.inverse() * velocity_nav - rotation_rate_body.cross(imu_in_body)
        - orientation.inverse() * water_velocity
}

/// Body-frame linear acceleration, compensating the centripetal term of
/// the IMU lever arm.
fn body_acceleration(
    acceleration_nav: &Vector3<f64>,
    orientation: &UnitQuaternion<f64>,
    imu_in_body: &Vector3<f64>,
    rotation_rate_body: &Vector3<f64>,
) -> Vector3<f64> {
    orientation.inverse() * acceleration_nav
        - rotation_rate_body.cross(&rotation_rate_body.cross(imu_in_body))
}

/// Expected body efforts from the hydrodynamic model with the learned
/// surge/sway/yaw replacement.
///
/// The state's inertia and damping blocks overlay the baseline parameters,
/// the rigid-body model produces the full 6-vector, and the regression
/// model overwrites indices 0, 1 and 5.
pub fn measurement_efforts(
    state: &PoseState,
    dynamic_model: &dyn HydrodynamicModel,
    svr_model: &dyn ThreeDofRegression,
    baseline: &UWVParameters,
    imu_in_body: &Vector3<f64>,
    rotation_rate_body: &Vector3<f64>,
) -> Euclidean<6> {
    let parameters = overlay_parameters(baseline, state);

    let water_velocity = Vector3::new(
        state.water_velocity.0[0],
        state.water_velocity.0[1],
        // assume zero vertical current
        0.0,
    );
    let velocity = body_velocity(
        &state.velocity.0,
        &state.orientation.0,
        &water_velocity,
        imu_in_body,
        rotation_rate_body,
    );
    let mut velocity_6d = Vector6::zeros();
    velocity_6d.fixed_rows_mut::<3>(0).copy_from(&velocity);
    velocity_6d.fixed_rows_mut::<3>(3).copy_from(rotation_rate_body);

    // angular acceleration is assumed zero
    let acceleration = body_acceleration(
        &state.acceleration.0,
        &state.orientation.0,
        imu_in_body,
        rotation_rate_body,
    );
    let mut acceleration_6d = Vector6::zeros();
    acceleration_6d.fixed_rows_mut::<3>(0).copy_from(&acceleration);

    let features = Vector6::new(
        velocity_6d[0],
        velocity_6d[1],
        velocity_6d[5],
        acceleration_6d[0],
        acceleration_6d[1],
        acceleration_6d[5],
    );
    let learned = svr_model.predict_efforts(&features, &SVR_FEATURE_NAMES);

    let mut efforts = dynamic_model.calc_efforts(
        &parameters,
        &acceleration_6d,
        &velocity_6d,
        &state.orientation.0,
    );
    efforts[0] = learned[0];
    efforts[1] = learned[1];
    efforts[5] = learned[2];
    Euclidean(efforts)
}

/// Velocity-only variant of the effort model.
///
/// Water current, orientation and body acceleration are fixed parameters
/// rather than state functions, so the innovation constrains velocity
/// alone. The baseline parameters are used unchanged.
pub fn constrain_velocity(
    state: &PoseState,
    dynamic_model: &dyn HydrodynamicModel,
    baseline: &UWVParameters,
    imu_in_body: &Vector3<f64>,
    rotation_rate_body: &Vector3<f64>,
    water_velocity: &Vector3<f64>,
    orientation: &UnitQuaternion<f64>,
    acceleration_body: &Vector3<f64>,
) -> Euclidean<6> {
    let velocity = body_velocity(
        &state.velocity.0,
        orientation,
        water_velocity,
        imu_in_body,
        rotation_rate_body,
    );
    let mut velocity_6d = Vector6::zeros();
    velocity_6d.fixed_rows_mut::<3>(0).copy_from(&velocity);
    velocity_6d.fixed_rows_mut::<3>(3).copy_from(rotation_rate_body);

    let mut acceleration_6d = Vector6::zeros();
    acceleration_6d
        .fixed_rows_mut::<3>(0)
        .copy_from(acceleration_body);

    Euclidean(dynamic_model.calc_efforts(baseline, &acceleration_6d, &velocity_6d, orientation))
}

/// Bearing of a marker feature as seen by the camera, as a point on S².
///
/// The feature position is given in the marker frame; the marker pose is
/// part of the augmented state so its uncertainty flows through the
/// update.
pub fn measurement_visual_landmark(
    state: &PoseStateWithMarker,
    feature_position: &Vector3<f64>,
    camera_in_imu: &Isometry3<f64>,
) -> UnitSphere {
    let imu_in_nav = Isometry3::from_parts(
        state.filter_state.position.0.into(),
        state.filter_state.orientation.0,
    );
    let nav_in_camera = (imu_in_nav * camera_in_imu).inverse();
    let feature_in_nav =
        state.marker_orientation.0 * feature_position + state.marker_position.0;
    let feature_in_camera =
        nav_in_camera.transform_point(&nalgebra::Point3::from(feature_in_nav));
    UnitSphere::new(feature_in_camera.coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::{LinearThreeDof, RigidBodyModel};
    use crate::state::tests::zero_state;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::{Matrix2, Vector1, Vector2};

    #[test]
    fn check_rejects_nan_mean() {
        let m = XyPosition::new(Vector2::new(f64::NAN, 0.0), Matrix2::identity());
        assert!(matches!(m.check(), Err(FilterError::BadMeasurement(_))));
    }

    #[test]
    fn check_rejects_indefinite_covariance() {
        let cov = Matrix2::new(1.0, 0.0, 0.0, -1.0);
        let m = XyPosition::new(Vector2::zeros(), cov);
        assert!(matches!(m.check(), Err(FilterError::BadMeasurement(_))));
    }

    #[test]
    fn check_accepts_valid_sample() {
        let m = ZPosition::new(Vector1::new(-10.0), SMatrix::<f64, 1, 1>::identity());
        assert!(m.check().is_ok());
    }

    #[test]
    fn position_models_select_components() {
        let mut state = zero_state();
        state.position.0 = Vector3::new(1.0, 2.0, 3.0);
        let xy = measurement_xy_position(&state);
        assert_approx_eq!(xy.0[0], 1.0, 1e-12);
        assert_approx_eq!(xy.0[1], 2.0, 1e-12);
        let z = measurement_z_position(&state);
        assert_approx_eq!(z.0[0], 3.0, 1e-12);
    }

    #[test]
    fn static_pressure_at_ten_meters() {
        let mut state = zero_state();
        state.position.0 = Vector3::new(0.0, 0.0, -10.0);
        state.gravity.0[0] = 9.81;
        state.water_density.0[0] = 1025.0;
        let pressure = measurement_pressure(&state, &Vector3::zeros(), 101325.0);
        assert_approx_eq!(pressure.0[0], 201877.5, 0.5);
    }

    #[test]
    fn pressure_lever_arm_shifts_depth() {
        let mut state = zero_state();
        state.position.0 = Vector3::new(0.0, 0.0, -10.0);
        state.gravity.0[0] = 9.81;
        state.water_density.0[0] = 1000.0;
        // sensor one meter above the IMU
        let lever = Vector3::new(0.0, 0.0, 1.0);
        let pressure = measurement_pressure(&state, &lever, 101325.0);
        assert_approx_eq!(pressure.0[0], 101325.0 + 9.0 * 9.81 * 1000.0, 1e-6);
    }

    #[test]
    fn accelerometer_sees_gravity_plus_bias() {
        let mut state = zero_state();
        state.gravity.0[0] = 9.81;
        state.bias_acc.0 = Vector3::new(0.1, 0.0, 0.0);
        let acc = measurement_acceleration(&state);
        assert_approx_eq!(acc.0[0], 0.1, 1e-12);
        assert_approx_eq!(acc.0[2], 9.81, 1e-12);
    }

    #[test]
    fn water_currents_blend_cells() {
        let mut state = zero_state();
        state.velocity.0 = Vector3::new(1.0, 0.0, 0.0);
        state.water_velocity.0 = Vector2::new(0.25, 0.0);
        state.water_velocity_below.0 = Vector2::new(0.75, 0.0);
        // alpha = 0 selects the upper cell entirely
        let upper_only = measurement_water_currents(&state, 0.0);
        assert_approx_eq!(upper_only.0[0], 0.75, 1e-12);
        // alpha = 1 selects the lower cell entirely
        let lower_only = measurement_water_currents(&state, 1.0);
        assert_approx_eq!(lower_only.0[0], 0.25, 1e-12);
        let mixed = measurement_water_currents(&state, 0.5);
        assert_approx_eq!(mixed.0[0], 0.5, 1e-12);
    }

    #[test]
    fn adcp_bias_is_additive() {
        let mut state = zero_state();
        state.velocity.0 = Vector3::new(1.0, 0.0, 0.0);
        state.bias_adcp.0 = Vector2::new(0.1, -0.2);
        let expected = measurement_water_currents(&state, 0.0);
        assert_approx_eq!(expected.0[0], 1.1, 1e-12);
        assert_approx_eq!(expected.0[1], -0.2, 1e-12);
    }

    #[test]
    fn efforts_take_surge_sway_yaw_from_regression() {
        let mut state = zero_state();
        state.velocity.0 = Vector3::new(1.0, 0.0, 0.0);
        let mut baseline = UWVParameters::default();
        baseline.damping_matrices[0] = nalgebra::Matrix6::identity() * 2.0;
        let svr = LinearThreeDof::new(nalgebra::SMatrix::<f64, 3, 6>::identity() * 10.0);
        let efforts = measurement_efforts(
            &state,
            &RigidBodyModel,
            &svr,
            &baseline,
            &Vector3::zeros(),
            &Vector3::zeros(),
        );
        // surge replaced by 10 * v_surge, heave keeps the rigid-body value
        assert_approx_eq!(efforts.0[0], 10.0, 1e-12);
        assert_approx_eq!(efforts.0[2], 0.0, 1e-12);
    }

    #[test]
    fn effort_overlay_maps_state_blocks() {
        let mut state = zero_state();
        state.lin_damping.0 = nalgebra::Matrix3::new(
            1.0, 2.0, 3.0, //
            4.0, 5.0, 6.0, //
            7.0, 8.0, 9.0,
        );
        let baseline = UWVParameters::default();
        let overlaid = overlay_parameters(&baseline, &state);
        let damping = &overlaid.damping_matrices[0];
        assert_approx_eq!(damping[(0, 0)], 1.0, 1e-12);
        assert_approx_eq!(damping[(0, 5)], 3.0, 1e-12);
        assert_approx_eq!(damping[(5, 0)], 7.0, 1e-12);
        assert_approx_eq!(damping[(5, 5)], 9.0, 1e-12);
        // untouched rows keep the baseline
        assert_approx_eq!(damping[(2, 2)], 0.0, 1e-12);
    }

    #[test]
    fn constrain_velocity_only_depends_on_velocity() {
        let mut state = zero_state();
        state.velocity.0 = Vector3::new(1.0, 0.0, 0.0);
        let mut baseline = UWVParameters::default();
        baseline.damping_matrices[0] = nalgebra::Matrix6::identity();
        let orientation = UnitQuaternion::identity();
        let fixed = constrain_velocity(
            &state,
            &RigidBodyModel,
            &baseline,
            &Vector3::zeros(),
            &Vector3::zeros(),
            &Vector3::zeros(),
            &orientation,
            &Vector3::zeros(),
        );
        assert_approx_eq!(fixed.0[0], 1.0, 1e-12);

        // changing the acceleration state must not change the output
        state.acceleration.0 = Vector3::new(5.0, 5.0, 5.0);
        let unchanged = constrain_velocity(
            &state,
            &RigidBodyModel,
            &baseline,
            &Vector3::zeros(),
            &Vector3::zeros(),
            &Vector3::zeros(),
            &orientation,
            &Vector3::zeros(),
        );
        assert_approx_eq!(unchanged.0[0], 1.0, 1e-12);
    }

    #[test]
    fn visual_landmark_points_at_feature() {
        let state = PoseStateWithMarker::new(
            zero_state(),
            Vector3::new(0.0, 0.0, 5.0),
            UnitQuaternion::identity(),
        );
        let camera_in_imu = Isometry3::identity();
        let bearing =
            measurement_visual_landmark(&state, &Vector3::zeros(), &camera_in_imu);
        // marker five meters up the camera axis
        assert_approx_eq!(bearing.0.as_ref()[2], 1.0, 1e-12);
    }
}
