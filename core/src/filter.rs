//! Model-aided inertial pose filter for underwater vehicles.
//!
//! [`PoseUKF`] ties the pieces together: it owns the unscented engine over
//! [`PoseState`], the geographic projection, the hydrodynamic collaborators
//! and the filter parameters. Gyro samples are latched as the current
//! rotation-rate input; every other sensor sample is applied through its
//! measurement model, with χ² innovation gating on the planar position and
//! current measurements.
//!
//! The caller serializes all calls and delivers measurements in
//! non-decreasing timestamp order; nothing here suspends or spawns threads.
//! Recoverable problems (bad samples, non-positive time steps, singular
//! covariances, gate rejections) are logged, counted in [`FilterSummary`]
//! and reported through `Result` without ever corrupting the estimate.

use log::warn;
use nalgebra::{DMatrix, Isometry3, Matrix6, SMatrix, Vector3};
use serde::{Deserialize, Serialize};

use crate::dynamics::{HydrodynamicModel, ThreeDofRegression, UWVParameters};
use crate::gating::InnovationGate;
use crate::geo::{earth_rotation, GeographicProjection};
use crate::manifold::{Euclidean, Manifold, UnitSphere};
use crate::measurements::{
    constrain_velocity, measurement_acceleration, measurement_efforts, measurement_pressure,
    measurement_velocity, measurement_visual_landmark, measurement_water_currents,
    measurement_xy_position, measurement_z_position, Acceleration, BodyEffortsMeasurement,
    GeographicPosition, Pressure, RotationRate, Velocity, VisualFeatureMeasurement,
    WaterVelocityMeasurement, XyPosition, ZPosition,
};
use crate::process::{process_model, RelaxationOffsets};
use crate::state::{PoseState, PoseStateWithMarker, StateBlock};
use crate::ukf::Ukf;
use crate::FilterError;

/// WGS84 origin of the local tangent plane, in radians.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LocationConfiguration {
    pub latitude: f64,
    pub longitude: f64,
}

/// Pinhole intrinsics of the camera used for visual marker updates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CameraConfiguration {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Tunable parameters of the pose filter.
///
/// The `*_tau` values are the time constants (seconds) of the first-order
/// Gauss-Markov relaxation of the matching states. `water_velocity_limits`
/// is the long-term 1σ bound on the currents in m/s;
/// `water_velocity_scale` the 1σ current change per meter traveled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseUKFParameter {
    /// IMU position in the body frame.
    pub imu_in_body: Vector3<f64>,
    pub gyro_bias_offset: Vector3<f64>,
    pub acc_bias_offset: Vector3<f64>,
    pub gyro_bias_tau: f64,
    pub acc_bias_tau: f64,
    pub inertia_tau: f64,
    pub lin_damping_tau: f64,
    pub quad_damping_tau: f64,
    pub water_velocity_tau: f64,
    pub adcp_bias_tau: f64,
    pub water_density_tau: f64,
    pub water_velocity_limits: f64,
    pub water_velocity_scale: f64,
    /// Atmospheric pressure at the surface in pascal.
    pub atmospheric_pressure: f64,
}

/// Read-only running statistics of the filter.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FilterSummary {
    pub bad_measurements: u64,
    pub skipped_time_steps: u64,
    pub singular_steps: u64,
    pub rejected_xy_position: u64,
    pub rejected_geographic_position: u64,
    pub rejected_water_velocity: u64,
    pub last_xy_innovation: Option<f64>,
    pub last_geographic_innovation: Option<f64>,
    pub last_water_velocity_innovation: Option<f64>,
}

/// Manifold unscented Kalman filter fusing inertial, doppler, pressure,
/// ADCP, geographic, body-effort and visual-marker measurements.
pub struct PoseUKF {
    ukf: Ukf<PoseState>,
    process_noise: DMatrix<f64>,
    projection: GeographicProjection,
    dynamic_model: Box<dyn HydrodynamicModel>,
    svr_model: Box<dyn ThreeDofRegression>,
    model_parameters: UWVParameters,
    parameter: PoseUKFParameter,
    rotation_rate: Vector3<f64>,
    offsets: RelaxationOffsets,
    summary: FilterSummary,
}

impl PoseUKF {
    /// Create a filter from an initial estimate and its covariance.
    ///
    /// `process_noise` is the base 53×53 noise matrix; it is modulated
    /// every prediction step (see [`PoseUKF::predict`]). The relaxation
    /// offsets of the hydrodynamic parameters and the water density are
    /// captured from `initial_state`. Invalid arguments are fatal here;
    /// nothing after construction panics.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        initial_state: PoseState,
        state_cov: DMatrix<f64>,
        process_noise: DMatrix<f64>,
        location: &LocationConfiguration,
        model_parameters: UWVParameters,
        filter_parameter: PoseUKFParameter,
        dynamic_model: Box<dyn HydrodynamicModel>,
        svr_model: Box<dyn ThreeDofRegression>,
    ) -> PoseUKF {
        let n = PoseState::DOF;
        assert!(
            state_cov.nrows() == n && state_cov.ncols() == n,
            "state covariance must be {0}x{0}, got {1}x{2}",
            n,
            state_cov.nrows(),
            state_cov.ncols()
        );
        assert!(
            process_noise.nrows() == n && process_noise.ncols() == n,
            "process noise must be {0}x{0}, got {1}x{2}",
            n,
            process_noise.nrows(),
            process_noise.ncols()
        );
        assert!(
            process_noise.iter().all(|v| v.is_finite()),
            "process noise must be finite"
        );
        assert!(
            initial_state.gravity.0[0] > 0.0,
            "gravity must be positive (downward), got {}",
            initial_state.gravity.0[0]
        );
        assert!(
            initial_state.water_density.0[0] > 0.0,
            "water density must be positive, got {}",
            initial_state.water_density.0[0]
        );
        for (name, tau) in [
            ("gyro_bias_tau", filter_parameter.gyro_bias_tau),
            ("acc_bias_tau", filter_parameter.acc_bias_tau),
            ("inertia_tau", filter_parameter.inertia_tau),
            ("lin_damping_tau", filter_parameter.lin_damping_tau),
            ("quad_damping_tau", filter_parameter.quad_damping_tau),
            ("water_velocity_tau", filter_parameter.water_velocity_tau),
            ("adcp_bias_tau", filter_parameter.adcp_bias_tau),
            ("water_density_tau", filter_parameter.water_density_tau),
        ] {
            assert!(tau > 0.0, "{} must be positive, got {}", name, tau);
        }

        let offsets = RelaxationOffsets::from_state(&initial_state);
        PoseUKF {
            ukf: Ukf::new(initial_state, state_cov),
            process_noise,
            projection: GeographicProjection::new(location.latitude, location.longitude),
            dynamic_model,
            svr_model,
            model_parameters,
            parameter: filter_parameter,
            rotation_rate: Vector3::zeros(),
            offsets,
            summary: FilterSummary::default(),
        }
    }

    pub fn mean(&self) -> &PoseState {
        self.ukf.mean()
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        self.ukf.covariance()
    }

    pub fn summary(&self) -> &FilterSummary {
        &self.summary
    }

    pub fn parameter(&self) -> &PoseUKFParameter {
        &self.parameter
    }

    /// Latched rotation rate corrected for the current gyro-bias estimate
    /// and earth rotation, expressed in the IMU frame.
    pub fn rotation_rate(&self) -> Vector3<f64> {
        let mean = self.ukf.mean();
        let (latitude, _) = self
            .projection
            .nav_to_world(mean.position.0[0], mean.position.0[1]);
        self.rotation_rate
            - mean.bias_gyro.0
            - mean.orientation.0.inverse() * earth_rotation(latitude)
    }

    /// Advance the estimate by `delta_t` seconds through the process model.
    ///
    /// The base process noise is modulated before use: the orientation
    /// block is rotated into the current body frame, the water-velocity
    /// blocks are inflated with the depth-weighted speed, and the whole
    /// matrix is scaled by Δt².
    pub fn predict(&mut self, delta_t: f64) -> Result<(), FilterError> {
        if !(delta_t > 0.0) {
            self.summary.skipped_time_steps += 1;
            warn!("skipping prediction: non-positive time step {}", delta_t);
            return Err(FilterError::BadTimeStep(delta_t));
        }

        let mut process_noise = self.process_noise.clone();
        let orientation_start = StateBlock::Orientation.offset();
        let rotation = self.ukf.mean().orientation.0.to_rotation_matrix();
        let mut orientation_block = nalgebra::Matrix3::zeros();
        orientation_block
            .copy_from(&process_noise.view((orientation_start, orientation_start), (3, 3)));
        let rotated = rotation.matrix() * orientation_block * rotation.matrix().transpose();
        process_noise
            .view_mut((orientation_start, orientation_start), (3, 3))
            .copy_from(&rotated);

        let velocity = self.ukf.mean().velocity.0;
        let scaled_velocity = Vector3::new(velocity[0], velocity[1], 10.0 * velocity[2]);
        let inflation =
            self.parameter.water_velocity_scale * scaled_velocity.norm_squared() * delta_t;
        for block in [StateBlock::WaterVelocity, StateBlock::WaterVelocityBelow] {
            for i in block.range() {
                process_noise[(i, i)] += inflation;
            }
        }
        process_noise *= delta_t * delta_t;

        let rotation_rate = self.rotation_rate;
        let projection = &self.projection;
        let offsets = &self.offsets;
        let parameter = &self.parameter;
        let result = self.ukf.predict(
            |state| {
                process_model(state, &rotation_rate, projection, offsets, parameter, delta_t)
            },
            &process_noise,
        );
        if let Err(FilterError::Singular) = &result {
            self.summary.singular_steps += 1;
            warn!("skipping prediction: covariance square root failed");
        }
        result
    }

    /// Latch the gyro reading as the current rotation-rate input.
    pub fn integrate_rotation_rate(
        &mut self,
        rotation_rate: &RotationRate,
    ) -> Result<(), FilterError> {
        self.guard(rotation_rate.check(), "rotation rate")?;
        self.rotation_rate = rotation_rate.mu;
        Ok(())
    }

    /// DVL velocities in the IMU frame.
    pub fn integrate_velocity(&mut self, velocity: &Velocity) -> Result<(), FilterError> {
        self.guard(velocity.check(), "velocity")?;
        let noise = to_dynamic(&velocity.cov);
        let result = self.ukf.update(
            &Euclidean(velocity.mu),
            measurement_velocity,
            &noise,
            InnovationGate::AcceptAny,
        );
        self.finish("velocity", result.map(|_| ()))
    }

    /// Accelerations of the IMU in the IMU frame.
    pub fn integrate_acceleration(
        &mut self,
        acceleration: &Acceleration,
    ) -> Result<(), FilterError> {
        self.guard(acceleration.check(), "acceleration")?;
        let noise = to_dynamic(&acceleration.cov);
        let result = self.ukf.update(
            &Euclidean(acceleration.mu),
            measurement_acceleration,
            &noise,
            InnovationGate::AcceptAny,
        );
        self.finish("acceleration", result.map(|_| ()))
    }

    /// Altitude of the IMU in the navigation frame.
    pub fn integrate_z_position(&mut self, z_position: &ZPosition) -> Result<(), FilterError> {
        self.guard(z_position.check(), "Z position")?;
        let noise = to_dynamic(&z_position.cov);
        let result = self.ukf.update(
            &Euclidean(z_position.mu),
            measurement_z_position,
            &noise,
            InnovationGate::AcceptAny,
        );
        self.finish("Z position", result.map(|_| ()))
    }

    /// 2D position in the navigation frame, gated at the 95% χ² bound.
    pub fn integrate_xy_position(&mut self, xy_position: &XyPosition) -> Result<(), FilterError> {
        self.guard(xy_position.check(), "XY position")?;
        let noise = to_dynamic(&xy_position.cov);
        let result = self.ukf.update(
            &Euclidean(xy_position.mu),
            measurement_xy_position,
            &noise,
            InnovationGate::ChiSquared95,
        );
        match result {
            Ok(innovation) => {
                self.summary.last_xy_innovation = Some(innovation.norm);
                Ok(())
            }
            Err(FilterError::GateRejected(d2)) => {
                self.summary.rejected_xy_position += 1;
                warn!("XY position update rejected (d2 = {:.3})", d2);
                Err(FilterError::GateRejected(d2))
            }
            Err(error) => self.finish("XY position", Err(error)),
        }
    }

    /// WGS84 position, projected onto the navigation plane and corrected
    /// for the GPS antenna lever arm before an XY position update.
    pub fn integrate_geographic_position(
        &mut self,
        geo_position: &GeographicPosition,
        gps_in_body: &Vector3<f64>,
    ) -> Result<(), FilterError> {
        self.guard(geo_position.check(), "geographic position")?;
        let (x, y) = self
            .projection
            .world_to_nav(geo_position.mu[0], geo_position.mu[1]);
        let antenna_offset = self.ukf.mean().orientation.0 * gps_in_body;
        let projected =
            nalgebra::Vector2::new(x - antenna_offset[0], y - antenna_offset[1]);
        let noise = to_dynamic(&geo_position.cov);
        let result = self.ukf.update(
            &Euclidean(projected),
            measurement_xy_position,
            &noise,
            InnovationGate::ChiSquared95,
        );
        match result {
            Ok(innovation) => {
                self.summary.last_geographic_innovation = Some(innovation.norm);
                Ok(())
            }
            Err(FilterError::GateRejected(d2)) => {
                self.summary.rejected_geographic_position += 1;
                warn!("geographic position update rejected (d2 = {:.3})", d2);
                Err(FilterError::GateRejected(d2))
            }
            Err(error) => self.finish("geographic position", Err(error)),
        }
    }

    /// Liquid pressure in pascal, measured at the given sensor position
    /// relative to the IMU.
    pub fn integrate_pressure(
        &mut self,
        pressure: &Pressure,
        pressure_sensor_in_imu: &Vector3<f64>,
    ) -> Result<(), FilterError> {
        self.guard(pressure.check(), "pressure")?;
        let noise = to_dynamic(&pressure.cov);
        let atmospheric_pressure = self.parameter.atmospheric_pressure;
        let lever = *pressure_sensor_in_imu;
        let result = self.ukf.update(
            &Euclidean(pressure.mu),
            move |state| measurement_pressure(state, &lever, atmospheric_pressure),
            &noise,
            InnovationGate::AcceptAny,
        );
        self.finish("pressure", result.map(|_| ()))
    }

    /// Forces and torques in the body frame.
    ///
    /// In the default mode the full effort model is evaluated with the
    /// hydrodynamic parameter blocks taken from the state; with
    /// `only_affect_velocity` the current, orientation and body
    /// acceleration are frozen at their means so that only the velocity is
    /// constrained.
    pub fn integrate_body_efforts(
        &mut self,
        body_efforts: &BodyEffortsMeasurement,
        only_affect_velocity: bool,
    ) -> Result<(), FilterError> {
        self.guard(body_efforts.check(), "body efforts")?;
        let noise = to_dynamic(&body_efforts.cov);
        let rotation_rate_body = self.rotation_rate();
        let imu_in_body = self.parameter.imu_in_body;

        let result = if only_affect_velocity {
            let mean = self.ukf.mean();
            let water_velocity = Vector3::new(
                mean.water_velocity.0[0],
                mean.water_velocity.0[1],
                0.0,
            );
            let orientation = mean.orientation.0;
            let acceleration_body = orientation.inverse() * mean.acceleration.0
                - rotation_rate_body.cross(&rotation_rate_body.cross(&imu_in_body));
            let dynamic_model: &dyn HydrodynamicModel = self.dynamic_model.as_ref();
            let baseline = &self.model_parameters;
            self.ukf.update(
                &Euclidean(body_efforts.mu),
                move |state| {
                    constrain_velocity(
                        state,
                        dynamic_model,
                        baseline,
                        &imu_in_body,
                        &rotation_rate_body,
                        &water_velocity,
                        &orientation,
                        &acceleration_body,
                    )
                },
                &noise,
                InnovationGate::AcceptAny,
            )
        } else {
            let dynamic_model: &dyn HydrodynamicModel = self.dynamic_model.as_ref();
            let svr_model: &dyn ThreeDofRegression = self.svr_model.as_ref();
            let baseline = &self.model_parameters;
            self.ukf.update(
                &Euclidean(body_efforts.mu),
                move |state| {
                    measurement_efforts(
                        state,
                        dynamic_model,
                        svr_model,
                        baseline,
                        &imu_in_body,
                        &rotation_rate_body,
                    )
                },
                &noise,
                InnovationGate::AcceptAny,
            )
        };
        self.finish("body efforts", result.map(|_| ()))
    }

    /// ADCP water velocities in the IMU frame, gated at the 95% χ² bound.
    ///
    /// `cell_weighting` is the weight of the lower ADCP cell; the upper
    /// cell receives the complement.
    pub fn integrate_water_velocity(
        &mut self,
        adcp_measurement: &WaterVelocityMeasurement,
        cell_weighting: f64,
    ) -> Result<(), FilterError> {
        self.guard(adcp_measurement.check(), "water velocity")?;
        if !(0.0..=1.0).contains(&cell_weighting) {
            return self.guard(
                Err(FilterError::BadMeasurement(
                    "ADCP cell weighting outside [0, 1]",
                )),
                "water velocity",
            );
        }
        let noise = to_dynamic(&adcp_measurement.cov);
        let result = self.ukf.update(
            &Euclidean(adcp_measurement.mu),
            move |state| measurement_water_currents(state, cell_weighting),
            &noise,
            InnovationGate::ChiSquared95,
        );
        match result {
            Ok(innovation) => {
                self.summary.last_water_velocity_innovation = Some(innovation.norm);
                Ok(())
            }
            Err(FilterError::GateRejected(d2)) => {
                self.summary.rejected_water_velocity += 1;
                warn!("water velocity update rejected (d2 = {:.3})", d2);
                Err(FilterError::GateRejected(d2))
            }
            Err(error) => self.finish("water velocity", Err(error)),
        }
    }

    /// Features of a visual marker in undistorted image coordinates.
    ///
    /// `marker_features` and `feature_positions` must correspond by index;
    /// `feature_positions` are expressed in the marker frame. The filter
    /// state is augmented with the marker pose (covariance `cov_marker_pose`)
    /// for the duration of the batch, each feature is applied as an S²
    /// bearing update, and the pose partition of the posterior is written
    /// back. The marker posterior is discarded.
    pub fn integrate_visual_features(
        &mut self,
        marker_features: &[VisualFeatureMeasurement],
        feature_positions: &[Vector3<f64>],
        marker_pose: &Isometry3<f64>,
        cov_marker_pose: &Matrix6<f64>,
        camera: &CameraConfiguration,
        camera_in_imu: &Isometry3<f64>,
    ) -> Result<(), FilterError> {
        if marker_features.len() != feature_positions.len() {
            return self.guard(
                Err(FilterError::BadMeasurement(
                    "marker features and feature positions differ in length",
                )),
                "visual features",
            );
        }
        if cov_marker_pose.iter().any(|v| !v.is_finite())
            || marker_pose.translation.vector.iter().any(|v| !v.is_finite())
        {
            return self.guard(
                Err(FilterError::BadMeasurement("non-finite marker pose")),
                "visual features",
            );
        }

        let n = PoseState::DOF;
        let augmented_state = PoseStateWithMarker::new(
            self.ukf.mean().clone(),
            marker_pose.translation.vector,
            marker_pose.rotation,
        );
        let mut augmented_cov = DMatrix::zeros(PoseStateWithMarker::DOF, PoseStateWithMarker::DOF);
        augmented_cov
            .view_mut((0, 0), (n, n))
            .copy_from(self.ukf.covariance());
        augmented_cov.view_mut((n, n), (6, 6)).copy_from(cov_marker_pose);
        let mut augmented = Ukf::new(augmented_state, augmented_cov);

        let fx2 = camera.fx * camera.fx;
        let fy2 = camera.fy * camera.fy;
        let fxy = camera.fx * camera.fy;

        for (feature, feature_position) in marker_features.iter().zip(feature_positions) {
            if let Err(error) = feature.check() {
                self.summary.bad_measurements += 1;
                warn!("discarding visual feature: {}", error);
                continue;
            }

            let ray = UnitSphere::new(Vector3::new(
                (feature.mu[0] - camera.cx) / camera.fx,
                (feature.mu[1] - camera.cy) / camera.fy,
                1.0,
            ));
            let mut ray_cov = DMatrix::zeros(2, 2);
            ray_cov[(0, 0)] = feature.cov[(0, 0)] / fx2;
            ray_cov[(0, 1)] = feature.cov[(0, 1)] / fxy;
            ray_cov[(1, 0)] = feature.cov[(1, 0)] / fxy;
            ray_cov[(1, 1)] = feature.cov[(1, 1)] / fy2;

            let position = *feature_position;
            let camera_pose = *camera_in_imu;
            let result = augmented.update(
                &ray,
                move |state| measurement_visual_landmark(state, &position, &camera_pose),
                &ray_cov,
                InnovationGate::AcceptAny,
            );
            if let Err(FilterError::Singular) = result {
                self.summary.singular_steps += 1;
                warn!("skipping visual feature: singular innovation covariance");
            }
        }

        let posterior_cov = augmented.covariance().view((0, 0), (n, n)).clone_owned();
        self.ukf
            .reset(augmented.mean().filter_state.clone(), posterior_cov);
        Ok(())
    }

    fn guard(
        &mut self,
        check: Result<(), FilterError>,
        sensor: &'static str,
    ) -> Result<(), FilterError> {
        if let Err(error) = check {
            self.summary.bad_measurements += 1;
            warn!("discarding {} measurement: {}", sensor, error);
            return Err(error);
        }
        Ok(())
    }

    fn finish(
        &mut self,
        sensor: &'static str,
        result: Result<(), FilterError>,
    ) -> Result<(), FilterError> {
        if let Err(FilterError::Singular) = &result {
            self.summary.singular_steps += 1;
            warn!("skipping {} update: singular covariance", sensor);
        }
        result
    }
}

fn to_dynamic<const D: usize>(cov: &SMatrix<f64, D, D>) -> DMatrix<f64> {
    DMatrix::from_iterator(D, D, cov.iter().cloned())
}
