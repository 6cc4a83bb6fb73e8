//! Scenario tests against the public filter API.

use assert_approx_eq::assert_approx_eq;
use nalgebra::{
    DMatrix, Isometry3, Matrix2, Matrix3, Matrix6, SMatrix, UnitQuaternion, Vector1, Vector2,
    Vector3,
};

use uwv_pose_ukf::dynamics::{LinearThreeDof, RigidBodyModel, UWVParameters};
use uwv_pose_ukf::gating::InnovationGate;
use uwv_pose_ukf::manifold::{Euclidean, Manifold, MatrixBlock, Rotation};
use uwv_pose_ukf::measurements::{
    measurement_pressure, measurement_water_currents, Acceleration, Pressure, RotationRate,
    Velocity, VisualFeatureMeasurement, WaterVelocityMeasurement, XyPosition,
};
use uwv_pose_ukf::state::{PoseState, StateBlock};
use uwv_pose_ukf::ukf::Ukf;
use uwv_pose_ukf::{
    CameraConfiguration, FilterError, LocationConfiguration, PoseUKF, PoseUKFParameter,
};

fn base_state() -> PoseState {
    PoseState {
        position: Euclidean(Vector3::zeros()),
        orientation: Rotation::identity(),
        velocity: Euclidean(Vector3::zeros()),
        acceleration: Euclidean(Vector3::zeros()),
        bias_gyro: Euclidean(Vector3::zeros()),
        bias_acc: Euclidean(Vector3::zeros()),
        gravity: Euclidean(Vector1::new(9.81)),
        inertia: MatrixBlock::new(Matrix3::identity()),
        lin_damping: MatrixBlock::zeros(),
        quad_damping: MatrixBlock::zeros(),
        water_velocity: Euclidean(Vector2::zeros()),
        water_velocity_below: Euclidean(Vector2::zeros()),
        bias_adcp: Euclidean(Vector2::zeros()),
        water_density: Euclidean(Vector1::new(1025.0)),
    }
}

fn parameter() -> PoseUKFParameter {
    PoseUKFParameter {
        imu_in_body: Vector3::zeros(),
        gyro_bias_offset: Vector3::zeros(),
        acc_bias_offset: Vector3::zeros(),
        gyro_bias_tau: 3600.0,
        acc_bias_tau: 3600.0,
        inertia_tau: 3600.0,
        lin_damping_tau: 3600.0,
        quad_damping_tau: 3600.0,
        water_velocity_tau: 600.0,
        adcp_bias_tau: 3600.0,
        water_density_tau: 3600.0,
        water_velocity_limits: 0.3,
        water_velocity_scale: 1e-4,
        atmospheric_pressure: 101325.0,
    }
}

fn build_filter(initial_state: PoseState, cov_diagonal: f64, noise_diagonal: f64) -> PoseUKF {
    let n = PoseState::DOF;
    PoseUKF::new(
        initial_state,
        DMatrix::identity(n, n) * cov_diagonal,
        DMatrix::identity(n, n) * noise_diagonal,
        &LocationConfiguration {
            latitude: 0.9,
            longitude: 0.15,
        },
        UWVParameters::default(),
        parameter(),
        Box::new(RigidBodyModel),
        Box::new(LinearThreeDof::new(SMatrix::<f64, 3, 6>::zeros())),
    )
}

fn min_eigenvalue(matrix: &DMatrix<f64>) -> f64 {
    matrix
        .clone()
        .symmetric_eigen()
        .eigenvalues
        .iter()
        .fold(f64::INFINITY, |a, &b| a.min(b))
}

fn max_asymmetry(matrix: &DMatrix<f64>) -> f64 {
    let difference = matrix - matrix.transpose();
    difference.iter().fold(0.0_f64, |a, &b| a.max(b.abs()))
}

#[test]
fn predict_preserves_symmetry_and_positive_semidefiniteness() {
    let mut filter = build_filter(base_state(), 0.01, 1e-8);
    let gyro = RotationRate::new(Vector3::new(0.01, -0.02, 0.05), Matrix3::identity() * 1e-6);
    filter.integrate_rotation_rate(&gyro).unwrap();
    for _ in 0..25 {
        filter.predict(0.1).unwrap();
        assert!(max_asymmetry(filter.covariance()) <= 1e-10);
        assert!(min_eigenvalue(filter.covariance()) >= -1e-9);
    }
}

#[test]
fn orientation_stays_unit_norm_through_predicts_and_updates() {
    let mut filter = build_filter(base_state(), 0.01, 1e-8);
    let gyro = RotationRate::new(Vector3::new(0.2, 0.1, -0.3), Matrix3::identity() * 1e-6);
    filter.integrate_rotation_rate(&gyro).unwrap();
    for i in 0..20 {
        filter.predict(0.1).unwrap();
        if i % 3 == 0 {
            let dvl = Velocity::new(Vector3::zeros(), Matrix3::identity() * 0.01);
            filter.integrate_velocity(&dvl).unwrap();
        }
        let norm = filter.mean().orientation.0.as_ref().norm();
        assert!((norm - 1.0).abs() <= 1e-10, "norm drifted to {}", norm);
    }
}

#[test]
fn identity_update_leaves_mean_and_shrinks_covariance() {
    let mut initial = base_state();
    initial.position.0 = Vector3::new(5.0, -3.0, -12.0);
    initial.orientation.0 = UnitQuaternion::from_scaled_axis(Vector3::new(0.1, 0.2, -0.1));
    let mut filter = build_filter(initial, 0.01, 1e-8);

    let before_mean = filter.mean().clone();
    let before_trace = filter.covariance().trace();

    // observe exactly what the model predicts, with negligible noise
    let fix = XyPosition::new(Vector2::new(5.0, -3.0), Matrix2::identity() * 1e-12);
    filter.integrate_xy_position(&fix).unwrap();

    let mut difference = vec![0.0; PoseState::DOF];
    filter.mean().boxminus(&before_mean, &mut difference);
    for (i, d) in difference.iter().enumerate() {
        assert!(d.abs() < 1e-6, "state dimension {} moved by {}", i, d);
    }
    assert!(filter.covariance().trace() <= before_trace);
}

#[test]
fn quaternion_boxplus_boxminus_roundtrip() {
    let q = Rotation(UnitQuaternion::from_scaled_axis(Vector3::new(
        0.7, -1.2, 0.4,
    )));
    let q1 = Rotation(UnitQuaternion::from_scaled_axis(Vector3::new(
        -0.3, 0.8, 2.1,
    )));
    let mut delta = [0.0; 3];
    q1.boxminus(&q, &mut delta);
    let mut recovered = q;
    recovered.boxplus(&delta, 1.0);
    assert!(recovered.0.angle_to(&q1.0) < 1e-10);
}

#[test]
fn sequential_updates_match_batched_update() {
    let mean = Euclidean(Vector2::new(0.5, -0.25));
    let mut covariance = DMatrix::zeros(2, 2);
    covariance[(0, 0)] = 0.04;
    covariance[(1, 1)] = 0.09;
    covariance[(0, 1)] = 0.01;
    covariance[(1, 0)] = 0.01;

    let mut sequential: Ukf<Euclidean<2>> = Ukf::new(mean, covariance.clone());
    let r_x = DMatrix::from_element(1, 1, 0.01);
    sequential
        .update(
            &Euclidean(Vector1::new(0.6)),
            |s: &Euclidean<2>| Euclidean(Vector1::new(s.0[0])),
            &r_x,
            InnovationGate::AcceptAny,
        )
        .unwrap();
    let r_y = DMatrix::from_element(1, 1, 0.02);
    sequential
        .update(
            &Euclidean(Vector1::new(-0.2)),
            |s: &Euclidean<2>| Euclidean(Vector1::new(s.0[1])),
            &r_y,
            InnovationGate::AcceptAny,
        )
        .unwrap();

    let mut batched: Ukf<Euclidean<2>> = Ukf::new(mean, covariance);
    let mut r = DMatrix::zeros(2, 2);
    r[(0, 0)] = 0.01;
    r[(1, 1)] = 0.02;
    batched
        .update(
            &Euclidean(Vector2::new(0.6, -0.2)),
            |s: &Euclidean<2>| *s,
            &r,
            InnovationGate::AcceptAny,
        )
        .unwrap();

    assert_approx_eq!(sequential.mean().0[0], batched.mean().0[0], 1e-8);
    assert_approx_eq!(sequential.mean().0[1], batched.mean().0[1], 1e-8);
    for i in 0..2 {
        for j in 0..2 {
            assert_approx_eq!(
                sequential.covariance()[(i, j)],
                batched.covariance()[(i, j)],
                1e-8
            );
        }
    }
}

#[test]
fn gravity_alignment_scenario() {
    let mut filter = build_filter(base_state(), 1e-4, 1e-8);
    let before_mean = filter.mean().clone();
    let acceleration_range = StateBlock::Acceleration.range();
    let block_trace = |cov: &DMatrix<f64>| {
        acceleration_range
            .clone()
            .map(|i| cov[(i, i)])
            .sum::<f64>()
    };
    let before_block = block_trace(filter.covariance());

    let sample = Acceleration::new(Vector3::new(0.0, 0.0, 9.81), Matrix3::identity() * 1e-4);
    filter.integrate_acceleration(&sample).unwrap();

    // the measurement matches the prior, so the state barely moves while
    // the acceleration block gains information
    let mut difference = vec![0.0; PoseState::DOF];
    filter.mean().boxminus(&before_mean, &mut difference);
    assert!(difference.iter().all(|d| d.abs() < 1e-3));
    assert!(block_trace(filter.covariance()) < before_block);
}

#[test]
fn static_pressure_scenario() {
    let mut state = base_state();
    state.position.0 = Vector3::new(0.0, 0.0, -10.0);
    let expected = measurement_pressure(&state, &Vector3::zeros(), 101325.0);
    assert_approx_eq!(expected.0[0], 201877.5, 0.5);

    // feeding that exact pressure back leaves the depth estimate in place
    let mut filter = build_filter(state, 0.01, 1e-8);
    let sample = Pressure::new(Vector1::new(201877.5), SMatrix::<f64, 1, 1>::identity() * 25.0);
    filter
        .integrate_pressure(&sample, &Vector3::zeros())
        .unwrap();
    assert_approx_eq!(filter.mean().position.0[2], -10.0, 1e-3);
}

#[test]
fn pure_translation_scenario() {
    let mut state = base_state();
    state.velocity.0 = Vector3::new(1.0, 0.0, 0.0);
    let n = PoseState::DOF;
    let mut filter = PoseUKF::new(
        state,
        DMatrix::identity(n, n) * 0.01,
        DMatrix::zeros(n, n),
        &LocationConfiguration {
            latitude: 0.9,
            longitude: 0.15,
        },
        UWVParameters::default(),
        parameter(),
        Box::new(RigidBodyModel),
        Box::new(LinearThreeDof::new(SMatrix::<f64, 3, 6>::zeros())),
    );
    filter.predict(1.0).unwrap();
    assert_approx_eq!(filter.mean().position.0[0], 1.0, 1e-9);
    assert_approx_eq!(filter.mean().position.0[1], 0.0, 1e-9);
    assert_approx_eq!(filter.mean().position.0[2], 0.0, 1e-9);
}

#[test]
fn xy_gate_rejection_scenario() {
    let mut filter = build_filter(base_state(), 0.01, 1e-8);
    let before_mean = filter.mean().clone();
    let before_cov = filter.covariance().clone();

    let residual = XyPosition::new(Vector2::new(10.0, 10.0), Matrix2::identity() * 0.01);
    let result = filter.integrate_xy_position(&residual);
    match result {
        Err(FilterError::GateRejected(d2)) => assert!(d2 > 5.991),
        other => panic!("expected a gate rejection, got {:?}", other),
    }
    assert_eq!(filter.summary().rejected_xy_position, 1);

    // the rejected update must be a strict no-op
    let mut difference = vec![0.0; PoseState::DOF];
    filter.mean().boxminus(&before_mean, &mut difference);
    assert!(difference.iter().all(|&d| d == 0.0));
    assert_eq!(filter.covariance(), &before_cov);
}

#[test]
fn water_velocity_coupling_scenario() {
    let mut state = base_state();
    state.velocity.0 = Vector3::new(1.0, 0.0, 0.0);
    let expected = measurement_water_currents(&state, 0.0);
    assert_approx_eq!(expected.0[0], 1.0, 1e-12);
    assert_approx_eq!(expected.0[1], 0.0, 1e-12);

    // a loose prior keeps the ADCP innovation inside the 95% gate
    let mut filter = build_filter(state, 0.1, 1e-8);
    let dvl = Velocity::new(Vector3::new(1.0, 0.0, 0.0), Matrix3::identity() * 1e-4);
    filter.integrate_velocity(&dvl).unwrap();

    // a zero ADCP reading can only be explained by water moving with the
    // vehicle, so the current estimate must move toward (1, 0)
    let adcp = WaterVelocityMeasurement::new(Vector2::zeros(), Matrix2::identity() * 0.01);
    filter.integrate_water_velocity(&adcp, 0.0).unwrap();
    assert!(
        filter.mean().water_velocity.0[0] > 0.05,
        "water velocity did not shift toward the vehicle velocity: {}",
        filter.mean().water_velocity.0[0]
    );
}

#[test]
fn noisy_dvl_sequence_converges_to_truth() {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    let mut filter = build_filter(base_state(), 0.1, 1e-8);
    let gyro = RotationRate::new(Vector3::zeros(), Matrix3::identity() * 1e-6);
    filter.integrate_rotation_rate(&gyro).unwrap();

    let truth = Vector3::new(0.8, -0.2, 0.0);
    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0, 0.01).unwrap();
    for _ in 0..50 {
        filter.predict(0.1).unwrap();
        let sample = Vector3::new(
            truth[0] + noise.sample(&mut rng),
            truth[1] + noise.sample(&mut rng),
            truth[2] + noise.sample(&mut rng),
        );
        let dvl = Velocity::new(sample, Matrix3::identity() * 1e-4);
        filter.integrate_velocity(&dvl).unwrap();
    }

    assert_approx_eq!(filter.mean().velocity.0[0], truth[0], 0.05);
    assert_approx_eq!(filter.mean().velocity.0[1], truth[1], 0.05);
    // dead reckoning carried the position along the estimated velocity
    assert!(filter.mean().position.0[0] > 2.0);
}

#[test]
fn visual_marker_augmentation_scenario() {
    let camera = CameraConfiguration {
        fx: 500.0,
        fy: 500.0,
        cx: 320.0,
        cy: 240.0,
    };
    let camera_in_imu = Isometry3::identity();
    let marker_pose = Isometry3::from_parts(
        Vector3::new(0.0, 0.0, 5.0).into(),
        UnitQuaternion::identity(),
    );
    let feature_positions = vec![
        Vector3::new(0.1, 0.1, 0.0),
        Vector3::new(-0.1, 0.1, 0.0),
        Vector3::new(-0.1, -0.1, 0.0),
        Vector3::new(0.1, -0.1, 0.0),
    ];
    // synthesize pixel observations consistent with the prior mean
    let features: Vec<VisualFeatureMeasurement> = feature_positions
        .iter()
        .map(|p| {
            let in_nav = marker_pose.rotation * p + marker_pose.translation.vector;
            let u = camera.cx + camera.fx * in_nav[0] / in_nav[2];
            let v = camera.cy + camera.fy * in_nav[1] / in_nav[2];
            VisualFeatureMeasurement::new(Vector2::new(u, v), Matrix2::identity())
        })
        .collect();

    // a tight prior keeps the synthetic-pixel innovations in the linear
    // regime of the bearing model
    let mut filter = build_filter(base_state(), 1e-6, 1e-8);
    let before_mean = filter.mean().clone();
    let orientation_range = StateBlock::Orientation.range();
    let orientation_trace = |cov: &DMatrix<f64>| {
        orientation_range.clone().map(|i| cov[(i, i)]).sum::<f64>()
    };
    let before_trace = orientation_trace(filter.covariance());

    filter
        .integrate_visual_features(
            &features,
            &feature_positions,
            &marker_pose,
            &(Matrix6::identity() * 1e-6),
            &camera,
            &camera_in_imu,
        )
        .unwrap();

    let mut difference = vec![0.0; PoseState::DOF];
    filter.mean().boxminus(&before_mean, &mut difference);
    for (i, d) in difference.iter().enumerate() {
        assert!(d.abs() < 1e-5, "state dimension {} moved by {}", i, d);
    }
    assert!(
        orientation_trace(filter.covariance()) < before_trace,
        "orientation covariance did not shrink"
    );
    assert_eq!(filter.covariance().nrows(), PoseState::DOF);
}
