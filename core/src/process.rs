//! Continuous-time process model of the pose filter, discretized over Δt.
//!
//! Kinematics integrate straightforwardly (position from velocity, velocity
//! from acceleration, orientation from the latched rotation rate corrected
//! for gyro bias and earth rotation). The bias, hydrodynamic-parameter and
//! water-column states relax as first-order Gauss-Markov processes toward
//! their configured or initial offsets; acceleration and gravity carry no
//! deterministic drift.

use nalgebra::{DMatrix, SVector, Vector3};

use crate::filter::PoseUKFParameter;
use crate::geo::{earth_rotation, GeographicProjection};
use crate::manifold::Manifold;
use crate::state::{PoseState, StateBlock};

/// Relaxation targets captured once at filter construction.
///
/// The hydrodynamic parameter blocks and the water density drift toward the
/// initial estimate rather than toward a configured constant.
#[derive(Clone, Debug)]
pub struct RelaxationOffsets {
    pub inertia: SVector<f64, 9>,
    pub lin_damping: SVector<f64, 9>,
    pub quad_damping: SVector<f64, 9>,
    pub water_density: f64,
}

impl RelaxationOffsets {
    pub fn from_state(state: &PoseState) -> Self {
        RelaxationOffsets {
            inertia: state.inertia.vectorized(),
            lin_damping: state.lin_damping.vectorized(),
            quad_damping: state.quad_damping.vectorized(),
            water_density: state.water_density.0[0],
        }
    }
}

/// Time-propagate `state` by `delta_time` seconds.
///
/// `rotation_rate` is the latched gyro reading in the IMU frame. The
/// latitude entering the earth-rotation term is recovered from the position
/// through the geographic projection.
pub fn process_model(
    state: &PoseState,
    rotation_rate: &Vector3<f64>,
    projection: &GeographicProjection,
    offsets: &RelaxationOffsets,
    parameter: &PoseUKFParameter,
    delta_time: f64,
) -> PoseState {
    let mut next = state.clone();

    // apply velocity
    next.position
        .boxplus(state.velocity.0.as_slice(), delta_time);

    // apply angular velocity
    let (latitude, _) = projection.nav_to_world(state.position.0[0], state.position.0[1]);
    let angular_velocity =
        state.orientation.0 * (rotation_rate - state.bias_gyro.0) - earth_rotation(latitude);
    next.orientation
        .boxplus(angular_velocity.as_slice(), delta_time);

    // apply acceleration
    next.velocity
        .boxplus(state.acceleration.0.as_slice(), delta_time);

    let gyro_bias_delta =
        (state.bias_gyro.0 - parameter.gyro_bias_offset) * (-1.0 / parameter.gyro_bias_tau);
    next.bias_gyro
        .boxplus(gyro_bias_delta.as_slice(), delta_time);

    let acc_bias_delta =
        (state.bias_acc.0 - parameter.acc_bias_offset) * (-1.0 / parameter.acc_bias_tau);
    next.bias_acc.boxplus(acc_bias_delta.as_slice(), delta_time);

    let inertia_delta =
        (state.inertia.vectorized() - offsets.inertia) * (-1.0 / parameter.inertia_tau);
    next.inertia.boxplus(inertia_delta.as_slice(), delta_time);

    let lin_damping_delta = (state.lin_damping.vectorized() - offsets.lin_damping)
        * (-1.0 / parameter.lin_damping_tau);
    next.lin_damping
        .boxplus(lin_damping_delta.as_slice(), delta_time);

    let quad_damping_delta = (state.quad_damping.vectorized() - offsets.quad_damping)
        * (-1.0 / parameter.quad_damping_tau);
    next.quad_damping
        .boxplus(quad_damping_delta.as_slice(), delta_time);

    // water currents and the ADCP bias relax toward zero
    let water_velocity_delta = state.water_velocity.0 * (-1.0 / parameter.water_velocity_tau);
    next.water_velocity
        .boxplus(water_velocity_delta.as_slice(), delta_time);

    let water_velocity_below_delta =
        state.water_velocity_below.0 * (-1.0 / parameter.water_velocity_tau);
    next.water_velocity_below
        .boxplus(water_velocity_below_delta.as_slice(), delta_time);

    let adcp_bias_delta = state.bias_adcp.0 * (-1.0 / parameter.adcp_bias_tau);
    next.bias_adcp
        .boxplus(adcp_bias_delta.as_slice(), delta_time);

    let water_density_delta = [(state.water_density.0[0] - offsets.water_density)
        * (-1.0 / parameter.water_density_tau)];
    next.water_density.boxplus(&water_density_delta, delta_time);

    next
}

/// Per-block 1σ process noise densities of the white states.
///
/// The relaxing states take their stationary spread from the filter
/// parameters instead; see [`base_process_noise`].
#[derive(Clone, Copy, Debug)]
pub struct ProcessNoiseStd {
    pub position: f64,
    pub orientation: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub gravity: f64,
    pub gyro_bias: f64,
    pub acc_bias: f64,
    pub inertia: f64,
    pub lin_damping: f64,
    pub quad_damping: f64,
    pub adcp_bias: f64,
    pub water_density: f64,
}

/// Assemble the base process-noise matrix handed to the filter.
///
/// White states contribute `σ²` on the diagonal. First-order Gauss-Markov
/// states use the stationary relation `q = 2σ²/τ` so that the long-term
/// spread matches the configured σ; the water-velocity blocks take
/// `water_velocity_limits` as their long-term 1σ bound.
pub fn base_process_noise(
    parameter: &PoseUKFParameter,
    std: &ProcessNoiseStd,
) -> DMatrix<f64> {
    let mut q = DMatrix::zeros(PoseState::DOF, PoseState::DOF);
    let mut set_block = |block: StateBlock, value: f64| {
        for i in block.range() {
            q[(i, i)] = value;
        }
    };

    set_block(StateBlock::Position, std.position.powi(2));
    set_block(StateBlock::Orientation, std.orientation.powi(2));
    set_block(StateBlock::Velocity, std.velocity.powi(2));
    set_block(StateBlock::Acceleration, std.acceleration.powi(2));
    set_block(StateBlock::Gravity, std.gravity.powi(2));

    set_block(
        StateBlock::BiasGyro,
        2.0 * std.gyro_bias.powi(2) / parameter.gyro_bias_tau,
    );
    set_block(
        StateBlock::BiasAcc,
        2.0 * std.acc_bias.powi(2) / parameter.acc_bias_tau,
    );
    set_block(
        StateBlock::Inertia,
        2.0 * std.inertia.powi(2) / parameter.inertia_tau,
    );
    set_block(
        StateBlock::LinDamping,
        2.0 * std.lin_damping.powi(2) / parameter.lin_damping_tau,
    );
    set_block(
        StateBlock::QuadDamping,
        2.0 * std.quad_damping.powi(2) / parameter.quad_damping_tau,
    );
    let water_velocity_noise =
        2.0 * parameter.water_velocity_limits.powi(2) / parameter.water_velocity_tau;
    set_block(StateBlock::WaterVelocity, water_velocity_noise);
    set_block(StateBlock::WaterVelocityBelow, water_velocity_noise);
    set_block(
        StateBlock::BiasAdcp,
        2.0 * std.adcp_bias.powi(2) / parameter.adcp_bias_tau,
    );
    set_block(
        StateBlock::WaterDensity,
        2.0 * std.water_density.powi(2) / parameter.water_density_tau,
    );

    q
}
