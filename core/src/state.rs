//! Filter state of the pose estimator.
//!
//! [`PoseState`] is the product manifold estimated by the filter: pose,
//! kinematics, sensor biases, the hydrodynamic parameter blocks and the
//! water column states. [`PoseStateWithMarker`] extends it with the pose of
//! a visual marker for the duration of one visual update batch.
//!
//! The tangent vector of the product manifold is the concatenation of the
//! component tangents in declaration order; [`StateBlock`] fixes the
//! canonical `(offset, size)` table so covariance blocks can be addressed by
//! symbol instead of by raw index.

use std::fmt::{self, Display};
use std::ops::Range;

use nalgebra::{UnitQuaternion, Vector3};

use crate::manifold::{Euclidean, Manifold, MatrixBlock, Rotation};

pub type TranslationType = Euclidean<3>;
pub type VelocityType = Euclidean<3>;
pub type AccelerationType = Euclidean<3>;
pub type BiasType = Euclidean<3>;
pub type GravityType = Euclidean<1>;
pub type InertiaType = MatrixBlock;
pub type LinDampingType = MatrixBlock;
pub type QuadDampingType = MatrixBlock;
pub type WaterVelocityType = Euclidean<2>;
pub type DensityType = Euclidean<1>;
pub type RotationType = Rotation;

/// Symbolic handle on one sub-state of [`PoseState`].
///
/// The discriminant order is the canonical state ordering; `offset` and
/// `size` address the matching block of the tangent space and of any
/// covariance over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateBlock {
    Position,
    Orientation,
    Velocity,
    Acceleration,
    BiasGyro,
    BiasAcc,
    Gravity,
    Inertia,
    LinDamping,
    QuadDamping,
    WaterVelocity,
    WaterVelocityBelow,
    BiasAdcp,
    WaterDensity,
}

impl StateBlock {
    /// All blocks in canonical order.
    pub const ALL: [StateBlock; 14] = [
        StateBlock::Position,
        StateBlock::Orientation,
        StateBlock::Velocity,
        StateBlock::Acceleration,
        StateBlock::BiasGyro,
        StateBlock::BiasAcc,
        StateBlock::Gravity,
        StateBlock::Inertia,
        StateBlock::LinDamping,
        StateBlock::QuadDamping,
        StateBlock::WaterVelocity,
        StateBlock::WaterVelocityBelow,
        StateBlock::BiasAdcp,
        StateBlock::WaterDensity,
    ];

    pub const fn size(self) -> usize {
        match self {
            StateBlock::Position => 3,
            StateBlock::Orientation => 3,
            StateBlock::Velocity => 3,
            StateBlock::Acceleration => 3,
            StateBlock::BiasGyro => 3,
            StateBlock::BiasAcc => 3,
            StateBlock::Gravity => 1,
            StateBlock::Inertia => 9,
            StateBlock::LinDamping => 9,
            StateBlock::QuadDamping => 9,
            StateBlock::WaterVelocity => 2,
            StateBlock::WaterVelocityBelow => 2,
            StateBlock::BiasAdcp => 2,
            StateBlock::WaterDensity => 1,
        }
    }

    pub const fn offset(self) -> usize {
        match self {
            StateBlock::Position => 0,
            StateBlock::Orientation => 3,
            StateBlock::Velocity => 6,
            StateBlock::Acceleration => 9,
            StateBlock::BiasGyro => 12,
            StateBlock::BiasAcc => 15,
            StateBlock::Gravity => 18,
            StateBlock::Inertia => 19,
            StateBlock::LinDamping => 28,
            StateBlock::QuadDamping => 37,
            StateBlock::WaterVelocity => 46,
            StateBlock::WaterVelocityBelow => 48,
            StateBlock::BiasAdcp => 50,
            StateBlock::WaterDensity => 52,
        }
    }

    pub fn range(self) -> Range<usize> {
        self.offset()..self.offset() + self.size()
    }
}

/// The full state estimated by the pose filter.
///
/// Position, velocity and acceleration are expressed in the local
/// navigation frame (north-west-up); the orientation maps IMU to navigation
/// frame. The inertia and damping blocks hold the horizontal-plus-yaw
/// sub-matrices of the 6×6 hydrodynamic parameter matrices. Water
/// velocities are horizontal currents at the depths of the two ADCP cells.
#[derive(Clone, Debug)]
pub struct PoseState {
    pub position: TranslationType,
    pub orientation: RotationType,
    pub velocity: VelocityType,
    pub acceleration: AccelerationType,
    pub bias_gyro: BiasType,
    pub bias_acc: BiasType,
    pub gravity: GravityType,
    pub inertia: InertiaType,
    pub lin_damping: LinDampingType,
    pub quad_damping: QuadDampingType,
    pub water_velocity: WaterVelocityType,
    pub water_velocity_below: WaterVelocityType,
    pub bias_adcp: WaterVelocityType,
    pub water_density: DensityType,
}

impl Manifold for PoseState {
    const DOF: usize = 53;

    fn boxplus(&mut self, delta: &[f64], scale: f64) {
        self.position
            .boxplus(&delta[StateBlock::Position.range()], scale);
        self.orientation
            .boxplus(&delta[StateBlock::Orientation.range()], scale);
        self.velocity
            .boxplus(&delta[StateBlock::Velocity.range()], scale);
        self.acceleration
            .boxplus(&delta[StateBlock::Acceleration.range()], scale);
        self.bias_gyro
            .boxplus(&delta[StateBlock::BiasGyro.range()], scale);
        self.bias_acc
            .boxplus(&delta[StateBlock::BiasAcc.range()], scale);
        self.gravity
            .boxplus(&delta[StateBlock::Gravity.range()], scale);
        self.inertia
            .boxplus(&delta[StateBlock::Inertia.range()], scale);
        self.lin_damping
            .boxplus(&delta[StateBlock::LinDamping.range()], scale);
        self.quad_damping
            .boxplus(&delta[StateBlock::QuadDamping.range()], scale);
        self.water_velocity
            .boxplus(&delta[StateBlock::WaterVelocity.range()], scale);
        self.water_velocity_below
            .boxplus(&delta[StateBlock::WaterVelocityBelow.range()], scale);
        self.bias_adcp
            .boxplus(&delta[StateBlock::BiasAdcp.range()], scale);
        self.water_density
            .boxplus(&delta[StateBlock::WaterDensity.range()], scale);
    }

    fn boxminus(&self, other: &Self, out: &mut [f64]) {
        self.position
            .boxminus(&other.position, &mut out[StateBlock::Position.range()]);
        self.orientation.boxminus(
            &other.orientation,
            &mut out[StateBlock::Orientation.range()],
        );
        self.velocity
            .boxminus(&other.velocity, &mut out[StateBlock::Velocity.range()]);
        self.acceleration.boxminus(
            &other.acceleration,
            &mut out[StateBlock::Acceleration.range()],
        );
        self.bias_gyro
            .boxminus(&other.bias_gyro, &mut out[StateBlock::BiasGyro.range()]);
        self.bias_acc
            .boxminus(&other.bias_acc, &mut out[StateBlock::BiasAcc.range()]);
        self.gravity
            .boxminus(&other.gravity, &mut out[StateBlock::Gravity.range()]);
        self.inertia
            .boxminus(&other.inertia, &mut out[StateBlock::Inertia.range()]);
        self.lin_damping.boxminus(
            &other.lin_damping,
            &mut out[StateBlock::LinDamping.range()],
        );
        self.quad_damping.boxminus(
            &other.quad_damping,
            &mut out[StateBlock::QuadDamping.range()],
        );
        self.water_velocity.boxminus(
            &other.water_velocity,
            &mut out[StateBlock::WaterVelocity.range()],
        );
        self.water_velocity_below.boxminus(
            &other.water_velocity_below,
            &mut out[StateBlock::WaterVelocityBelow.range()],
        );
        self.bias_adcp
            .boxminus(&other.bias_adcp, &mut out[StateBlock::BiasAdcp.range()]);
        self.water_density.boxminus(
            &other.water_density,
            &mut out[StateBlock::WaterDensity.range()],
        );
    }
}

impl Display for PoseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.orientation.0.euler_angles();
        write!(
            f,
            "PoseState {{ pos: [{:.3}, {:.3}, {:.3}] m, rpy: [{:.2}, {:.2}, {:.2}] deg, \
             vel: [{:.3}, {:.3}, {:.3}] m/s }}",
            self.position.0[0],
            self.position.0[1],
            self.position.0[2],
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees(),
            self.velocity.0[0],
            self.velocity.0[1],
            self.velocity.0[2],
        )
    }
}

/// The pose state augmented with the pose of a visual marker.
///
/// Built for the duration of one visual feature batch; the marker block is
/// dropped again when the posterior is written back to the main filter.
#[derive(Clone, Debug)]
pub struct PoseStateWithMarker {
    pub filter_state: PoseState,
    /// Position of the marker in the navigation frame.
    pub marker_position: TranslationType,
    /// Orientation of the marker in the navigation frame.
    pub marker_orientation: RotationType,
}

impl PoseStateWithMarker {
    pub fn new(
        filter_state: PoseState,
        marker_position: Vector3<f64>,
        marker_orientation: UnitQuaternion<f64>,
    ) -> Self {
        PoseStateWithMarker {
            filter_state,
            marker_position: Euclidean(marker_position),
            marker_orientation: Rotation(marker_orientation),
        }
    }
}

impl Manifold for PoseStateWithMarker {
    const DOF: usize = PoseState::DOF + 6;

    fn boxplus(&mut self, delta: &[f64], scale: f64) {
        let n = PoseState::DOF;
        self.filter_state.boxplus(&delta[..n], scale);
        self.marker_position.boxplus(&delta[n..n + 3], scale);
        self.marker_orientation.boxplus(&delta[n + 3..n + 6], scale);
    }

    fn boxminus(&self, other: &Self, out: &mut [f64]) {
        let n = PoseState::DOF;
        self.filter_state.boxminus(&other.filter_state, &mut out[..n]);
        self.marker_position
            .boxminus(&other.marker_position, &mut out[n..n + 3]);
        self.marker_orientation
            .boxminus(&other.marker_orientation, &mut out[n + 3..n + 6]);
    }
}
