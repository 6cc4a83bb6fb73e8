//! Model-aided inertial pose estimation for autonomous underwater vehicles
//!
//! This crate implements a manifold unscented Kalman filter that fuses
//! rotation rates and accelerations from an IMU, DVL velocities, pressure,
//! ADCP water-current profiles, geographic fixes, body-effort measurements
//! and visual-marker features into a single estimate of vehicle pose,
//! kinematics, sensor biases, hydrodynamic parameters, water currents and
//! water density. Given force and torque measurements, the motion model
//! aids the velocity estimate through DVL drop outs; ADCP measurements keep
//! the estimate observable through bottom-lock loss; and gyroscopes capable
//! of sensing the rotation of the earth allow the filter to estimate true
//! heading.
//!
//! The crate is primarily built on top of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): linear algebra
//!   storage and decompositions for all filter matrices.
//! - [`log`](https://crates.io/crates/log): diagnostics for skipped
//!   samples, rejected updates and numerical failures.
//! - [`serde`](https://crates.io/crates/serde): (de)serialization of the
//!   configuration types.
//!
//! ## Crate overview
//!
//! - [manifold]: boxplus/boxminus primitives (Euclidean blocks, SO(3), S²).
//! - [state]: the `PoseState` product manifold and its block table.
//! - [ukf]: the unscented engine over an arbitrary manifold.
//! - [linalg]: covariance square roots and SPD solves with jitter retries.
//! - [gating]: χ² innovation gates.
//! - [geo]: earth constants and the local tangent plane projection.
//! - [dynamics]: hydrodynamic collaborator contracts.
//! - [measurements]: measurement entities and models.
//! - [process]: the discretized process model.
//! - [filter]: the `PoseUKF` façade.
//!
//! ## Frames
//!
//! The navigation frame is a local tangent plane in north-west-up
//! orientation anchored at a configured WGS84 origin. The IMU frame is
//! taken to coincide with the body frame in orientation; rotation rates,
//! accelerations and the corresponding configuration parameters must be
//! rotated into the body frame before they are handed to the filter.
//!
//! ## Usage
//!
//! Measurements are integrated one at a time in non-decreasing timestamp
//! order; the caller advances the filter to each sample's timestamp with
//! [`filter::PoseUKF::predict`] before applying the sample. All runtime
//! failures are recoverable and reported as [`FilterError`].

pub mod dynamics;
pub mod filter;
pub mod gating;
pub mod geo;
pub mod linalg;
pub mod manifold;
pub mod measurements;
pub mod process;
pub mod state;
pub mod ukf;

use thiserror::Error;

pub use filter::{
    CameraConfiguration, FilterSummary, LocationConfiguration, PoseUKF, PoseUKFParameter,
};
pub use state::PoseState;

/// Recoverable failures of the filter.
///
/// Every variant leaves the estimate untouched; the filter logs the event,
/// updates its [`FilterSummary`] counters and returns the error to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FilterError {
    /// A measurement contained NaN/Inf or a non-PSD covariance.
    #[error("bad measurement: {0}")]
    BadMeasurement(&'static str),
    /// A prediction was requested over a non-positive time step.
    #[error("non-positive time step: {0}")]
    BadTimeStep(f64),
    /// A covariance factorization failed even after jitter retries.
    #[error("covariance factorization failed after jitter retries")]
    Singular,
    /// The innovation failed its Mahalanobis gate.
    #[error("innovation rejected by the gate (squared Mahalanobis distance {0:.3})")]
    GateRejected(f64),
}
