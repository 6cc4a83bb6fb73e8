//! Manifold primitives for the filter state space.
//!
//! The unscented filter in this crate operates on product manifolds rather
//! than flat vectors, so every state component carries its own boxplus and
//! boxminus operators. For Euclidean components these degenerate to vector
//! addition and subtraction. Orientations live on SO(3) (unit quaternions,
//! Hamilton convention) and bearing measurements live on the unit 2-sphere,
//! where the operators map between the manifold and a local tangent chart.
//!
//! Tangent vectors are exchanged as plain `f64` slices so that a product
//! manifold can hand each component a view into one concatenated tangent
//! vector without copying.

use nalgebra::{Matrix3, SVector, Unit, UnitQuaternion, Vector3};

/// A point on a smooth manifold with a fixed tangent-space dimension.
///
/// `boxplus` applies a tangent increment (optionally scaled, which the
/// process model uses to fold in the time step); `boxminus` computes the
/// tangent vector at `other` that carries `other` onto `self`. For any two
/// points `a`, `b` the pair satisfies `b == a ⊞ (b ⊟ a)` up to floating
/// point round-off.
pub trait Manifold: Clone {
    /// Tangent-space dimension of the manifold.
    const DOF: usize;

    /// Apply the tangent increment `delta * scale` in place.
    ///
    /// `delta` must have length `Self::DOF`.
    fn boxplus(&mut self, delta: &[f64], scale: f64);

    /// Write the tangent difference `self ⊟ other` into `out`.
    ///
    /// The result is expressed in the tangent space at `other`; `out` must
    /// have length `Self::DOF`.
    fn boxminus(&self, other: &Self, out: &mut [f64]);
}

/// A Euclidean manifold component of dimension `N`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Euclidean<const N: usize>(pub SVector<f64, N>);

impl<const N: usize> Euclidean<N> {
    pub fn new(value: SVector<f64, N>) -> Self {
        Euclidean(value)
    }

    pub fn zeros() -> Self {
        Euclidean(SVector::zeros())
    }
}

impl<const N: usize> From<SVector<f64, N>> for Euclidean<N> {
    fn from(value: SVector<f64, N>) -> Self {
        Euclidean(value)
    }
}

impl<const N: usize> Manifold for Euclidean<N> {
    const DOF: usize = N;

    fn boxplus(&mut self, delta: &[f64], scale: f64) {
        for i in 0..N {
            self.0[i] += delta[i] * scale;
        }
    }

    fn boxminus(&self, other: &Self, out: &mut [f64]) {
        for i in 0..N {
            out[i] = self.0[i] - other.0[i];
        }
    }
}

/// An element of SO(3), stored as a unit quaternion (Hamilton convention).
///
/// `boxplus` right-multiplies by the exponential of the rotation vector and
/// renormalizes; `boxminus` returns the rotation vector of `other⁻¹ · self`.
#[derive(Clone, Copy, Debug)]
pub struct Rotation(pub UnitQuaternion<f64>);

impl Rotation {
    pub fn identity() -> Self {
        Rotation(UnitQuaternion::identity())
    }
}

impl From<UnitQuaternion<f64>> for Rotation {
    fn from(value: UnitQuaternion<f64>) -> Self {
        Rotation(value)
    }
}

impl Manifold for Rotation {
    const DOF: usize = 3;

    fn boxplus(&mut self, delta: &[f64], scale: f64) {
        let omega = Vector3::new(delta[0], delta[1], delta[2]) * scale;
        let increment = UnitQuaternion::from_scaled_axis(omega);
        // Renormalize after the product to keep |q| = 1 through long chains
        // of small increments.
        self.0 = UnitQuaternion::new_normalize((self.0 * increment).into_inner());
    }

    fn boxminus(&self, other: &Self, out: &mut [f64]) {
        let relative = other.0.inverse() * self.0;
        let omega = relative.scaled_axis();
        out[0] = omega[0];
        out[1] = omega[1];
        out[2] = omega[2];
    }
}

/// A point on the unit 2-sphere with a 2-DOF local tangent chart.
///
/// The chart at a point `n` is spanned by an orthonormal basis of the plane
/// perpendicular to `n`. `boxplus` rotates `n` by the tangent increment
/// lifted into that plane; `boxminus` recovers the rotation carrying one
/// unit vector onto another and projects it back onto the chart basis.
#[derive(Clone, Copy, Debug)]
pub struct UnitSphere(pub Unit<Vector3<f64>>);

impl UnitSphere {
    /// Normalizes `direction` onto the sphere.
    pub fn new(direction: Vector3<f64>) -> Self {
        UnitSphere(Unit::new_normalize(direction))
    }

    /// Orthonormal basis of the tangent plane at this point.
    ///
    /// The seed axis is chosen deterministically so that the basis is a
    /// continuous function of the point away from the seed switchover.
    fn tangent_basis(&self) -> (Vector3<f64>, Vector3<f64>) {
        let n = self.0.as_ref();
        let seed = if n.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let e1 = n.cross(&seed).normalize();
        let e2 = n.cross(&e1);
        (e1, e2)
    }
}

impl Manifold for UnitSphere {
    const DOF: usize = 2;

    fn boxplus(&mut self, delta: &[f64], scale: f64) {
        let (e1, e2) = self.tangent_basis();
        let omega = (delta[0] * e1 + delta[1] * e2) * scale;
        let rotated = UnitQuaternion::from_scaled_axis(omega) * self.0.into_inner();
        self.0 = Unit::new_normalize(rotated);
    }

    fn boxminus(&self, other: &Self, out: &mut [f64]) {
        let from = other.0.as_ref();
        let to = self.0.as_ref();
        let cross = from.cross(to);
        let sin_angle = cross.norm();
        let cos_angle = from.dot(to).clamp(-1.0, 1.0);
        let (e1, e2) = other.tangent_basis();
        if sin_angle > 1e-12 {
            let rotation_vector = (cross / sin_angle) * sin_angle.atan2(cos_angle);
            out[0] = rotation_vector.dot(&e1);
            out[1] = rotation_vector.dot(&e2);
        } else if cos_angle > 0.0 {
            out[0] = 0.0;
            out[1] = 0.0;
        } else {
            // Antipodal points: a half turn about the first chart axis.
            out[0] = std::f64::consts::PI;
            out[1] = 0.0;
        }
    }
}

/// A 3×3 real matrix treated as a flat 9-DOF Euclidean manifold.
///
/// The tangent ordering is column-major, matching the storage order of the
/// underlying matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatrixBlock(pub Matrix3<f64>);

impl MatrixBlock {
    pub fn new(value: Matrix3<f64>) -> Self {
        MatrixBlock(value)
    }

    pub fn zeros() -> Self {
        MatrixBlock(Matrix3::zeros())
    }

    /// Column-major flattening of the block.
    pub fn vectorized(&self) -> SVector<f64, 9> {
        SVector::from_column_slice(self.0.as_slice())
    }
}

impl From<Matrix3<f64>> for MatrixBlock {
    fn from(value: Matrix3<f64>) -> Self {
        MatrixBlock(value)
    }
}

impl Manifold for MatrixBlock {
    const DOF: usize = 9;

    fn boxplus(&mut self, delta: &[f64], scale: f64) {
        let entries = self.0.as_mut_slice();
        for i in 0..9 {
            entries[i] += delta[i] * scale;
        }
    }

    fn boxminus(&self, other: &Self, out: &mut [f64]) {
        let a = self.0.as_slice();
        let b = other.0.as_slice();
        for i in 0..9 {
            out[i] = a[i] - b[i];
        }
    }
}
