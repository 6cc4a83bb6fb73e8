//! Earth constants and the local tangent plane projection.
//!
//! The navigation frame of the filter is a local tangent plane in
//! north-west-up orientation, anchored at a configured WGS84 origin.
//! [`GeographicProjection`] converts between that plane and geodetic
//! latitude/longitude using the meridian and prime-vertical radii of
//! curvature at the origin, which is accurate over the few-kilometre
//! excursions of a survey mission. Earth rotation and the Somigliana
//! gravity model live here as well since both are pure functions of
//! latitude.

use nalgebra::Vector3;

/// Earth rotation rate in rad/s (omega_ie).
pub const EARTHW: f64 = 7.292115e-5;
/// WGS84 semi-major axis in meters.
pub const EQUATORIAL_RADIUS: f64 = 6378137.0;
/// WGS84 first eccentricity squared.
pub const ECCENTRICITY_SQUARED: f64 = 0.00669437999014;
/// Somigliana gravity at the equator in m/s².
pub const GE: f64 = 9.7803253359;
/// Somigliana constant (unit-less).
pub const SOMIGLIANA_K: f64 = 1.931852652458e-3;

/// Earth rotation vector expressed in the north-west-up navigation frame
/// at the given latitude (radians).
pub fn earth_rotation(latitude: f64) -> Vector3<f64> {
    Vector3::new(EARTHW * latitude.cos(), 0.0, EARTHW * latitude.sin())
}

/// Somigliana gravity magnitude at the given latitude (radians), at sea
/// level. Positive, pointing down.
pub fn somigliana_gravity(latitude: f64) -> f64 {
    let sin_lat_sq = latitude.sin().powi(2);
    GE * (1.0 + SOMIGLIANA_K * sin_lat_sq) / (1.0 - ECCENTRICITY_SQUARED * sin_lat_sq).sqrt()
}

/// Meridian and prime-vertical radii of curvature at the given latitude
/// (radians).
fn radii_of_curvature(latitude: f64) -> (f64, f64) {
    let sin_lat_sq = latitude.sin().powi(2);
    let denom = 1.0 - ECCENTRICITY_SQUARED * sin_lat_sq;
    let meridian = EQUATORIAL_RADIUS * (1.0 - ECCENTRICITY_SQUARED) / denom.powf(1.5);
    let prime_vertical = EQUATORIAL_RADIUS / denom.sqrt();
    (meridian, prime_vertical)
}

/// Local tangent plane projection between WGS84 and the navigation frame.
///
/// Both directions are pure; the radii are evaluated once at the origin.
#[derive(Clone, Debug)]
pub struct GeographicProjection {
    latitude_origin: f64,
    longitude_origin: f64,
    meridian_radius: f64,
    parallel_radius: f64,
}

impl GeographicProjection {
    /// Create a projection anchored at the given WGS84 origin (radians).
    pub fn new(latitude: f64, longitude: f64) -> Self {
        assert!(
            latitude.is_finite() && latitude.abs() <= std::f64::consts::FRAC_PI_2,
            "origin latitude must be a finite angle in [-pi/2, pi/2], got {}",
            latitude
        );
        assert!(
            longitude.is_finite() && longitude.abs() <= std::f64::consts::PI,
            "origin longitude must be a finite angle in [-pi, pi], got {}",
            longitude
        );
        let (meridian, prime_vertical) = radii_of_curvature(latitude);
        GeographicProjection {
            latitude_origin: latitude,
            longitude_origin: longitude,
            meridian_radius: meridian,
            parallel_radius: prime_vertical * latitude.cos(),
        }
    }

    /// Project WGS84 latitude/longitude (radians) onto the navigation
    /// plane, returning `(x, y)` in meters (north, west).
    pub fn world_to_nav(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let x = (latitude - self.latitude_origin) * self.meridian_radius;
        let y = -(longitude - self.longitude_origin) * self.parallel_radius;
        (x, y)
    }

    /// Lift navigation plane coordinates `(x, y)` in meters back to WGS84
    /// latitude/longitude (radians).
    pub fn nav_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let latitude = self.latitude_origin + x / self.meridian_radius;
        let longitude = self.longitude_origin - y / self.parallel_radius;
        (latitude, longitude)
    }
}
