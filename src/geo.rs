//! Great-circle geometry for airport proximity checks.
//!
//! All distances are in nautical miles on a spherical earth. The ~0.5% error
//! against ellipsoidal models is irrelevant at the threshold bands we alert
//! on (single-digit nautical miles).

/// Mean earth radius in nautical miles
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Check that a coordinate pair is within valid WGS-84 ranges
pub fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Haversine distance between two points in nautical miles
pub fn distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_NM * c
}

/// Initial great-circle bearing from point 1 to point 2, in degrees [0, 360)
pub fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Whether an aircraft is descending between two samples.
///
/// Returns `Some(true)` when altitude dropped by more than `noise_margin_ft`,
/// `Some(false)` when it did not, and `None` when either altitude is missing.
/// Callers treat `None` as "unknown" and fail closed (no alert).
pub fn is_descending(
    current_ft: Option<f64>,
    previous_ft: Option<f64>,
    noise_margin_ft: f64,
) -> Option<bool> {
    match (current_ft, previous_ft) {
        (Some(current), Some(previous)) => Some(previous - current > noise_margin_ft),
        _ => None,
    }
}
