//! Longitude/latitude helpers on the unit sphere. Angles are degrees unless a
//! name says otherwise.

/// Unit vector `[x, y, z]` for a (longitude, latitude) in degrees.
pub fn lon_lat_to_xyz(lon: f64, lat: f64) -> [f64; 3] {
    let (lon, lat) = (lon.to_radians(), lat.to_radians());
    let cos_lat = lat.cos();
    [cos_lat * lon.cos(), cos_lat * lon.sin(), lat.sin()]
}

/// Great-circle separation in degrees between two (longitude, latitude) pairs.
pub fn angular_separation(a: (f64, f64), b: (f64, f64)) -> f64 {
    let u = lon_lat_to_xyz(a.0, a.1);
    let v = lon_lat_to_xyz(b.0, b.1);
    let dot = u[0] * v[0] + u[1] * v[1] + u[2] * v[2];
    dot.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Longitude wrapped into [0, 360).
pub fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = lon.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// True when the position can be placed on the sphere: both finite and the
/// latitude within [-90, 90].
pub fn is_valid_position(lon: f64, lat: f64) -> bool {
    lon.is_finite() && lat.is_finite() && (-90.0..=90.0).contains(&lat)
}
