//! HEALPix (Hierarchical Equal Area isoLatitude Pixelisation), nested scheme.
//!
//! Only the forward (position to pixel) and inverse (pixel to center) maps are
//! provided; that is all a completeness table needs from the sphere.
//!
//! The 12 base pixels ("faces") are laid out as:
//! - 0–3: north polar cap
//! - 4–7: equatorial belt
//! - 8–11: south polar cap
//!
//! Within a face, `x` increases northeast and `y` increases northwest. All
//! angles in this module are radians.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

/// Nside for a given depth: 2^depth.
pub fn nside(depth: u8) -> u64 {
    1u64 << depth
}

/// Total number of pixels at a given depth: 12 * nside^2.
pub fn npix(depth: u8) -> u64 {
    12 * nside(depth) * nside(depth)
}

/// Solid angle (steradians) of a single pixel at the given depth.
pub fn pixel_area(depth: u8) -> f64 {
    4.0 * PI / npix(depth) as f64
}

/// Nested pixel index containing (lon, lat).
///
/// `lon` may be any finite angle; it is wrapped into [0, 2π).
/// `lat` must lie in [-π/2, π/2].
pub fn lon_lat_to_nested(lon: f64, lat: f64, depth: u8) -> u64 {
    let ns = nside(depth);
    let (face, x, y) = locate_in_face(wrap_lon(lon), lat.sin(), ns as f64);
    face * ns * ns + interleave(x, y)
}

/// (lon, lat) of the center of a nested pixel.
pub fn nested_to_center(hash: u64, depth: u8) -> (f64, f64) {
    let ns = nside(depth);
    let face = hash / (ns * ns);
    let (x, y) = deinterleave(hash % (ns * ns));
    face_point_to_lon_lat(face, x as f64 + 0.5, y as f64 + 0.5, ns as f64)
}

fn wrap_lon(lon: f64) -> f64 {
    let phi = lon.rem_euclid(TAU);
    if phi >= TAU { 0.0 } else { phi }
}

fn is_north_face(face: u64) -> bool {
    face <= 3
}

fn is_south_face(face: u64) -> bool {
    face >= 8
}

// ---------------------------------------------------------------------------
// Forward map: (phi, z) -> (face, x, y)
// ---------------------------------------------------------------------------

fn locate_in_face(phi: f64, z: f64, ns: f64) -> (u64, u64, u64) {
    // Longitude within the current quarter, and which quarter it is.
    let phi_q = phi % FRAC_PI_2;
    let quarter = ((phi / FRAC_PI_2).floor() as i64).rem_euclid(4) as u64;
    let last = ns as u64 - 1;

    if z.abs() >= 2.0 / 3.0 {
        let north = z >= 0.0;
        let sigma = if north { 1.0 - z } else { 1.0 + z };

        // Distances from the pole corner along each face axis (HEALPix paper
        // eqns 19/20, solved for Ns - x and Ns - y).
        let dx = (3.0 * sigma * (ns * (2.0 * phi_q - PI) / PI).powi(2))
            .max(0.0)
            .sqrt();
        let dy = (3.0 * sigma * (ns * 2.0 * phi_q / PI).powi(2))
            .max(0.0)
            .sqrt();

        let (fx, fy) = if north { (ns - dx, ns - dy) } else { (dy, dx) };
        let face = if north { quarter } else { 8 + quarter };
        return (
            face,
            (fx.floor() as u64).min(last),
            (fy.floor() as u64).min(last),
        );
    }

    // Equatorial belt: rotate (phi, z) into the face's diagonal frame.
    let zu = (z + 2.0 / 3.0) / (4.0 / 3.0);
    let pu = phi_q / FRAC_PI_2;
    let mut fx = (zu + pu) * ns;
    let mut fy = (zu - pu + 1.0) * ns;

    let face = match (fx >= ns, fy >= ns) {
        (true, true) => {
            fx -= ns;
            fy -= ns;
            quarter
        }
        (true, false) => {
            fx -= ns;
            4 + (quarter + 1) % 4
        }
        (false, true) => {
            fy -= ns;
            4 + quarter
        }
        (false, false) => 8 + quarter,
    };

    (
        face,
        (fx.floor() as u64).min(last),
        (fy.floor() as u64).min(last),
    )
}

// ---------------------------------------------------------------------------
// Inverse map: (face, x, y) continuous -> (lon, lat)
// ---------------------------------------------------------------------------

fn face_point_to_lon_lat(face: u64, x: f64, y: f64, ns: f64) -> (f64, f64) {
    let xn = x / ns;
    let yn = y / ns;

    let in_cap = (is_north_face(face) && xn + yn > 1.0) || (is_south_face(face) && xn + yn < 1.0);

    let (phi, z) = if in_cap {
        polar_phi_z(face, x, y, ns)
    } else {
        let (phi_offset, z_offset, quarter) = match face {
            0..=3 => (1.0, 0.0, face),
            4..=7 => (0.0, -1.0, face - 4),
            _ => (1.0, -2.0, face - 8),
        };
        let z = (2.0 / 3.0) * (xn + yn + z_offset);
        let phi = FRAC_PI_4 * (xn - yn + phi_offset + 2.0 * quarter as f64);
        (phi, z)
    };

    (wrap_lon(phi), z.clamp(-1.0, 1.0).asin())
}

fn polar_phi_z(face: u64, x: f64, y: f64, ns: f64) -> (f64, f64) {
    let north = is_north_face(face);
    let sign = if north { 1.0 } else { -1.0 };

    // Work in the north-cap convention; the south cap is its mirror.
    let (px, py) = if north { (x, y) } else { (ns - y, ns - x) };
    let dx = ns - px;
    let dy = ns - py;

    let phi_q = if dx + dy == 0.0 {
        0.0
    } else {
        PI * dy / (2.0 * (dx + dy))
    };

    // Two algebraically equal branches; pick the one away from a zero divisor.
    let (num, denom) = if phi_q < FRAC_PI_4 {
        (PI * dx, (2.0 * phi_q - PI) * ns)
    } else {
        (PI * dy, 2.0 * phi_q * ns)
    };
    let z = if denom.abs() < 1e-15 {
        sign
    } else {
        let v = num / denom;
        (1.0 - v * v / 3.0) * sign
    };

    let quarter = if north { face } else { face - 8 };
    (FRAC_PI_2 * quarter as f64 + phi_q, z)
}

// ---------------------------------------------------------------------------
// Bit interleaving within a face
// ---------------------------------------------------------------------------

/// x supplies the even bits, y the odd bits.
fn interleave(x: u64, y: u64) -> u64 {
    (0..32).fold(0u64, |acc, bit| {
        acc | ((x >> bit) & 1) << (2 * bit) | ((y >> bit) & 1) << (2 * bit + 1)
    })
}

fn deinterleave(sub: u64) -> (u64, u64) {
    (0..32).fold((0u64, 0u64), |(x, y), bit| {
        (
            x | ((sub >> (2 * bit)) & 1) << bit,
            y | ((sub >> (2 * bit + 1)) & 1) << bit,
        )
    })
}
