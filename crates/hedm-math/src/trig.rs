//! Degree-based trigonometry and small fixed-size vector helpers.

use hedm_types::constants::{DEG2RAD, RAD2DEG};

#[inline]
pub fn sind(x: f64) -> f64 {
    (x * DEG2RAD).sin()
}

#[inline]
pub fn cosd(x: f64) -> f64 {
    (x * DEG2RAD).cos()
}

#[inline]
pub fn tand(x: f64) -> f64 {
    (x * DEG2RAD).tan()
}

#[inline]
pub fn asind(x: f64) -> f64 {
    x.asin() * RAD2DEG
}

#[inline]
pub fn acosd(x: f64) -> f64 {
    x.acos() * RAD2DEG
}

#[inline]
pub fn atand(x: f64) -> f64 {
    x.atan() * RAD2DEG
}

#[inline]
pub fn norm3(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[inline]
pub fn dot3(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn mat_vec(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Angle between two vectors (degrees). NaN if either is zero-length.
pub fn angle_between(a: [f64; 3], b: [f64; 3]) -> f64 {
    let cos = dot3(a, b) / (norm3(a) * norm3(b));
    acosd(cos.clamp(-1.0, 1.0)).abs()
}

/// Azimuth η of a detector position (degrees).
///
/// Measured from +z, negative on the +y side. NaN at the beam center.
pub fn azimuth(y: f64, z: f64) -> f64 {
    let eta = acosd(z / (y * y + z * z).sqrt());
    if y > 0.0 {
        -eta
    } else {
        eta
    }
}
