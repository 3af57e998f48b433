//! Euler angles ↔ orientation matrices.
//!
//! Bunge-style (ψ, φ, θ) in degrees. The polar angle φ = 0 or 180° leaves ψ
//! and θ coupled; the inverse then reports ψ = 0 and folds the whole in-plane
//! rotation into θ.

use hedm_types::constants::{ORIENTATION_EPS, RAD2DEG};

use crate::trig::{cosd, sind};

pub type Mat3 = [[f64; 3]; 3];

/// Orientation matrix from Euler angles (degrees).
pub fn euler_to_orientation(euler: [f64; 3]) -> Mat3 {
    let (psi, phi, theta) = (euler[0], euler[1], euler[2]);
    let (cps, cph, cth) = (cosd(psi), cosd(phi), cosd(theta));
    let (sps, sph, sth) = (sind(psi), sind(phi), sind(theta));
    [
        [
            cth * cps - sth * cph * sps,
            -cth * cph * sps - sth * cps,
            sph * sps,
        ],
        [
            cth * sps + sth * cph * cps,
            cth * cph * cps - sth * sps,
            -sph * cps,
        ],
        [sth * sph, cth * sph, cph],
    ]
}

/// Angle in [0, 2π) from its sine sign and cosine. The cosine is clamped.
fn sin_cos_to_angle(s: f64, c: f64) -> f64 {
    let a = c.clamp(-1.0, 1.0).acos();
    if s >= 0.0 {
        a
    } else {
        2.0 * std::f64::consts::PI - a
    }
}

/// Euler angles (degrees) from an orientation matrix.
pub fn orientation_to_euler(m: &Mat3) -> [f64; 3] {
    let phi = if (m[2][2] - 1.0).abs() < ORIENTATION_EPS {
        0.0
    } else {
        m[2][2].clamp(-1.0, 1.0).acos()
    };
    let sph = phi.sin();

    let (psi, theta) = if sph.abs() < ORIENTATION_EPS {
        let theta = if (m[2][2] - 1.0).abs() < ORIENTATION_EPS {
            sin_cos_to_angle(m[1][0], m[0][0])
        } else {
            sin_cos_to_angle(-m[1][0], m[0][0])
        };
        (0.0, theta)
    } else {
        (
            sin_cos_to_angle(m[0][2] / sph, -m[1][2] / sph),
            sin_cos_to_angle(m[2][0] / sph, m[2][1] / sph),
        )
    };

    [psi * RAD2DEG, phi * RAD2DEG, theta * RAD2DEG]
}

/// Rotate `v` about +z by `alpha` degrees.
pub fn rotate_around_z(v: [f64; 3], alpha: f64) -> [f64; 3] {
    let (c, s) = (cosd(alpha), sind(alpha));
    [c * v[0] - s * v[1], s * v[0] + c * v[1], v[2]]
}
