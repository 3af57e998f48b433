//! Lattice constants → reciprocal basis → per-candidate scattering vectors.

use hedm_types::state::ReflectionCandidate;

use crate::orientation::Mat3;
use crate::trig::{acosd, asind, cosd, mat_vec, norm3, sind};

/// Scattering vector of one candidate in the crystal frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatteringVector {
    pub g: [f64; 3],
    /// Bragg angle θ (degrees). NaN when the reflection cannot diffract at
    /// this wavelength.
    pub theta: f64,
    pub ring: i32,
}

/// Upper-triangular reciprocal basis B for lattice `[a, b, c, α, β, γ]`.
pub fn reciprocal_basis(lattice: &[f64; 6]) -> Mat3 {
    let [a, b, c, alpha, beta, gamma] = *lattice;
    let (sin_a, sin_b, sin_g) = (sind(alpha), sind(beta), sind(gamma));
    let (cos_a, cos_b, cos_g) = (cosd(alpha), cosd(beta), cosd(gamma));

    let gamma_pr = acosd((cos_a * cos_b - cos_g) / (sin_a * sin_b));
    let beta_pr = acosd((cos_g * cos_a - cos_b) / (sin_g * sin_a));
    let sin_beta_pr = sind(beta_pr);

    let vol = a * b * c * sin_a * sin_beta_pr * sin_g;
    let a_pr = b * c * sin_a / vol;
    let b_pr = c * a * sin_b / vol;
    let c_pr = a * b * sin_g / vol;

    [
        [a_pr, b_pr * cosd(gamma_pr), c_pr * cosd(beta_pr)],
        [0.0, b_pr * sind(gamma_pr), -c_pr * sin_beta_pr * cos_a],
        [0.0, 0.0, c_pr * sin_beta_pr * sin_a],
    ]
}

/// Scattering vectors and Bragg angles for every candidate.
pub fn scattering_vectors(
    lattice: &[f64; 6],
    candidates: &[ReflectionCandidate],
    wavelength: f64,
) -> Vec<ScatteringVector> {
    let b = reciprocal_basis(lattice);
    candidates
        .iter()
        .map(|cand| {
            let g = mat_vec(&b, cand.hkl);
            let d_spacing = 1.0 / norm3(g);
            ScatteringVector {
                g,
                theta: asind(wavelength / (2.0 * d_spacing)),
                ring: cand.ring,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cubic_basis_is_diagonal() {
        let b = reciprocal_basis(&[4.0, 4.0, 4.0, 90.0, 90.0, 90.0]);
        for i in 0..3 {
            assert!((b[i][i] - 0.25).abs() < 1e-12, "B[{i}][{i}] = {}", b[i][i]);
            for j in 0..3 {
                if i != j {
                    assert!(b[i][j].abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_cubic_bragg_angle() {
        // d(111) = a / sqrt(3)
        let a = 4.08;
        let lambda = 0.172979;
        let cands = [ReflectionCandidate {
            hkl: [1.0, 1.0, 1.0],
            ring: 1,
        }];
        let sv = scattering_vectors(&[a, a, a, 90.0, 90.0, 90.0], &cands, lambda);
        let d = a / 3f64.sqrt();
        let expected = asind(lambda / (2.0 * d));
        assert!((sv[0].theta - expected).abs() < 1e-10);
        assert!((norm3(sv[0].g) - 1.0 / d).abs() < 1e-12);
        assert_eq!(sv[0].ring, 1);
    }

    #[test]
    fn test_hexagonal_d_spacing() {
        // Hexagonal: 1/d² = 4/3 (h² + hk + k²)/a² + l²/c²
        let (a, c) = (2.95, 4.68);
        let b = reciprocal_basis(&[a, a, c, 90.0, 90.0, 120.0]);
        let g = mat_vec(&b, [1.0, 0.0, 1.0]);
        let inv_d2 = 4.0 / 3.0 / (a * a) + 1.0 / (c * c);
        assert!((norm3(g).powi(2) - inv_d2).abs() < 1e-10);
    }

    #[test]
    fn test_unreachable_reflection_is_nan() {
        let cands = [ReflectionCandidate {
            hkl: [9.0, 9.0, 9.0],
            ring: 7,
        }];
        let sv = scattering_vectors(&[2.0, 2.0, 2.0, 90.0, 90.0, 90.0], &cands, 1.5);
        assert!(sv[0].theta.is_nan());
    }
}
