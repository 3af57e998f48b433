// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Forward Diffraction Model
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Forward diffraction model.
//!
//! For a voxel at `(x, y, 0)` with a given crystal state, every reflection
//! candidate is rotated into the sample frame, the diffraction condition
//! `−x cos ω + y sin ω = |G| sin θ` is solved for the rotation angle ω, and
//! each solution is projected onto a flat detector at distance `Lsd` along
//! the beam (+x). The inverse mapping (detector position + ω → scattering
//! vector) is used to compare predicted and observed spots by misorientation.

use hedm_types::state::{candidate_slot, CrystalState, PredictedSpot, ReflectionCandidate};

use crate::lattice::scattering_vectors;
use crate::orientation::{euler_to_orientation, rotate_around_z};
use crate::trig::{atand, azimuth, cosd, mat_vec, norm3, sind, tand};
use hedm_types::constants::RAD2DEG;

/// Below this |G_y| the quadratic degenerates and ω = ±acos(−v/x).
const SMALL_GY: f64 = 1e-4;

/// Detector distance and wavelength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorGeometry {
    /// Sample-to-detector distance (µm).
    pub lsd: f64,
    /// Wavelength (Å).
    pub wavelength: f64,
}

/// One rotation-angle solution with the azimuth of the rotated vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OmegaRoot {
    pub omega: f64,
    pub eta: f64,
}

/// Up to two solutions, indexed by which root of the quadratic produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OmegaSolutions {
    pub roots: [Option<OmegaRoot>; 2],
}

impl OmegaSolutions {
    pub fn len(&self) -> usize {
        self.roots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(root index, solution)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, OmegaRoot)> + '_ {
        self.roots
            .iter()
            .enumerate()
            .filter_map(|(idx, r)| r.map(|root| (idx, root)))
    }
}

/// Pick the sign of ω = ±acos(cos ω) that best satisfies the diffraction condition.
fn pick_branch(x: f64, y: f64, v: f64, cos_ome: f64) -> f64 {
    let a = cos_ome.acos();
    let b = -a;
    let diff_a = (-x * a.cos() + y * a.sin() - v).abs();
    let diff_b = (-x * b.cos() + y * b.sin() - v).abs();
    if diff_a < diff_b {
        a
    } else {
        b
    }
}

/// Solve the diffraction condition for the sample-frame vector `g` and Bragg
/// angle `theta` (degrees). Returned angles are in degrees.
pub fn solve_omega(g: [f64; 3], theta: f64) -> OmegaSolutions {
    let [x, y, _] = g;
    let v = sind(theta) * norm3(g);
    let mut omegas: [Option<f64>; 2] = [None, None];

    if y.abs() < SMALL_GY {
        if x != 0.0 {
            let cos_ome = -v / x;
            if cos_ome.abs() <= 1.0 {
                let ome = cos_ome.acos() * RAD2DEG;
                omegas = [Some(ome), Some(-ome)];
            }
        }
    } else {
        let y2 = y * y;
        let a = 1.0 + x * x / y2;
        let b = 2.0 * v * x / y2;
        let c = v * v / y2 - 1.0;
        let discr = b * b - 4.0 * a * c;
        if discr >= 0.0 {
            let sq = discr.sqrt();
            for (slot, cos_ome) in [(-b + sq) / (2.0 * a), (-b - sq) / (2.0 * a)]
                .into_iter()
                .enumerate()
            {
                if cos_ome.abs() <= 1.0 {
                    omegas[slot] = Some(pick_branch(x, y, v, cos_ome) * RAD2DEG);
                }
            }
        }
    }

    let mut out = OmegaSolutions::default();
    for (slot, omega) in omegas.into_iter().enumerate() {
        if let Some(omega) = omega {
            let gw = rotate_around_z(g, omega);
            out.roots[slot] = Some(OmegaRoot {
                omega,
                eta: azimuth(gw[1], gw[2]),
            });
        }
    }
    out
}

/// Detector position of a diffracted beam leaving a voxel at `position`.
pub fn project_to_detector(
    lsd: f64,
    position: [f64; 3],
    theta: f64,
    omega: f64,
    eta: f64,
) -> (f64, f64) {
    let (c, s) = (cosd(omega), sind(omega));
    let x_rot = position[0] * c - position[1] * s;
    let y_rot = position[0] * s + position[1] * c;
    let ring_radius = tand(2.0 * theta) * (lsd + x_rot);
    let y = -sind(eta) * ring_radius + y_rot;
    let z = cosd(eta) * ring_radius + position[2];
    (y, z)
}

/// Sample-frame scattering vector (unit length) from a normalized diffracted
/// direction `(xi, yi, zi)`, the rotation angle and Bragg angle (degrees).
pub fn spot_to_scattering_vector(xi: f64, yi: f64, zi: f64, omega: f64, theta: f64) -> [f64; 3] {
    let (cos_ome, sin_ome) = (cosd(omega), sind(omega));
    let eta = azimuth(yi, zi);
    let tan_eta = tand(-eta);
    let (sin_theta, cos_theta) = (sind(theta), cosd(theta));

    let k1 = -sin_theta;
    let (k2, k3) = if (eta - 90.0).abs() < 1e-12 {
        (-cos_theta, 0.0)
    } else if (eta + 90.0).abs() < 1e-12 {
        (cos_theta, 0.0)
    } else {
        let k3 = sin_theta * (1.0 + xi) / (yi * tan_eta + zi);
        (tan_eta * k3, k3)
    };

    [
        k1 * cos_ome + k2 * sin_ome,
        k2 * cos_ome - k1 * sin_ome,
        k3,
    ]
}

/// Scattering vector of a detector spot at `(y, z)`; θ follows from the
/// ring radius and `lsd`, unless `two_theta` (degrees) is supplied.
pub fn detector_to_scattering_vector(
    lsd: f64,
    y: f64,
    z: f64,
    omega: f64,
    two_theta: Option<f64>,
) -> [f64; 3] {
    let len = norm3([lsd, y, z]);
    let theta = match two_theta {
        Some(tth) => tth / 2.0,
        None => atand((y * y + z * z).sqrt() / lsd) / 2.0,
    };
    spot_to_scattering_vector(lsd / len, y / len, z / len, omega, theta)
}

/// Predicted spots for one voxel and crystal state, written into `out`.
///
/// `out` is cleared first so a caller can reuse one buffer per worker.
/// Solutions with an undefined ω or azimuth are skipped.
pub fn predict_spots_into(
    geometry: &DetectorGeometry,
    position: [f64; 3],
    state: &CrystalState,
    candidates: &[ReflectionCandidate],
    out: &mut Vec<PredictedSpot>,
) {
    out.clear();
    let om = euler_to_orientation(state.euler);
    let vectors = scattering_vectors(&state.lattice, candidates, geometry.wavelength);

    for (cand_idx, sv) in vectors.iter().enumerate() {
        if !sv.theta.is_finite() {
            continue;
        }
        let gc = mat_vec(&om, sv.g);
        for (root, sol) in solve_omega(gc, sv.theta).iter() {
            if sol.omega.is_nan() || sol.eta.is_nan() {
                continue;
            }
            let (y, z) = project_to_detector(geometry.lsd, position, sv.theta, sol.omega, sol.eta);
            let eta = azimuth(y, z);
            if eta.is_nan() {
                continue;
            }
            out.push(PredictedSpot {
                slot: candidate_slot(cand_idx, root),
                ring: sv.ring,
                y,
                z,
                omega: sol.omega,
                eta,
                g: detector_to_scattering_vector(geometry.lsd, y, z, sol.omega, None),
            });
        }
    }
}

/// Allocating convenience wrapper around [`predict_spots_into`].
pub fn predict_spots(
    geometry: &DetectorGeometry,
    position: [f64; 3],
    state: &CrystalState,
    candidates: &[ReflectionCandidate],
) -> Vec<PredictedSpot> {
    let mut out = Vec::with_capacity(candidates.len() * 2);
    predict_spots_into(geometry, position, state, candidates, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trig::angle_between;

    fn geometry() -> DetectorGeometry {
        DetectorGeometry {
            lsd: 1_000_000.0,
            wavelength: 0.172979,
        }
    }

    fn au_state(euler: [f64; 3]) -> CrystalState {
        CrystalState::new(euler, [4.08, 4.08, 4.08, 90.0, 90.0, 90.0])
    }

    fn cands() -> Vec<ReflectionCandidate> {
        vec![
            ReflectionCandidate { hkl: [1.0, 1.0, 1.0], ring: 1 },
            ReflectionCandidate { hkl: [2.0, 0.0, 0.0], ring: 2 },
            ReflectionCandidate { hkl: [-1.0, 1.0, -1.0], ring: 1 },
        ]
    }

    #[test]
    fn test_roots_satisfy_diffraction_condition() {
        let g = [0.2, -0.35, 0.31];
        let theta = 4.2;
        let sols = solve_omega(g, theta);
        assert!(!sols.is_empty());
        let v = sind(theta) * norm3(g);
        for (_, sol) in sols.iter() {
            let lhs = -g[0] * cosd(sol.omega) + g[1] * sind(sol.omega);
            assert!((lhs - v).abs() < 1e-10, "omega={} lhs={lhs} v={v}", sol.omega);
        }
    }

    #[test]
    fn test_vector_along_beam_axis_has_no_solution() {
        // G parallel to z cannot satisfy the condition for θ > 0.
        let sols = solve_omega([0.0, 0.0, 0.4], 5.0);
        assert_eq!(sols.len(), 0);
    }

    #[test]
    fn test_small_gy_branch_gives_symmetric_pair() {
        let sols = solve_omega([0.3, 0.0, 0.1], 3.0);
        assert_eq!(sols.len(), 2);
        let a = sols.roots[0].unwrap().omega;
        let b = sols.roots[1].unwrap().omega;
        assert!((a + b).abs() < 1e-12);
    }

    #[test]
    fn test_predicted_spots_have_stable_slots() {
        let spots = predict_spots(&geometry(), [0.0; 3], &au_state([10.0, 20.0, 30.0]), &cands());
        assert!(!spots.is_empty());
        for s in &spots {
            assert!(s.slot < 6);
            assert_eq!(s.ring, if s.slot / 2 == 1 { 2 } else { 1 });
        }
    }

    #[test]
    fn test_inverse_mapping_recovers_crystal_vector() {
        let state = au_state([33.0, 61.0, 117.0]);
        let om = euler_to_orientation(state.euler);
        let vectors = scattering_vectors(&state.lattice, &cands(), geometry().wavelength);
        let spots = predict_spots(&geometry(), [0.0; 3], &state, &cands());
        for s in &spots {
            let gc = mat_vec(&om, vectors[s.slot / 2].g);
            let misorientation = angle_between(gc, s.g);
            assert!(misorientation < 1e-4, "slot {} off by {misorientation}°", s.slot);
            assert!((norm3(s.g) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_detector_ring_radius_matches_two_theta() {
        let state = au_state([5.0, 80.0, 200.0]);
        let vectors = scattering_vectors(&state.lattice, &cands(), geometry().wavelength);
        for s in predict_spots(&geometry(), [0.0; 3], &state, &cands()) {
            let radius = (s.y * s.y + s.z * s.z).sqrt();
            let expected = tand(2.0 * vectors[s.slot / 2].theta) * geometry().lsd;
            assert!((radius - expected).abs() < 1e-6 * expected);
        }
    }
}
