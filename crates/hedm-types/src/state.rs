// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::constants::{PARAMS_PER_VOXEL, ROOTS_PER_CANDIDATE};
use crate::error::{HedmError, HedmResult};

/// Orientation and lattice of one voxel.
/// Euler angles in degrees (ψ, φ, θ); lattice as a, b, c (Å) and α, β, γ (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrystalState {
    pub euler: [f64; 3],
    pub lattice: [f64; 6],
}

impl CrystalState {
    pub fn new(euler: [f64; 3], lattice: [f64; 6]) -> Self {
        CrystalState { euler, lattice }
    }

    /// Read 9 consecutive parameters `[ψ, φ, θ, a, b, c, α, β, γ]`.
    pub fn from_params(params: &[f64]) -> HedmResult<Self> {
        if params.len() != PARAMS_PER_VOXEL {
            return Err(HedmError::DimensionMismatch {
                expected: PARAMS_PER_VOXEL,
                got: params.len(),
                context: "crystal state parameters".to_string(),
            });
        }
        let mut euler = [0.0; 3];
        let mut lattice = [0.0; 6];
        euler.copy_from_slice(&params[..3]);
        lattice.copy_from_slice(&params[3..]);
        Ok(CrystalState { euler, lattice })
    }

    pub fn to_params(&self) -> [f64; PARAMS_PER_VOXEL] {
        let mut out = [0.0; PARAMS_PER_VOXEL];
        out[..3].copy_from_slice(&self.euler);
        out[3..].copy_from_slice(&self.lattice);
        out
    }

    /// Copy of this state with parameter `idx` shifted by `delta`.
    pub fn perturbed(&self, idx: usize, delta: f64) -> Self {
        let mut params = self.to_params();
        if let Some(p) = params.get_mut(idx) {
            *p += delta;
        }
        let mut euler = [0.0; 3];
        let mut lattice = [0.0; 6];
        euler.copy_from_slice(&params[..3]);
        lattice.copy_from_slice(&params[3..]);
        CrystalState { euler, lattice }
    }
}

/// Flatten per-voxel states into the optimizer's parameter vector.
pub fn pack_states(states: &[CrystalState]) -> Vec<f64> {
    states.iter().flat_map(|s| s.to_params()).collect()
}

/// Split the optimizer's parameter vector back into per-voxel states.
pub fn unpack_states(params: &[f64]) -> HedmResult<Vec<CrystalState>> {
    if params.len() % PARAMS_PER_VOXEL != 0 {
        return Err(HedmError::DimensionMismatch {
            expected: (params.len() / PARAMS_PER_VOXEL + 1) * PARAMS_PER_VOXEL,
            got: params.len(),
            context: "flattened parameter vector".to_string(),
        });
    }
    params
        .chunks_exact(PARAMS_PER_VOXEL)
        .map(CrystalState::from_params)
        .collect()
}

/// Fixed grid position of a voxel (µm); the sample plane is z = 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Voxel {
    pub x: f64,
    pub y: f64,
}

impl Voxel {
    pub fn new(x: f64, y: f64) -> Self {
        Voxel { x, y }
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, 0.0]
    }
}

/// Plane family: Miller indices plus detector ring number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectionCandidate {
    pub hkl: [f64; 3],
    pub ring: i32,
}

/// Slot key of a predicted spot within one voxel.
pub fn candidate_slot(candidate: usize, root: usize) -> usize {
    candidate * ROOTS_PER_CANDIDATE + root
}

/// One predicted diffraction spot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedSpot {
    /// `2 * candidate + root`.
    pub slot: usize,
    pub ring: i32,
    /// Detector coordinates (µm).
    pub y: f64,
    pub z: f64,
    /// Rotation angle (degrees).
    pub omega: f64,
    /// Azimuth of the detector position (degrees).
    pub eta: f64,
    /// Scattering vector re-derived from the detector position.
    pub g: [f64; 3],
}
