// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Refinement Problem
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Immutable inputs shared by population, update and evaluation.

use hedm_math::diffraction::DetectorGeometry;
use hedm_math::illumination::illumination_fraction;
use hedm_types::config::ScanParams;
use hedm_types::error::{HedmError, HedmResult};
use hedm_types::state::{ReflectionCandidate, Voxel};

use crate::catalog::{ObservedCatalog, RingIndex};

#[derive(Debug, Clone)]
pub struct RefinementProblem {
    pub params: ScanParams,
    pub geometry: DetectorGeometry,
    pub voxels: Vec<Voxel>,
    /// Beam centers along the scan axis (µm).
    pub beam_positions: Vec<f64>,
    pub candidates: Vec<ReflectionCandidate>,
    pub catalog: ObservedCatalog,
    pub ring_index: RingIndex,
}

impl RefinementProblem {
    pub fn new(
        params: ScanParams,
        voxels: Vec<Voxel>,
        beam_positions: Vec<f64>,
        candidates: Vec<ReflectionCandidate>,
        catalog: ObservedCatalog,
        ring_index: RingIndex,
    ) -> HedmResult<Self> {
        params.validate()?;
        if voxels.is_empty() {
            return Err(HedmError::ConfigError("voxel list is empty".to_string()));
        }
        if candidates.is_empty() {
            return Err(HedmError::ConfigError(
                "no reflection candidates on the configured rings".to_string(),
            ));
        }
        if beam_positions.is_empty() {
            return Err(HedmError::ConfigError(
                "no beam positions were read".to_string(),
            ));
        }
        if beam_positions.len() != params.n_layers {
            log::warn!(
                "{} beam positions for nLayers = {}",
                beam_positions.len(),
                params.n_layers
            );
        }
        if catalog.is_empty() {
            log::warn!("observed catalog is empty; nothing can match");
        }
        let geometry = DetectorGeometry {
            lsd: params.lsd,
            wavelength: params.wavelength,
        };
        Ok(RefinementProblem {
            params,
            geometry,
            voxels,
            beam_positions,
            candidates,
            catalog,
            ring_index,
        })
    }

    pub fn n_voxels(&self) -> usize {
        self.voxels.len()
    }

    pub fn n_params(&self) -> usize {
        self.voxels.len() * hedm_types::constants::PARAMS_PER_VOXEL
    }

    /// Illuminated fraction of `voxel` under beam `beam` at rotation `omega`.
    /// Unknown indices are dark.
    pub fn fraction(&self, voxel: usize, beam: usize, omega: f64) -> f64 {
        match (self.voxels.get(voxel), self.beam_positions.get(beam)) {
            (Some(v), Some(&center)) => illumination_fraction(
                self.params.voxel_len,
                center,
                self.params.beam_fwhm,
                [v.x, v.y],
                omega,
            ),
            _ => 0.0,
        }
    }
}
