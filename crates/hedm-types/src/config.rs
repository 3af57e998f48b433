// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HedmError, HedmResult};

/// Instrument and scan description.
/// Maps 1:1 to the whitespace key-value parameter file; the JSON form uses
/// the same key names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanParams {
    /// Rotation step between frames (degrees, stored as absolute value).
    #[serde(rename = "OmegaStep")]
    pub omega_step: f64,
    /// Detector pixel size (µm).
    #[serde(rename = "px")]
    pub px: f64,
    /// Voxel edge length (µm).
    #[serde(rename = "VoxelLength")]
    pub voxel_len: f64,
    /// Beam intensity full width at half maximum (µm).
    #[serde(rename = "BeamFWHM")]
    pub beam_fwhm: f64,
    /// Rotation-angle tolerance when searching the catalog (degrees).
    #[serde(rename = "OmegaTol")]
    pub omega_tol: f64,
    /// Sample-to-detector distance (µm).
    #[serde(rename = "Lsd")]
    pub lsd: f64,
    /// X-ray wavelength (Å).
    #[serde(rename = "Wavelength")]
    pub wavelength: f64,
    /// Number of scan layers, i.e. beam positions.
    #[serde(rename = "nLayers")]
    pub n_layers: usize,
    /// Ring numbers kept for refinement.
    #[serde(rename = "RingThresh", default)]
    pub rings: Vec<i32>,
}

/// Refinement knobs that are not part of the instrument description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefineSettings {
    /// Central-difference step for the objective gradient.
    #[serde(default = "default_fd_step")]
    pub fd_step: f64,
    /// Half-width of the Euler-angle box constraint (degrees).
    #[serde(default = "default_euler_tol")]
    pub euler_tol_deg: f64,
    /// Half-width of the lattice-constant box constraint (percent).
    #[serde(default = "default_lattice_tol")]
    pub lattice_tol_pct: f64,
    /// Worker threads for the parallel evaluation phases.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Iteration cap handed to the bundled solver.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_fd_step() -> f64 {
    1e-5
}
fn default_euler_tol() -> f64 {
    2.0
}
fn default_lattice_tol() -> f64 {
    2.0
}
fn default_workers() -> usize {
    1
}
fn default_max_iterations() -> usize {
    100
}

impl Default for RefineSettings {
    fn default() -> Self {
        RefineSettings {
            fd_step: default_fd_step(),
            euler_tol_deg: default_euler_tol(),
            lattice_tol_pct: default_lattice_tol(),
            workers: default_workers(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl RefineSettings {
    pub fn validate(&self) -> HedmResult<()> {
        if !self.fd_step.is_finite() || self.fd_step <= 0.0 {
            return Err(HedmError::ConfigError(
                "fd_step must be finite and > 0".to_string(),
            ));
        }
        if !self.euler_tol_deg.is_finite() || self.euler_tol_deg < 0.0 {
            return Err(HedmError::ConfigError(
                "euler_tol_deg must be finite and >= 0".to_string(),
            ));
        }
        if !self.lattice_tol_pct.is_finite() || !(0.0..100.0).contains(&self.lattice_tol_pct) {
            return Err(HedmError::ConfigError(
                "lattice_tol_pct must be in [0, 100)".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(HedmError::ConfigError("workers must be >= 1".to_string()));
        }
        Ok(())
    }
}

impl ScanParams {
    /// Load from a `.json` file or a whitespace key-value parameter file.
    pub fn from_file(path: &str) -> HedmResult<Self> {
        let params = if path.ends_with(".json") {
            let contents = std::fs::read_to_string(path)?;
            let params: Self = serde_json::from_str(&contents)?;
            params
        } else {
            Self::from_param_file(path)?
        };
        params.validate()?;
        Ok(params)
    }

    /// Parse the key-value parameter file. Unknown keys are ignored, as are
    /// blank lines and `#` comments. `RingThresh` may repeat.
    pub fn from_param_file(path: impl AsRef<Path>) -> HedmResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::parse_param_text(&contents, &path.display().to_string())
    }

    pub fn parse_param_text(contents: &str, origin: &str) -> HedmResult<Self> {
        let mut omega_step = None;
        let mut px = None;
        let mut voxel_len = None;
        let mut beam_fwhm = None;
        let mut omega_tol = None;
        let mut lsd = None;
        let mut wavelength = None;
        let mut n_layers = None;
        let mut rings = Vec::new();

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            let value = tokens.next();
            let parse_f64 = |v: Option<&str>| -> HedmResult<f64> {
                v.and_then(|s| s.parse::<f64>().ok())
                    .ok_or_else(|| HedmError::Parse {
                        path: origin.to_string(),
                        line: idx + 1,
                        message: format!("expected a number after '{key}'"),
                    })
            };
            match key {
                "OmegaStep" => omega_step = Some(parse_f64(value)?.abs()),
                "px" => px = Some(parse_f64(value)?),
                "VoxelLength" => voxel_len = Some(parse_f64(value)?),
                "BeamFWHM" => beam_fwhm = Some(parse_f64(value)?),
                "OmegaTol" => omega_tol = Some(parse_f64(value)?),
                "Lsd" => lsd = Some(parse_f64(value)?),
                "Wavelength" => wavelength = Some(parse_f64(value)?),
                "nLayers" => n_layers = Some(parse_f64(value)? as usize),
                "RingThresh" => rings.push(parse_f64(value)? as i32),
                _ => {}
            }
        }

        let require = |name: &str, v: Option<f64>| -> HedmResult<f64> {
            v.ok_or_else(|| HedmError::ConfigError(format!("{origin}: missing key '{name}'")))
        };

        Ok(ScanParams {
            omega_step: require("OmegaStep", omega_step)?,
            px: require("px", px)?,
            voxel_len: require("VoxelLength", voxel_len)?,
            beam_fwhm: require("BeamFWHM", beam_fwhm)?,
            omega_tol: require("OmegaTol", omega_tol)?,
            lsd: require("Lsd", lsd)?,
            wavelength: require("Wavelength", wavelength)?,
            n_layers: n_layers
                .ok_or_else(|| HedmError::ConfigError(format!("{origin}: missing key 'nLayers'")))?,
            rings,
        })
    }

    pub fn validate(&self) -> HedmResult<()> {
        let positive = [
            ("OmegaStep", self.omega_step),
            ("px", self.px),
            ("VoxelLength", self.voxel_len),
            ("BeamFWHM", self.beam_fwhm),
            ("OmegaTol", self.omega_tol),
            ("Lsd", self.lsd),
            ("Wavelength", self.wavelength),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(HedmError::ConfigError(format!(
                    "{name} must be finite and > 0, got {value}"
                )));
            }
        }
        if self.n_layers == 0 {
            return Err(HedmError::ConfigError("nLayers must be >= 1".to_string()));
        }
        if self.rings.is_empty() {
            return Err(HedmError::ConfigError(
                "at least one RingThresh entry is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Occurrence capacity per candidate slot, from beam and voxel geometry.
    pub fn max_occurrences(&self) -> usize {
        2 * (2 + (2.0 * self.beam_fwhm / self.voxel_len).ceil() as usize)
    }

    /// Normalization of the two detector axes in the residual.
    pub fn position_scale(&self) -> f64 {
        0.1 * self.px
    }

    pub fn has_ring(&self, ring: i32) -> bool {
        self.rings.contains(&ring)
    }
}
