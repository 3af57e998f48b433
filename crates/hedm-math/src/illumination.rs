// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Beam Illumination
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Fraction of a square voxel lit by a Gaussian beam.
//!
//! The voxel footprint is projected onto the scan axis for the current
//! rotation angle, clipped to the beam's ±FWHM extent, and the beam intensity
//! (peak normalized to 1) times the chord length of the rotated square is
//! integrated across that interval. Dividing by the voxel area gives a
//! fraction in [0, 1] that reaches 1 only for a wide, centered beam.

use hedm_types::constants::ILLUMINATION_SAMPLES;

use crate::trig::{cosd, sind};

/// |sin| or |cos| below this counts as grid-aligned (≈ 1e-5°).
const AXIS_ALIGNED_EPS: f64 = 1.75e-7;

/// Corner offsets of a unit square around its center.
const CORNERS: [(f64, f64); 4] = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];

/// Gaussian beam along the scan axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamProfile {
    /// Beam center along the scan axis (µm).
    pub center: f64,
    /// Full width at half maximum (µm).
    pub fwhm: f64,
}

impl BeamProfile {
    pub fn new(center: f64, fwhm: f64) -> Self {
        BeamProfile { center, fwhm }
    }

    pub fn sigma(&self) -> f64 {
        self.fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt())
    }

    /// Relative intensity at `y` (1 at the center).
    pub fn intensity(&self, y: f64) -> f64 {
        let sigma = self.sigma();
        let d = y - self.center;
        (-(d * d) / (2.0 * sigma * sigma)).exp()
    }
}

/// Chord length of a square with edge `voxel_len` rotated by `omega`
/// (degrees), at offset `t` from the lower edge of its projection of width
/// `width`.
fn chord_length(voxel_len: f64, omega: f64, t: f64, width: f64) -> f64 {
    let s = sind(omega).abs();
    let c = cosd(omega).abs();
    let (lo, hi) = if s < c { (s, c) } else { (c, s) };
    if lo < AXIS_ALIGNED_EPS {
        return voxel_len;
    }
    let ramp = voxel_len * lo;
    let plateau = voxel_len / hi;
    let u = t.min(width - t).max(0.0);
    if u < ramp {
        u / (s * c)
    } else {
        plateau
    }
}

/// Illuminated fraction of the voxel centered at `voxel_xy` for a beam at
/// `beam_center` with width `beam_fwhm`, at rotation angle `omega` (degrees).
///
/// Returns exactly 0 when the beam's ±FWHM extent misses the footprint.
pub fn illumination_fraction(
    voxel_len: f64,
    beam_center: f64,
    beam_fwhm: f64,
    voxel_xy: [f64; 2],
    omega: f64,
) -> f64 {
    let beam = BeamProfile::new(beam_center, beam_fwhm);
    let (sin_o, cos_o) = (sind(omega), cosd(omega));

    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for (dx, dy) in CORNERS {
        let x = voxel_xy[0] + dx * voxel_len;
        let y = voxel_xy[1] + dy * voxel_len;
        let proj = x * sin_o + y * cos_o;
        min_y = min_y.min(proj);
        max_y = max_y.max(proj);
    }

    let start = min_y.max(beam.center - beam.fwhm);
    let end = max_y.min(beam.center + beam.fwhm);
    if !(end > start) {
        return 0.0;
    }

    let width = max_y - min_y;
    let step = (end - start) / ILLUMINATION_SAMPLES as f64;
    let mut lit = 0.0;
    for i in 0..ILLUMINATION_SAMPLES {
        let y = start + (i as f64 + 0.5) * step;
        lit += beam.intensity(y) * chord_length(voxel_len, omega, y - min_y, width) * step;
    }

    (lit / (voxel_len * voxel_len)).clamp(0.0, 1.0)
}
