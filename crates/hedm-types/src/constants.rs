// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Degrees → radians.
pub const DEG2RAD: f64 = std::f64::consts::PI / 180.0;

/// Radians → degrees.
pub const RAD2DEG: f64 = 180.0 / std::f64::consts::PI;

/// Tolerance used to detect degenerate orientation matrices.
pub const ORIENTATION_EPS: f64 = 1e-10;

/// Parameters per voxel in the flattened vector: 3 Euler angles + 6 lattice constants.
pub const PARAMS_PER_VOXEL: usize = 9;

/// Rotation-angle roots per reflection candidate.
pub const ROOTS_PER_CANDIDATE: usize = 2;

/// Numeric fields per observed-catalog record.
pub const CATALOG_FIELDS: usize = 14;

/// Catalog field holding the detector y coordinate.
pub const CATALOG_Y: usize = 0;

/// Catalog field holding the detector z coordinate.
pub const CATALOG_Z: usize = 1;

/// Catalog field holding the rotation angle ω (degrees).
pub const CATALOG_OMEGA: usize = 2;

/// Catalog field holding the scattering angle 2θ (degrees).
pub const CATALOG_TWO_THETA: usize = 7;

/// Largest scattering-vector misorientation (degrees) accepted as a match.
pub const MATCH_ANGLE_THRESHOLD_DEG: f64 = 1.0;

/// Integration samples across the beam/footprint intersection.
pub const ILLUMINATION_SAMPLES: usize = 200;

/// Beam positions are given in mm; everything else runs in µm.
pub const MM_TO_UM: f64 = 1000.0;
