// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Input Readers & Output Writers
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Text inputs of a scan (beam positions, reflection candidates, voxel grid,
//! ring index, grain table) and the debug and result tables.
//!
//! Malformed numbers are reported with file and line instead of being read
//! as zero.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use hedm_math::orientation::{orientation_to_euler, Mat3};
use hedm_types::config::ScanParams;
use hedm_types::constants::{MM_TO_UM, PARAMS_PER_VOXEL};
use hedm_types::error::{HedmError, HedmResult};
use hedm_types::state::{CrystalState, ReflectionCandidate, Voxel};

use crate::accumulator::{FilteredCatalog, SpotAccumulator};
use crate::catalog::{RingIndex, RingRecord};
use crate::tables::SpotTables;

pub const FORWARD_TABLE: &str = "fthis.csv";
pub const MATCH_TABLE: &str = "flut.csv";
pub const SPOT_TABLE: &str = "fspotInfo.csv";
pub const FILTERED_TABLE: &str = "filtered.csv";

/// Grain-table columns holding the row-major orientation matrix.
const GRAIN_MATRIX_COLUMNS: std::ops::RangeInclusive<usize> = 1..=9;
/// Grain-table columns holding a, b, c, α, β, γ.
const GRAIN_LATTICE_COLUMNS: std::ops::RangeInclusive<usize> = 13..=18;

struct Source<'a> {
    path: &'a str,
}

impl Source<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> HedmError {
        HedmError::Parse {
            path: self.path.to_string(),
            line,
            message: message.into(),
        }
    }

    fn field<T: FromStr>(&self, token: Option<&str>, line: usize, what: &str) -> HedmResult<T> {
        let token = token.ok_or_else(|| self.error(line, format!("missing {what}")))?;
        token
            .trim()
            .parse::<T>()
            .map_err(|_| self.error(line, format!("cannot read {what} from '{token}'")))
    }
}

fn read_text(path: &Path) -> HedmResult<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Numbered (1-based) lines after the header that carry content.
fn data_lines(contents: &str, skip_header: bool) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .skip(usize::from(skip_header))
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

/// Beam centers (µm) from a header line and `n_layers` values in mm.
pub fn read_beam_positions(path: impl AsRef<Path>, n_layers: usize) -> HedmResult<Vec<f64>> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let src = Source { path: &name };
    let contents = read_text(path)?;

    let mut out = Vec::with_capacity(n_layers);
    let mut last_line = 1;
    for (line, text) in data_lines(&contents, true).take(n_layers) {
        let value: f64 = src.field(text.split_whitespace().next(), line, "beam position")?;
        out.push(value * MM_TO_UM);
        last_line = line;
    }
    if out.len() < n_layers {
        return Err(src.error(
            last_line,
            format!("expected {n_layers} beam positions, found {}", out.len()),
        ));
    }
    log::info!("read {} beam positions from {name}", out.len());
    Ok(out)
}

/// `h k l <label> ring` rows whose ring is configured, in file order.
pub fn read_candidates(
    path: impl AsRef<Path>,
    params: &ScanParams,
) -> HedmResult<Vec<ReflectionCandidate>> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let src = Source { path: &name };
    let contents = read_text(path)?;

    let mut out = Vec::new();
    for (line, text) in data_lines(&contents, true) {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let h: f64 = src.field(tokens.first().copied(), line, "h")?;
        let k: f64 = src.field(tokens.get(1).copied(), line, "k")?;
        let l: f64 = src.field(tokens.get(2).copied(), line, "l")?;
        let ring: f64 = src.field(tokens.get(4).copied(), line, "ring number")?;
        let ring = ring as i32;
        if params.has_ring(ring) {
            out.push(ReflectionCandidate {
                hkl: [h, k, l],
                ring,
            });
        }
    }
    log::info!(
        "read {} reflection candidates on rings {:?} from {name}",
        out.len(),
        params.rings
    );
    Ok(out)
}

/// One `x,y` voxel center (µm) per line.
pub fn read_voxels(path: impl AsRef<Path>) -> HedmResult<Vec<Voxel>> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let src = Source { path: &name };
    let contents = read_text(path)?;

    let mut out = Vec::new();
    for (line, text) in data_lines(&contents, false) {
        let mut parts = text.split(',');
        let x: f64 = src.field(parts.next(), line, "voxel x")?;
        let y: f64 = src.field(parts.next(), line, "voxel y")?;
        out.push(Voxel::new(x, y));
    }
    log::info!("read {} voxels from {name}", out.len());
    Ok(out)
}

/// `position ring start end` rows after a header line.
pub fn read_ring_records(path: impl AsRef<Path>) -> HedmResult<Vec<RingRecord>> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let src = Source { path: &name };
    let contents = read_text(path)?;

    data_lines(&contents, true)
        .map(|(line, text)| -> HedmResult<RingRecord> {
            let mut tokens = text.split_whitespace();
            Ok(RingRecord {
                position: src.field(tokens.next(), line, "beam position number")?,
                ring: src.field(tokens.next(), line, "ring number")?,
                start: src.field(tokens.next(), line, "start row")?,
                end: src.field(tokens.next(), line, "end row")?,
            })
        })
        .collect()
}

/// Ring index checked against a catalog of `n_rows` rows.
pub fn read_ring_index(path: impl AsRef<Path>, n_rows: usize) -> HedmResult<RingIndex> {
    let records = read_ring_records(path)?;
    let index = RingIndex::from_records(&records, n_rows)?;
    log::info!("ring index covers {} (position, ring) groups", index.len());
    Ok(index)
}

/// Starting state from the `grain_nr`-th (1-based) data row of a grain
/// table; lines starting with `%` are headers.
pub fn read_grain(path: impl AsRef<Path>, grain_nr: usize) -> HedmResult<CrystalState> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let src = Source { path: &name };
    if grain_nr == 0 {
        return Err(HedmError::ConfigError(
            "grain numbers start at 1".to_string(),
        ));
    }
    let contents = read_text(path)?;

    let mut rows = data_lines(&contents, false).filter(|(_, text)| !text.starts_with('%'));
    let (line, text) = rows.nth(grain_nr - 1).ok_or_else(|| {
        src.error(
            contents.lines().count(),
            format!("grain {grain_nr} not found"),
        )
    })?;
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let mut om: Mat3 = [[0.0; 3]; 3];
    for (k, col) in GRAIN_MATRIX_COLUMNS.enumerate() {
        om[k / 3][k % 3] = src.field(tokens.get(col).copied(), line, "orientation matrix entry")?;
    }
    let mut lattice = [0.0; 6];
    for (k, col) in GRAIN_LATTICE_COLUMNS.enumerate() {
        lattice[k] = src.field(tokens.get(col).copied(), line, "lattice parameter")?;
    }
    let state = CrystalState::new(orientation_to_euler(&om), lattice);
    log::info!(
        "grain {grain_nr}: euler {:?}, lattice {:?}",
        state.euler,
        state.lattice
    );
    Ok(state)
}

fn create(path: &Path) -> HedmResult<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Forward cache, match table, accumulator and filtered catalog, one line
/// per entry in `(voxel, slot, occurrence)` and row order.
pub fn write_debug_tables(
    dir: impl AsRef<Path>,
    tables: &SpotTables,
    accumulator: &SpotAccumulator,
    filtered: &FilteredCatalog,
) -> HedmResult<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let layout = tables.layout();

    let mut forward = create(&dir.join(FORWARD_TABLE))?;
    let mut matches = create(&dir.join(MATCH_TABLE))?;
    for book in tables.books() {
        for slot in 0..layout.n_slots {
            for occ in 0..layout.max_occurrences {
                let e = book.entry(slot, occ).copied().unwrap_or_default();
                writeln!(
                    forward,
                    "{:.6} {:.6} {:.6} {:.6} {:.6}",
                    e.y, e.z, e.omega, e.fraction, e.beam as f64
                )?;
                match book.matched_row(slot, occ) {
                    Some(row) => writeln!(matches, "{row}")?,
                    None => writeln!(matches, "-1")?,
                }
            }
        }
    }
    forward.flush()?;
    matches.flush()?;

    let mut spots = create(&dir.join(SPOT_TABLE))?;
    let mut targets = create(&dir.join(FILTERED_TABLE))?;
    for (row, r) in accumulator.snapshot().iter().enumerate() {
        writeln!(
            spots,
            "{:.6} {:.6} {:.6} {:.6}",
            r.y, r.z, r.omega, r.fraction
        )?;
        let (y, z, omega) = filtered
            .target(row)
            .map_or((0.0, 0.0, 0.0), |t| (t.y, t.z, t.omega));
        writeln!(targets, "{y:.6} {z:.6} {omega:.6}")?;
    }
    spots.flush()?;
    targets.flush()?;
    log::info!(
        "wrote debug tables for {} voxels and {} catalog rows to {}",
        layout.n_voxels,
        accumulator.len(),
        dir.display()
    );
    Ok(())
}

/// `x y ψ φ θ a b c α β γ`, one line per voxel.
pub fn write_refined(path: impl AsRef<Path>, voxels: &[Voxel], x: &[f64]) -> HedmResult<()> {
    if x.len() != voxels.len() * PARAMS_PER_VOXEL {
        return Err(HedmError::DimensionMismatch {
            expected: voxels.len() * PARAMS_PER_VOXEL,
            got: x.len(),
            context: "refined parameter vector".to_string(),
        });
    }
    let path = path.as_ref();
    let mut out = create(path)?;
    for (voxel, params) in voxels.iter().zip(x.chunks_exact(PARAMS_PER_VOXEL)) {
        write!(out, "{:.6} {:.6}", voxel.x, voxel.y)?;
        for p in params {
            write!(out, " {p:.6}")?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    log::info!("wrote {} refined voxels to {}", voxels.len(), path.display());
    Ok(())
}
