// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Observed Spot Catalog
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Read-only observed-spot catalog and the (beam position, ring) row index.
//!
//! The catalog is a flat array of native-endian `f64` records with
//! [`CATALOG_FIELDS`] fields each. It is loaded once and shared between
//! workers through an `Arc<[f64]>`.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use hedm_types::constants::{
    CATALOG_FIELDS, CATALOG_OMEGA, CATALOG_TWO_THETA, CATALOG_Y, CATALOG_Z,
};
use hedm_types::error::{HedmError, HedmResult};
use rustc_hash::FxHashMap;

const RECORD_BYTES: usize = CATALOG_FIELDS * std::mem::size_of::<f64>();

/// The fields of one catalog row this crate interprets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedSpot {
    pub y: f64,
    pub z: f64,
    pub omega: f64,
    pub two_theta: f64,
}

#[derive(Debug, Clone)]
pub struct ObservedCatalog {
    data: Arc<[f64]>,
}

impl ObservedCatalog {
    /// Catalog from flat values; the length must be a whole number of records.
    pub fn from_values(values: Vec<f64>) -> HedmResult<Self> {
        if values.len() % CATALOG_FIELDS != 0 {
            return Err(HedmError::Catalog(format!(
                "{} values is not a multiple of the {CATALOG_FIELDS}-field record size",
                values.len()
            )));
        }
        Ok(ObservedCatalog {
            data: Arc::from(values),
        })
    }

    /// Catalog from raw native-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> HedmResult<Self> {
        if bytes.len() % RECORD_BYTES != 0 {
            return Err(HedmError::Catalog(format!(
                "{} bytes is not a multiple of the {RECORD_BYTES}-byte record size",
                bytes.len()
            )));
        }
        Self::from_values(bytemuck::pod_collect_to_vec::<u8, f64>(bytes))
    }

    pub fn load(path: impl AsRef<Path>) -> HedmResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            HedmError::Catalog(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        let catalog = Self::from_bytes(&bytes)?;
        log::info!(
            "loaded {} observed spots from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.data.len() / CATALOG_FIELDS
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All fields of row `row` (0-based).
    pub fn record(&self, row: usize) -> Option<&[f64]> {
        let start = row.checked_mul(CATALOG_FIELDS)?;
        self.data.get(start..start + CATALOG_FIELDS)
    }

    pub fn spot(&self, row: usize) -> Option<ObservedSpot> {
        self.record(row).map(|r| ObservedSpot {
            y: r[CATALOG_Y],
            z: r[CATALOG_Z],
            omega: r[CATALOG_OMEGA],
            two_theta: r[CATALOG_TWO_THETA],
        })
    }
}

/// One line of the ring-position index file, as written on disk:
/// 1-based beam position, ring, 1-based inclusive row bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingRecord {
    pub position: i64,
    pub ring: i32,
    pub start: i64,
    pub end: i64,
}

/// Contiguous catalog row range per (beam position, ring).
#[derive(Debug, Clone, Default)]
pub struct RingIndex {
    ranges: FxHashMap<(usize, i32), Range<usize>>,
}

impl RingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register 0-based `rows` for 0-based `position` and `ring`.
    pub fn insert(&mut self, position: usize, ring: i32, rows: Range<usize>) {
        self.ranges.insert((position, ring), rows);
    }

    /// Build from on-disk records. Position 0 is skipped; bounds must lie
    /// within a catalog of `n_rows` rows.
    pub fn from_records(records: &[RingRecord], n_rows: usize) -> HedmResult<Self> {
        let mut index = RingIndex::new();
        for rec in records {
            if rec.position == 0 {
                continue;
            }
            if rec.position < 0 {
                return Err(HedmError::Catalog(format!(
                    "ring index position must be >= 0, got {}",
                    rec.position
                )));
            }
            if rec.start > rec.end {
                index.insert(rec.position as usize - 1, rec.ring, 0..0);
                continue;
            }
            if rec.start < 1 || rec.end as u64 > n_rows as u64 {
                return Err(HedmError::Catalog(format!(
                    "rows {}..={} for position {} ring {} outside catalog of {n_rows} rows",
                    rec.start, rec.end, rec.position, rec.ring
                )));
            }
            index.insert(
                rec.position as usize - 1,
                rec.ring,
                (rec.start as usize - 1)..(rec.end as usize),
            );
        }
        Ok(index)
    }

    /// Rows to search; empty when the pair was never indexed.
    pub fn rows(&self, position: usize, ring: i32) -> Range<usize> {
        self.ranges.get(&(position, ring)).cloned().unwrap_or(0..0)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
