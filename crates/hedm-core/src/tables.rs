// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Forward Cache & Match Table
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-voxel bookkeeping keyed by (slot, occurrence).
//!
//! Each voxel owns a [`VoxelBook`]: an `n_slots × max_occurrences` forward
//! cache and the matching catalog rows. Occurrences of a slot are filled
//! front to back, so the first empty occurrence ends the slot.

use hedm_types::constants::ROOTS_PER_CANDIDATE;
use ndarray::{s, Array2};

use crate::accumulator::Contribution;

/// Dimensions fixed once population has sized the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub n_voxels: usize,
    pub n_slots: usize,
    pub max_occurrences: usize,
}

impl TableLayout {
    pub fn new(n_voxels: usize, n_candidates: usize, max_occurrences: usize) -> Self {
        TableLayout {
            n_voxels,
            n_slots: n_candidates * ROOTS_PER_CANDIDATE,
            max_occurrences,
        }
    }

    pub fn entries_per_voxel(&self) -> usize {
        self.n_slots * self.max_occurrences
    }

    pub fn len(&self) -> usize {
        self.n_voxels * self.entries_per_voxel()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major position of `(voxel, slot, occurrence)` in the debug tables.
    pub fn index(&self, voxel: usize, slot: usize, occurrence: usize) -> usize {
        (voxel * self.n_slots + slot) * self.max_occurrences + occurrence
    }
}

/// Cached forward values of one matched occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForwardEntry {
    pub y: f64,
    pub z: f64,
    pub omega: f64,
    pub fraction: f64,
    pub beam: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardField {
    Y,
    Z,
    Omega,
    Fraction,
    Beam,
}

impl ForwardEntry {
    pub fn contribution(&self) -> Contribution {
        Contribution {
            y: self.y,
            z: self.z,
            omega: self.omega,
            fraction: self.fraction,
        }
    }

    pub fn field(&self, field: ForwardField) -> f64 {
        match field {
            ForwardField::Y => self.y,
            ForwardField::Z => self.z,
            ForwardField::Omega => self.omega,
            ForwardField::Fraction => self.fraction,
            ForwardField::Beam => self.beam as f64,
        }
    }
}

/// Forward cache and match table of one voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelBook {
    forward: Array2<ForwardEntry>,
    matches: Array2<Option<usize>>,
}

impl VoxelBook {
    pub fn new(n_slots: usize, max_occurrences: usize) -> Self {
        VoxelBook {
            forward: Array2::from_elem((n_slots, max_occurrences), ForwardEntry::default()),
            matches: Array2::from_elem((n_slots, max_occurrences), None),
        }
    }

    pub fn n_slots(&self) -> usize {
        self.matches.nrows()
    }

    pub fn capacity(&self) -> usize {
        self.matches.ncols()
    }

    pub fn matched_row(&self, slot: usize, occurrence: usize) -> Option<usize> {
        self.matches
            .get((slot, occurrence))
            .copied()
            .flatten()
    }

    pub fn entry(&self, slot: usize, occurrence: usize) -> Option<&ForwardEntry> {
        self.forward.get((slot, occurrence))
    }

    pub fn entry_mut(&mut self, slot: usize, occurrence: usize) -> Option<&mut ForwardEntry> {
        self.forward.get_mut((slot, occurrence))
    }

    /// Number of filled occurrences of `slot`.
    pub fn occurrences(&self, slot: usize) -> usize {
        if slot >= self.n_slots() {
            return 0;
        }
        self.matches
            .row(slot)
            .iter()
            .take_while(|m| m.is_some())
            .count()
    }

    /// Record a match in the next free occurrence of `slot`. Returns the
    /// occurrence used, or `None` when the slot is full.
    pub fn push_match(&mut self, slot: usize, row: usize, entry: ForwardEntry) -> Option<usize> {
        let occurrence = self.occurrences(slot);
        if slot >= self.n_slots() || occurrence >= self.capacity() {
            return None;
        }
        self.matches[[slot, occurrence]] = Some(row);
        self.forward[[slot, occurrence]] = entry;
        Some(occurrence)
    }

    /// `(slot, occurrence, row, entry)` for every filled occurrence, slot-major.
    pub fn matched(&self) -> impl Iterator<Item = (usize, usize, usize, ForwardEntry)> + '_ {
        self.matches
            .indexed_iter()
            .filter_map(move |((slot, occ), m)| {
                m.map(|row| (slot, occ, row, self.forward[[slot, occ]]))
            })
    }

    pub fn match_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_some()).count()
    }

    /// Same contents with room for `max_occurrences` per slot.
    fn widened(&self, max_occurrences: usize) -> Self {
        let mut out = VoxelBook::new(self.n_slots(), max_occurrences);
        let keep = self.capacity().min(max_occurrences);
        out.forward
            .slice_mut(s![.., ..keep])
            .assign(&self.forward.slice(s![.., ..keep]));
        out.matches
            .slice_mut(s![.., ..keep])
            .assign(&self.matches.slice(s![.., ..keep]));
        out
    }
}

/// Forward cache and match table for every voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotTables {
    layout: TableLayout,
    books: Vec<VoxelBook>,
}

impl SpotTables {
    pub fn new(layout: TableLayout) -> Self {
        let books = (0..layout.n_voxels)
            .map(|_| VoxelBook::new(layout.n_slots, layout.max_occurrences))
            .collect();
        SpotTables { layout, books }
    }

    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    pub fn book(&self, voxel: usize) -> Option<&VoxelBook> {
        self.books.get(voxel)
    }

    pub fn book_mut(&mut self, voxel: usize) -> Option<&mut VoxelBook> {
        self.books.get_mut(voxel)
    }

    pub fn books(&self) -> &[VoxelBook] {
        &self.books
    }

    pub fn books_mut(&mut self) -> &mut [VoxelBook] {
        &mut self.books
    }

    /// One forward-cache field of `(voxel, slot, occurrence)`.
    pub fn at(
        &self,
        voxel: usize,
        slot: usize,
        occurrence: usize,
        field: ForwardField,
    ) -> Option<f64> {
        self.books
            .get(voxel)?
            .entry(slot, occurrence)
            .map(|e| e.field(field))
    }

    pub fn matched_row(&self, voxel: usize, slot: usize, occurrence: usize) -> Option<usize> {
        self.books.get(voxel)?.matched_row(slot, occurrence)
    }

    /// Grow every voxel to `max_occurrences` per slot; never shrinks.
    pub fn grow_occurrences(&mut self, max_occurrences: usize) {
        if max_occurrences <= self.layout.max_occurrences {
            return;
        }
        for book in &mut self.books {
            *book = book.widened(max_occurrences);
        }
        self.layout.max_occurrences = max_occurrences;
    }

    pub fn match_count(&self) -> usize {
        self.books.iter().map(VoxelBook::match_count).sum()
    }
}
