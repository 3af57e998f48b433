// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Spot Accumulator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Fraction-weighted running means per observed catalog row.
//!
//! Every matched occurrence contributes `(y, z, ω)` weighted by its
//! illumination fraction. Rows are guarded individually so voxels that
//! touch different rows never contend.

use hedm_math::trig::{azimuth, norm3, sind};
use parking_lot::Mutex;

/// Totals at or below this carry no mean and drop out of the residual.
pub const FRACTION_EPS: f64 = 1e-12;

/// Floor on |sin η| in the rotation-angle scale.
const MIN_SIN_ETA: f64 = 1e-3;

/// One occurrence's share of a row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Contribution {
    pub y: f64,
    pub z: f64,
    pub omega: f64,
    pub fraction: f64,
}

/// Running mean `(y, z, ω)` and total fraction of one observed row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccumRow {
    pub y: f64,
    pub z: f64,
    pub omega: f64,
    pub fraction: f64,
}

impl AccumRow {
    pub fn is_active(&self) -> bool {
        self.fraction > FRACTION_EPS
    }

    /// A row with the given total and zeroed means.
    fn empty(fraction: f64) -> AccumRow {
        AccumRow {
            fraction,
            ..AccumRow::default()
        }
    }

    /// The row after swapping `old` for `new`. The total always tracks the
    /// contributors; the means are zeroed once it drops to [`FRACTION_EPS`].
    pub fn replaced(&self, old: &Contribution, new: &Contribution) -> AccumRow {
        let total = self.fraction - old.fraction + new.fraction;
        if total <= FRACTION_EPS {
            return AccumRow::empty(total);
        }
        let mean = |current: f64, o: f64, n: f64| {
            (current * self.fraction - o * old.fraction + n * new.fraction) / total
        };
        AccumRow {
            y: mean(self.y, old.y, new.y),
            z: mean(self.z, old.z, new.z),
            omega: mean(self.omega, old.omega, new.omega),
            fraction: total,
        }
    }
}

/// Observed position a row is pulled toward, with its rotation-angle scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedTarget {
    pub y: f64,
    pub z: f64,
    pub omega: f64,
    pub omega_scale: f64,
}

impl ObservedTarget {
    /// The ω scale is taken from this observed spot's azimuth, not from the
    /// row's running mean, with |sin η| floored at `MIN_SIN_ETA`.
    pub fn new(y: f64, z: f64, omega: f64, omega_step: f64) -> Self {
        let sin_eta = sind(azimuth(y, z)).abs().max(MIN_SIN_ETA);
        ObservedTarget {
            y,
            z,
            omega,
            omega_scale: 0.5 * omega_step * (1.0 + 1.0 / sin_eta),
        }
    }
}

/// Observed targets for rows that received at least one match.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredCatalog {
    targets: Vec<Option<ObservedTarget>>,
}

impl FilteredCatalog {
    pub fn new(n_rows: usize) -> Self {
        FilteredCatalog {
            targets: vec![None; n_rows],
        }
    }

    /// Keep the first target recorded for `row`.
    pub fn record_first(&mut self, row: usize, target: ObservedTarget) {
        if let Some(slot) = self.targets.get_mut(row) {
            if slot.is_none() {
                *slot = Some(target);
            }
        }
    }

    pub fn target(&self, row: usize) -> Option<&ObservedTarget> {
        self.targets.get(row).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn matched_rows(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }
}

/// Normalized distance between a row's mean and its target; 0 for rows
/// without accumulated fraction or without a target.
pub fn residual_term(row: &AccumRow, target: Option<&ObservedTarget>, position_scale: f64) -> f64 {
    let Some(t) = target else {
        return 0.0;
    };
    if !row.is_active() {
        return 0.0;
    }
    norm3([
        (row.y - t.y) / position_scale,
        (row.z - t.z) / position_scale,
        (row.omega - t.omega) / t.omega_scale,
    ])
}

/// Shared accumulator, one lock per observed row.
#[derive(Debug)]
pub struct SpotAccumulator {
    rows: Vec<Mutex<AccumRow>>,
}

impl SpotAccumulator {
    pub fn new(n_rows: usize) -> Self {
        SpotAccumulator {
            rows: (0..n_rows).map(|_| Mutex::new(AccumRow::default())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Add weighted sums during population. The row holds raw sums until
    /// [`SpotAccumulator::finalize`] turns them into means.
    pub fn accumulate(&mut self, row: usize, c: &Contribution) {
        if let Some(cell) = self.rows.get_mut(row) {
            let r = cell.get_mut();
            r.y += c.y * c.fraction;
            r.z += c.z * c.fraction;
            r.omega += c.omega * c.fraction;
            r.fraction += c.fraction;
        }
    }

    /// Divide the population sums by each row's total fraction.
    pub fn finalize(&mut self) {
        for cell in &mut self.rows {
            let r = cell.get_mut();
            if r.fraction <= FRACTION_EPS {
                *r = AccumRow::empty(r.fraction);
                continue;
            }
            r.y /= r.fraction;
            r.z /= r.fraction;
            r.omega /= r.fraction;
        }
    }

    /// Swap one contribution for another as a single locked write.
    /// Identical contributions leave the row untouched.
    pub fn replace(&self, row: usize, old: &Contribution, new: &Contribution) {
        if old == new {
            return;
        }
        if let Some(cell) = self.rows.get(row) {
            let mut guard = cell.lock();
            *guard = guard.replaced(old, new);
        }
    }

    pub fn row(&self, row: usize) -> Option<AccumRow> {
        self.rows.get(row).map(|cell| *cell.lock())
    }

    pub fn snapshot(&self) -> Vec<AccumRow> {
        self.rows.iter().map(|cell| *cell.lock()).collect()
    }
}
