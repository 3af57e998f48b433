// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Incremental Accumulator Update
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Re-predict one voxel and move its matched contributions in the
//! accumulator. Matches themselves never change after population.

use hedm_math::diffraction::predict_spots_into;
use hedm_types::state::{CrystalState, PredictedSpot};

use crate::accumulator::{Contribution, SpotAccumulator};
use crate::problem::RefinementProblem;
use crate::tables::{ForwardEntry, VoxelBook};

/// Predicted spot for `slot`; `spots` is ordered by slot.
pub fn spot_for_slot(spots: &[PredictedSpot], slot: usize) -> Option<&PredictedSpot> {
    spots
        .binary_search_by_key(&slot, |s| s.slot)
        .ok()
        .and_then(|idx| spots.get(idx))
}

/// New contribution of a cached occurrence. A slot without a predicted spot
/// keeps its last position with zero weight.
pub fn recomputed_contribution(
    problem: &RefinementProblem,
    voxel: usize,
    entry: &ForwardEntry,
    spot: Option<&PredictedSpot>,
) -> Contribution {
    match spot {
        Some(s) => Contribution {
            y: s.y,
            z: s.z,
            omega: s.omega,
            fraction: problem.fraction(voxel, entry.beam, s.omega),
        },
        None => Contribution {
            fraction: 0.0,
            ..entry.contribution()
        },
    }
}

/// Apply `state` to `voxel`: every matched occurrence swaps its old
/// contribution for the recomputed one and the forward cache is rewritten.
/// `spots` is scratch space.
pub fn update_voxel(
    problem: &RefinementProblem,
    voxel: usize,
    state: &CrystalState,
    book: &mut VoxelBook,
    accumulator: &SpotAccumulator,
    spots: &mut Vec<PredictedSpot>,
) {
    let Some(v) = problem.voxels.get(voxel) else {
        return;
    };
    predict_spots_into(
        &problem.geometry,
        v.position(),
        state,
        &problem.candidates,
        spots,
    );

    for slot in 0..book.n_slots() {
        let filled = book.occurrences(slot);
        if filled == 0 {
            continue;
        }
        let spot = spot_for_slot(spots, slot);
        for occ in 0..filled {
            let Some(row) = book.matched_row(slot, occ) else {
                break;
            };
            let Some(entry) = book.entry_mut(slot, occ) else {
                break;
            };
            let old = entry.contribution();
            let new = recomputed_contribution(problem, voxel, entry, spot);
            accumulator.replace(row, &old, &new);
            entry.y = new.y;
            entry.z = new.z;
            entry.omega = new.omega;
            entry.fraction = new.fraction;
        }
    }
}
