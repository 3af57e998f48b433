// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Spot Matching & Cache Population
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Match every predicted spot of the initial states against the catalog and
//! fill the forward cache, match table, accumulator and filtered catalog.
//!
//! Matching is read-only and runs per voxel on the worker pool; results are
//! applied in voxel order so the tables do not depend on scheduling.

use hedm_math::diffraction::{detector_to_scattering_vector, predict_spots_into};
use hedm_math::trig::angle_between;
use hedm_types::constants::MATCH_ANGLE_THRESHOLD_DEG;
use hedm_types::error::{HedmError, HedmResult};
use hedm_types::state::{CrystalState, PredictedSpot};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::accumulator::{FilteredCatalog, ObservedTarget, SpotAccumulator};
use crate::problem::RefinementProblem;
use crate::tables::{ForwardEntry, SpotTables, TableLayout};

/// One accepted (spot, beam position) → catalog row pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotMatch {
    pub slot: usize,
    pub beam: usize,
    pub row: usize,
    pub angle: f64,
    pub entry: ForwardEntry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulationStats {
    pub predicted_spots: usize,
    pub matches: usize,
    pub matched_rows: usize,
    /// Set when some slot needed more occurrences than the initial capacity.
    pub grown_to: Option<usize>,
}

#[derive(Debug)]
pub struct Population {
    pub tables: SpotTables,
    pub accumulator: SpotAccumulator,
    pub filtered: FilteredCatalog,
    pub stats: PopulationStats,
}

/// Best catalog row for `spot` under beam `beam`: within the rotation-angle
/// tolerance, smallest scattering-vector misorientation, below the
/// acceptance threshold. Ties keep the earliest row.
pub fn best_match(
    problem: &RefinementProblem,
    spot: &PredictedSpot,
    beam: usize,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for row in problem.ring_index.rows(beam, spot.ring) {
        let Some(obs) = problem.catalog.spot(row) else {
            break;
        };
        if !((spot.omega - obs.omega).abs() < problem.params.omega_tol) {
            continue;
        }
        let g_obs = detector_to_scattering_vector(
            problem.geometry.lsd,
            obs.y,
            obs.z,
            obs.omega,
            Some(obs.two_theta),
        );
        let angle = angle_between(spot.g, g_obs);
        if best.map_or(angle.is_finite(), |(_, a)| angle < a) {
            best = Some((row, angle));
        }
    }
    best.filter(|&(_, angle)| angle < MATCH_ANGLE_THRESHOLD_DEG)
}

/// Every match of one voxel in its initial state, in (slot, beam) order.
pub fn match_voxel(
    problem: &RefinementProblem,
    voxel: usize,
    state: &CrystalState,
    spots: &mut Vec<PredictedSpot>,
) -> Vec<SpotMatch> {
    let Some(v) = problem.voxels.get(voxel) else {
        return Vec::new();
    };
    predict_spots_into(
        &problem.geometry,
        v.position(),
        state,
        &problem.candidates,
        spots,
    );
    let mut out = Vec::new();
    for spot in spots.iter() {
        for beam in 0..problem.beam_positions.len() {
            let fraction = problem.fraction(voxel, beam, spot.omega);
            if fraction <= 0.0 {
                continue;
            }
            if let Some((row, angle)) = best_match(problem, spot, beam) {
                out.push(SpotMatch {
                    slot: spot.slot,
                    beam,
                    row,
                    angle,
                    entry: ForwardEntry {
                        y: spot.y,
                        z: spot.z,
                        omega: spot.omega,
                        fraction,
                        beam,
                    },
                });
            }
        }
    }
    out
}

/// Occurrences the busiest slot of any voxel needs.
fn required_occurrences(matches: &[Vec<SpotMatch>], n_slots: usize) -> usize {
    let mut counts = vec![0usize; n_slots];
    let mut needed = 0;
    for voxel_matches in matches {
        counts.iter_mut().for_each(|c| *c = 0);
        for m in voxel_matches {
            if let Some(c) = counts.get_mut(m.slot) {
                *c += 1;
                needed = needed.max(*c);
            }
        }
    }
    needed
}

/// Match and record the initial states, then turn accumulator sums into means.
pub fn populate(
    problem: &RefinementProblem,
    states: &[CrystalState],
    pool: &ThreadPool,
) -> HedmResult<Population> {
    if states.len() != problem.n_voxels() {
        return Err(HedmError::DimensionMismatch {
            expected: problem.n_voxels(),
            got: states.len(),
            context: "initial states per voxel".to_string(),
        });
    }

    let n_candidates = problem.candidates.len();
    let per_voxel: Vec<(usize, Vec<SpotMatch>)> = pool.install(|| {
        states
            .par_iter()
            .enumerate()
            .map_init(
                || Vec::with_capacity(2 * n_candidates),
                |spots, (voxel, state)| {
                    let matches = match_voxel(problem, voxel, state, spots);
                    (spots.len(), matches)
                },
            )
            .collect()
    });
    let predicted_spots = per_voxel.iter().map(|(n, _)| n).sum::<usize>();
    let per_voxel: Vec<Vec<SpotMatch>> = per_voxel.into_iter().map(|(_, m)| m).collect();

    let mut tables = SpotTables::new(TableLayout::new(
        problem.n_voxels(),
        n_candidates,
        problem.params.max_occurrences(),
    ));
    let capacity = tables.layout().max_occurrences;
    let needed = required_occurrences(&per_voxel, tables.layout().n_slots);
    let mut grown_to = None;
    if needed > capacity {
        log::warn!(
            "a slot matched {needed} beam positions; growing occurrence capacity from {capacity}"
        );
        tables.grow_occurrences(needed);
        grown_to = Some(needed);
    }

    let mut accumulator = SpotAccumulator::new(problem.catalog.len());
    let mut filtered = FilteredCatalog::new(problem.catalog.len());
    let mut n_matches = 0;

    for (voxel, matches) in per_voxel.iter().enumerate() {
        let Some(book) = tables.book_mut(voxel) else {
            continue;
        };
        for m in matches {
            if book.push_match(m.slot, m.row, m.entry).is_none() {
                continue;
            }
            n_matches += 1;
            accumulator.accumulate(m.row, &m.entry.contribution());
            if let Some(obs) = problem.catalog.spot(m.row) {
                filtered.record_first(
                    m.row,
                    ObservedTarget::new(obs.y, obs.z, obs.omega, problem.params.omega_step),
                );
            }
        }
    }
    accumulator.finalize();

    let stats = PopulationStats {
        predicted_spots,
        matches: n_matches,
        matched_rows: filtered.matched_rows(),
        grown_to,
    };
    log::info!(
        "populated {} voxels: {} predicted spots, {} matches on {} catalog rows",
        problem.n_voxels(),
        stats.predicted_spots,
        stats.matches,
        stats.matched_rows
    );
    Ok(Population {
        tables,
        accumulator,
        filtered,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ObservedCatalog, RingIndex};
    use crate::problem::fixtures::*;
    use hedm_math::diffraction::{predict_spots, DetectorGeometry};
    use hedm_math::lattice::scattering_vectors;
    use hedm_types::constants::{CATALOG_FIELDS, CATALOG_OMEGA, CATALOG_TWO_THETA, CATALOG_Y, CATALOG_Z};
    use hedm_types::state::{ReflectionCandidate, Voxel};
    use rayon::ThreadPoolBuilder;

    fn pool() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    /// Sum of recorded fractions and fraction-weighted y per catalog row.
    fn row_totals(tables: &SpotTables, n_rows: usize) -> Vec<(f64, f64)> {
        let mut totals = vec![(0.0, 0.0); n_rows];
        for book in tables.books() {
            for (_, _, row, e) in book.matched() {
                totals[row].0 += e.fraction;
                totals[row].1 += e.fraction * e.y;
            }
        }
        totals
    }

    #[test]
    fn test_single_spot_end_to_end() {
        let mut params = scan_params();
        params.rings = vec![1];
        params.n_layers = 1;
        params.voxel_len = 1.0;
        params.beam_fwhm = 1.0e4;
        let state = true_state();
        let candidates = vec![ReflectionCandidate {
            hkl: [1.0, 1.0, 1.0],
            ring: 1,
        }];
        let geometry = DetectorGeometry {
            lsd: params.lsd,
            wavelength: params.wavelength,
        };
        let spots = predict_spots(&geometry, [0.0; 3], &state, &candidates);
        let spot = *spots
            .iter()
            .find(|s| {
                spots
                    .iter()
                    .all(|o| o.slot == s.slot || (o.omega - s.omega).abs() > params.omega_tol)
            })
            .expect("an isolated spot");
        let theta = scattering_vectors(&state.lattice, &candidates, params.wavelength)[0].theta;

        let mut rec = vec![0.0; CATALOG_FIELDS];
        rec[CATALOG_Y] = spot.y;
        rec[CATALOG_Z] = spot.z;
        rec[CATALOG_OMEGA] = spot.omega;
        rec[CATALOG_TWO_THETA] = 2.0 * theta;
        let mut index = RingIndex::new();
        index.insert(0, 1, 0..1);
        let problem = RefinementProblem::new(
            params,
            vec![Voxel::new(0.0, 0.0)],
            vec![0.0],
            candidates,
            ObservedCatalog::from_values(rec).unwrap(),
            index,
        )
        .unwrap();

        let population = populate(&problem, &[state], &pool()).unwrap();
        assert_eq!(population.stats.matches, 1);
        assert_eq!(population.tables.matched_row(0, spot.slot, 0), Some(0));
        let row = population.accumulator.row(0).unwrap();
        assert!(row.fraction > 0.999 && row.fraction <= 1.0);
        assert!((row.y - spot.y).abs() <= 1e-9 * spot.y.abs().max(1.0));
        assert!((row.z - spot.z).abs() <= 1e-9 * spot.z.abs().max(1.0));
        assert!((row.omega - spot.omega).abs() <= 1e-12 * spot.omega.abs().max(1.0));
        let target = population.filtered.target(0).unwrap();
        assert_eq!((target.y, target.z, target.omega), (spot.y, spot.z, spot.omega));
    }

    #[test]
    fn test_unindexed_ring_gives_no_matches() {
        let problem = small_problem();
        let mut empty = problem.clone();
        empty.ring_index = RingIndex::new();
        let population = populate(&empty, &[true_state(); 2], &pool()).unwrap();
        assert_eq!(population.stats.matches, 0);
        assert_eq!(population.stats.matched_rows, 0);
        assert!(population.accumulator.snapshot().iter().all(|r| !r.is_active()));
    }

    #[test]
    fn test_population_weights_rows_by_fraction() {
        let problem = small_problem();
        let population = populate(&problem, &[true_state(); 2], &pool()).unwrap();
        assert!(population.stats.matches > 0);
        assert!(population.stats.predicted_spots > 0);

        let totals = row_totals(&population.tables, problem.catalog.len());
        for (row, acc) in population.accumulator.snapshot().iter().enumerate() {
            let (fraction, weighted_y) = totals[row];
            assert!((acc.fraction - fraction).abs() < 1e-12);
            if fraction > 0.0 {
                assert!((acc.y - weighted_y / fraction).abs() < 1e-6);
                assert!(population.filtered.target(row).is_some());
            }
        }
    }

    #[test]
    fn test_population_is_deterministic_across_pools() {
        let problem = small_problem();
        let states = [true_state(); 2];
        let one = populate(&problem, &states, &ThreadPoolBuilder::new().num_threads(1).build().unwrap())
            .unwrap();
        let four = populate(&problem, &states, &ThreadPoolBuilder::new().num_threads(4).build().unwrap())
            .unwrap();
        assert_eq!(one.tables, four.tables);
        assert_eq!(one.accumulator.snapshot(), four.accumulator.snapshot());
        assert_eq!(one.filtered, four.filtered);
    }

    #[test]
    fn test_capacity_grows_when_slot_overflows() {
        let mut params = scan_params();
        params.beam_fwhm = 0.5;
        params.voxel_len = 5.0;
        params.n_layers = 12;
        let beams: Vec<f64> = (0..12).map(|k| -2.75 + 0.5 * k as f64).collect();
        let problem = synthetic_problem(
            params,
            vec![Voxel::new(0.0, 0.0)],
            beams,
            gold_candidates(),
            &true_state(),
            0.0,
        );
        let initial = problem.params.max_occurrences();
        let population = populate(&problem, &[true_state()], &pool()).unwrap();
        let grown = population.stats.grown_to.expect("capacity must grow");
        assert!(grown > initial);
        assert_eq!(population.tables.layout().max_occurrences, grown);
    }

    #[test]
    fn test_state_count_mismatch_is_error() {
        let problem = small_problem();
        assert!(matches!(
            populate(&problem, &[true_state()], &pool()),
            Err(HedmError::DimensionMismatch { .. })
        ));
    }
}
