// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Residual & Gradient Evaluator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Objective function over the flattened parameter vector.
//!
//! An evaluation first moves every changed voxel's contributions in the
//! shared accumulator, then sums the per-row residual terms. The gradient is
//! a central difference per parameter; each perturbed residual is the base
//! residual corrected on the rows the perturbed voxel touches, computed
//! against a frozen snapshot of the accumulator so the pass never writes to
//! shared state.

use hedm_math::diffraction::predict_spots_into;
use hedm_types::constants::PARAMS_PER_VOXEL;
use hedm_types::error::{HedmError, HedmResult};
use hedm_types::state::{unpack_states, CrystalState, PredictedSpot};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustc_hash::FxHashMap;

use crate::accumulator::{residual_term, AccumRow, FilteredCatalog, SpotAccumulator};
use crate::populate::Population;
use crate::problem::RefinementProblem;
use crate::tables::{SpotTables, VoxelBook};
use crate::update::{recomputed_contribution, spot_for_slot, update_voxel};

/// Scalar objective with optional gradient, as consumed by a bounded solver.
pub trait Objective {
    fn n_params(&self) -> usize;

    /// Residual at `x`; fills `grad` with one derivative per parameter when given.
    fn evaluate(&mut self, x: &[f64], grad: Option<&mut [f64]>) -> HedmResult<f64>;
}

/// Fixed-size pool for the per-voxel phases.
pub fn worker_pool(workers: usize) -> HedmResult<ThreadPool> {
    if workers == 0 {
        return Err(HedmError::ConfigError("workers must be >= 1".to_string()));
    }
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("hedm-worker-{i}"))
        .build()
        .map_err(|e| HedmError::ConfigError(format!("cannot start {workers} workers: {e}")))
}

/// Per-worker state for the perturbed-residual pass.
#[derive(Debug, Default)]
struct CounterfactualScratch {
    spots: Vec<PredictedSpot>,
    /// Rows this perturbation touched, with their would-be values.
    rows: FxHashMap<usize, AccumRow>,
}

/// Frozen accumulator state the gradient pass reads.
struct Baseline<'a> {
    problem: &'a RefinementProblem,
    filtered: &'a FilteredCatalog,
    snapshot: &'a [AccumRow],
    terms: &'a [f64],
    residual: f64,
}

impl Baseline<'_> {
    /// Residual if `voxel` alone took `state`.
    fn counterfactual(
        &self,
        voxel: usize,
        state: &CrystalState,
        book: &VoxelBook,
        scratch: &mut CounterfactualScratch,
    ) -> f64 {
        scratch.rows.clear();
        let Some(v) = self.problem.voxels.get(voxel) else {
            return self.residual;
        };
        predict_spots_into(
            &self.problem.geometry,
            v.position(),
            state,
            &self.problem.candidates,
            &mut scratch.spots,
        );

        for (slot, _, row, entry) in book.matched() {
            let spot = spot_for_slot(&scratch.spots, slot);
            let new = recomputed_contribution(self.problem, voxel, &entry, spot);
            let old = entry.contribution();
            if old == new {
                continue;
            }
            let Some(&current) = self.snapshot.get(row) else {
                continue;
            };
            let r = scratch.rows.entry(row).or_insert(current);
            *r = r.replaced(&old, &new);
        }

        let scale = self.problem.params.position_scale();
        let mut total = self.residual;
        for (&row, r) in &scratch.rows {
            total += residual_term(r, self.filtered.target(row), scale) - self.terms[row];
        }
        total
    }
}

pub struct Evaluator<'p> {
    problem: &'p RefinementProblem,
    pool: &'p ThreadPool,
    tables: SpotTables,
    accumulator: SpotAccumulator,
    filtered: FilteredCatalog,
    x_prev: Vec<f64>,
    fd_step: f64,
    evaluations: usize,
}

impl<'p> Evaluator<'p> {
    /// `x0` must be the parameter vector `population` was built from.
    pub fn new(
        problem: &'p RefinementProblem,
        pool: &'p ThreadPool,
        population: Population,
        x0: &[f64],
        fd_step: f64,
    ) -> HedmResult<Self> {
        if x0.len() != problem.n_params() {
            return Err(HedmError::DimensionMismatch {
                expected: problem.n_params(),
                got: x0.len(),
                context: "initial parameter vector".to_string(),
            });
        }
        if !fd_step.is_finite() || fd_step <= 0.0 {
            return Err(HedmError::ConfigError(
                "fd_step must be finite and > 0".to_string(),
            ));
        }
        if population.tables.layout().n_voxels != problem.n_voxels() {
            return Err(HedmError::DimensionMismatch {
                expected: problem.n_voxels(),
                got: population.tables.layout().n_voxels,
                context: "populated voxel tables".to_string(),
            });
        }
        Ok(Evaluator {
            problem,
            pool,
            tables: population.tables,
            accumulator: population.accumulator,
            filtered: population.filtered,
            x_prev: x0.to_vec(),
            fd_step,
            evaluations: 0,
        })
    }

    pub fn tables(&self) -> &SpotTables {
        &self.tables
    }

    pub fn accumulator(&self) -> &SpotAccumulator {
        &self.accumulator
    }

    pub fn filtered(&self) -> &FilteredCatalog {
        &self.filtered
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Residual of the accumulator as it stands.
    pub fn residual(&self) -> f64 {
        self.row_terms(&self.accumulator.snapshot()).iter().sum()
    }

    fn row_terms(&self, snapshot: &[AccumRow]) -> Vec<f64> {
        let scale = self.problem.params.position_scale();
        snapshot
            .iter()
            .enumerate()
            .map(|(row, r)| residual_term(r, self.filtered.target(row), scale))
            .collect()
    }

    fn check_len(&self, len: usize, context: &str) -> HedmResult<()> {
        if len != self.problem.n_params() {
            return Err(HedmError::DimensionMismatch {
                expected: self.problem.n_params(),
                got: len,
                context: context.to_string(),
            });
        }
        Ok(())
    }

    /// Bring the accumulator to `states`, touching only voxels whose
    /// parameters differ from the previous evaluation.
    fn apply(&mut self, x: &[f64], states: &[CrystalState]) -> usize {
        let problem = self.problem;
        let n_candidates = problem.candidates.len();
        let accumulator = &self.accumulator;
        let x_prev = &self.x_prev;
        let changed = x
            .chunks_exact(PARAMS_PER_VOXEL)
            .zip(x_prev.chunks_exact(PARAMS_PER_VOXEL))
            .filter(|(cur, prev)| cur != prev)
            .count();
        if changed > 0 {
            let books = self.tables.books_mut();
            self.pool.install(|| {
                books
                    .par_iter_mut()
                    .zip(states.par_iter())
                    .zip(
                        x.par_chunks_exact(PARAMS_PER_VOXEL)
                            .zip(x_prev.par_chunks_exact(PARAMS_PER_VOXEL)),
                    )
                    .enumerate()
                    .for_each_init(
                        || Vec::with_capacity(2 * n_candidates),
                        |spots, (voxel, ((book, state), (cur, prev)))| {
                            if cur != prev {
                                update_voxel(problem, voxel, state, book, accumulator, spots);
                            }
                        },
                    );
            });
        }
        self.x_prev.copy_from_slice(x);
        changed
    }

    /// Central-difference gradient against the current accumulator.
    fn gradient(&self, states: &[CrystalState], baseline: &Baseline<'_>, grad: &mut [f64]) {
        let h = self.fd_step;
        let books = self.tables.books();
        self.pool.install(|| {
            grad.par_chunks_exact_mut(PARAMS_PER_VOXEL)
                .zip(books.par_iter())
                .zip(states.par_iter())
                .enumerate()
                .for_each_init(
                    CounterfactualScratch::default,
                    |scratch, (voxel, ((g, book), state))| {
                        for (k, gk) in g.iter_mut().enumerate() {
                            let high =
                                baseline.counterfactual(voxel, &state.perturbed(k, h), book, scratch);
                            let low =
                                baseline.counterfactual(voxel, &state.perturbed(k, -h), book, scratch);
                            *gk = (high - low) / (2.0 * h);
                        }
                    },
                );
        });
    }
}

impl Objective for Evaluator<'_> {
    fn n_params(&self) -> usize {
        self.problem.n_params()
    }

    fn evaluate(&mut self, x: &[f64], grad: Option<&mut [f64]>) -> HedmResult<f64> {
        self.check_len(x.len(), "parameter vector")?;
        if let Some(g) = grad.as_deref() {
            self.check_len(g.len(), "gradient buffer")?;
        }
        let states = unpack_states(x)?;
        let changed = self.apply(x, &states);

        let snapshot = self.accumulator.snapshot();
        let terms = self.row_terms(&snapshot);
        let residual: f64 = terms.iter().sum();

        if let Some(grad) = grad {
            let baseline = Baseline {
                problem: self.problem,
                filtered: &self.filtered,
                snapshot: &snapshot,
                terms: &terms,
                residual,
            };
            self.gradient(&states, &baseline, grad);
        }

        self.evaluations += 1;
        log::debug!(
            "evaluation {}: {changed}/{} voxels changed, residual {residual:.6}",
            self.evaluations,
            self.problem.n_voxels()
        );
        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::populate::populate;
    use crate::problem::fixtures::*;
    use hedm_types::state::pack_states;

    fn setup(pool: &ThreadPool) -> (RefinementProblem, Population, Vec<f64>) {
        let problem = small_problem();
        let states = [true_state(); 2];
        let population = populate(&problem, &states, pool).unwrap();
        (problem, population, pack_states(&states))
    }

    #[test]
    fn test_worker_pool_rejects_zero() {
        assert!(worker_pool(0).is_err());
        assert_eq!(worker_pool(3).unwrap().current_num_threads(), 3);
    }

    #[test]
    fn test_residual_is_positive_for_offset_catalog() {
        let pool = worker_pool(2).unwrap();
        let (problem, population, x0) = setup(&pool);
        let mut eval = Evaluator::new(&problem, &pool, population, &x0, 1e-5).unwrap();
        let r = eval.evaluate(&x0, None).unwrap();
        assert!(r > 0.0 && r.is_finite());
        assert!((eval.residual() - r).abs() < 1e-12);
        assert_eq!(eval.evaluations(), 1);
    }

    #[test]
    fn test_exact_catalog_has_zero_residual() {
        let problem = synthetic_problem(
            scan_params(),
            vec![hedm_types::state::Voxel::new(0.0, 0.0)],
            vec![0.0],
            gold_candidates(),
            &true_state(),
            0.0,
        );
        let pool = worker_pool(1).unwrap();
        let population = populate(&problem, &[true_state()], &pool).unwrap();
        assert!(population.stats.matches > 0);
        let x0 = pack_states(&[true_state()]);
        let mut eval = Evaluator::new(&problem, &pool, population, &x0, 1e-5).unwrap();
        let r = eval.evaluate(&x0, None).unwrap();
        assert!(r < 1e-9, "residual {r}");
    }

    #[test]
    fn test_unchanged_vector_leaves_accumulator_alone() {
        let pool = worker_pool(2).unwrap();
        let (problem, population, x0) = setup(&pool);
        let mut eval = Evaluator::new(&problem, &pool, population, &x0, 1e-5).unwrap();
        let before = eval.accumulator().snapshot();
        let r1 = eval.evaluate(&x0, None).unwrap();
        let r2 = eval.evaluate(&x0, None).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(eval.accumulator().snapshot(), before);
    }

    #[test]
    fn test_gradient_pass_does_not_touch_shared_state() {
        let pool = worker_pool(3).unwrap();
        let (problem, population, x0) = setup(&pool);
        let mut eval = Evaluator::new(&problem, &pool, population, &x0, 1e-5).unwrap();
        let tables = eval.tables().clone();
        let before = eval.accumulator().snapshot();
        let mut grad = vec![0.0; x0.len()];
        let r = eval.evaluate(&x0, Some(grad.as_mut_slice())).unwrap();
        assert_eq!(eval.accumulator().snapshot(), before);
        assert_eq!(eval.tables(), &tables);
        assert_eq!(eval.evaluate(&x0, None).unwrap(), r);
        assert!(grad.iter().all(|g| g.is_finite()));
        assert!(grad.iter().any(|g| *g != 0.0));
    }

    #[test]
    fn test_gradient_matches_whole_pipeline_differences() {
        let pool = worker_pool(2).unwrap();
        let (problem, population, x0) = setup(&pool);
        let h = 1e-5;
        let mut eval = Evaluator::new(&problem, &pool, population, &x0, h).unwrap();
        let mut grad = vec![0.0; x0.len()];
        let r0 = eval.evaluate(&x0, Some(grad.as_mut_slice())).unwrap();

        for i in 0..x0.len() {
            let mut xp = x0.clone();
            xp[i] += h;
            let rp = eval.evaluate(&xp, None).unwrap();
            let mut xm = x0.clone();
            xm[i] -= h;
            let rm = eval.evaluate(&xm, None).unwrap();
            let fd = (rp - rm) / (2.0 * h);
            assert!(
                (grad[i] - fd).abs() <= 1e-4 * fd.abs().max(1.0),
                "param {i}: counterfactual {} vs pipeline {fd}",
                grad[i]
            );
        }
        let back = eval.evaluate(&x0, None).unwrap();
        assert!((back - r0).abs() < 1e-9 * r0.max(1.0));
    }

    #[test]
    fn test_parallel_update_of_every_voxel_keeps_rows_consistent() {
        let problem = grid_problem();
        let n = problem.n_voxels();
        let states = vec![true_state(); n];
        let x0 = pack_states(&states);

        let run = |workers: usize| {
            let pool = worker_pool(workers).unwrap();
            let population = populate(&problem, &states, &pool).unwrap();
            assert!(shared_rows(&population.tables, problem.catalog.len()) > 0);
            let mut eval = Evaluator::new(&problem, &pool, population, &x0, 1e-5).unwrap();
            let mut x = x0.clone();
            for round in 0..4 {
                let sign = if round % 2 == 0 { 1.0 } else { -1.0 };
                for (voxel, chunk) in x.chunks_exact_mut(PARAMS_PER_VOXEL).enumerate() {
                    let step = 0.05 * (voxel + 1) as f64;
                    chunk[0] += sign * step;
                    chunk[2] -= 0.5 * step;
                    chunk[3] *= 1.0 + 2e-4 * (round + 1) as f64;
                }
                let r = eval.evaluate(&x, None).unwrap();
                assert!(r.is_finite());
                assert_accumulator_consistent(eval.tables(), eval.accumulator());
            }
            (eval.tables().clone(), eval.accumulator().snapshot())
        };

        let (tables_par, rows_par) = run(4);
        let (tables_seq, rows_seq) = run(1);
        assert_eq!(tables_par, tables_seq);
        for (row, (p, s)) in rows_par.iter().zip(&rows_seq).enumerate() {
            assert!((p.fraction - s.fraction).abs() < 1e-10, "row {row}");
            if s.fraction > 1e-3 {
                assert!((p.y - s.y).abs() < 1e-6, "row {row}: {} vs {}", p.y, s.y);
                assert!((p.omega - s.omega).abs() < 1e-8, "row {row}");
            }
        }
    }

    #[test]
    fn test_gradient_independent_of_worker_count() {
        let grads: Vec<Vec<f64>> = [1, 4]
            .into_iter()
            .map(|workers| {
                let pool = worker_pool(workers).unwrap();
                let (problem, population, x0) = setup(&pool);
                let mut eval = Evaluator::new(&problem, &pool, population, &x0, 1e-5).unwrap();
                let mut grad = vec![0.0; x0.len()];
                eval.evaluate(&x0, Some(grad.as_mut_slice())).unwrap();
                grad
            })
            .collect();
        assert_eq!(grads[0], grads[1]);
    }

    #[test]
    fn test_wrong_lengths_are_rejected() {
        let pool = worker_pool(1).unwrap();
        let (problem, population, x0) = setup(&pool);
        let mut eval = Evaluator::new(&problem, &pool, population, &x0, 1e-5).unwrap();
        assert!(eval.evaluate(&x0[..9], None).is_err());
        let mut short = vec![0.0; 3];
        assert!(eval.evaluate(&x0, Some(short.as_mut_slice())).is_err());
        assert_eq!(eval.evaluations(), 0);
    }

    #[test]
    fn test_new_rejects_bad_step() {
        let pool = worker_pool(1).unwrap();
        let (problem, population, x0) = setup(&pool);
        assert!(Evaluator::new(&problem, &pool, population, &x0, 0.0).is_err());
    }
}
