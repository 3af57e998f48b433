// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Evaluator Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, Criterion};
use hedm_core::catalog::{ObservedCatalog, RingIndex};
use hedm_core::evaluator::{worker_pool, Evaluator, Objective};
use hedm_core::populate::populate;
use hedm_core::problem::RefinementProblem;
use hedm_math::diffraction::{predict_spots, DetectorGeometry};
use hedm_math::lattice::scattering_vectors;
use hedm_types::config::ScanParams;
use hedm_types::constants::{
    CATALOG_FIELDS, CATALOG_OMEGA, CATALOG_TWO_THETA, CATALOG_Y, CATALOG_Z,
};
use hedm_types::state::{pack_states, CrystalState, ReflectionCandidate, Voxel};
use std::hint::black_box;

fn cubic_candidates(max_index: i32, rings: &[i32]) -> Vec<ReflectionCandidate> {
    let mut out = Vec::new();
    for h in -max_index..=max_index {
        for k in -max_index..=max_index {
            for l in -max_index..=max_index {
                let sq = h * h + k * k + l * l;
                if sq == 0 || !rings.contains(&sq) {
                    continue;
                }
                out.push(ReflectionCandidate {
                    hkl: [h as f64, k as f64, l as f64],
                    ring: sq,
                });
            }
        }
    }
    out
}

fn synthetic_scan(side: usize) -> (RefinementProblem, CrystalState) {
    let rings = vec![3, 4, 8];
    let beam_positions: Vec<f64> = (0..side).map(|i| 5.0 * i as f64 - 10.0).collect();
    let params = ScanParams {
        omega_step: 0.25,
        px: 200.0,
        voxel_len: 5.0,
        beam_fwhm: 5.0,
        omega_tol: 2.0,
        lsd: 1.0e6,
        wavelength: 0.172979,
        n_layers: beam_positions.len(),
        rings: rings.clone(),
    };
    let truth = CrystalState::new([12.0, 48.0, 203.0], [4.08, 4.08, 4.08, 90.0, 90.0, 90.0]);
    let candidates = cubic_candidates(2, &rings);
    let geometry = DetectorGeometry {
        lsd: params.lsd,
        wavelength: params.wavelength,
    };
    let vectors = scattering_vectors(&truth.lattice, &candidates, params.wavelength);
    let spots = predict_spots(&geometry, [0.0; 3], &truth, &candidates);

    let mut groups: BTreeMap<(usize, i32), Vec<[f64; CATALOG_FIELDS]>> = BTreeMap::new();
    for spot in &spots {
        for beam in 0..beam_positions.len() {
            let mut rec = [0.0; CATALOG_FIELDS];
            rec[CATALOG_Y] = spot.y + 1.5;
            rec[CATALOG_Z] = spot.z;
            rec[CATALOG_OMEGA] = spot.omega;
            rec[CATALOG_TWO_THETA] = 2.0 * vectors[spot.slot / 2].theta;
            groups.entry((beam, spot.ring)).or_default().push(rec);
        }
    }
    let mut values = Vec::new();
    let mut index = RingIndex::new();
    for ((beam, ring), recs) in groups {
        let start = values.len() / CATALOG_FIELDS;
        for rec in recs {
            values.extend_from_slice(&rec);
        }
        index.insert(beam, ring, start..values.len() / CATALOG_FIELDS);
    }

    let voxels = (0..side * side)
        .map(|i| Voxel::new(5.0 * (i % side) as f64 - 10.0, 5.0 * (i / side) as f64 - 10.0))
        .collect();
    let catalog = ObservedCatalog::from_values(values).expect("whole records");
    let problem =
        RefinementProblem::new(params, voxels, beam_positions, candidates, catalog, index)
            .expect("valid synthetic scan");
    (problem, truth)
}

fn bench_evaluate(c: &mut Criterion) {
    let (problem, truth) = synthetic_scan(5);
    let pool = worker_pool(4).expect("pool");
    let states = vec![truth; problem.n_voxels()];
    let x0 = pack_states(&states);
    let population = populate(&problem, &states, &pool).expect("population");
    let mut evaluator = Evaluator::new(&problem, &pool, population, &x0, 1e-5).expect("evaluator");

    let mut x1 = x0.clone();
    for chunk in x1.chunks_exact_mut(9) {
        chunk[0] += 0.01;
        chunk[3] *= 1.0005;
    }
    let mut flip = false;
    c.bench_function("evaluate_25_voxels_residual", |b| {
        b.iter(|| {
            flip = !flip;
            let x = if flip { &x1 } else { &x0 };
            black_box(evaluator.evaluate(black_box(x), None).expect("evaluate"))
        })
    });

    let mut grad = vec![0.0; x0.len()];
    c.bench_function("evaluate_25_voxels_gradient", |b| {
        b.iter(|| {
            black_box(
                evaluator
                    .evaluate(black_box(&x0), Some(grad.as_mut_slice()))
                    .expect("evaluate"),
            );
            black_box(grad[0]);
        })
    });
}

criterion_group!(benches, bench_evaluate);
criterion_main!(benches);
