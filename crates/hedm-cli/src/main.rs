// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Command-Line Front End
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use clap::Parser;
use hedm_core::catalog::ObservedCatalog;
use hedm_core::driver::RefinementDriver;
use hedm_core::evaluator::{worker_pool, Evaluator};
use hedm_core::io;
use hedm_core::populate::populate;
use hedm_core::problem::RefinementProblem;
use hedm_types::config::{RefineSettings, ScanParams};
use hedm_types::error::HedmResult;
use hedm_types::state::pack_states;

/// Refine per-voxel orientation and lattice parameters of one grain from a
/// scanning far-field HEDM measurement.
#[derive(Parser, Debug)]
#[command(name = "hedm-refine", version, about)]
struct Cli {
    /// Parameter file (key-value text, or .json)
    params: String,

    /// Beam positions: header line, then one value (mm) per layer
    beam_positions: PathBuf,

    /// Voxel grid, one `x,y` (µm) per line
    voxels: PathBuf,

    /// Ring index: header line, then `position ring start end` rows
    ring_index: PathBuf,

    /// Grain to refine (1-based row of the grain table)
    grain_nr: usize,

    /// Worker threads
    workers: usize,

    /// Reflection candidates
    #[arg(long, value_name = "FILE", default_value = "hkls.csv")]
    hkl_file: PathBuf,

    /// Observed spot catalog (14 native-endian f64 per spot)
    #[arg(long, value_name = "FILE", default_value = "ExtraInfo.bin")]
    catalog: PathBuf,

    /// Grain table
    #[arg(long, value_name = "FILE", default_value = "Grains.csv")]
    grains: PathBuf,

    /// Directory for the debug tables and refined.csv
    #[arg(long, value_name = "DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Stop after writing the debug tables
    #[arg(long)]
    populate_only: bool,

    /// Solver iteration cap
    #[arg(long, default_value_t = RefineSettings::default().max_iterations)]
    max_iterations: usize,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> HedmResult<()> {
    let params = ScanParams::from_file(&cli.params)?;
    let settings = RefineSettings {
        workers: cli.workers,
        max_iterations: cli.max_iterations,
        ..RefineSettings::default()
    };
    settings.validate()?;

    let beam_positions = io::read_beam_positions(&cli.beam_positions, params.n_layers)?;
    let candidates = io::read_candidates(&cli.hkl_file, &params)?;
    let voxels = io::read_voxels(&cli.voxels)?;
    let catalog = ObservedCatalog::load(&cli.catalog)?;
    let ring_index = io::read_ring_index(&cli.ring_index, catalog.len())?;
    let grain = io::read_grain(&cli.grains, cli.grain_nr)?;

    let problem = RefinementProblem::new(
        params,
        voxels,
        beam_positions,
        candidates,
        catalog,
        ring_index,
    )?;
    let states = vec![grain; problem.n_voxels()];
    let x0 = pack_states(&states);
    let pool = worker_pool(settings.workers)?;

    let population = populate(&problem, &states, &pool)?;
    io::write_debug_tables(
        &cli.out_dir,
        &population.tables,
        &population.accumulator,
        &population.filtered,
    )?;
    if cli.populate_only {
        return Ok(());
    }

    let mut evaluator = Evaluator::new(&problem, &pool, population, &x0, settings.fd_step)?;
    let report = RefinementDriver::new(settings)?.run(&x0, &mut evaluator)?;
    io::write_refined(cli.out_dir.join("refined.csv"), &problem.voxels, &report.x)?;
    Ok(())
}
