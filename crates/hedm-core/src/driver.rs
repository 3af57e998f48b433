// ─────────────────────────────────────────────────────────────────────
// HEDM Scan Refinement — Optimization Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Box constraints around the starting parameters and a pluggable bounded
//! minimizer. The bundled solver is projected steepest descent with an
//! Armijo backtracking line search.

use hedm_types::config::RefineSettings;
use hedm_types::constants::PARAMS_PER_VOXEL;
use hedm_types::error::{HedmError, HedmResult};

use crate::evaluator::Objective;

const ARMIJO_C: f64 = 1e-4;
const STEP_GROWTH: f64 = 2.0;

/// Per-parameter lower and upper limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ParameterBounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> HedmResult<Self> {
        if lower.len() != upper.len() {
            return Err(HedmError::DimensionMismatch {
                expected: lower.len(),
                got: upper.len(),
                context: "upper bounds".to_string(),
            });
        }
        if let Some(i) = lower
            .iter()
            .zip(&upper)
            .position(|(lo, hi)| !lo.is_finite() || !hi.is_finite() || lo > hi)
        {
            return Err(HedmError::ConfigError(format!(
                "bound {i} is empty or not finite: [{}, {}]",
                lower[i], upper[i]
            )));
        }
        Ok(ParameterBounds { lower, upper })
    }

    /// Euler angles within `± euler_tol_deg`, lattice parameters within
    /// `± lattice_tol_pct` percent of their starting values.
    pub fn around(x0: &[f64], euler_tol_deg: f64, lattice_tol_pct: f64) -> HedmResult<Self> {
        if x0.len() % PARAMS_PER_VOXEL != 0 {
            return Err(HedmError::DimensionMismatch {
                expected: x0.len().next_multiple_of(PARAMS_PER_VOXEL),
                got: x0.len(),
                context: "starting parameter vector".to_string(),
            });
        }
        let mut lower = Vec::with_capacity(x0.len());
        let mut upper = Vec::with_capacity(x0.len());
        for (i, &x) in x0.iter().enumerate() {
            if i % PARAMS_PER_VOXEL < 3 {
                lower.push(x - euler_tol_deg);
                upper.push(x + euler_tol_deg);
            } else {
                let a = x * (1.0 - lattice_tol_pct / 100.0);
                let b = x * (1.0 + lattice_tol_pct / 100.0);
                lower.push(a.min(b));
                upper.push(a.max(b));
            }
        }
        Self::new(lower, upper)
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Clamp `x` into the box in place.
    pub fn project(&self, x: &mut [f64]) {
        for ((v, lo), hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.clamp(*lo, *hi);
        }
    }

    pub fn projected(&self, x: &[f64]) -> Vec<f64> {
        let mut out = x.to_vec();
        self.project(&mut out);
        out
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.len()
            && x
                .iter()
                .zip(&self.lower)
                .zip(&self.upper)
                .all(|((v, lo), hi)| (lo..=hi).contains(&v))
    }
}

#[derive(Debug, Clone)]
pub struct SolverReport {
    pub x: Vec<f64>,
    pub residual: f64,
    /// Accepted steps.
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
    pub residual_history: Vec<f64>,
}

/// Minimizer of an [`Objective`] inside a box.
pub trait BoundedSolver {
    fn minimize(
        &self,
        x0: &[f64],
        bounds: &ParameterBounds,
        objective: &mut dyn Objective,
    ) -> HedmResult<SolverReport>;
}

#[derive(Debug, Clone)]
pub struct ProjectedGradientConfig {
    pub max_iterations: usize,
    /// Stop once an accepted step moves no parameter further than this.
    pub step_tolerance: f64,
    /// Stop once the residual is at or below this.
    pub residual_tolerance: f64,
    /// Largest parameter move of the first trial step.
    pub initial_step: f64,
    pub shrink: f64,
    pub max_backtracks: usize,
}

impl Default for ProjectedGradientConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            step_tolerance: 1e-8,
            residual_tolerance: 1e-10,
            initial_step: 0.05,
            shrink: 0.5,
            max_backtracks: 20,
        }
    }
}

impl ProjectedGradientConfig {
    pub fn validate(&self) -> HedmResult<()> {
        if self.max_iterations == 0 {
            return Err(HedmError::ConfigError(
                "solver.max_iterations must be >= 1".to_string(),
            ));
        }
        if !self.step_tolerance.is_finite() || self.step_tolerance < 0.0 {
            return Err(HedmError::ConfigError(
                "solver.step_tolerance must be finite and >= 0".to_string(),
            ));
        }
        if !self.residual_tolerance.is_finite() || self.residual_tolerance < 0.0 {
            return Err(HedmError::ConfigError(
                "solver.residual_tolerance must be finite and >= 0".to_string(),
            ));
        }
        if !self.initial_step.is_finite() || self.initial_step <= 0.0 {
            return Err(HedmError::ConfigError(
                "solver.initial_step must be finite and > 0".to_string(),
            ));
        }
        if !self.shrink.is_finite() || self.shrink <= 0.0 || self.shrink >= 1.0 {
            return Err(HedmError::ConfigError(
                "solver.shrink must be in (0, 1)".to_string(),
            ));
        }
        if self.max_backtracks == 0 {
            return Err(HedmError::ConfigError(
                "solver.max_backtracks must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectedGradient {
    pub config: ProjectedGradientConfig,
}

impl ProjectedGradient {
    pub fn new(config: ProjectedGradientConfig) -> HedmResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

fn finite_or_err(value: f64, iteration: usize) -> HedmResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(HedmError::Solver {
            iteration,
            message: format!("objective returned {value}"),
        })
    }
}

impl BoundedSolver for ProjectedGradient {
    fn minimize(
        &self,
        x0: &[f64],
        bounds: &ParameterBounds,
        objective: &mut dyn Objective,
    ) -> HedmResult<SolverReport> {
        let cfg = &self.config;
        cfg.validate()?;
        let n = objective.n_params();
        for (len, context) in [(x0.len(), "starting point"), (bounds.len(), "bounds")] {
            if len != n {
                return Err(HedmError::DimensionMismatch {
                    expected: n,
                    got: len,
                    context: context.to_string(),
                });
            }
        }

        let mut x = bounds.projected(x0);
        let mut grad = vec![0.0; n];
        let mut f = finite_or_err(objective.evaluate(&x, Some(grad.as_mut_slice()))?, 0)?;
        let mut evaluations = 1;
        let mut residual_history = vec![f];
        let mut iterations = 0;
        let mut converged = false;

        let g_max = max_abs(&grad);
        let mut step = if g_max > 0.0 {
            cfg.initial_step / g_max
        } else {
            cfg.initial_step
        };

        for iter in 1..=cfg.max_iterations {
            if f <= cfg.residual_tolerance {
                converged = true;
                break;
            }
            if !grad.iter().all(|g| g.is_finite()) {
                return Err(HedmError::Solver {
                    iteration: iter,
                    message: "gradient is not finite".to_string(),
                });
            }
            let stationary = bounds.projected(
                &x.iter().zip(&grad).map(|(v, g)| v - g).collect::<Vec<_>>(),
            ) == x;
            if stationary {
                converged = true;
                break;
            }

            let mut accepted = None;
            for _ in 0..cfg.max_backtracks {
                let trial = bounds.projected(
                    &x.iter()
                        .zip(&grad)
                        .map(|(v, g)| v - step * g)
                        .collect::<Vec<_>>(),
                );
                let decrease: f64 = trial
                    .iter()
                    .zip(&x)
                    .zip(&grad)
                    .map(|((t, v), g)| g * (t - v))
                    .sum();
                if trial == x {
                    break;
                }
                let f_trial = finite_or_err(objective.evaluate(&trial, None)?, iter)?;
                evaluations += 1;
                if f_trial <= f + ARMIJO_C * decrease {
                    accepted = Some(trial);
                    break;
                }
                step *= cfg.shrink;
            }

            let Some(trial) = accepted else {
                // Leave the objective at the best point.
                objective.evaluate(&x, None)?;
                evaluations += 1;
                log::debug!("line search stalled at iteration {iter}, residual {f:.6}");
                break;
            };

            let moved = trial
                .iter()
                .zip(&x)
                .fold(0.0_f64, |m, (t, v)| m.max((t - v).abs()));
            x = trial;
            f = finite_or_err(objective.evaluate(&x, Some(grad.as_mut_slice()))?, iter)?;
            evaluations += 1;
            residual_history.push(f);
            iterations = iter;
            step *= STEP_GROWTH;
            log::debug!("iteration {iter}: residual {f:.6}, max move {moved:.3e}");

            if moved < cfg.step_tolerance {
                converged = true;
                break;
            }
        }

        Ok(SolverReport {
            x,
            residual: f,
            iterations,
            evaluations,
            converged,
            residual_history,
        })
    }
}

/// Builds the box around the starting point and hands it to the solver.
pub struct RefinementDriver<S: BoundedSolver = ProjectedGradient> {
    solver: S,
    settings: RefineSettings,
}

impl RefinementDriver<ProjectedGradient> {
    /// Bundled solver, iteration cap taken from `settings`.
    pub fn new(settings: RefineSettings) -> HedmResult<Self> {
        let solver = ProjectedGradient::new(ProjectedGradientConfig {
            max_iterations: settings.max_iterations,
            ..ProjectedGradientConfig::default()
        })?;
        Self::with_solver(solver, settings)
    }
}

impl<S: BoundedSolver> RefinementDriver<S> {
    pub fn with_solver(solver: S, settings: RefineSettings) -> HedmResult<Self> {
        settings.validate()?;
        Ok(Self { solver, settings })
    }

    pub fn settings(&self) -> &RefineSettings {
        &self.settings
    }

    pub fn run(&self, x0: &[f64], objective: &mut dyn Objective) -> HedmResult<SolverReport> {
        let bounds = ParameterBounds::around(
            x0,
            self.settings.euler_tol_deg,
            self.settings.lattice_tol_pct,
        )?;
        log::info!(
            "refining {} parameters (euler ±{}°, lattice ±{}%)",
            x0.len(),
            self.settings.euler_tol_deg,
            self.settings.lattice_tol_pct
        );
        let report = self.solver.minimize(x0, &bounds, objective)?;
        log::info!(
            "refinement finished: residual {:.6} -> {:.6} after {} iterations, {} evaluations, converged = {}",
            report.residual_history.first().copied().unwrap_or(report.residual),
            report.residual,
            report.iterations,
            report.evaluations,
            report.converged
        );
        Ok(report)
    }
}
