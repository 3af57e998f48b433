//! Voxel-wise orientation and lattice refinement for scanning HEDM.
//!
//! Population matches predicted spots against the observed catalog once;
//! evaluation then moves contributions incrementally and scores the
//! matched rows; the driver hands the objective to a bounded solver.

pub mod accumulator;
pub mod catalog;
pub mod driver;
pub mod evaluator;
pub mod io;
pub mod populate;
pub mod problem;
pub mod tables;
pub mod update;
