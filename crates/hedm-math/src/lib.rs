//! Geometry primitives for HEDM scan refinement.
//!
//! Degree-based trigonometry, orientation matrices, reciprocal lattices,
//! the forward diffraction model and the beam-illumination weight.

pub mod diffraction;
pub mod illumination;
pub mod lattice;
pub mod orientation;
pub mod trig;
