//! Geometry processing algorithms.
//!
//! This module contains the solver-backed operations:
//!
//! - **Laplacian assembly**: neighbor weights, mass matrix, stiffness
//! - **Deformation**: handle-constrained Laplacian editing
//! - **Skinning**: visibility sampling and heat-diffusion bone weights

pub mod deform;
pub mod laplacian;
pub mod skinning;
pub mod solver;

pub use deform::{deform, DeformOptions, Handle};
pub use laplacian::{Laplacian, VertexWeights, WeightPolicy};
pub use skinning::{compute_weights, sample_visibility, SkinWeights, WeightOptions};
pub use solver::SymmetricSolver;
