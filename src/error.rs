//! Error types for sinew.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias using [`MeshError`].
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors that can occur during mesh construction or a solve.
#[derive(Error, Debug)]
pub enum MeshError {
    /// The mesh has no faces or no vertices.
    #[error("mesh is empty")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate loop).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// An optional per-vertex attribute buffer has the wrong length.
    #[error("{attribute} buffer has {actual} entries, expected {expected}")]
    AttributeCountMismatch {
        /// Name of the attribute buffer.
        attribute: &'static str,
        /// Expected entry count (the vertex count).
        expected: usize,
        /// Actual entry count.
        actual: usize,
    },

    /// The skeleton has no bones eligible for weighting.
    #[error("skeleton has no non-root bones")]
    EmptySkeleton,

    /// A handle or query references a vertex that does not exist.
    #[error("vertex index {vertex} is out of range (mesh has {count} vertices)")]
    VertexOutOfRange {
        /// The offending vertex index.
        vertex: usize,
        /// Number of vertices in the mesh.
        count: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },

    /// Cholesky factorization rejected the system matrix.
    ///
    /// The input was not positive definite (or was singular). This is
    /// terminal for the solve that produced it; it is never retried.
    #[error("factorization failed: {details}")]
    FactorizationFailed {
        /// Description of the failure from the factorization backend.
        details: String,
    },
}

impl MeshError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        MeshError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}
