//! Sparse symmetric positive definite solver.
//!
//! Thin wrapper around `nalgebra-sparse`'s Cholesky factorization: triplets
//! go in, a reusable factorization comes out. A matrix the factorization
//! rejects (not positive definite, singular) surfaces as
//! [`MeshError::FactorizationFailed`]; there is no iterative fallback and no
//! retry.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::error::{MeshError, Result};

/// A factorized symmetric positive definite system.
///
/// Factorize once, then solve any number of right-hand sides against it.
pub struct SymmetricSolver {
    n: usize,
    cholesky: CscCholesky<f64>,
}

impl SymmetricSolver {
    /// Factorize an `n x n` system given as triplets.
    ///
    /// Duplicate triplets are summed. Near-zero entries are dropped so the
    /// sparsity pattern stays tight.
    pub fn factorize(n: usize, triplets: &[(usize, usize, f64)]) -> Result<Self> {
        let mut coo = CooMatrix::new(n, n);
        for &(i, j, v) in triplets {
            if v.abs() > 1e-14 {
                coo.push(i, j, v);
            }
        }
        let csc = CscMatrix::from(&coo);

        tracing::debug!(n, nnz = csc.nnz(), "factorizing symmetric system");

        let cholesky = CscCholesky::factor(&csc).map_err(|e| MeshError::FactorizationFailed {
            details: format!("{e:?}"),
        })?;

        Ok(Self { n, cholesky })
    }

    /// System dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.n
    }

    /// Solve for a single right-hand side.
    pub fn solve(&self, rhs: &DVector<f64>) -> DVector<f64> {
        let b = DMatrix::from_column_slice(self.n, 1, rhs.as_slice());
        let x = self.cholesky.solve(&b);
        DVector::from_iterator(self.n, x.column(0).iter().copied())
    }

    /// Solve for several right-hand sides (one per column) at once,
    /// reusing the factorization.
    pub fn solve_columns(&self, rhs: &DMatrix<f64>) -> DMatrix<f64> {
        self.cholesky.solve(rhs)
    }
}
