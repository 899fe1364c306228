//! Dense LU basis factorization (C2, variant 1): textbook Gaussian
//! elimination with partial pivoting, used as a correctness baseline against
//! the sparse and incremental variants. Every pivot requests a full
//! refactorization rather than attempting an eta update.

use faer::{Col, ColRef, Mat};

use crate::constants::ACCEPTABLE_SIMPLEX_PIVOT_THRESHOLD;
use crate::error::LinAlgError;
use crate::linalg::factorization::BasisFactorization;
use crate::linalg::sparse::ConstraintMatrix;
use crate::{E, I};

pub struct DenseLu {
    m: usize,
    /// Combined L (unit lower, below diagonal) and U (upper, incl. diagonal)
    /// factors of the row-permuted basis, i.e. `P·B = L·U`.
    lu: Option<Mat<E>>,
    /// `perm[i]` is the original row occupying pivoted row `i`.
    perm: Option<Vec<usize>>,
}

impl DenseLu {
    fn factorize(&mut self, basis: Mat<E>) -> Result<(), LinAlgError> {
        let m = self.m;
        let mut lu = basis;
        let mut perm: Vec<usize> = (0..m).collect();

        for k in 0..m {
            let mut pivot_row = k;
            let mut pivot_val = lu[(k, k)].abs();
            for i in (k + 1)..m {
                let v = lu[(i, k)].abs();
                if v > pivot_val {
                    pivot_val = v;
                    pivot_row = i;
                }
            }
            if pivot_val < ACCEPTABLE_SIMPLEX_PIVOT_THRESHOLD {
                return Err(LinAlgError::MalformedBasis);
            }
            if pivot_row != k {
                swap_rows(&mut lu, k, pivot_row);
                perm.swap(k, pivot_row);
            }
            let diag = lu[(k, k)];
            for i in (k + 1)..m {
                let factor = lu[(i, k)] / diag;
                lu[(i, k)] = factor;
                for j in (k + 1)..m {
                    let sub = factor * lu[(k, j)];
                    lu[(i, j)] -= sub;
                }
            }
        }

        self.lu = Some(lu);
        self.perm = Some(perm);
        Ok(())
    }
}

fn swap_rows(mat: &mut Mat<E>, a: usize, b: usize) {
    if a == b {
        return;
    }
    let ncols = mat.ncols();
    for col in 0..ncols {
        let tmp = mat[(a, col)];
        mat[(a, col)] = mat[(b, col)];
        mat[(b, col)] = tmp;
    }
}

impl BasisFactorization for DenseLu {
    fn new(m: usize) -> Self {
        Self { m, lu: None, perm: None }
    }

    fn forward_transformation(&self, y: ColRef<E>) -> Result<Col<E>, LinAlgError> {
        let lu = self.lu.as_ref().ok_or(LinAlgError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinAlgError::Uninitialized)?;
        let m = self.m;

        // Permute: y' = P y
        let mut z = Col::<E>::zeros(m);
        for i in 0..m {
            z[i] = y[perm[i]];
        }

        // Forward substitution, L is unit lower triangular.
        for i in 0..m {
            let mut sum = z[i];
            for j in 0..i {
                sum -= lu[(i, j)] * z[j];
            }
            z[i] = sum;
        }

        // Back substitution, U is upper triangular.
        for i in (0..m).rev() {
            let mut sum = z[i];
            for j in (i + 1)..m {
                sum -= lu[(i, j)] * z[j];
            }
            z[i] = sum / lu[(i, i)];
        }

        Ok(z)
    }

    fn backward_transformation(&self, y: ColRef<E>) -> Result<Col<E>, LinAlgError> {
        let lu = self.lu.as_ref().ok_or(LinAlgError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinAlgError::Uninitialized)?;
        let m = self.m;

        // Solve U^T z = y (U^T lower triangular).
        let mut z = Col::<E>::zeros(m);
        for i in 0..m {
            let mut sum = y[i];
            for j in 0..i {
                sum -= lu[(j, i)] * z[j];
            }
            z[i] = sum / lu[(i, i)];
        }

        // Solve L^T w = z (L^T upper triangular, unit diagonal).
        let mut w = Col::<E>::zeros(m);
        for i in (0..m).rev() {
            let mut sum = z[i];
            for j in (i + 1)..m {
                sum -= lu[(j, i)] * w[j];
            }
            w[i] = sum;
        }

        // Undo the row permutation: x[perm[i]] = w[i].
        let mut x = Col::<E>::zeros(m);
        for i in 0..m {
            x[perm[i]] = w[i];
        }
        Ok(x)
    }

    fn update_to_adjacent_basis(
        &mut self,
        _leaving_index: I,
        _change_column: ColRef<E>,
        _new_column: ColRef<E>,
    ) -> Result<(), LinAlgError> {
        // Dense LU never updates incrementally; the caller is expected to
        // treat this as a cue to call `obtain_fresh_basis`.
        Err(LinAlgError::NumericFactorization)
    }

    fn obtain_fresh_basis(
        &mut self,
        matrix: &ConstraintMatrix,
        basic_columns: &[I],
    ) -> Result<(), LinAlgError> {
        let m = self.m;
        if basic_columns.len() != m {
            return Err(LinAlgError::DimensionMismatch {
                expected: m,
                found: basic_columns.len(),
            });
        }
        let mut basis = Mat::<E>::zeros(m, m);
        for (j, &col) in basic_columns.iter().enumerate() {
            let column = matrix.column_dense(col);
            for i in 0..m {
                basis[(i, j)] = column[i];
            }
        }
        self.factorize(basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    fn identity_matrix(m: usize) -> ConstraintMatrix {
        let triplets: Vec<_> = (0..m).map(|i| Triplet::new(i, i, 1.0)).collect();
        ConstraintMatrix::from_triplets(m, m, &triplets)
    }

    #[test]
    fn solves_simple_system() {
        let triplets = vec![
            Triplet::new(0, 0, 4.0),
            Triplet::new(0, 1, 3.0),
            Triplet::new(1, 0, 6.0),
            Triplet::new(1, 1, 3.0),
        ];
        let matrix = ConstraintMatrix::from_triplets(2, 2, &triplets);
        let mut lu = DenseLu::new(2);
        lu.obtain_fresh_basis(&matrix, &[0, 1]).unwrap();

        let y = Col::from_fn(2, |i| if i == 0 { 1.0 } else { 0.0 });
        let x = lu.forward_transformation(y.as_ref()).unwrap();
        // B x = y: 4x0 + 3x1 = 1, 6x0 + 3x1 = 0 => x0 = -0.5, x1 = 1.0
        assert!((x[0] - (-0.5)).abs() < 1e-9);
        assert!((x[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identity_round_trips() {
        let matrix = identity_matrix(3);
        let mut lu = DenseLu::new(3);
        lu.obtain_fresh_basis(&matrix, &[0, 1, 2]).unwrap();
        let y = Col::from_fn(3, |i| (i + 1) as E);
        let x = lu.forward_transformation(y.as_ref()).unwrap();
        for i in 0..3 {
            assert!((x[i] - y[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn singular_basis_reports_malformed() {
        let triplets = vec![Triplet::new(0, 0, 1.0), Triplet::new(1, 0, 2.0)];
        let matrix = ConstraintMatrix::from_triplets(2, 2, &triplets);
        let mut lu = DenseLu::new(2);
        assert!(lu.obtain_fresh_basis(&matrix, &[0, 0]).is_err());
    }
}
