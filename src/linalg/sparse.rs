//! Container kinds for the constraint matrix `A`.
//!
//! A [`ConstraintMatrix`] keeps three views of the same data: a CSC/CSR pair
//! built on `faer`'s sparse types for fast whole-column/whole-row access,
//! an unsorted per-row and per-column triplet list for cheap incremental
//! dot products against a sparse vector, and a dense `m x n` mirror used by
//! the Tableau's hot paths (row tightener, degradation check).

use faer::sparse::{SparseColMat, SparseRowMat, Triplet};
use faer::{Col, ColRef, Mat};

use crate::{E, I};

#[derive(Debug, Clone, Default)]
pub struct UnsortedEntry {
    pub index: I,
    pub value: E,
}

#[derive(Debug, Clone)]
pub struct ConstraintMatrix {
    nrows: usize,
    ncols: usize,
    csc: SparseColMat<I, E>,
    csr: SparseRowMat<I, E>,
    unsorted_columns: Vec<Vec<UnsortedEntry>>,
    unsorted_rows: Vec<Vec<UnsortedEntry>>,
    dense: Mat<E>,
}

impl ConstraintMatrix {
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[Triplet<I, I, E>]) -> Self {
        let csc = SparseColMat::try_new_from_triplets(nrows, ncols, triplets)
            .expect("constraint matrix triplets must be well-formed");
        let csr = SparseRowMat::try_new_from_triplets(nrows, ncols, triplets)
            .expect("constraint matrix triplets must be well-formed");

        let mut unsorted_columns = vec![Vec::new(); ncols];
        let mut unsorted_rows = vec![Vec::new(); nrows];
        for t in triplets {
            unsorted_columns[t.col].push(UnsortedEntry {
                index: t.row,
                value: t.val,
            });
            unsorted_rows[t.row].push(UnsortedEntry {
                index: t.col,
                value: t.val,
            });
        }

        let mut dense = Mat::<E>::zeros(nrows, ncols);
        for t in triplets {
            dense[(t.row, t.col)] += t.val;
        }

        Self {
            nrows,
            ncols,
            csc,
            csr,
            unsorted_columns,
            unsorted_rows,
            dense,
        }
    }

    pub fn empty(nrows: usize, ncols: usize) -> Self {
        Self::from_triplets(nrows, ncols, &[])
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn csc(&self) -> &SparseColMat<I, E> {
        &self.csc
    }

    pub fn csr(&self) -> &SparseRowMat<I, E> {
        &self.csr
    }

    pub fn dense(&self) -> &Mat<E> {
        &self.dense
    }

    pub fn column(&self, j: usize) -> &[UnsortedEntry] {
        &self.unsorted_columns[j]
    }

    pub fn row(&self, i: usize) -> &[UnsortedEntry] {
        &self.unsorted_rows[i]
    }

    /// `Aⱼ` as a dense column vector, for use in `B⁻¹ · A[entering]`.
    pub fn column_dense(&self, j: usize) -> Col<E> {
        let mut out = Col::<E>::zeros(self.nrows);
        for entry in &self.unsorted_columns[j] {
            out[entry.index] = entry.value;
        }
        out
    }

    /// Sparse dot product of row `i` against a dense vector.
    pub fn row_dot(&self, i: usize, x: ColRef<E>) -> E {
        self.unsorted_rows[i]
            .iter()
            .map(|entry| entry.value * x[entry.index])
            .sum()
    }

    /// Sparse dot product of column `j` against a dense vector.
    pub fn column_dot(&self, j: usize, x: ColRef<E>) -> E {
        self.unsorted_columns[j]
            .iter()
            .map(|entry| entry.value * x[entry.index])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_matrix() -> ConstraintMatrix {
        // [[1, 0, 2], [0, 3, 0]]
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(0, 2, 2.0),
            Triplet::new(1, 1, 3.0),
        ];
        ConstraintMatrix::from_triplets(2, 3, &triplets)
    }

    #[test]
    fn dense_mirror_matches_triplets() {
        let mat = small_matrix();
        assert_eq!(mat.dense()[(0, 0)], 1.0);
        assert_eq!(mat.dense()[(0, 2)], 2.0);
        assert_eq!(mat.dense()[(1, 1)], 3.0);
        assert_eq!(mat.dense()[(1, 0)], 0.0);
    }

    #[test]
    fn row_dot_matches_dense() {
        let mat = small_matrix();
        let x = Col::from_fn(3, |i| (i + 1) as E);
        assert_eq!(mat.row_dot(0, x.as_ref()), 1.0 * 1.0 + 2.0 * 3.0);
        assert_eq!(mat.row_dot(1, x.as_ref()), 3.0 * 2.0);
    }

    #[test]
    fn column_dense_matches_column_list() {
        let mat = small_matrix();
        let col = mat.column_dense(2);
        assert_eq!(col[0], 2.0);
        assert_eq!(col[1], 0.0);
    }
}
