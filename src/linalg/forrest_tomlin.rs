//! Forrest-Tomlin basis factorizations (C2, variants 3 and 4): a base LU
//! factorization plus a chain of eta updates in product-form-of-inverse
//! style, applied on top of the base's forward/backward solves. Eta updates
//! accumulate until [`crate::constants::REFACTORIZATION_THRESHOLD`] is hit,
//! at which point the Tableau calls `obtain_fresh_basis` again and the chain
//! resets.

use faer::{Col, ColRef};

use crate::constants::{
    ACCEPTABLE_SIMPLEX_PIVOT_THRESHOLD, SPARSE_FORREST_TOMLIN_DIAGONAL_ELEMENT_TOLERANCE,
};
use crate::error::LinAlgError;
use crate::linalg::dense_lu::DenseLu;
use crate::linalg::factorization::BasisFactorization;
use crate::linalg::sparse::ConstraintMatrix;
use crate::linalg::sparse_lu::SparseLu;
use crate::{E, I};

struct EtaUpdate {
    /// Basis position replaced by this pivot.
    r: usize,
    /// `η`, the eta vector: `η[i] = -d[i]/d[r]` for `i != r`, `η[r] = 1/d[r]`.
    eta: Col<E>,
}

impl EtaUpdate {
    fn from_change_column(r: usize, d: ColRef<E>, tolerance: f64) -> Result<Self, LinAlgError> {
        let pivot = d[r];
        if pivot.abs() < tolerance {
            return Err(LinAlgError::MalformedBasis);
        }
        let m = d.nrows();
        let mut eta = Col::<E>::zeros(m);
        for i in 0..m {
            eta[i] = if i == r { 1.0 / pivot } else { -d[i] / pivot };
        }
        Ok(Self { r, eta })
    }

    /// Applies `E_r` to `z` in place: the product-form-of-inverse update to
    /// `B⁻¹ y` after this pivot.
    fn apply_forward(&self, z: &mut Col<E>) {
        let y_r = z[self.r];
        for i in 0..z.nrows() {
            if i == self.r {
                z[i] = self.eta[i] * y_r;
            } else {
                z[i] += self.eta[i] * y_r;
            }
        }
    }

    /// Applies `E_rᵀ` to `z` in place: the dual update used by
    /// `backward_transformation`.
    fn apply_backward(&self, z: &mut Col<E>) {
        let mut dot = 0.0;
        for i in 0..z.nrows() {
            dot += self.eta[i] * z[i];
        }
        z[self.r] = dot;
    }
}

macro_rules! forrest_tomlin_impl {
    ($name:ident, $base:ty, $tolerance:expr) => {
        pub struct $name {
            base: $base,
            etas: Vec<EtaUpdate>,
        }

        impl BasisFactorization for $name {
            fn new(m: usize) -> Self {
                Self {
                    base: <$base as BasisFactorization>::new(m),
                    etas: Vec::new(),
                }
            }

            fn forward_transformation(&self, y: ColRef<E>) -> Result<Col<E>, LinAlgError> {
                let mut z = self.base.forward_transformation(y)?;
                for eta in &self.etas {
                    eta.apply_forward(&mut z);
                }
                Ok(z)
            }

            fn backward_transformation(&self, y: ColRef<E>) -> Result<Col<E>, LinAlgError> {
                let mut z = y.to_owned();
                for eta in self.etas.iter().rev() {
                    eta.apply_backward(&mut z);
                }
                self.base.backward_transformation(z.as_ref())
            }

            fn update_to_adjacent_basis(
                &mut self,
                leaving_index: I,
                change_column: ColRef<E>,
                _new_column: ColRef<E>,
            ) -> Result<(), LinAlgError> {
                let eta = EtaUpdate::from_change_column(leaving_index, change_column, $tolerance)?;
                self.etas.push(eta);
                Ok(())
            }

            fn obtain_fresh_basis(
                &mut self,
                matrix: &ConstraintMatrix,
                basic_columns: &[I],
            ) -> Result<(), LinAlgError> {
                self.base.obtain_fresh_basis(matrix, basic_columns)?;
                self.etas.clear();
                Ok(())
            }

            fn updates_since_refactor(&self) -> usize {
                self.etas.len()
            }
        }
    };
}

forrest_tomlin_impl!(ForrestTomlin, DenseLu, ACCEPTABLE_SIMPLEX_PIVOT_THRESHOLD);
forrest_tomlin_impl!(
    SparseForrestTomlin,
    SparseLu,
    SPARSE_FORREST_TOMLIN_DIAGONAL_ELEMENT_TOLERANCE
);

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    #[test]
    fn eta_update_then_forward_matches_unupdated_identity_case() {
        let triplets: Vec<_> = (0..3).map(|i| Triplet::new(i, i, 1.0)).collect();
        let matrix = ConstraintMatrix::from_triplets(3, 3, &triplets);
        let mut ft = ForrestTomlin::new(3);
        ft.obtain_fresh_basis(&matrix, &[0, 1, 2]).unwrap();

        // Replace basis column 1 with the change column (2, 3, 0); since the
        // base is identity, change_column == new_column here.
        let change_column = Col::from_fn(3, |i| [2.0, 3.0, 0.0][i]);
        ft.update_to_adjacent_basis(1, change_column.as_ref(), change_column.as_ref())
            .unwrap();
        assert_eq!(ft.updates_since_refactor(), 1);

        let y = Col::from_fn(3, |i| [1.0, 2.0, 3.0][i]);
        let x = ft.forward_transformation(y.as_ref()).unwrap();
        // New basis: col0 = e0, col1 = (2,3,0), col2 = e2.
        // B x = y => x0 + 2 x1 = 1, 3 x1 = 2, x2 = 3 => x1 = 2/3, x0 = 1 - 4/3 = -1/3.
        assert!((x[1] - 2.0 / 3.0).abs() < 1e-9);
        assert!((x[0] - (1.0 - 4.0 / 3.0)).abs() < 1e-9);
        assert!((x[2] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn refactor_clears_eta_chain() {
        let triplets: Vec<_> = (0..2).map(|i| Triplet::new(i, i, 1.0)).collect();
        let matrix = ConstraintMatrix::from_triplets(2, 2, &triplets);
        let mut ft = ForrestTomlin::new(2);
        ft.obtain_fresh_basis(&matrix, &[0, 1]).unwrap();
        let d = Col::from_fn(2, |i| [1.0, 1.0][i]);
        ft.update_to_adjacent_basis(0, d.as_ref(), d.as_ref()).unwrap();
        assert_eq!(ft.updates_since_refactor(), 1);
        ft.obtain_fresh_basis(&matrix, &[0, 1]).unwrap();
        assert_eq!(ft.updates_since_refactor(), 0);
    }
}
