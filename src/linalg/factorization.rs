//! The basis factorization family.
//!
//! A single trait with four methods, chosen once at construction and never
//! swapped at runtime. `new()` is infallible, it just allocates empty state
//! sized for `m` equations; actual numeric work, which can fail, happens in
//! [`BasisFactorization::obtain_fresh_basis`].

use faer::{Col, ColRef};
use macros::build_option_enum;

use crate::error::LinAlgError;
use crate::linalg::dense_lu::DenseLu;
use crate::linalg::forrest_tomlin::{ForrestTomlin, SparseForrestTomlin};
use crate::linalg::sparse::ConstraintMatrix;
use crate::linalg::sparse_lu::SparseLu;
use crate::{E, I};

/// Interface implemented by each basis-factorization strategy.
pub trait BasisFactorization {
    fn new(m: usize) -> Self
    where
        Self: Sized;

    /// Solves `B x = y` and returns `x`.
    fn forward_transformation(&self, y: ColRef<E>) -> Result<Col<E>, LinAlgError>;

    /// Solves `xᵀ B = yᵀ` and returns `x`.
    fn backward_transformation(&self, y: ColRef<E>) -> Result<Col<E>, LinAlgError>;

    /// Updates the factorization for a basis in which `leaving_index` was
    /// replaced by the column whose change column (`B⁻¹ · new_column`) is
    /// `change_column`.
    fn update_to_adjacent_basis(
        &mut self,
        leaving_index: I,
        change_column: ColRef<E>,
        new_column: ColRef<E>,
    ) -> Result<(), LinAlgError>;

    /// Recomputes the factorization from scratch for the given basis columns
    /// of the full constraint matrix, indexed by `basic_columns[i]` giving
    /// the column of `matrix` occupying basis row/column `i`.
    fn obtain_fresh_basis(
        &mut self,
        matrix: &ConstraintMatrix,
        basic_columns: &[I],
    ) -> Result<(), LinAlgError>;

    /// Number of eta/rank-one updates applied since the last fresh basis,
    /// used by the Tableau to decide when `REFACTORIZATION_THRESHOLD` has
    /// been hit.
    fn updates_since_refactor(&self) -> usize {
        0
    }
}

build_option_enum!(
    trait_ = BasisFactorization,
    name = "FactorizationKind",
    variants = (DenseLu, SparseLu, ForrestTomlin, SparseForrestTomlin),
    new_arguments = (usize,),
    doc_header = "Selects which basis-factorization strategy the Tableau uses: dense LU (correctness baseline), sparse LU (permuted, Markowitz-style pivoting), Forrest-Tomlin (incremental eta updates over a dense base), or sparse Forrest-Tomlin (the default; eta updates over a sparse base, with a diagonal-element tolerance)."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_each_variant() {
        for kind in FactorizationKind::variants {
            let _ = FactorizationKind::into_variant(kind.clone(), 4);
        }
    }
}
