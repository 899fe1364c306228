//! Revised-Simplex state and operations.
//!
//! Holds the constraint matrix in all three sparse container forms, the
//! current basic/non-basic partition, the assignment, and the basis
//! factorization. Pivoting never throws: routines return a [`PivotOutcome`]
//! that callers pattern-match instead of unwinding through an exception.

use faer::{Col, ColRef};

use crate::bound_manager::BoundManager;
use crate::constants::{
    DEGRADATION_CHECKING_FREQUENCY, DEGRADATION_THRESHOLD, HARRIS_RATIO_ADDITIVE_BASE,
    HARRIS_RATIO_MULTIPLICATIVE_BASE, MAX_SIMPLEX_PIVOT_SEARCH_ITERATIONS,
    PIVOT_ROW_AND_COLUMN_TOLERANCE, REFACTORIZATION_THRESHOLD,
};
use crate::error::PivotOutcome;
use crate::linalg::factorization::{BasisFactorization, FactorizationKind};
use crate::linalg::sparse::ConstraintMatrix;
use crate::{E, I};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicStatus {
    BelowLb,
    Between,
    AboveUb,
}

/// How the leaving variable is chosen when more than one basic bounds the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatioTestKind {
    Standard,
    #[default]
    Harris,
}

/// Partition captured at a decision-level push and restored on pop, per
/// [`Tableau::snapshot_partition`].
#[derive(Debug, Clone)]
pub struct PartitionSnapshot {
    basic: Vec<I>,
    non_basic: Vec<I>,
    non_basic_assignment: Vec<E>,
}

pub struct Tableau {
    m: usize,
    n: usize,
    matrix: ConstraintMatrix,
    b: Col<E>,

    /// `basic[i]` = variable occupying basis row `i`.
    basic: Vec<I>,
    /// `non_basic[k]` = variable occupying non-basic slot `k`.
    non_basic: Vec<I>,
    /// `basic_row[v]` = `Some(i)` if `v` is basic at row `i`, else `None`.
    basic_row: Vec<Option<I>>,

    basic_assignment: Col<E>,
    non_basic_assignment: Vec<E>,
    basic_status: Vec<BasicStatus>,

    factorization: Box<dyn BasisFactorization>,
    pivots_since_progress: usize,
    pivots_since_degradation_check: usize,

    pub entering: Option<I>,
    pub leaving_row: Option<I>,
    pub change_column: Option<Col<E>>,
    pub pivot_row: Option<Vec<E>>,

    pub ratio_test_kind: RatioTestKind,
}

impl Tableau {
    pub fn new(matrix: ConstraintMatrix, b: Col<E>, factorization: Box<dyn BasisFactorization>) -> Self {
        let m = matrix.nrows();
        let n = matrix.ncols();
        Self {
            m,
            n,
            matrix,
            b,
            basic: Vec::new(),
            non_basic: Vec::new(),
            basic_row: vec![None; n],
            basic_assignment: Col::<E>::zeros(m),
            non_basic_assignment: vec![0.0; n],
            basic_status: Vec::new(),
            factorization,
            pivots_since_progress: 0,
            pivots_since_degradation_check: 0,
            entering: None,
            leaving_row: None,
            change_column: None,
            pivot_row: None,
            ratio_test_kind: RatioTestKind::default(),
        }
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn matrix(&self) -> &ConstraintMatrix {
        &self.matrix
    }

    pub fn basic_variable(&self, row: I) -> I {
        self.basic[row]
    }

    pub fn is_basic(&self, v: I) -> bool {
        self.basic_row[v].is_some()
    }

    pub fn basic_assignment(&self) -> &Col<E> {
        &self.basic_assignment
    }

    pub fn non_basic_variables(&self) -> &[I] {
        &self.non_basic
    }

    pub fn non_basic_value(&self, v: I) -> E {
        self.non_basic_assignment[v]
    }

    pub fn set_non_basic_value(&mut self, v: I, x: E) {
        self.non_basic_assignment[v] = x;
    }

    pub fn basic_status(&self, row: I) -> BasicStatus {
        self.basic_status[row]
    }

    /// Current value of any variable, basic or non-basic. Constraints and
    /// the Engine's satisfaction checks read assignments through this
    /// rather than caring which partition a variable is in.
    pub fn value(&self, v: I) -> E {
        match self.basic_row[v] {
            Some(row) => self.basic_assignment[row],
            None => self.non_basic_assignment[v],
        }
    }

    /// Initializes the partition with `basic` occupying rows `0..m` in order
    /// given and every remaining variable non-basic at zero.
    pub fn initialize_partition(&mut self, basic: Vec<I>) {
        self.basic_row = vec![None; self.n];
        for (row, &v) in basic.iter().enumerate() {
            self.basic_row[v] = Some(row);
        }
        self.non_basic = (0..self.n).filter(|v| self.basic_row[*v].is_none()).collect();
        self.basic = basic;
        self.basic_status = vec![BasicStatus::Between; self.m];
    }

    fn classify(&self, value: E, lb: E, ub: E, tol: E) -> BasicStatus {
        if value < lb - tol {
            BasicStatus::BelowLb
        } else if value > ub + tol {
            BasicStatus::AboveUb
        } else {
            BasicStatus::Between
        }
    }

    /// `y = b - Σ_{j non-basic} Aⱼ xⱼ`; `basic_assignment = B⁻¹ y`.
    pub fn compute_assignment(&mut self, bounds: &BoundManager) -> Result<(), PivotOutcome> {
        let mut y = self.b.clone();
        for &j in &self.non_basic {
            let xj = self.non_basic_assignment[j];
            if xj == 0.0 {
                continue;
            }
            for entry in self.matrix.column(j) {
                y[entry.index] -= entry.value * xj;
            }
        }
        let x = self
            .factorization
            .forward_transformation(y.as_ref())
            .map_err(|_| PivotOutcome::NeedRefactor)?;
        self.basic_assignment = x;
        self.recompute_basic_statuses(bounds);
        Ok(())
    }

    fn recompute_basic_statuses(&mut self, bounds: &BoundManager) {
        const TOL: E = 1e-9;
        for row in 0..self.m {
            let v = self.basic[row];
            let value = self.basic_assignment[row];
            self.basic_status[row] = self.classify(value, bounds.lower(v), bounds.upper(v), TOL);
        }
    }

    /// `d = B⁻¹ · A[entering]`.
    pub fn compute_change_column(&mut self, entering: I) -> Result<(), PivotOutcome> {
        let column = self.matrix.column_dense(entering);
        let d = self
            .factorization
            .forward_transformation(column.as_ref())
            .map_err(|_| PivotOutcome::NeedRefactor)?;
        self.entering = Some(entering);
        self.change_column = Some(d);
        Ok(())
    }

    /// `row = eᵢᵀ B⁻¹ · (-A_N)` for the chosen leaving row `i`.
    pub fn compute_pivot_row(&mut self, leaving_row: I) -> Result<(), PivotOutcome> {
        let mut e_i = Col::<E>::zeros(self.m);
        e_i[leaving_row] = 1.0;
        let rho = self
            .factorization
            .backward_transformation(e_i.as_ref())
            .map_err(|_| PivotOutcome::NeedRefactor)?;
        let row: Vec<E> = self
            .non_basic
            .iter()
            .map(|&j| -self.matrix.column_dot(j, rho.as_ref()))
            .collect();
        self.leaving_row = Some(leaving_row);
        self.pivot_row = Some(row);
        Ok(())
    }

    /// Standard or Harris two-pass ratio test over the current change
    /// column. Returns the chosen basis row, or `None` if no basic bounds
    /// the step (a fake pivot is appropriate).
    pub fn ratio_test(&self, bounds: &BoundManager, increasing: bool) -> Option<I> {
        let d = self.change_column.as_ref()?;
        match self.ratio_test_kind {
            RatioTestKind::Standard => self.ratio_test_standard(bounds, d, increasing),
            RatioTestKind::Harris => self.ratio_test_harris(bounds, d, increasing),
        }
    }

    fn ratio_test_standard(&self, bounds: &BoundManager, d: &Col<E>, increasing: bool) -> Option<I> {
        let mut best: Option<(I, E)> = None;
        for row in 0..self.m {
            let dv = d[row];
            if dv.abs() < 1e-11 {
                continue;
            }
            let v = self.basic[row];
            let value = self.basic_assignment[row];
            let (lb, ub) = (bounds.lower(v), bounds.upper(v));
            let step = self.limiting_step(value, lb, ub, dv, increasing);
            if let Some(step) = step {
                let replace = match best {
                    None => true,
                    Some((_, best_step)) => {
                        step < best_step - 1e-12
                            || (step <= best_step + 1e-12 && dv.abs() > d[best.unwrap().0].abs())
                    }
                };
                if replace {
                    best = Some((row, step));
                }
            }
        }
        best.map(|(row, _)| row)
    }

    fn ratio_test_harris(&self, bounds: &BoundManager, d: &Col<E>, increasing: bool) -> Option<I> {
        let mut relaxed_max_step = E::INFINITY;
        for row in 0..self.m {
            let dv = d[row];
            if dv.abs() < 1e-11 {
                continue;
            }
            let v = self.basic[row];
            let value = self.basic_assignment[row];
            let (lb, ub) = (bounds.lower(v), bounds.upper(v));
            let delta = HARRIS_RATIO_ADDITIVE_BASE
                + HARRIS_RATIO_MULTIPLICATIVE_BASE * ub.abs().max(lb.abs());
            let relaxed_lb = if lb.is_finite() { lb - delta } else { lb };
            let relaxed_ub = if ub.is_finite() { ub + delta } else { ub };
            if let Some(step) = self.limiting_step(value, relaxed_lb, relaxed_ub, dv, increasing) {
                relaxed_max_step = relaxed_max_step.min(step);
            }
        }
        if !relaxed_max_step.is_finite() {
            return None;
        }

        let mut best: Option<(I, E)> = None;
        let mut attempts = 0;
        for row in 0..self.m {
            if attempts >= MAX_SIMPLEX_PIVOT_SEARCH_ITERATIONS {
                break;
            }
            let dv = d[row];
            if dv.abs() < ACCEPTABLE_PIVOT_MAGNITUDE {
                continue;
            }
            let v = self.basic[row];
            let value = self.basic_assignment[row];
            let (lb, ub) = (bounds.lower(v), bounds.upper(v));
            if let Some(step) = self.limiting_step(value, lb, ub, dv, increasing) {
                if step <= relaxed_max_step + 1e-9 {
                    attempts += 1;
                    let better = match best {
                        None => true,
                        Some((best_row, _)) => dv.abs() > d[best_row].abs(),
                    };
                    if better {
                        best = Some((row, step));
                    }
                }
            }
        }
        best.map(|(row, _)| row)
    }

    fn limiting_step(&self, value: E, lb: E, ub: E, dv: E, increasing: bool) -> Option<E> {
        // As the entering variable increases by t, this basic moves by -dv*t.
        let rate = -dv;
        if increasing {
            if rate < 0.0 && lb.is_finite() {
                return Some((value - lb) / -rate);
            }
            if rate > 0.0 && ub.is_finite() {
                return Some((ub - value) / rate);
            }
        } else {
            if rate > 0.0 && lb.is_finite() {
                return Some((value - lb) / rate);
            }
            if rate < 0.0 && ub.is_finite() {
                return Some((ub - value) / -rate);
            }
        }
        None
    }

    /// Executes the pivot chosen by `entering`/`leaving_row`/`change_column`.
    pub fn perform_pivot(&mut self) -> PivotOutcome {
        let (entering, leaving_row, d) = match (self.entering, self.leaving_row, self.change_column.clone()) {
            (Some(e), Some(r), Some(d)) => (e, r, d),
            _ => return PivotOutcome::InfeasibleAtThisLevel,
        };

        let leaving_var = self.basic[leaving_row];
        let new_column = self.matrix.column_dense(entering);

        if let Some(row) = &self.pivot_row {
            let entering_slot = self.non_basic.iter().position(|&v| v == entering);
            if let Some(slot) = entering_slot {
                let cross_check = (row[slot] + d[leaving_row]).abs();
                if cross_check > PIVOT_ROW_AND_COLUMN_TOLERANCE {
                    return PivotOutcome::NeedRefactor;
                }
            }
        }

        if self
            .factorization
            .update_to_adjacent_basis(leaving_row, d.as_ref(), new_column.as_ref())
            .is_err()
        {
            return PivotOutcome::NeedRefactor;
        }

        self.basic_row[leaving_var] = None;
        self.basic_row[entering] = Some(leaving_row);
        self.basic[leaving_row] = entering;
        if let Some(pos) = self.non_basic.iter().position(|&v| v == entering) {
            self.non_basic[pos] = leaving_var;
        }

        self.pivots_since_progress = 0;
        self.pivots_since_degradation_check += 1;
        if self.factorization.updates_since_refactor() >= REFACTORIZATION_THRESHOLD {
            return PivotOutcome::NeedRefactor;
        }
        PivotOutcome::Ok
    }

    /// The non-basic jumps directly between its own two bounds; the basis is
    /// unchanged, only the assignment of dependent basics updates.
    pub fn perform_fake_pivot(&mut self, bounds: &BoundManager, increasing: bool) -> PivotOutcome {
        let entering = match self.entering {
            Some(e) => e,
            None => return PivotOutcome::InfeasibleAtThisLevel,
        };
        let d = match &self.change_column {
            Some(d) => d.clone(),
            None => return PivotOutcome::InfeasibleAtThisLevel,
        };
        let (lb, ub) = (bounds.lower(entering), bounds.upper(entering));
        if !lb.is_finite() || !ub.is_finite() {
            return PivotOutcome::InfeasibleAtThisLevel;
        }
        let step = if increasing { ub - lb } else { lb - ub };
        self.non_basic_assignment[entering] = if increasing { ub } else { lb };
        for row in 0..self.m {
            self.basic_assignment[row] -= d[row] * step;
        }
        self.recompute_basic_statuses(bounds);
        PivotOutcome::Ok
    }

    /// Degradation check: `‖B x - b‖_∞` against `DEGRADATION_THRESHOLD`,
    /// run every `DEGRADATION_CHECKING_FREQUENCY` pivots.
    pub fn should_check_degradation(&self) -> bool {
        self.pivots_since_degradation_check >= DEGRADATION_CHECKING_FREQUENCY
    }

    pub fn degradation(&self) -> E {
        let mut residual = Col::<E>::zeros(self.m);
        for (row, &v) in self.basic.iter().enumerate() {
            let xv = self.basic_assignment[row];
            if xv == 0.0 {
                continue;
            }
            for entry in self.matrix.column(v) {
                residual[entry.index] += entry.value * xv;
            }
        }
        for &j in &self.non_basic {
            let xj = self.non_basic_assignment[j];
            if xj == 0.0 {
                continue;
            }
            for entry in self.matrix.column(j) {
                residual[entry.index] += entry.value * xj;
            }
        }
        let mut max_abs: E = 0.0;
        for row in 0..self.m {
            max_abs = max_abs.max((residual[row] - self.b[row]).abs());
        }
        max_abs
    }

    pub fn reset_degradation_counter(&mut self) {
        self.pivots_since_degradation_check = 0;
    }

    pub fn degradation_exceeds_threshold(&self) -> bool {
        self.degradation() > DEGRADATION_THRESHOLD
    }

    pub fn increment_no_progress(&mut self) {
        self.pivots_since_progress += 1;
    }

    pub fn pivots_since_progress(&self) -> usize {
        self.pivots_since_progress
    }

    /// Exposes `yᵀ B⁻¹` for the cost manager, which prices out the
    /// basic infeasibility cost vector against every non-basic column.
    pub fn backward_transformation(&self, y: ColRef<E>) -> Result<Col<E>, PivotOutcome> {
        self.factorization
            .backward_transformation(y)
            .map_err(|_| PivotOutcome::NeedRefactor)
    }

    /// Captures enough of the partition to restore it after a decision-level
    /// pop, without snapshotting the factorization itself: `restore_partition`
    /// rebuilds it with a fresh `refactorize`.
    pub fn snapshot_partition(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            basic: self.basic.clone(),
            non_basic: self.non_basic.clone(),
            non_basic_assignment: self.non_basic_assignment.clone(),
        }
    }

    /// Restores a partition captured by `snapshot_partition` and refactorizes
    /// to obtain a consistent basis and assignment for it.
    pub fn restore_partition(&mut self, snapshot: &PartitionSnapshot, bounds: &BoundManager) -> Result<(), PivotOutcome> {
        self.basic = snapshot.basic.clone();
        self.non_basic = snapshot.non_basic.clone();
        self.non_basic_assignment = snapshot.non_basic_assignment.clone();
        self.basic_row = vec![None; self.n];
        for (row, &v) in self.basic.iter().enumerate() {
            self.basic_row[v] = Some(row);
        }
        self.basic_status = vec![BasicStatus::Between; self.m];
        self.refactorize(bounds)
    }

    pub fn refactorize(&mut self, bounds: &BoundManager) -> Result<(), PivotOutcome> {
        let basic = self.basic.clone();
        self.factorization
            .obtain_fresh_basis(&self.matrix, &basic)
            .map_err(|e| PivotOutcome::Fatal(e.into()))?;
        self.pivots_since_degradation_check = 0;
        self.compute_assignment(bounds)
    }
}

const ACCEPTABLE_PIVOT_MAGNITUDE: E = 1e-9;

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    fn simple_tableau() -> (Tableau, BoundManager) {
        // x0 + x1 = 5, x0 basic, x1 non-basic.
        let triplets = vec![Triplet::new(0, 0, 1.0), Triplet::new(0, 1, 1.0)];
        let matrix = ConstraintMatrix::from_triplets(1, 2, &triplets);
        let b = Col::from_fn(1, |_| 5.0);
        let factorization = FactorizationKind::into_variant(FactorizationKind::default(), 1);
        let mut tableau = Tableau::new(matrix, b, factorization);
        tableau.initialize_partition(vec![0]);
        let mut bounds = BoundManager::new(2, false);
        bounds.set_lower(0, 0.0);
        bounds.set_upper(0, 10.0);
        bounds.set_lower(1, 0.0);
        bounds.set_upper(1, 10.0);
        tableau.refactorize(&bounds).unwrap();
        (tableau, bounds)
    }

    #[test]
    fn compute_assignment_solves_row() {
        let (tableau, _bounds) = simple_tableau();
        assert!((tableau.basic_assignment()[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn change_column_matches_identity_row() {
        let (mut tableau, _bounds) = simple_tableau();
        tableau.compute_change_column(1).unwrap();
        let d = tableau.change_column.clone().unwrap();
        assert!((d[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ratio_test_picks_unique_bounding_row() {
        let (mut tableau, bounds) = simple_tableau();
        tableau.compute_change_column(1).unwrap();
        let row = tableau.ratio_test(&bounds, true);
        assert_eq!(row, Some(0));
    }

    #[test]
    fn partition_snapshot_restores_basis_and_non_basic_values() {
        let (mut tableau, bounds) = simple_tableau();
        let snapshot = tableau.snapshot_partition();
        tableau.set_non_basic_value(1, 3.0);
        tableau.compute_assignment(&bounds).unwrap();
        assert!((tableau.basic_assignment()[0] - 2.0).abs() < 1e-9);

        tableau.restore_partition(&snapshot, &bounds).unwrap();
        assert!((tableau.basic_assignment()[0] - 5.0).abs() < 1e-9);
        assert_eq!(tableau.basic_variable(0), 0);
    }
}
