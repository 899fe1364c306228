//! Bound tighteners: a row tightener over the current tableau and a
//! constraint tightener that drains each constraint's `entailed_tightenings`.

use faer::Col;

use crate::bound_manager::{BoundManager, TighteningKind};
use crate::constants::ROW_BOUND_TIGHTENER_SATURATION_ITERATIONS;
use crate::constraints::nonlinear::NonlinearConstraint;
use crate::constraints::pl::PiecewiseLinearConstraint;
use crate::tableau::Tableau;
use crate::{E, I};

/// For each tableau row `x_basic + Σ cⱼ·xⱼ = rhs`, interval-evaluates both
/// the basic variable from its non-basics and, symmetrically, each
/// non-basic from the basic and the remaining non-basics. Runs to
/// saturation, capped at [`ROW_BOUND_TIGHTENER_SATURATION_ITERATIONS`].
pub struct RowTightener;

impl RowTightener {
    /// Returns whether any bound was tightened across all rounds.
    pub fn run(tableau: &Tableau, bounds: &mut BoundManager) -> bool {
        let mut changed_any = false;
        for _ in 0..ROW_BOUND_TIGHTENER_SATURATION_ITERATIONS {
            let mut changed = false;
            for row in 0..tableau.m() {
                if Self::tighten_row(tableau, bounds, row) {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            changed_any = true;
        }
        changed_any
    }

    fn row_coefficients(tableau: &Tableau, row: I) -> Option<(Vec<(I, E)>, E)> {
        let mut e_i = Col::<E>::zeros(tableau.m());
        e_i[row] = 1.0;
        let rho = tableau.backward_transformation(e_i.as_ref()).ok()?;
        let coeffs: Vec<(I, E)> = tableau
            .non_basic_variables()
            .iter()
            .map(|&j| (j, tableau.matrix().column_dot(j, rho.as_ref())))
            .filter(|&(_, c)| c.abs() > 1e-12)
            .collect();
        let rhs = tableau.basic_assignment()[row]
            + coeffs.iter().map(|&(j, c)| c * tableau.non_basic_value(j)).sum::<E>();
        Some((coeffs, rhs))
    }

    fn tighten_row(tableau: &Tableau, bounds: &mut BoundManager, row: I) -> bool {
        let basic_var = tableau.basic_variable(row);
        let (coeffs, rhs) = match Self::row_coefficients(tableau, row) {
            Some(x) => x,
            None => return false,
        };

        let mut changed = false;

        // x_basic = rhs - Σ cⱼ·xⱼ, evaluated over each xⱼ's current interval.
        let mut lo = rhs;
        let mut hi = rhs;
        for &(j, c) in &coeffs {
            let (lb, ub) = (bounds.lower(j), bounds.upper(j));
            if c >= 0.0 {
                hi = if ub.is_finite() && hi.is_finite() { hi - c * lb } else { E::INFINITY };
                lo = if lb.is_finite() && lo.is_finite() { lo - c * ub } else { E::NEG_INFINITY };
            } else {
                hi = if lb.is_finite() && hi.is_finite() { hi - c * ub } else { E::INFINITY };
                lo = if ub.is_finite() && lo.is_finite() { lo - c * lb } else { E::NEG_INFINITY };
            }
        }
        if lo.is_finite() {
            changed |= bounds.tighten_lower(basic_var, lo);
        }
        if hi.is_finite() {
            changed |= bounds.tighten_upper(basic_var, hi);
        }

        // Symmetric pass: xⱼ = (rhs - x_basic - Σ_{k≠j} cₖ·xₖ) / cⱼ.
        for &(j, cj) in &coeffs {
            let (basic_lb, basic_ub) = (bounds.lower(basic_var), bounds.upper(basic_var));
            let mut excl_lo = if basic_lb.is_finite() { basic_lb } else { E::NEG_INFINITY };
            let mut excl_hi = if basic_ub.is_finite() { basic_ub } else { E::INFINITY };
            for &(k, ck) in &coeffs {
                if k == j {
                    continue;
                }
                let (lb, ub) = (bounds.lower(k), bounds.upper(k));
                if ck >= 0.0 {
                    excl_lo = if lb.is_finite() && excl_lo.is_finite() { excl_lo + ck * lb } else { E::NEG_INFINITY };
                    excl_hi = if ub.is_finite() && excl_hi.is_finite() { excl_hi + ck * ub } else { E::INFINITY };
                } else {
                    excl_lo = if ub.is_finite() && excl_lo.is_finite() { excl_lo + ck * ub } else { E::NEG_INFINITY };
                    excl_hi = if lb.is_finite() && excl_hi.is_finite() { excl_hi + ck * lb } else { E::INFINITY };
                }
            }
            if !excl_lo.is_finite() && !excl_hi.is_finite() {
                continue;
            }
            let num_lo = if excl_hi.is_finite() { rhs - excl_hi } else { E::NEG_INFINITY };
            let num_hi = if excl_lo.is_finite() { rhs - excl_lo } else { E::INFINITY };
            let (xj_lo, xj_hi) = if cj > 0.0 { (num_lo / cj, num_hi / cj) } else { (num_hi / cj, num_lo / cj) };
            if xj_lo.is_finite() {
                changed |= bounds.tighten_lower(j, xj_lo);
            }
            if xj_hi.is_finite() {
                changed |= bounds.tighten_upper(j, xj_hi);
            }
        }

        changed
    }
}

/// Polls each constraint's `entailed_tightenings` and forwards results to
/// the Bound Manager, also notifying the constraint of whatever new bound
/// it caused so phase state stays current.
pub struct ConstraintTightener;

impl ConstraintTightener {
    pub fn run_pl(constraint: &mut dyn PiecewiseLinearConstraint, bounds: &mut BoundManager) -> bool {
        let mut changed = false;
        for t in constraint.entailed_tightenings() {
            let moved = match t.kind {
                TighteningKind::Lower => bounds.tighten_lower(t.variable, t.value),
                TighteningKind::Upper => bounds.tighten_upper(t.variable, t.value),
            };
            if moved {
                changed = true;
                match t.kind {
                    TighteningKind::Lower => constraint.notify_lower_bound(t.variable, bounds.lower(t.variable)),
                    TighteningKind::Upper => constraint.notify_upper_bound(t.variable, bounds.upper(t.variable)),
                }
            }
        }
        changed
    }

    pub fn run_nonlinear(constraint: &mut dyn NonlinearConstraint, bounds: &mut BoundManager) -> bool {
        let mut changed = false;
        for t in constraint.entailed_tightenings() {
            let moved = match t.kind {
                TighteningKind::Lower => bounds.tighten_lower(t.variable, t.value),
                TighteningKind::Upper => bounds.tighten_upper(t.variable, t.value),
            };
            if moved {
                changed = true;
                match t.kind {
                    TighteningKind::Lower => constraint.notify_lower_bound(t.variable, bounds.lower(t.variable)),
                    TighteningKind::Upper => constraint.notify_upper_bound(t.variable, bounds.upper(t.variable)),
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::pl::ReLU;
    use crate::linalg::factorization::FactorizationKind;
    use crate::linalg::sparse::ConstraintMatrix;
    use faer::sparse::Triplet;

    fn simple_tableau() -> (Tableau, BoundManager) {
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
        bounds.set_upper(1, 4.0);
        tableau.refactorize(&bounds).unwrap();
        (tableau, bounds)
    }

    #[test]
    fn row_tightener_derives_basic_lower_bound_from_non_basic_upper_bound() {
        let (tableau, mut bounds) = simple_tableau();
        RowTightener::run(&tableau, &mut bounds);
        // x0 = 5 - x1, x1 in [0,4] => x0 in [1,5], tighter than x0's own [0,10].
        assert!((bounds.lower(0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn constraint_tightener_forwards_relu_tightenings() {
        let mut relu = ReLU::new(0, 1, None);
        let mut bounds = BoundManager::new(2, false);
        bounds.set_lower(0, 2.0);
        bounds.set_upper(0, 2.0);
        relu.notify_lower_bound(0, 2.0);
        let changed = ConstraintTightener::run_pl(&mut relu, &mut bounds);
        assert!(changed);
        assert!(bounds.lower(1) >= 2.0 - 1e-9);
    }
}
