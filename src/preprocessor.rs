//! Preprocessor: constraint-side tightening to fixpoint, variable
//! elimination, optional equation-based elimination, auxiliary-variable
//! introduction for piecewise-linear constraints, and obsolete-constraint
//! removal.

use crate::bound_manager::BoundManager;
use crate::constants::{PP_NUM_TIGHTENING_ITERATIONS, PREPROCESSOR_ALMOST_FIXED_THRESHOLD};
use crate::constraints::pl::{PiecewiseLinearConstraint, PlConstraint};
use crate::error::EngineError;
use crate::query::{Addend, Equation, EquationType, Query};
use crate::tightening::ConstraintTightener;
use crate::{E, I};

pub struct Preprocessor;

impl Preprocessor {
    /// Runs every stage in order. Returns `Ok(true)` if the query was found
    /// UNSAT already at preprocessing time (inconsistent bounds, or a fixed
    /// variable conflicting with an equation's scalar).
    pub fn run(query: &mut Query, bounds: &mut BoundManager) -> Result<bool, EngineError> {
        Self::seed_bounds(query, bounds);
        Self::convert_inequalities_to_equalities(query, bounds);

        Self::tighten_to_fixpoint(query, bounds);
        if bounds.is_inconsistent() {
            return Ok(true);
        }

        if Self::eliminate_almost_fixed_variables(query, bounds)? {
            return Ok(true);
        }

        Self::eliminate_via_equations(query, bounds);
        if bounds.is_inconsistent() {
            return Ok(true);
        }

        Self::introduce_auxiliary_variables(query, bounds);

        let (removed_pl, removed_nl) = query.remove_obsolete_constraints();
        let _ = (removed_pl, removed_nl);

        bounds.validate()?;
        Ok(false)
    }

    fn seed_bounds(query: &Query, bounds: &mut BoundManager) {
        bounds.grow_to(query.number_of_variables());
        for v in 0..query.number_of_variables() {
            bounds.set_lower(v, query.lower_bound(v));
            bounds.set_upper(v, query.upper_bound(v));
        }
    }

    /// Introduces a non-negative slack per inequality so every equation is
    /// an equality: `Σcᵢxᵢ ≤ s` becomes `Σcᵢxᵢ + slack = s, slack ≥ 0`;
    /// `Σcᵢxᵢ ≥ s` becomes `Σcᵢxᵢ − slack = s, slack ≥ 0`.
    fn convert_inequalities_to_equalities(query: &mut Query, bounds: &mut BoundManager) {
        let n = query.equations().len();
        for i in 0..n {
            let op = query.equations()[i].op;
            let coeff = match op {
                EquationType::Eq => continue,
                EquationType::Le => 1.0,
                EquationType::Ge => -1.0,
            };
            let slack = query.add_variable(0.0, E::INFINITY);
            bounds.grow_to(query.number_of_variables());
            bounds.set_lower(slack, 0.0);
            let equation = &mut query.equations_mut()[i];
            equation.op = EquationType::Eq;
            equation.addends.push(Addend { coeff, variable: slack });
        }
    }

    fn tighten_to_fixpoint(query: &mut Query, bounds: &mut BoundManager) {
        for _ in 0..PP_NUM_TIGHTENING_ITERATIONS {
            let mut changed = false;
            for c in query.piecewise_linear_constraints_mut() {
                changed |= ConstraintTightener::run_pl(c, bounds);
            }
            for c in query.nonlinear_constraints_mut() {
                changed |= ConstraintTightener::run_nonlinear(c, bounds);
            }
            if bounds.is_inconsistent() || !changed {
                break;
            }
        }
    }

    /// Variables whose interval has collapsed below the almost-fixed
    /// threshold are pinned to their midpoint; every constraint is notified
    /// so it can rewrite its participation or mark itself obsolete. An
    /// equation whose remaining free addends can't reconcile the scalar
    /// against the fixed value reports UNSAT.
    fn eliminate_almost_fixed_variables(query: &mut Query, bounds: &mut BoundManager) -> Result<bool, EngineError> {
        let n = query.number_of_variables();
        let mut fixed = vec![None; n];
        for v in 0..n {
            let (lb, ub) = (bounds.lower(v), bounds.upper(v));
            if (ub - lb).abs() < PREPROCESSOR_ALMOST_FIXED_THRESHOLD {
                fixed[v] = Some((lb + ub) / 2.0);
            }
        }

        for c in query.piecewise_linear_constraints_mut() {
            for &v in &c.participating_variables() {
                if let Some(value) = fixed[v] {
                    c.eliminate_variable(v, value);
                }
            }
        }

        for equation in query.equations_mut() {
            let mut remaining: Vec<Addend> = Vec::new();
            let mut fixed_contribution = 0.0;
            for addend in &equation.addends {
                if let Some(value) = fixed[addend.variable] {
                    fixed_contribution += addend.coeff * value;
                } else {
                    remaining.push(*addend);
                }
            }
            equation.addends = remaining;
            equation.scalar -= fixed_contribution;
            if equation.addends.is_empty() {
                let satisfied = match equation.op {
                    EquationType::Eq => equation.scalar.abs() < PREPROCESSOR_ALMOST_FIXED_THRESHOLD,
                    EquationType::Le => equation.scalar >= -PREPROCESSOR_ALMOST_FIXED_THRESHOLD,
                    EquationType::Ge => equation.scalar <= PREPROCESSOR_ALMOST_FIXED_THRESHOLD,
                };
                if !satisfied {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Simple Gaussian elimination over equality equations: whenever an
    /// equation reduces to a single free addend, its variable is fixed and
    /// fed back into the bound manager.
    fn eliminate_via_equations(query: &mut Query, bounds: &mut BoundManager) {
        for equation in query.equations() {
            if equation.op != EquationType::Eq {
                continue;
            }
            if equation.addends.len() == 1 {
                let addend = equation.addends[0];
                if addend.coeff.abs() > 1e-12 {
                    let value = equation.scalar / addend.coeff;
                    bounds.tighten_lower(addend.variable, value);
                    bounds.tighten_upper(addend.variable, value);
                }
            }
        }
    }

    /// Each ReLU becomes `f − b − aux = 0, aux ≥ 0, aux ≤ max(0, −lb[b])`;
    /// each AbsoluteValue introduces `pos, neg ≥ 0` with `b = pos − neg`,
    /// `f = pos + neg`; each Max introduces one slack per element,
    /// `f − elements[i] − s_i = 0, s_i ≥ 0`, so that pinning `s_i` to `0`
    /// once element `i` is known to win forces `f = elements[i]`. Sign's
    /// case split already pins `f` to ±1 directly via bound tightening, so no
    /// auxiliary variable is introduced for it.
    fn introduce_auxiliary_variables(query: &mut Query, bounds: &mut BoundManager) {
        let n = query.piecewise_linear_constraints().len();

        let mut relu_targets: Vec<(usize, I, E)> = Vec::new();
        let mut abs_targets: Vec<(usize, I, I, E, E)> = Vec::new();
        let mut max_targets: Vec<(usize, I, Vec<I>)> = Vec::new();

        for i in 0..n {
            match &query.piecewise_linear_constraints()[i] {
                PlConstraint::ReLU(relu) if relu.aux.is_none() => {
                    let ub_aux = (-bounds.lower(relu.b)).max(0.0);
                    relu_targets.push((i, relu.b, ub_aux));
                }
                PlConstraint::AbsoluteValue(abs) if abs.pos.is_none() => {
                    let ub_pos = bounds.upper(abs.b).max(0.0);
                    let ub_neg = (-bounds.lower(abs.b)).max(0.0);
                    abs_targets.push((i, abs.b, abs.f, ub_pos, ub_neg));
                }
                PlConstraint::Max(max) if max.slacks.is_none() => {
                    max_targets.push((i, max.f, max.elements.clone()));
                }
                _ => {}
            }
        }

        let mut new_equations: Vec<Equation> = Vec::new();

        for (i, b, ub_aux) in relu_targets {
            let aux = query.add_variable(0.0, ub_aux);
            bounds.grow_to(query.number_of_variables());
            bounds.set_lower(aux, 0.0);
            bounds.set_upper(aux, ub_aux);
            let f = match &query.piecewise_linear_constraints()[i] {
                PlConstraint::ReLU(relu) => relu.f,
                _ => unreachable!(),
            };
            if let PlConstraint::ReLU(relu) = &mut query.piecewise_linear_constraints_mut()[i] {
                relu.aux = Some(aux);
            }
            new_equations.push(
                Equation::new(EquationType::Eq, 0.0)
                    .with_addend(1.0, f)
                    .with_addend(-1.0, b)
                    .with_addend(-1.0, aux),
            );
        }

        for (i, b, f, ub_pos, ub_neg) in abs_targets {
            let pos = query.add_variable(0.0, ub_pos);
            bounds.grow_to(query.number_of_variables());
            bounds.set_lower(pos, 0.0);
            bounds.set_upper(pos, ub_pos);
            let neg = query.add_variable(0.0, ub_neg);
            bounds.grow_to(query.number_of_variables());
            bounds.set_lower(neg, 0.0);
            bounds.set_upper(neg, ub_neg);
            if let PlConstraint::AbsoluteValue(abs) = &mut query.piecewise_linear_constraints_mut()[i] {
                abs.set_aux(pos, neg);
            }
            new_equations.push(
                Equation::new(EquationType::Eq, 0.0)
                    .with_addend(1.0, b)
                    .with_addend(-1.0, pos)
                    .with_addend(1.0, neg),
            );
            new_equations.push(
                Equation::new(EquationType::Eq, 0.0)
                    .with_addend(1.0, f)
                    .with_addend(-1.0, pos)
                    .with_addend(-1.0, neg),
            );
        }

        for (i, f, elements) in max_targets {
            let mut slacks = Vec::with_capacity(elements.len());
            for &element in &elements {
                let ub_slack = (bounds.upper(f) - bounds.lower(element)).max(0.0);
                let slack = query.add_variable(0.0, ub_slack);
                bounds.grow_to(query.number_of_variables());
                bounds.set_lower(slack, 0.0);
                bounds.set_upper(slack, ub_slack);
                slacks.push(slack);
                new_equations.push(
                    Equation::new(EquationType::Eq, 0.0)
                        .with_addend(1.0, f)
                        .with_addend(-1.0, element)
                        .with_addend(-1.0, slack),
                );
            }
            if let PlConstraint::Max(max) = &mut query.piecewise_linear_constraints_mut()[i] {
                max.set_slacks(slacks);
            }
        }

        for eq in new_equations {
            let _ = query.add_equation(eq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::pl::ReLU;

    #[test]
    fn almost_fixed_variable_is_pinned_and_constraint_notified() {
        let mut query = Query::new();
        query.set_number_of_variables(2);
        query.set_lower_bound(0, 2.0).unwrap();
        query.set_upper_bound(0, 2.0).unwrap();
        query.set_lower_bound(1, -10.0).unwrap();
        query.set_upper_bound(1, 10.0).unwrap();
        query.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(0, 1, None)));

        let mut bounds = BoundManager::new(2, false);
        let unsat = Preprocessor::run(&mut query, &mut bounds).unwrap();
        assert!(!unsat);
        // aux variable introduced, phase fixed to Active since b pinned at 2 >= 0.
        assert_eq!(query.number_of_variables(), 3);
    }

    #[test]
    fn conflicting_fixed_variable_detected_unsat() {
        let mut query = Query::new();
        query.set_number_of_variables(1);
        query.set_lower_bound(0, 1.0).unwrap();
        query.set_upper_bound(0, 1.0).unwrap();
        let eq = Equation::new(EquationType::Eq, 5.0).with_addend(1.0, 0);
        query.add_equation(eq).unwrap();

        let mut bounds = BoundManager::new(1, false);
        let unsat = Preprocessor::run(&mut query, &mut bounds).unwrap();
        assert!(unsat);
    }
}
