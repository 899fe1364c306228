//! Reduced-cost vector maintenance and entry-variable selection.
//!
//! Cost is `c = c_B · B⁻¹ · A_N - c_N`, with `c_B` derived purely from the
//! Tableau's `basic_status` classification: a basic below its lower bound
//! contributes `-1` (drive it up), above its upper bound contributes `+1`
//! (drive it down), otherwise `0`. After each pivot the cost is updated
//! incrementally; an accumulated error above [`crate::constants::COST_FUNCTION_ERROR_THRESHOLD`]
//! forces a full recomputation instead.

use macros::build_option_enum;

use crate::constants::{
    COST_FUNCTION_ERROR_THRESHOLD, ENTRY_ELIGIBILITY_TOLERANCE, PSE_GAMMA_ERROR_THRESHOLD,
    PSE_GAMMA_UPDATE_TOLERANCE, PSE_ITERATIONS_BEFORE_RESET,
};
use crate::tableau::{BasicStatus, Tableau};
use crate::{E, I};

pub trait EntryRule {
    fn new(n: usize) -> Self
    where
        Self: Sized;

    /// Recomputes the reduced-cost vector from scratch against the tableau's
    /// current basic statuses.
    fn recompute(&mut self, tableau: &Tableau);

    /// Incrementally updates the cached cost after a pivot, given the
    /// reduced cost of the variable that just entered and the pivot-row
    /// entry at the leaving row.
    fn update_after_pivot(&mut self, entering: I, leaving_reduced_cost: E, pivot_element: E, pivot_row: &[I], row_values: &[E]);

    /// Selects an eligible entering variable, or `None` if the LP is
    /// optimal with respect to the current cost.
    fn select_entering(&self, tableau: &Tableau, non_basic_at_lower: &dyn Fn(I) -> bool) -> Option<I>;

    fn reduced_cost(&self, j: I) -> E;
}

fn basic_cost_contribution(status: BasicStatus) -> E {
    match status {
        BasicStatus::BelowLb => -1.0,
        BasicStatus::AboveUb => 1.0,
        BasicStatus::Between => 0.0,
    }
}

fn recompute_reduced_costs(tableau: &Tableau) -> Vec<E> {
    use faer::Col;

    let n = tableau.n();
    let m = tableau.m();
    let mut c_b = Col::<E>::zeros(m);
    for row in 0..m {
        c_b[row] = basic_cost_contribution(tableau.basic_status(row));
    }
    // rho = c_B^T B^-1, i.e. the unique vector with rho^T B = c_B^T, found
    // by solving B^T rho = c_B (the Tableau's backward transformation).
    let rho = tableau
        .backward_transformation(c_b.as_ref())
        .unwrap_or_else(|_| Col::<E>::zeros(m));

    let mut cost = vec![0.0; n];
    for j in 0..n {
        if tableau.is_basic(j) {
            continue;
        }
        cost[j] = tableau.matrix().column_dot(j, rho.as_ref());
    }
    cost
}

/// Dantzig's rule: enter the most-negative eligible reduced cost.
pub struct DantzigEntryRule {
    cost: Vec<E>,
}

impl EntryRule for DantzigEntryRule {
    fn new(n: usize) -> Self {
        Self { cost: vec![0.0; n] }
    }

    fn recompute(&mut self, tableau: &Tableau) {
        self.cost = recompute_reduced_costs(tableau);
    }

    fn update_after_pivot(&mut self, _entering: I, _leaving_reduced_cost: E, _pivot_element: E, pivot_row_vars: &[I], row_values: &[E]) {
        for (&j, &rv) in pivot_row_vars.iter().zip(row_values.iter()) {
            self.cost[j] -= rv;
        }
    }

    fn select_entering(&self, tableau: &Tableau, non_basic_at_lower: &dyn Fn(I) -> bool) -> Option<I> {
        let mut best: Option<(I, E)> = None;
        for j in 0..tableau.n() {
            if tableau.is_basic(j) {
                continue;
            }
            let c = self.cost[j];
            if c.abs() < ENTRY_ELIGIBILITY_TOLERANCE {
                continue;
            }
            let eligible = if non_basic_at_lower(j) { c < 0.0 } else { c > 0.0 };
            if !eligible {
                continue;
            }
            if best.map_or(true, |(_, best_c)| c.abs() > best_c.abs()) {
                best = Some((j, c));
            }
        }
        best.map(|(j, _)| j)
    }

    fn reduced_cost(&self, j: I) -> E {
        self.cost[j]
    }
}

/// Steepest Edge pricing: like Dantzig but normalized by the true column
/// norm `‖B⁻¹ Aⱼ‖` rather than a cheap surrogate.
pub struct SteepestEdgeEntryRule {
    cost: Vec<E>,
    weights: Vec<E>,
}

impl EntryRule for SteepestEdgeEntryRule {
    fn new(n: usize) -> Self {
        Self {
            cost: vec![0.0; n],
            weights: vec![1.0; n],
        }
    }

    fn recompute(&mut self, tableau: &Tableau) {
        self.cost = recompute_reduced_costs(tableau);
        for j in 0..tableau.n() {
            self.weights[j] = 1.0 + tableau.matrix().column_dense(j).norm_l2().powi(2);
        }
    }

    fn update_after_pivot(&mut self, _entering: I, _leaving_reduced_cost: E, _pivot_element: E, pivot_row_vars: &[I], row_values: &[E]) {
        for (&j, &rv) in pivot_row_vars.iter().zip(row_values.iter()) {
            self.cost[j] -= rv;
        }
    }

    fn select_entering(&self, tableau: &Tableau, non_basic_at_lower: &dyn Fn(I) -> bool) -> Option<I> {
        let mut best: Option<(I, E)> = None;
        for j in 0..tableau.n() {
            if tableau.is_basic(j) {
                continue;
            }
            let c = self.cost[j];
            if c.abs() < ENTRY_ELIGIBILITY_TOLERANCE {
                continue;
            }
            let eligible = if non_basic_at_lower(j) { c < 0.0 } else { c > 0.0 };
            if !eligible {
                continue;
            }
            let score = c * c / self.weights[j].max(1e-12);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((j, score));
            }
        }
        best.map(|(j, _)| j)
    }

    fn reduced_cost(&self, j: I) -> E {
        self.cost[j]
    }
}

/// Projected Steepest Edge (PSE), default pricing rule: maintains a
/// reference-space weight `γ[j]` updated incrementally after each pivot,
/// reset every [`PSE_ITERATIONS_BEFORE_RESET`] pivots or when accumulated
/// γ-error exceeds [`PSE_GAMMA_ERROR_THRESHOLD`].
pub struct ProjectedSteepestEdgeEntryRule {
    cost: Vec<E>,
    gamma: Vec<E>,
    pivots_since_reset: usize,
    accumulated_error: E,
}

impl EntryRule for ProjectedSteepestEdgeEntryRule {
    fn new(n: usize) -> Self {
        Self {
            cost: vec![0.0; n],
            gamma: vec![crate::constants::DEFAULT_PSE_BETA; n],
            pivots_since_reset: 0,
            accumulated_error: 0.0,
        }
    }

    fn recompute(&mut self, tableau: &Tableau) {
        self.cost = recompute_reduced_costs(tableau);
        for g in &mut self.gamma {
            *g = crate::constants::DEFAULT_PSE_BETA;
        }
        self.pivots_since_reset = 0;
        self.accumulated_error = 0.0;
    }

    fn update_after_pivot(&mut self, entering: I, _leaving_reduced_cost: E, pivot_element: E, pivot_row_vars: &[I], row_values: &[E]) {
        for (&j, &rv) in pivot_row_vars.iter().zip(row_values.iter()) {
            self.cost[j] -= rv;
            if pivot_element.abs() > PSE_GAMMA_UPDATE_TOLERANCE {
                let alpha = rv / pivot_element;
                self.gamma[j] = (self.gamma[j]).max(alpha * alpha * self.gamma[entering]);
            }
        }
        self.pivots_since_reset += 1;
        self.accumulated_error += pivot_element.abs() * PSE_GAMMA_UPDATE_TOLERANCE;
        if self.pivots_since_reset >= PSE_ITERATIONS_BEFORE_RESET
            || self.accumulated_error > PSE_GAMMA_ERROR_THRESHOLD
        {
            self.pivots_since_reset = 0;
            self.accumulated_error = 0.0;
            for g in &mut self.gamma {
                *g = crate::constants::DEFAULT_PSE_BETA;
            }
        }
    }

    fn select_entering(&self, tableau: &Tableau, non_basic_at_lower: &dyn Fn(I) -> bool) -> Option<I> {
        let mut best: Option<(I, E)> = None;
        for j in 0..tableau.n() {
            if tableau.is_basic(j) {
                continue;
            }
            let c = self.cost[j];
            if c.abs() < ENTRY_ELIGIBILITY_TOLERANCE {
                continue;
            }
            let eligible = if non_basic_at_lower(j) { c < 0.0 } else { c > 0.0 };
            if !eligible {
                continue;
            }
            let score = c * c / self.gamma[j].max(1e-12);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((j, score));
            }
        }
        best.map(|(j, _)| j)
    }

    fn reduced_cost(&self, j: I) -> E {
        self.cost[j]
    }
}

pub fn cost_recomputation_needed(cached_error: E) -> bool {
    cached_error.abs() > COST_FUNCTION_ERROR_THRESHOLD
}

build_option_enum!(
    trait_ = EntryRule,
    name = "PricingRule",
    variants = (ProjectedSteepestEdgeEntryRule, DantzigEntryRule, SteepestEdgeEntryRule),
    new_arguments = (usize,),
    doc_header = "Selects the pricing rule used to choose the entering variable: Dantzig's most-negative-reduced-cost rule, Steepest Edge, or the default Projected Steepest Edge (PSE)."
);

#[cfg(test)]
mod tests {
    use super::cost_recomputation_needed;

    #[test]
    fn small_error_does_not_force_recompute() {
        assert!(!cost_recomputation_needed(1e-12));
    }

    #[test]
    fn large_error_forces_recompute() {
        assert!(cost_recomputation_needed(1e-5));
    }
}
