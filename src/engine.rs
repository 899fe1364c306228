//! The SMT core: drives the Tableau to local feasibility, refines
//! nonlinear constraints, and case-splits piecewise-linear constraints over
//! a decision-level trail until a satisfying assignment is found or every
//! branch is refuted.
//!
//! A `SolverOptions`-resolved strategy family (pricing rule, factorization
//! kind, split selector) wired together at construction, then one `solve()`
//! call that drives the whole thing to an [`ExitCode`].

use std::time::Instant;

use faer::Col;
use faer::sparse::Triplet;
use macros::build_option_enum;

use crate::bound_manager::{BoundManager, TighteningKind};
use crate::callback::{Callback, EngineStats};
use crate::constants::{
    CONSTRAINT_VIOLATION_THRESHOLD, DEGENERATE_PIVOT_TOLERANCE, MAX_ITERATIONS_WITHOUT_PROGRESS,
    NON_BASIC_AT_LOWER_TOLERANCE,
};
use crate::constraints::nonlinear::{NonlinearConstraint, NonlinearConstraintVariant};
use crate::constraints::pl::{CaseSplit, PiecewiseLinearConstraint, PlConstraint};
use crate::error::{EngineError, LinAlgError, PivotOutcome};
use crate::linalg::factorization::FactorizationKind;
use crate::linalg::sparse::ConstraintMatrix;
use crate::model::{Model, Statistics};
use crate::preprocessor::Preprocessor;
use crate::pricing::{EntryRule, PricingRule};
use crate::query::Query;
use crate::tableau::{BasicStatus, Tableau};
use crate::terminators::Terminator;
use crate::tightening::{ConstraintTightener, RowTightener};
use crate::{E, ExitCode, I, SolverOptions};

/// What a [`SplitSelector`] needs to know about the current search state to
/// pick an unfixed constraint to branch on.
pub struct SplitContext<'a> {
    pub constraints: &'a [PlConstraint],
    /// Indices into `constraints` whose phase is not yet fixed.
    pub unfixed: &'a [usize],
    pub bounds: &'a BoundManager,
    /// How many times `handle_violations` has observed each constraint
    /// (by index) unsatisfied in the current assignment.
    pub violation_counts: &'a [usize],
    pub assignment: &'a dyn Fn(I) -> E,
}

/// Chooses which unfixed piecewise-linear constraint to case-split on next.
/// Distinct from [`crate::dnc::DivideStrategy`], which partitions a query
/// into subqueries for parallel search rather than choosing a single
/// in-process branch.
pub trait SplitSelector {
    fn new() -> Self
    where
        Self: Sized;

    /// Returns an index into `ctx.unfixed`'s backing `constraints`, or
    /// `None` if there is nothing left to split on.
    fn select(&mut self, ctx: &SplitContext) -> Option<usize>;
}

/// Always branches on the first unfixed constraint in declaration order.
pub struct EarliestReLU;

impl SplitSelector for EarliestReLU {
    fn new() -> Self {
        Self
    }

    fn select(&mut self, ctx: &SplitContext) -> Option<usize> {
        ctx.unfixed.first().copied()
    }
}

/// Branches on whichever unfixed constraint has been caught unsatisfied most often.
pub struct ReLUViolation;

impl SplitSelector for ReLUViolation {
    fn new() -> Self {
        Self
    }

    fn select(&mut self, ctx: &SplitContext) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for &idx in ctx.unfixed {
            let count = ctx.violation_counts[idx];
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((idx, count));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Branch-and-bound score in the style of Bunel et al.: prefers splitting
/// the constraint whose first participating variable's interval straddles
/// zero least symmetrically, the case most likely to need both branches
/// explored.
pub struct BaBSR;

impl SplitSelector for BaBSR {
    fn new() -> Self {
        Self
    }

    fn select(&mut self, ctx: &SplitContext) -> Option<usize> {
        let mut best: Option<(usize, E)> = None;
        for &idx in ctx.unfixed {
            let vars = ctx.constraints[idx].participating_variables();
            let v = match vars.first() {
                Some(&v) => v,
                None => continue,
            };
            let (lb, ub) = (ctx.bounds.lower(v), ctx.bounds.upper(v));
            if !lb.is_finite() || !ub.is_finite() || ub <= lb {
                continue;
            }
            let score = -(lb * ub) / (ub - lb);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Running estimate of each constraint's impact on the search, approximated
/// as an exponential moving average of its violation count since
/// `SplitContext` carries no true post-split infeasibility-delta feedback.
pub struct PseudoImpact {
    impact: Vec<E>,
}

impl SplitSelector for PseudoImpact {
    fn new() -> Self {
        Self { impact: Vec::new() }
    }

    fn select(&mut self, ctx: &SplitContext) -> Option<usize> {
        if self.impact.len() < ctx.constraints.len() {
            self.impact.resize(ctx.constraints.len(), 1.0);
        }
        let mut best: Option<(usize, E)> = None;
        for &idx in ctx.unfixed {
            self.impact[idx] = 0.9 * self.impact[idx] + 0.1 * (ctx.violation_counts[idx] as E);
            let score = self.impact[idx];
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Delegates to `ReLUViolation` once enough violations have accumulated to
/// be informative, `BaBSR` otherwise.
pub struct Auto {
    violation: ReLUViolation,
    babsr: BaBSR,
}

impl SplitSelector for Auto {
    fn new() -> Self {
        Self {
            violation: ReLUViolation::new(),
            babsr: BaBSR::new(),
        }
    }

    fn select(&mut self, ctx: &SplitContext) -> Option<usize> {
        let total: usize = ctx.unfixed.iter().map(|&idx| ctx.violation_counts[idx]).sum();
        if total >= CONSTRAINT_VIOLATION_THRESHOLD {
            self.violation.select(ctx)
        } else {
            self.babsr.select(ctx)
        }
    }
}

build_option_enum!(
    trait_ = SplitSelector,
    name = "SplitStrategy",
    variants = (Auto, EarliestReLU, ReLUViolation, PseudoImpact, BaBSR),
    new_arguments = (),
    doc_header = "Selects which unfixed piecewise-linear constraint to case-split on next: earliest-encountered, most-frequently-violated, a running pseudo-impact estimate, the Branch-and-Bound-SR score, or the default Auto, which switches between ReLUViolation and BaBSR based on accumulated violations."
);

/// Builds an initial basis from columns that appear with coefficient `1` in
/// exactly one row, falling back to any unused column per row. Grounded in
/// the preprocessor's auxiliary-variable equations, each of which
/// contributes exactly one such column (`Preprocessor::introduce_auxiliary_variables`),
/// so a fully-preprocessed query always yields a complete crash basis.
fn crash_basis(matrix: &ConstraintMatrix) -> Result<Vec<I>, EngineError> {
    let m = matrix.nrows();
    let mut basic = vec![usize::MAX; m];
    let mut used = vec![false; matrix.ncols()];

    for row in 0..m {
        for entry in matrix.row(row) {
            if used[entry.index] {
                continue;
            }
            if matrix.column(entry.index).len() == 1 && (entry.value - 1.0).abs() < 1e-9 {
                basic[row] = entry.index;
                used[entry.index] = true;
                break;
            }
        }
    }

    for row in 0..m {
        if basic[row] != usize::MAX {
            continue;
        }
        for entry in matrix.row(row) {
            if !used[entry.index] {
                basic[row] = entry.index;
                used[entry.index] = true;
                break;
            }
        }
    }

    if basic.iter().any(|&v| v == usize::MAX) {
        return Err(EngineError::UnsupportedConstraint);
    }
    Ok(basic)
}

fn pivot_outcome_to_error(outcome: PivotOutcome) -> EngineError {
    match outcome {
        PivotOutcome::Fatal(e) => e,
        _ => EngineError::LinAlg(LinAlgError::MalformedBasis),
    }
}

/// Dependency-injected per-solve collaborators. Kept out of `Engine::new`'s
/// own construction because `InterruptTerminator::new()` can only install
/// its signal handler once per process, and Divide-and-Conquer workers
/// each need an independently-owned terminator sharing one flag.
pub struct EngineHooks {
    pub callback: Box<dyn Callback>,
    pub terminator: Box<dyn Terminator>,
}

/// Outcome of [`Engine::new`]: preprocessing alone can already decide UNSAT,
/// in which case there is no tableau to build.
pub enum EngineInit {
    Ready(Engine),
    PreprocessingUnsat,
}

enum PivotStepOutcome {
    Feasible,
    Infeasible,
    Terminated(ExitCode),
    Fatal(EngineError),
}

enum BacktrackOutcome {
    Resumed,
    Unsat,
    Fatal(EngineError),
}

enum ViolationOutcome {
    Refined,
    Satisfied,
    /// Something is unsatisfied but no unfixed constraint remains to branch
    /// on; the verdict downgrades rather than looping forever.
    Unknown,
    Split(usize),
}

struct DecisionFrame {
    remaining_splits: Vec<CaseSplit>,
}

pub struct Engine {
    tableau: Tableau,
    bounds: BoundManager,
    pl_constraints: Vec<PlConstraint>,
    nonlinear_constraints: Vec<NonlinearConstraintVariant>,
    violation_counts: Vec<usize>,
    entry_rule: Box<dyn EntryRule>,
    split_selector: Box<dyn SplitSelector>,
    hooks: EngineHooks,
    decision_stack: Vec<DecisionFrame>,
    last_restoration_level: Option<usize>,
    stats: EngineStats,
    statistics: Statistics,
    start: Instant,
    num_user_variables: usize,
}

impl Engine {
    pub fn new(mut query: Query, options: &SolverOptions, hooks: EngineHooks) -> Result<EngineInit, EngineError> {
        let num_user_variables = query.number_of_variables();
        let mut bounds = BoundManager::new(num_user_variables, false);

        if Preprocessor::run(&mut query, &mut bounds)? {
            return Ok(EngineInit::PreprocessingUnsat);
        }

        let n = query.number_of_variables();
        let m = query.equations().len();

        let triplets: Vec<Triplet<I, I, E>> = query
            .equations()
            .iter()
            .enumerate()
            .flat_map(|(row, eq)| eq.addends.iter().map(move |a| Triplet::new(row, a.variable, a.coeff)))
            .collect();
        let matrix = ConstraintMatrix::from_triplets(m, n, &triplets);
        let b = Col::from_fn(m, |row| query.equations()[row].scalar);

        let basic = crash_basis(&matrix)?;

        let factorization_kind = options.get_option::<FactorizationKind>("factorization_kind").unwrap_or_default();
        let factorization = FactorizationKind::into_variant(factorization_kind, m);
        let mut tableau = Tableau::new(matrix, b, factorization);
        tableau.initialize_partition(basic);
        tableau.refactorize(&bounds).map_err(pivot_outcome_to_error)?;

        let pricing_rule = options.get_option::<PricingRule>("pricing_rule").unwrap_or_default();
        let mut entry_rule = PricingRule::into_variant(pricing_rule, n);
        entry_rule.recompute(&tableau);

        let split_strategy = options.get_option::<SplitStrategy>("split_strategy").unwrap_or_default();
        let split_selector = SplitStrategy::into_variant(split_strategy);

        let (pl_constraints, nonlinear_constraints) = query.take_constraints();
        let violation_counts = vec![0usize; pl_constraints.len()];

        let mut engine = Engine {
            tableau,
            bounds,
            pl_constraints,
            nonlinear_constraints,
            violation_counts,
            entry_rule,
            split_selector,
            hooks,
            decision_stack: Vec::new(),
            last_restoration_level: None,
            stats: EngineStats::default(),
            statistics: Statistics::default(),
            start: Instant::now(),
            num_user_variables,
        };
        engine.hooks.terminator.initialize();
        Ok(EngineInit::Ready(engine))
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    fn non_basic_at_lower(&self, v: I) -> bool {
        (self.tableau.non_basic_value(v) - self.bounds.lower(v)).abs() < NON_BASIC_AT_LOWER_TOLERANCE
    }

    fn lp_feasible(&self) -> bool {
        (0..self.tableau.m()).all(|row| self.tableau.basic_status(row) == BasicStatus::Between)
    }

    fn total_infeasibility(&self) -> E {
        let mut total = 0.0;
        for row in 0..self.tableau.m() {
            let v = self.tableau.basic_variable(row);
            let value = self.tableau.basic_assignment()[row];
            let (lb, ub) = (self.bounds.lower(v), self.bounds.upper(v));
            if value < lb {
                total += lb - value;
            }
            if value > ub {
                total += value - ub;
            }
        }
        total
    }

    /// Refactorizes to clear the accumulated numeric drift that produced a
    /// `NeedRefactor`/degradation warning. Two such restorations at the same
    /// decision level without an intervening pivot escalate to a fatal
    /// error rather than looping forever.
    fn restore_precision(&mut self) -> Result<(), EngineError> {
        let level = self.bounds.decision_level();
        if self.last_restoration_level == Some(level) {
            return Err(EngineError::PrecisionRestorationExhausted);
        }
        self.last_restoration_level = Some(level);
        self.statistics.precision_restorations += 1;
        self.tableau.refactorize(&self.bounds).map_err(pivot_outcome_to_error)?;
        self.entry_rule.recompute(&self.tableau);
        Ok(())
    }

    /// Drives the Tableau to local LP feasibility using the configured
    /// pricing rule and Harris/standard ratio test, refactorizing on
    /// numeric trouble and treating "no entering variable but still
    /// infeasible" as a proof of infeasibility at the current decision level.
    fn drive_to_lp_feasibility(&mut self) -> PivotStepOutcome {
        let mut iterations = 0usize;
        loop {
            if let Some(code) = self.hooks.terminator.terminate() {
                return PivotStepOutcome::Terminated(code);
            }
            iterations += 1;
            if iterations > MAX_ITERATIONS_WITHOUT_PROGRESS {
                return PivotStepOutcome::Terminated(ExitCode::Unknown);
            }

            if self.tableau.should_check_degradation() {
                self.tableau.reset_degradation_counter();
                if self.tableau.degradation_exceeds_threshold() {
                    if let Err(e) = self.restore_precision() {
                        return PivotStepOutcome::Fatal(e);
                    }
                }
            }

            if self.lp_feasible() {
                return PivotStepOutcome::Feasible;
            }

            let entering = {
                let non_basic_at_lower = |v: I| self.non_basic_at_lower(v);
                self.entry_rule.select_entering(&self.tableau, &non_basic_at_lower)
            };
            let entering = match entering {
                Some(e) => e,
                None => return PivotStepOutcome::Infeasible,
            };
            let increasing = self.non_basic_at_lower(entering);

            if self.tableau.compute_change_column(entering).is_err() {
                match self.restore_precision() {
                    Ok(()) => continue,
                    Err(e) => return PivotStepOutcome::Fatal(e),
                }
            }

            match self.tableau.ratio_test(&self.bounds, increasing) {
                None => match self.tableau.perform_fake_pivot(&self.bounds, increasing) {
                    PivotOutcome::Ok => continue,
                    PivotOutcome::InfeasibleAtThisLevel => return PivotStepOutcome::Infeasible,
                    PivotOutcome::Fatal(e) => return PivotStepOutcome::Fatal(e),
                    PivotOutcome::NeedRefactor => match self.restore_precision() {
                        Ok(()) => continue,
                        Err(e) => return PivotStepOutcome::Fatal(e),
                    },
                },
                Some(leaving_row) => {
                    if self.tableau.compute_pivot_row(leaving_row).is_err() {
                        match self.restore_precision() {
                            Ok(()) => continue,
                            Err(e) => return PivotStepOutcome::Fatal(e),
                        }
                    }

                    let pivot_row_vars = self.tableau.non_basic_variables().to_vec();
                    let pivot_values = self.tableau.pivot_row.clone().unwrap_or_default();
                    let pivot_element = self.tableau.change_column.as_ref().map(|d| d[leaving_row]).unwrap_or(0.0);
                    let entering_cost = self.entry_rule.reduced_cost(entering);

                    match self.tableau.perform_pivot() {
                        PivotOutcome::Ok => {
                            if self.tableau.compute_assignment(&self.bounds).is_err() {
                                match self.restore_precision() {
                                    Ok(()) => continue,
                                    Err(e) => return PivotStepOutcome::Fatal(e),
                                }
                            }
                            self.entry_rule
                                .update_after_pivot(entering, entering_cost, pivot_element, &pivot_row_vars, &pivot_values);
                            self.stats.simplex_pivots += 1;
                            self.statistics.simplex_pivots += 1;
                            if pivot_element.abs() < DEGENERATE_PIVOT_TOLERANCE {
                                self.stats.degenerate_pivots += 1;
                                self.statistics.degenerate_pivots += 1;
                            }
                        }
                        PivotOutcome::InfeasibleAtThisLevel => return PivotStepOutcome::Infeasible,
                        PivotOutcome::Fatal(e) => return PivotStepOutcome::Fatal(e),
                        PivotOutcome::NeedRefactor => match self.restore_precision() {
                            Ok(()) => continue,
                            Err(e) => return PivotStepOutcome::Fatal(e),
                        },
                    }
                }
            }
        }
    }

    /// Drains the Bound Manager's dirty tightenings, notifies every
    /// constraint touching the moved variable, and resyncs the tableau's
    /// non-basic assignments to the new, possibly tighter, bounds.
    fn apply_pending_tightenings(&mut self) -> Result<(), EngineError> {
        let tightenings = self.bounds.get_tightenings();
        if tightenings.is_empty() {
            return Ok(());
        }
        for t in &tightenings {
            self.stats.tightenings_applied += 1;
            self.statistics.tightenings_applied += 1;
            for c in &mut self.pl_constraints {
                if c.participating_variables().contains(&t.variable) {
                    match t.kind {
                        TighteningKind::Lower => c.notify_lower_bound(t.variable, t.value),
                        TighteningKind::Upper => c.notify_upper_bound(t.variable, t.value),
                    }
                }
            }
            for c in &mut self.nonlinear_constraints {
                if c.participating_variables().contains(&t.variable) {
                    match t.kind {
                        TighteningKind::Lower => c.notify_lower_bound(t.variable, t.value),
                        TighteningKind::Upper => c.notify_upper_bound(t.variable, t.value),
                    }
                }
            }
        }
        self.resync_after_bound_change()
    }

    fn resync_after_bound_change(&mut self) -> Result<(), EngineError> {
        if self.bounds.is_inconsistent() {
            return Ok(());
        }
        let non_basic = self.tableau.non_basic_variables().to_vec();
        for j in non_basic {
            let (lb, ub) = (self.bounds.lower(j), self.bounds.upper(j));
            let x = self.tableau.non_basic_value(j);
            let clamped = x.clamp(lb, ub);
            if clamped != x {
                self.tableau.set_non_basic_value(j, clamped);
            }
        }
        self.tableau.compute_assignment(&self.bounds).map_err(pivot_outcome_to_error)
    }

    /// Refines nonlinear constraints first (their refinements become new
    /// piecewise-linear constraints that the next iteration's tightening
    /// pass will already see), then looks for an unsatisfied
    /// piecewise-linear constraint to branch on.
    fn handle_violations(&mut self) -> ViolationOutcome {
        let tableau = &self.tableau;
        let assignment = |v: I| tableau.value(v);

        let mut refined_any = false;
        for i in 0..self.nonlinear_constraints.len() {
            if self.nonlinear_constraints[i].constraint_obsolete() {
                continue;
            }
            if self.nonlinear_constraints[i].satisfied(&assignment) {
                continue;
            }
            if self.nonlinear_constraints[i].refinement_budget_exhausted() {
                continue;
            }
            let new_constraints = self.nonlinear_constraints[i].refine(&assignment);
            if !new_constraints.is_empty() {
                self.stats.constraints_refined += 1;
                self.statistics.constraints_refined += 1;
                for c in new_constraints {
                    self.violation_counts.push(0);
                    self.pl_constraints.push(c);
                }
                refined_any = true;
            }
        }
        if refined_any {
            return ViolationOutcome::Refined;
        }

        let mut any_violated = false;
        for i in 0..self.pl_constraints.len() {
            if !self.pl_constraints[i].satisfied(&assignment) {
                any_violated = true;
                self.violation_counts[i] += 1;
            }
        }

        let nonlinear_ok = self
            .nonlinear_constraints
            .iter()
            .all(|c| c.satisfied(&assignment) || c.refinement_budget_exhausted());

        if !any_violated && nonlinear_ok {
            return ViolationOutcome::Satisfied;
        }

        let unfixed: Vec<usize> = (0..self.pl_constraints.len())
            .filter(|&i| !self.pl_constraints[i].phase_fixed())
            .collect();

        let ctx = SplitContext {
            constraints: &self.pl_constraints,
            unfixed: &unfixed,
            bounds: &self.bounds,
            violation_counts: &self.violation_counts,
            assignment: &assignment,
        };

        match self.split_selector.select(&ctx) {
            Some(idx) => ViolationOutcome::Split(idx),
            // A constraint is still violated, or a nonlinear constraint's
            // refinement budget was exhausted, with nothing left to branch
            // on: the verdict downgrades rather than reporting a false Sat.
            None if any_violated || !nonlinear_ok => ViolationOutcome::Unknown,
            None => ViolationOutcome::Satisfied,
        }
    }

    fn apply_case_split(&mut self, split: &CaseSplit) {
        for t in &split.tightenings {
            match t.kind {
                TighteningKind::Lower => {
                    self.bounds.tighten_lower(t.variable, t.value);
                }
                TighteningKind::Upper => {
                    self.bounds.tighten_upper(t.variable, t.value);
                }
            }
        }
        // No constraint currently produces `CaseSplit::equations`: every
        // commit a constraint needs is already expressible as a tightening
        // on a variable tied into the tableau by a preprocessor-introduced
        // equation (the pattern every piecewise-linear constraint's
        // `entailed_tightenings` relies on).
    }

    fn split_on(&mut self, idx: usize) -> Result<(), EngineError> {
        let mut splits = self.pl_constraints[idx].case_splits();
        if splits.is_empty() {
            return Ok(());
        }
        let first = splits.remove(0);
        self.bounds.push();
        self.apply_case_split(&first);
        self.decision_stack.push(DecisionFrame { remaining_splits: splits });
        self.resync_after_bound_change()
    }

    /// Pops the current decision level; if the frame it belonged to still
    /// has an untried branch, applies it and resumes search, otherwise pops
    /// the frame itself and keeps unwinding. Returns UNSAT once the stack is
    /// exhausted.
    fn backtrack(&mut self) -> BacktrackOutcome {
        loop {
            if self.decision_stack.is_empty() {
                return BacktrackOutcome::Unsat;
            }
            self.bounds.pop();
            self.stats.pops_performed += 1;
            self.statistics.pops_performed += 1;

            let next_split = self.decision_stack.last_mut().and_then(|f| f.remaining_splits.pop());
            match next_split {
                Some(split) => {
                    self.bounds.push();
                    self.apply_case_split(&split);
                    if let Err(e) = self.resync_after_bound_change() {
                        return BacktrackOutcome::Fatal(e);
                    }
                    return BacktrackOutcome::Resumed;
                }
                None => {
                    self.decision_stack.pop();
                }
            }
        }
    }

    fn extract_model(&self) -> Model {
        let mut model = Model::new();
        for v in 0..self.num_user_variables {
            model.set(v, self.tableau.value(v));
        }
        model
    }

    /// Main SMT loop: alternates restoring LP feasibility,
    /// propagating tightenings, and either refining/splitting or reporting
    /// a verdict, backtracking whenever a branch is refuted.
    pub fn solve(&mut self) -> ExitCode {
        loop {
            if let Some(code) = self.hooks.terminator.terminate() {
                return code;
            }
            self.stats.main_loop_iterations += 1;
            self.statistics.main_loop_iterations += 1;
            self.stats.stack_depth = self.decision_stack.len();
            self.statistics.max_stack_depth = self.statistics.max_stack_depth.max(self.decision_stack.len());

            match self.drive_to_lp_feasibility() {
                PivotStepOutcome::Terminated(code) => return code,
                PivotStepOutcome::Fatal(_) => {
                    self.statistics.elapsed = self.start.elapsed();
                    return ExitCode::Error;
                }
                PivotStepOutcome::Infeasible => match self.backtrack() {
                    BacktrackOutcome::Resumed => continue,
                    BacktrackOutcome::Unsat => {
                        self.statistics.elapsed = self.start.elapsed();
                        return ExitCode::Unsat;
                    }
                    BacktrackOutcome::Fatal(_) => {
                        self.statistics.elapsed = self.start.elapsed();
                        return ExitCode::Error;
                    }
                },
                PivotStepOutcome::Feasible => {}
            }

            RowTightener::run(&self.tableau, &mut self.bounds);
            for c in &mut self.pl_constraints {
                ConstraintTightener::run_pl(c, &mut self.bounds);
            }
            for c in &mut self.nonlinear_constraints {
                ConstraintTightener::run_nonlinear(c, &mut self.bounds);
            }

            if self.bounds.is_inconsistent() {
                match self.backtrack() {
                    BacktrackOutcome::Resumed => continue,
                    BacktrackOutcome::Unsat => {
                        self.statistics.elapsed = self.start.elapsed();
                        return ExitCode::Unsat;
                    }
                    BacktrackOutcome::Fatal(_) => {
                        self.statistics.elapsed = self.start.elapsed();
                        return ExitCode::Error;
                    }
                }
                continue;
            }

            if self.apply_pending_tightenings().is_err() {
                self.statistics.elapsed = self.start.elapsed();
                return ExitCode::Error;
            }

            self.stats.current_sum_of_infeasibilities = self.total_infeasibility();
            self.hooks.callback.call(&self.stats);

            match self.handle_violations() {
                ViolationOutcome::Refined => continue,
                ViolationOutcome::Satisfied => {
                    self.statistics.elapsed = self.start.elapsed();
                    return ExitCode::Sat;
                }
                ViolationOutcome::Unknown => {
                    self.statistics.elapsed = self.start.elapsed();
                    return ExitCode::Unknown;
                }
                ViolationOutcome::Split(idx) => {
                    if self.split_on(idx).is_err() {
                        self.statistics.elapsed = self.start.elapsed();
                        return ExitCode::Error;
                    }
                    self.stats.splits_performed += 1;
                    self.statistics.splits_performed += 1;
                }
            }
        }
    }
}

/// Runs a full solve: preprocess, then search. Returns the satisfying
/// assignment only on [`ExitCode::Sat`].
pub fn solve(query: Query, options: &SolverOptions, hooks: EngineHooks) -> (ExitCode, Option<Model>, Statistics) {
    match Engine::new(query, options, hooks) {
        Ok(EngineInit::PreprocessingUnsat) => (ExitCode::Unsat, None, Statistics::default()),
        Ok(EngineInit::Ready(mut engine)) => {
            let code = engine.solve();
            let model = (code == ExitCode::Sat).then(|| engine.extract_model());
            let statistics = engine.statistics().clone();
            (code, model, statistics)
        }
        Err(_) => (ExitCode::Error, None, Statistics::default()),
    }
}

/// Runs preprocessing's bound-tightening to fixpoint without any
/// case-splitting search, returning the tightened `[lower, upper]` interval
/// for each of the query's original variables. Lighter than [`solve`]: no
/// Tableau or decision-level search is built, just the preprocessor's own
/// interval propagation.
pub fn calculate_bounds(mut query: Query) -> Result<(ExitCode, Vec<(E, E)>), EngineError> {
    let num_user_variables = query.number_of_variables();
    let mut bounds = BoundManager::new(num_user_variables, false);
    if Preprocessor::run(&mut query, &mut bounds)? {
        return Ok((ExitCode::Unsat, Vec::new()));
    }
    let intervals = (0..num_user_variables).map(|v| (bounds.lower(v), bounds.upper(v))).collect();
    Ok((ExitCode::Sat, intervals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::pl::ReLU;
    use crate::query::{Equation, EquationType};

    fn trivial_relu_query() -> Query {
        // b in [-3, 3], f = ReLU(b); forces f >= 0 and, since the only
        // equation pins b = 2, the active branch (f = b = 2).
        let mut query = Query::new();
        query.set_number_of_variables(2);
        query.set_lower_bound(0, -3.0).unwrap();
        query.set_upper_bound(0, 3.0).unwrap();
        query.set_lower_bound(1, 0.0).unwrap();
        query.set_upper_bound(1, E::INFINITY).unwrap();
        let eq = Equation::new(EquationType::Eq, 2.0).with_addend(1.0, 0);
        query.add_equation(eq).unwrap();
        query.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(0, 1, None)));
        query
    }

    #[test]
    fn solves_trivial_relu_query_to_sat() {
        let options = SolverOptions::new();
        let hooks = EngineHooks {
            callback: Box::new(crate::callback::NoOpCallback {}),
            terminator: Box::new(crate::terminators::TimeOutTerminator::new(std::time::Duration::ZERO)),
        };
        let (code, model, _stats) = solve(trivial_relu_query(), &options, hooks);
        assert_eq!(code, ExitCode::Sat);
        let model = model.unwrap();
        assert!((model.value(0).unwrap() - 2.0).abs() < 1e-6);
        assert!((model.value(1).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn calculate_bounds_tightens_relu_output() {
        let (code, bounds) = calculate_bounds(trivial_relu_query()).unwrap();
        assert_eq!(code, ExitCode::Sat);
        assert!((bounds[1].0 - 2.0).abs() < 1e-6);
        assert!((bounds[1].1 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn crash_basis_fails_without_unit_columns() {
        let triplets = vec![Triplet::new(0, 0, 2.0), Triplet::new(0, 1, 3.0)];
        let matrix = ConstraintMatrix::from_triplets(1, 2, &triplets);
        assert!(crash_basis(&matrix).is_err());
    }

    #[test]
    fn split_strategy_builds_each_variant() {
        for kind in SplitStrategy::variants {
            let _ = SplitStrategy::into_variant(kind.clone());
        }
    }
}
