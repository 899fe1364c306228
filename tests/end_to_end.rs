//! End-to-end solves over hand-built queries, exercising the full
//! preprocess → Simplex → case-split (or DnC worker pool) pipeline the way a
//! parser-fed query would run in practice.

use std::time::Duration;

use lrasolve::bound_manager::{Tightening, TighteningKind};
use lrasolve::callback::NoOpCallback;
use lrasolve::constraints::nonlinear::{NonlinearConstraintVariant, Sigmoid};
use lrasolve::constraints::pl::{AbsoluteValue, CaseSplit, Disjunction, Max, PlConstraint, ReLU};
use lrasolve::dnc::{self, DncConfig};
use lrasolve::engine::{self, EngineHooks};
use lrasolve::model::Model;
use lrasolve::query::{Equation, EquationType, Query};
use lrasolve::terminators::TimeOutTerminator;
use lrasolve::{ExitCode, SolverOptions, E};

fn solve_query(query: Query) -> (ExitCode, Option<Model>) {
    let options = SolverOptions::new();
    let hooks = EngineHooks {
        callback: Box::new(NoOpCallback {}),
        terminator: Box::new(TimeOutTerminator::new(Duration::from_secs(10))),
    };
    let (code, model, _stats) = engine::solve(query, &options, hooks);
    (code, model)
}

fn abs_value_network(x5_lower: E, x5_upper: E) -> Query {
    let mut q = Query::new();
    q.set_number_of_variables(6);
    q.set_lower_bound(0, -1.0).unwrap();
    q.set_upper_bound(0, 1.0).unwrap();
    q.set_lower_bound(5, x5_lower).unwrap();
    q.set_upper_bound(5, x5_upper).unwrap();

    // x0 = x1
    q.add_equation(Equation::new(EquationType::Eq, 0.0).with_addend(1.0, 0).with_addend(-1.0, 1))
        .unwrap();
    // x0 = -x3  =>  x0 + x3 = 0
    q.add_equation(Equation::new(EquationType::Eq, 0.0).with_addend(1.0, 0).with_addend(1.0, 3))
        .unwrap();
    // x2 + x4 = x5
    q.add_equation(
        Equation::new(EquationType::Eq, 0.0)
            .with_addend(1.0, 2)
            .with_addend(1.0, 4)
            .with_addend(-1.0, 5),
    )
    .unwrap();

    q.add_piecewise_linear_constraint(PlConstraint::AbsoluteValue(AbsoluteValue::new(1, 2)));
    q.add_piecewise_linear_constraint(PlConstraint::AbsoluteValue(AbsoluteValue::new(3, 4)));
    q
}

#[test]
fn absolute_value_sum_is_unsat_when_too_small_to_reach_x5() {
    let (code, _) = solve_query(abs_value_network(5.0, 6.0));
    assert_eq!(code, ExitCode::Unsat);
}

#[test]
fn absolute_value_sum_is_sat_once_x5_reachable() {
    let (code, model) = solve_query(abs_value_network(0.5, 6.0));
    assert_eq!(code, ExitCode::Sat);
    let model = model.unwrap();
    let x0 = model.value(0).unwrap();
    let x5 = model.value(5).unwrap();
    assert!((0.5..=6.0).contains(&x5));
    assert!((x0.abs() + x0.abs() - x5).abs() < 1e-5);
}

#[test]
fn sigmoid_pinned_to_its_own_input_settles_near_zero() {
    let mut q = Query::new();
    q.set_number_of_variables(2);
    q.set_lower_bound(0, -10.0).unwrap();
    q.set_upper_bound(0, 10.0).unwrap();
    // f <= b
    q.add_equation(Equation::new(EquationType::Le, 0.0).with_addend(1.0, 1).with_addend(-1.0, 0))
        .unwrap();
    // f >= b
    q.add_equation(Equation::new(EquationType::Ge, 0.0).with_addend(1.0, 1).with_addend(-1.0, 0))
        .unwrap();
    q.add_nonlinear_constraint(NonlinearConstraintVariant::Sigmoid(Sigmoid::new(0, 1)));

    let (code, model) = solve_query(q);
    assert_eq!(code, ExitCode::Sat);
    let model = model.unwrap();
    let b = model.value(0).unwrap();
    let f = model.value(1).unwrap();
    assert!((f - b).abs() < 1e-4);
    // sigmoid(b) == b has exactly one real root, near b ~= 0.6438.
    let sigmoid_b = 1.0 / (1.0 + (-b).exp());
    assert!((f - sigmoid_b).abs() < 1e-3, "f = {f} should track sigmoid(b) = {sigmoid_b}");
    assert!((b - 10.0).abs() > 1e-6 && (b + 10.0).abs() > 1e-6, "b = {b} should be an interior crossing, not a pinned bound");
}

#[test]
fn disjunction_picks_either_offered_cell() {
    let mut q = Query::new();
    q.set_number_of_variables(2);
    q.set_upper_bound(0, 10.0).unwrap();
    q.set_upper_bound(1, 10.0).unwrap();

    let lb = |v, x| Tightening {
        variable: v,
        value: x,
        kind: TighteningKind::Lower,
    };
    let ub = |v, x| Tightening {
        variable: v,
        value: x,
        kind: TighteningKind::Upper,
    };
    let cell_a = CaseSplit::with_tightenings(vec![ub(0, 1.0), lb(1, 9.0)]);
    let cell_b = CaseSplit::with_tightenings(vec![lb(0, 9.0), ub(1, 1.0)]);
    q.add_piecewise_linear_constraint(PlConstraint::Disjunction(Disjunction::new(vec![cell_a, cell_b])));

    let (code, model) = solve_query(q);
    assert_eq!(code, ExitCode::Sat);
    let model = model.unwrap();
    let x = model.value(0).unwrap();
    let y = model.value(1).unwrap();
    let in_cell_a = x <= 1.0 + 1e-6 && y >= 9.0 - 1e-6;
    let in_cell_b = x >= 9.0 - 1e-6 && y <= 1.0 + 1e-6;
    assert!(in_cell_a || in_cell_b, "solution ({x}, {y}) is in neither offered cell");
}

#[test]
fn max_output_tracks_the_actual_winning_element() {
    let mut q = Query::new();
    q.set_number_of_variables(4);
    q.set_lower_bound(0, 2.99).unwrap();
    q.set_upper_bound(0, 3.01).unwrap();
    q.set_lower_bound(1, 6.99).unwrap();
    q.set_upper_bound(1, 7.01).unwrap();
    q.set_lower_bound(2, -1.01).unwrap();
    q.set_upper_bound(2, -0.99).unwrap();

    q.add_piecewise_linear_constraint(PlConstraint::Max(Max::new(3, vec![0, 1, 2])));

    let (code, model) = solve_query(q);
    assert_eq!(code, ExitCode::Sat);
    let model = model.unwrap();
    let e0 = model.value(0).unwrap();
    let e1 = model.value(1).unwrap();
    let e2 = model.value(2).unwrap();
    let f = model.value(3).unwrap();

    // e1's interval dominates both others, so it must be the winner...
    assert!((f - e1).abs() < 1e-5, "f = {f} should track the dominant element e1 = {e1}");
    // ...and f must equal the true max regardless of which element wins.
    assert!((f - e0.max(e1).max(e2)).abs() < 1e-5, "f = {f} does not equal max(e0, e1, e2)");
}

/// A tiny two-ReLU-layer network: two inputs feed two hidden pre-activations,
/// each gated by a ReLU, recombined into one output. Smaller than a
/// realistic verification network but the same shape: linear layer, ReLU,
/// linear recombination, output inequality.
fn relu_chain_network() -> Query {
    let mut q = Query::new();
    q.set_number_of_variables(7);
    q.set_lower_bound(0, -1.0).unwrap();
    q.set_upper_bound(0, 1.0).unwrap();
    q.set_lower_bound(1, -1.0).unwrap();
    q.set_upper_bound(1, 1.0).unwrap();
    q.set_lower_bound(4, 0.0).unwrap();
    q.set_lower_bound(5, 0.0).unwrap();
    q.mark_input_variable(0, 0).unwrap();
    q.mark_input_variable(1, 1).unwrap();
    q.mark_output_variable(4, 0).unwrap();
    q.mark_output_variable(6, 1).unwrap();

    // h0 = x0 + x1
    q.add_equation(
        Equation::new(EquationType::Eq, 0.0)
            .with_addend(1.0, 2)
            .with_addend(-1.0, 0)
            .with_addend(-1.0, 1),
    )
    .unwrap();
    // h1 = x0 - x1
    q.add_equation(
        Equation::new(EquationType::Eq, 0.0)
            .with_addend(1.0, 3)
            .with_addend(-1.0, 0)
            .with_addend(1.0, 1),
    )
    .unwrap();
    // y1 = r1 + 1
    q.add_equation(Equation::new(EquationType::Eq, 1.0).with_addend(1.0, 6).with_addend(-1.0, 5))
        .unwrap();
    // output: r0 <= y1
    q.add_equation(Equation::new(EquationType::Le, 0.0).with_addend(1.0, 4).with_addend(-1.0, 6))
        .unwrap();

    q.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(2, 4, None)));
    q.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(3, 5, None)));
    q
}

#[test]
fn relu_chain_sat_respects_output_inequality() {
    let (code, model) = solve_query(relu_chain_network());
    assert_eq!(code, ExitCode::Sat);
    let model = model.unwrap();
    let x0 = model.value(0).unwrap();
    let x1 = model.value(1).unwrap();
    let h0 = model.value(2).unwrap();
    let h1 = model.value(3).unwrap();
    let r0 = model.value(4).unwrap();
    let r1 = model.value(5).unwrap();
    let y1 = model.value(6).unwrap();

    assert!((h0 - (x0 + x1)).abs() < 1e-5);
    assert!((h1 - (x0 - x1)).abs() < 1e-5);
    assert!((r0 - h0.max(0.0)).abs() < 1e-5);
    assert!((r1 - h1.max(0.0)).abs() < 1e-5);
    assert!((y1 - (r1 + 1.0)).abs() < 1e-5);
    assert!(r0 <= y1 + 1e-5);
}

#[test]
fn dnc_solves_fixed_input_network_matching_reference_forward_pass() {
    let mut q = Query::new();
    q.set_number_of_variables(7);
    // Inputs fixed to a concrete point, as in a single-point verification query.
    q.set_lower_bound(0, 0.0).unwrap();
    q.set_upper_bound(0, 0.0).unwrap();
    q.set_lower_bound(1, 0.0).unwrap();
    q.set_upper_bound(1, 0.0).unwrap();
    q.set_lower_bound(4, 0.0).unwrap();
    q.set_lower_bound(5, 0.0).unwrap();
    q.mark_input_variable(0, 0).unwrap();
    q.mark_input_variable(1, 1).unwrap();

    // h0 = x0 + x1 + 1  =>  h0 == 1 at the fixed point
    q.add_equation(
        Equation::new(EquationType::Eq, 1.0)
            .with_addend(1.0, 2)
            .with_addend(-1.0, 0)
            .with_addend(-1.0, 1),
    )
    .unwrap();
    // h1 = x0 - x1 - 1  =>  h1 == -1 at the fixed point
    q.add_equation(
        Equation::new(EquationType::Eq, -1.0)
            .with_addend(1.0, 3)
            .with_addend(-1.0, 0)
            .with_addend(1.0, 1),
    )
    .unwrap();
    // y = r0 - r1
    q.add_equation(
        Equation::new(EquationType::Eq, 0.0)
            .with_addend(1.0, 6)
            .with_addend(-1.0, 4)
            .with_addend(1.0, 5),
    )
    .unwrap();

    q.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(2, 4, None)));
    q.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(3, 5, None)));

    let options = SolverOptions::new();
    let config = DncConfig {
        num_workers: 2,
        initial_timeout: Duration::from_secs(10),
        ..DncConfig::default()
    };
    let (code, model, _stats) = dnc::solve(q, &options, config);
    assert_eq!(code, ExitCode::Sat);
    let model = model.unwrap();

    // Reference forward pass: h0 = 1 => r0 = ReLU(1) = 1; h1 = -1 => r1 = ReLU(-1) = 0; y = 1.
    assert!((model.value(4).unwrap() - 1.0).abs() < 1e-5);
    assert!((model.value(5).unwrap() - 0.0).abs() < 1e-5);
    assert!((model.value(6).unwrap() - 1.0).abs() < 1e-5);
}
