use std::time::Duration;

use lrasolve::callback::NoOpCallback;
use lrasolve::constraints::pl::{PlConstraint, ReLU};
use lrasolve::engine::{self, EngineHooks};
use lrasolve::linalg::factorization::FactorizationKind;
use lrasolve::pricing::PricingRule;
use lrasolve::query::{Equation, EquationType, Query};
use lrasolve::terminators::TimeOutTerminator;
use lrasolve::SolverOptions;

fn main() {
    divan::main();
}

trait OptionsBuilder {
    fn configure(options: &mut SolverOptions);
}

macro_rules! options_builder {
    ($name:ident, $factorization:expr, $pricing:expr) => {
        struct $name;

        impl OptionsBuilder for $name {
            fn configure(options: &mut SolverOptions) {
                let _ = options.set_option("factorization_kind", $factorization);
                let _ = options.set_option("pricing_rule", $pricing);
            }
        }
    };
}

options_builder!(SparseForrestTomlinPse, FactorizationKind::SparseForrestTomlin, PricingRule::ProjectedSteepestEdgeEntryRule);
options_builder!(DenseLuDantzig, FactorizationKind::DenseLu, PricingRule::DantzigEntryRule);

/// A ReLU-chain query wide enough to force several case splits, used as the
/// representative workload for comparing factorization/pricing strategy
/// pairs against each other.
fn relu_chain_query(width: usize) -> Query {
    let mut q = Query::new();
    let n = 2 * width + 1;
    q.set_number_of_variables(n);
    for i in 0..width {
        q.set_lower_bound(i, -1.0).unwrap();
        q.set_upper_bound(i, 1.0).unwrap();
        q.set_lower_bound(width + i, 0.0).unwrap();
        q.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(i, width + i, None)));
    }
    let output = 2 * width;
    let mut sum = Equation::new(EquationType::Eq, 0.0).with_addend(-1.0, output);
    for i in 0..width {
        sum = sum.with_addend(1.0, width + i);
    }
    q.add_equation(sum).unwrap();
    q.set_lower_bound(output, 0.0).unwrap();
    q
}

#[divan::bench(types = [SparseForrestTomlinPse, DenseLuDantzig], args = [4, 8])]
fn solve_relu_chain<S: OptionsBuilder>(width: usize) {
    let mut options = SolverOptions::new();
    S::configure(&mut options);
    let hooks = EngineHooks {
        callback: Box::new(NoOpCallback {}),
        terminator: Box::new(TimeOutTerminator::new(Duration::from_secs(5))),
    };
    let _ = engine::solve(relu_chain_query(width), &options, hooks);
}
