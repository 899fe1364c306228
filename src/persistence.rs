//! Query persistence: a newline-delimited text encoding that round-trips
//! a [`Query`] bit-identically, including variable indexing. Deliberately
//! flat and hand-rolled rather than routed through a generic serializer —
//! the format is part of the external interface and its exact shape (field
//! order, tag spelling) is what downstream tooling parses against.

use std::fmt::Write as _;

use crate::constraints::nonlinear::{Bilinear, Exp, NonlinearConstraintVariant, Reciprocal, Round, Sigmoid, Softmax};
use crate::constraints::pl::{AbsoluteValue, CaseSplit, Disjunction, LeakyReLU, Max, PlConstraint, ReLU, Sign};
use crate::bound_manager::{Tightening, TighteningKind};
use crate::error::QueryError;
use crate::query::{Addend, Equation, EquationType, Query};
use crate::E;

fn op_tag(op: EquationType) -> &'static str {
    match op {
        EquationType::Eq => "eq",
        EquationType::Le => "le",
        EquationType::Ge => "ge",
    }
}

fn parse_op(tag: &str) -> Result<EquationType, QueryError> {
    match tag {
        "eq" => Ok(EquationType::Eq),
        "le" => Ok(EquationType::Le),
        "ge" => Ok(EquationType::Ge),
        _ => Err(QueryError::MalformedRecord {
            reason: format!("unknown equation operator '{tag}'"),
        }),
    }
}

fn malformed(reason: impl Into<String>) -> QueryError {
    QueryError::MalformedRecord { reason: reason.into() }
}

fn parse_usize(tok: &str, what: &str) -> Result<usize, QueryError> {
    tok.parse().map_err(|_| malformed(format!("expected a variable index for {what}, found '{tok}'")))
}

fn parse_f64(tok: &str, what: &str) -> Result<E, QueryError> {
    tok.parse().map_err(|_| malformed(format!("expected a number for {what}, found '{tok}'")))
}

fn tightening_token(t: &Tightening) -> String {
    let kind = match t.kind {
        TighteningKind::Lower => 'L',
        TighteningKind::Upper => 'U',
    };
    format!("{}:{kind}:{}", t.variable, t.value)
}

fn parse_tightening_token(tok: &str) -> Result<Tightening, QueryError> {
    let mut parts = tok.split(':');
    let variable = parse_usize(parts.next().ok_or_else(|| malformed("empty tightening token"))?, "a tightening variable")?;
    let kind = match parts.next() {
        Some("L") => TighteningKind::Lower,
        Some("U") => TighteningKind::Upper,
        Some(other) => return Err(malformed(format!("unknown tightening kind '{other}'"))),
        None => return Err(malformed("tightening token missing kind")),
    };
    let value = parse_f64(parts.next().ok_or_else(|| malformed("tightening token missing value"))?, "a tightening value")?;
    Ok(Tightening { variable, value, kind })
}

// Only tightenings round-trip; a disjunct's `equations`/`element` fields are
// never produced by raw input (they're populated by other constraints'
// `case_splits()`, not by a query file) and are dropped here.
fn serialize_disjunct(split: &CaseSplit) -> String {
    split.tightenings.iter().map(tightening_token).collect::<Vec<_>>().join("|")
}

fn parse_disjunct(field: &str) -> Result<CaseSplit, QueryError> {
    if field.is_empty() {
        return Ok(CaseSplit::with_tightenings(Vec::new()));
    }
    let tightenings = field.split('|').map(parse_tightening_token).collect::<Result<Vec<_>, _>>()?;
    Ok(CaseSplit::with_tightenings(tightenings))
}

/// Appends one self-describing `tag,field,field,...` line for `c`, without a
/// trailing newline.
fn serialize_pl_constraint(out: &mut String, c: &PlConstraint) {
    match c {
        PlConstraint::ReLU(ReLU { b, f, aux, .. }) => {
            let aux = aux.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
            write!(out, "relu,{f},{b},{aux}").unwrap();
        }
        PlConstraint::LeakyReLU(LeakyReLU { b, f, slope, .. }) => {
            write!(out, "leaky_relu,{f},{b},{slope}").unwrap();
        }
        PlConstraint::AbsoluteValue(AbsoluteValue { b, f, .. }) => {
            write!(out, "absoluteValue,{f},{b}").unwrap();
        }
        PlConstraint::Sign(Sign { b, f, .. }) => {
            write!(out, "sign,{f},{b}").unwrap();
        }
        PlConstraint::Max(Max { f, elements, .. }) => {
            write!(out, "max,{f}").unwrap();
            for e in elements {
                write!(out, ",{e}").unwrap();
            }
        }
        PlConstraint::Disjunction(Disjunction { disjuncts, .. }) => {
            write!(out, "disjunction,{}", disjuncts.len()).unwrap();
            for d in disjuncts {
                write!(out, ",{}", serialize_disjunct(d)).unwrap();
            }
        }
    }
}

fn parse_pl_constraint(line: &str) -> Result<PlConstraint, QueryError> {
    let mut fields = line.split(',');
    let tag = fields.next().ok_or_else(|| malformed("empty constraint line"))?;
    let rest: Vec<&str> = fields.collect();
    match tag {
        "relu" => {
            let [f, b, aux] = rest[..] else {
                return Err(malformed("relu expects 3 fields"));
            };
            let aux = if aux == "-" { None } else { Some(parse_usize(aux, "relu aux")?) };
            Ok(PlConstraint::ReLU(ReLU::new(parse_usize(b, "relu b")?, parse_usize(f, "relu f")?, aux)))
        }
        "leaky_relu" => {
            let [f, b, slope] = rest[..] else {
                return Err(malformed("leaky_relu expects 3 fields"));
            };
            Ok(PlConstraint::LeakyReLU(LeakyReLU::new(
                parse_usize(b, "leaky_relu b")?,
                parse_usize(f, "leaky_relu f")?,
                parse_f64(slope, "leaky_relu slope")?,
            )))
        }
        "absoluteValue" => {
            let [f, b] = rest[..] else {
                return Err(malformed("absoluteValue expects 2 fields"));
            };
            Ok(PlConstraint::AbsoluteValue(AbsoluteValue::new(parse_usize(b, "absoluteValue b")?, parse_usize(f, "absoluteValue f")?)))
        }
        "sign" => {
            let [f, b] = rest[..] else {
                return Err(malformed("sign expects 2 fields"));
            };
            Ok(PlConstraint::Sign(Sign::new(parse_usize(b, "sign b")?, parse_usize(f, "sign f")?)))
        }
        "max" => {
            if rest.is_empty() {
                return Err(malformed("max expects at least an f field"));
            }
            let f = parse_usize(rest[0], "max f")?;
            let elements = rest[1..].iter().map(|t| parse_usize(t, "max element")).collect::<Result<Vec<_>, _>>()?;
            Ok(PlConstraint::Max(Max::new(f, elements)))
        }
        "disjunction" => {
            if rest.is_empty() {
                return Err(malformed("disjunction expects a count field"));
            }
            let n = parse_usize(rest[0], "disjunction count")?;
            let disjuncts = rest[1..].iter().map(|field| parse_disjunct(field)).collect::<Result<Vec<_>, _>>()?;
            if disjuncts.len() != n {
                return Err(malformed("disjunction count does not match disjunct field count"));
            }
            Ok(PlConstraint::Disjunction(Disjunction::new(disjuncts)))
        }
        other => Err(QueryError::UnknownConstraintTag { tag: other.to_string() }),
    }
}

fn serialize_nonlinear_constraint(out: &mut String, c: &NonlinearConstraintVariant) {
    match c {
        NonlinearConstraintVariant::Sigmoid(Sigmoid { b, f, .. }) => {
            write!(out, "sigmoid,{f},{b}").unwrap();
        }
        NonlinearConstraintVariant::Softmax(Softmax { inputs, outputs, .. }) => {
            write!(out, "softmax,{}", inputs.len()).unwrap();
            for v in inputs {
                write!(out, ",{v}").unwrap();
            }
            for v in outputs {
                write!(out, ",{v}").unwrap();
            }
        }
        NonlinearConstraintVariant::Bilinear(Bilinear { b1, b2, f, .. }) => {
            write!(out, "bilinear,{f},{b1},{b2}").unwrap();
        }
        NonlinearConstraintVariant::Round(Round { b, f, .. }) => {
            write!(out, "round,{f},{b}").unwrap();
        }
        NonlinearConstraintVariant::Exp(Exp { b, f, .. }) => {
            write!(out, "exp,{f},{b}").unwrap();
        }
        NonlinearConstraintVariant::Reciprocal(Reciprocal { b, f, .. }) => {
            write!(out, "reciprocal,{f},{b}").unwrap();
        }
    }
}

fn parse_nonlinear_constraint(line: &str) -> Result<NonlinearConstraintVariant, QueryError> {
    let mut fields = line.split(',');
    let tag = fields.next().ok_or_else(|| malformed("empty constraint line"))?;
    let rest: Vec<&str> = fields.collect();
    match tag {
        "sigmoid" => {
            let [f, b] = rest[..] else {
                return Err(malformed("sigmoid expects 2 fields"));
            };
            Ok(NonlinearConstraintVariant::Sigmoid(Sigmoid::new(parse_usize(b, "sigmoid b")?, parse_usize(f, "sigmoid f")?)))
        }
        "softmax" => {
            if rest.is_empty() {
                return Err(malformed("softmax expects a dimension field"));
            }
            let d = parse_usize(rest[0], "softmax dimension")?;
            let remainder = &rest[1..];
            if remainder.len() != 2 * d {
                return Err(malformed("softmax field count does not match 2*d"));
            }
            let inputs = remainder[..d].iter().map(|t| parse_usize(t, "softmax input")).collect::<Result<Vec<_>, _>>()?;
            let outputs = remainder[d..].iter().map(|t| parse_usize(t, "softmax output")).collect::<Result<Vec<_>, _>>()?;
            Ok(NonlinearConstraintVariant::Softmax(Softmax::new(inputs, outputs)))
        }
        "bilinear" => {
            let [f, b1, b2] = rest[..] else {
                return Err(malformed("bilinear expects 3 fields"));
            };
            Ok(NonlinearConstraintVariant::Bilinear(Bilinear::new(
                parse_usize(b1, "bilinear b1")?,
                parse_usize(b2, "bilinear b2")?,
                parse_usize(f, "bilinear f")?,
            )))
        }
        "round" => {
            let [f, b] = rest[..] else {
                return Err(malformed("round expects 2 fields"));
            };
            Ok(NonlinearConstraintVariant::Round(Round::new(parse_usize(b, "round b")?, parse_usize(f, "round f")?)))
        }
        "exp" => {
            let [f, b] = rest[..] else {
                return Err(malformed("exp expects 2 fields"));
            };
            Ok(NonlinearConstraintVariant::Exp(Exp::new(parse_usize(b, "exp b")?, parse_usize(f, "exp f")?)))
        }
        "reciprocal" => {
            let [f, b] = rest[..] else {
                return Err(malformed("reciprocal expects 2 fields"));
            };
            Ok(NonlinearConstraintVariant::Reciprocal(Reciprocal::new(parse_usize(b, "reciprocal b")?, parse_usize(f, "reciprocal f")?)))
        }
        other => Err(QueryError::UnknownConstraintTag { tag: other.to_string() }),
    }
}

fn serialize_equation(out: &mut String, eq: &Equation) {
    write!(out, "{} {}", op_tag(eq.op), eq.scalar).unwrap();
    for addend in &eq.addends {
        write!(out, " {}:{}", addend.coeff, addend.variable).unwrap();
    }
}

fn parse_equation(line: &str) -> Result<Equation, QueryError> {
    let mut tokens = line.split_whitespace();
    let op = parse_op(tokens.next().ok_or_else(|| malformed("empty equation line"))?)?;
    let scalar = parse_f64(tokens.next().ok_or_else(|| malformed("equation missing scalar"))?, "an equation scalar")?;
    let mut equation = Equation::new(op, scalar);
    for tok in tokens {
        let (coeff, variable) = tok.split_once(':').ok_or_else(|| malformed(format!("malformed addend '{tok}'")))?;
        let coeff = parse_f64(coeff, "an addend coefficient")?;
        let variable = parse_usize(variable, "an addend variable")?;
        equation.addends.push(Addend { coeff, variable });
    }
    Ok(equation)
}

/// Encodes `query` as the newline-delimited text format. The result has
/// no trailing newline.
pub fn serialize_query(query: &Query) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "{} {} {} {} {}",
        query.number_of_variables(),
        query.equations().len(),
        query.piecewise_linear_constraints().len() + query.nonlinear_constraints().len(),
        query.input_variables().len(),
        query.output_variables().len(),
    )
    .unwrap();

    for v in 0..query.number_of_variables() {
        writeln!(out, "{} {}", query.lower_bound(v), query.upper_bound(v)).unwrap();
    }
    for eq in query.equations() {
        serialize_equation(&mut out, eq);
        out.push('\n');
    }
    for c in query.piecewise_linear_constraints() {
        serialize_pl_constraint(&mut out, c);
        out.push('\n');
    }
    for c in query.nonlinear_constraints() {
        serialize_nonlinear_constraint(&mut out, c);
        out.push('\n');
    }
    for &(v, index) in query.input_variables() {
        writeln!(out, "{v} {index}").unwrap();
    }
    for &(v, index) in query.output_variables() {
        writeln!(out, "{v} {index}").unwrap();
    }

    // Drop the final newline so callers control their own file terminator.
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Decodes the newline-delimited text format back into a [`Query`],
/// reproducing variable indices and constraint order bit-identically.
pub fn deserialize_query(text: &str) -> Result<Query, QueryError> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| malformed("missing header line"))?;
    let header_fields: Vec<&str> = header.split_whitespace().collect();
    let [num_vars, num_equations, num_constraints, num_inputs, num_outputs] = header_fields[..] else {
        return Err(malformed("header must have 5 fields"));
    };
    let num_vars = parse_usize(num_vars, "num_vars")?;
    let num_equations = parse_usize(num_equations, "num_equations")?;
    let num_constraints = parse_usize(num_constraints, "num_constraints")?;
    let num_inputs = parse_usize(num_inputs, "num_input_vars")?;
    let num_outputs = parse_usize(num_outputs, "num_output_vars")?;

    let mut query = Query::new();
    query.set_number_of_variables(num_vars);

    for v in 0..num_vars {
        let line = lines.next().ok_or_else(|| malformed(format!("missing bound line for variable {v}")))?;
        let (lb, ub) = line.split_once(' ').ok_or_else(|| malformed(format!("malformed bound line for variable {v}")))?;
        query.set_lower_bound(v, parse_f64(lb, "a lower bound")?)?;
        query.set_upper_bound(v, parse_f64(ub, "an upper bound")?)?;
    }

    for _ in 0..num_equations {
        let line = lines.next().ok_or_else(|| malformed("missing equation line"))?;
        query.add_equation(parse_equation(line)?)?;
    }

    // Constraints are a single interleaved count in the header but are
    // written PL-first then nonlinear; disambiguate by tag on read.
    const PL_TAGS: [&str; 6] = ["relu", "leaky_relu", "absoluteValue", "sign", "max", "disjunction"];
    for _ in 0..num_constraints {
        let line = lines.next().ok_or_else(|| malformed("missing constraint line"))?;
        let tag = line.split(',').next().unwrap_or_default();
        if PL_TAGS.contains(&tag) {
            query.add_piecewise_linear_constraint(parse_pl_constraint(line)?);
        } else {
            query.add_nonlinear_constraint(parse_nonlinear_constraint(line)?);
        }
    }

    for _ in 0..num_inputs {
        let line = lines.next().ok_or_else(|| malformed("missing input variable line"))?;
        let (v, index) = line.split_once(' ').ok_or_else(|| malformed("malformed input variable line"))?;
        query.mark_input_variable(parse_usize(v, "an input variable")?, parse_usize(index, "an input index")?)?;
    }
    for _ in 0..num_outputs {
        let line = lines.next().ok_or_else(|| malformed("missing output variable line"))?;
        let (v, index) = line.split_once(' ').ok_or_else(|| malformed("malformed output variable line"))?;
        query.mark_output_variable(parse_usize(v, "an output variable")?, parse_usize(index, "an output index")?)?;
    }

    Ok(query)
}

/// Writes a `Query` to a file at `path` in the persistence format.
pub fn save_to_path(query: &Query, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
    std::fs::write(path, serialize_query(query))
}

/// Reads a `Query` back from a file written by [`save_to_path`].
pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Query, QueryError> {
    let text = std::fs::read_to_string(path).map_err(|e| malformed(format!("could not read query file: {e}")))?;
    deserialize_query(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::pl::Phase;

    fn sample_query() -> Query {
        let mut q = Query::new();
        q.set_number_of_variables(4);
        q.set_lower_bound(0, -1.0).unwrap();
        q.set_upper_bound(0, 5.0).unwrap();
        q.set_upper_bound(2, E::INFINITY).unwrap();
        let eq = Equation::new(EquationType::Eq, 0.0).with_addend(1.0, 0).with_addend(-1.0, 1);
        q.add_equation(eq).unwrap();
        q.add_piecewise_linear_constraint(PlConstraint::ReLU(ReLU::new(0, 1, Some(2))));
        q.add_piecewise_linear_constraint(PlConstraint::AbsoluteValue(AbsoluteValue::new(1, 3)));
        q.add_nonlinear_constraint(NonlinearConstraintVariant::Sigmoid(Sigmoid::new(2, 3)));
        q.mark_input_variable(0, 0).unwrap();
        q.mark_output_variable(3, 0).unwrap();
        q
    }

    #[test]
    fn round_trips_a_mixed_query() {
        let original = sample_query();
        let text = serialize_query(&original);
        let loaded = deserialize_query(&text).unwrap();

        assert_eq!(loaded.number_of_variables(), original.number_of_variables());
        assert_eq!(loaded.lower_bound(0), -1.0);
        assert_eq!(loaded.upper_bound(0), 5.0);
        assert!(loaded.upper_bound(2).is_infinite());
        assert_eq!(loaded.equations().len(), 1);
        assert_eq!(loaded.piecewise_linear_constraints().len(), 2);
        assert_eq!(loaded.nonlinear_constraints().len(), 1);
        assert_eq!(loaded.input_variables(), original.input_variables());
        assert_eq!(loaded.output_variables(), original.output_variables());

        match &loaded.piecewise_linear_constraints()[0] {
            PlConstraint::ReLU(relu) => {
                assert_eq!(relu.b, 0);
                assert_eq!(relu.f, 1);
                assert_eq!(relu.aux, Some(2));
            }
            other => panic!("expected ReLU, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_a_disjunction() {
        let mut q = Query::new();
        q.set_number_of_variables(2);
        let split_a = CaseSplit::with_tightenings(vec![Tightening {
            variable: 0,
            value: 1.0,
            kind: TighteningKind::Lower,
        }]);
        let split_b = CaseSplit::with_tightenings(vec![Tightening {
            variable: 0,
            value: 1.0,
            kind: TighteningKind::Upper,
        }]);
        q.add_piecewise_linear_constraint(PlConstraint::Disjunction(Disjunction::new(vec![split_a, split_b])));

        let text = serialize_query(&q);
        let loaded = deserialize_query(&text).unwrap();
        match &loaded.piecewise_linear_constraints()[0] {
            PlConstraint::Disjunction(d) => {
                assert_eq!(d.disjuncts.len(), 2);
                assert_eq!(d.disjuncts[0].tightenings[0].value, 1.0);
            }
            other => panic!("expected Disjunction, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_a_softmax() {
        let mut q = Query::new();
        q.set_number_of_variables(4);
        q.add_nonlinear_constraint(NonlinearConstraintVariant::Softmax(Softmax::new(vec![0, 1], vec![2, 3])));
        let text = serialize_query(&q);
        let loaded = deserialize_query(&text).unwrap();
        match &loaded.nonlinear_constraints()[0] {
            NonlinearConstraintVariant::Softmax(s) => {
                assert_eq!(s.inputs, vec![0, 1]);
                assert_eq!(s.outputs, vec![2, 3]);
            }
            other => panic!("expected Softmax, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_constraint_tag() {
        let text = "1 0 1 0 0\n-1 1\nbogus,0,0\n";
        let err = deserialize_query(text).unwrap_err();
        assert!(matches!(err, QueryError::UnknownConstraintTag { .. }));
    }

    #[test]
    fn max_phase_is_untouched_by_round_trip() {
        let mut q = Query::new();
        q.set_number_of_variables(4);
        q.add_piecewise_linear_constraint(PlConstraint::Max(Max::new(0, vec![1, 2, 3])));
        let text = serialize_query(&q);
        let loaded = deserialize_query(&text).unwrap();
        match &loaded.piecewise_linear_constraints()[0] {
            PlConstraint::Max(m) => {
                use crate::constraints::pl::PiecewiseLinearConstraint;
                assert_eq!(m.phase(), Phase::NotFixed);
                assert_eq!(m.elements, vec![1, 2, 3]);
            }
            other => panic!("expected Max, got {other:?}"),
        }
    }
}
