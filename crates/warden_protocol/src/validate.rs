//! Declarative input validation.
//!
//! Constraints are attached to input parameters on the handler descriptor
//! and evaluated after deserialization, before the handler runs. Evaluation
//! walks the input parameters in declaration order and, within each
//! parameter, the constraints in attached order; the first failure wins and
//! its response code is returned to the client.

use crate::codes::{self, ResponseCode};
use crate::schema::{Direction, HandlerDescriptor, ParamSet, Value};

/// A single declarative check against one named input parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub field: &'static str,
    pub rule: Rule,
    /// The response code returned when the rule fails.
    pub failure: ResponseCode,
}

/// The supported constraint rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Integer content must be at least the given value.
    AtLeast(i64),
    /// Integer content must be at most the given value.
    AtMost(i64),
    /// String byte length must fall in the inclusive range.
    LengthBetween(u16, u16),
    /// String must not be empty.
    NonEmpty,
}

/// Runs every constraint of the descriptor against the deserialized input,
/// returning the first failing constraint's code, or `SUCCESS`.
pub fn run(descriptor: &HandlerDescriptor, params: &ParamSet) -> ResponseCode {
    for spec in descriptor
        .params
        .iter()
        .filter(|p| p.direction == Direction::Input)
    {
        for constraint in descriptor
            .constraints
            .iter()
            .filter(|c| c.field == spec.name)
        {
            let code = check(constraint, params);
            if code != codes::SUCCESS {
                return code;
            }
        }
    }
    codes::SUCCESS
}

fn check(constraint: &Constraint, params: &ParamSet) -> ResponseCode {
    // A constraint on a missing or mismatched field fails with its own code.
    let Some(value) = params.get(constraint.field) else {
        return constraint.failure;
    };
    let holds = match (constraint.rule, value) {
        (Rule::AtLeast(min), value) => value.as_int().is_some_and(|v| v >= min as i128),
        (Rule::AtMost(max), value) => value.as_int().is_some_and(|v| v <= max as i128),
        (Rule::LengthBetween(min, max), Value::Str(s)) => {
            (min as usize..=max as usize).contains(&s.len())
        }
        (Rule::NonEmpty, Value::Str(s)) => !s.is_empty(),
        _ => false,
    };
    if holds {
        codes::SUCCESS
    } else {
        constraint.failure
    }
}
