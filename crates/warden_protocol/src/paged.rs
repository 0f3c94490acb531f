//! Paged list queries.
//!
//! A paged handler carries four synthetic input parameters with fixed
//! negative indices, so they always precede handler-defined fields on the
//! wire, and one output list at index −1. The sort field is resolved through
//! a comparator table the handler registers alongside its declaration;
//! asking for an unregistered field is an `INVALID_PARAMETERS` outcome
//! rather than a dynamic expression build.

use crate::codec::{bind_record, CodecError, Record};
use crate::codes::{self, ResponseCode};
use crate::schema::{Direction, ParamNode, ParamSet, ParamSpec, SchemaError, Value, ValueKind};
use crate::validate::{Constraint, Rule};
use std::cmp::Ordering;

/// `skip`: how many sorted records to drop before the page starts.
pub const SKIP: ParamSpec = ParamSpec {
    index: -4,
    direction: Direction::Input,
    name: "skip",
    kind: ValueKind::I32,
};

/// `take`: how many records the page holds.
pub const TAKE: ParamSpec = ParamSpec {
    index: -3,
    direction: Direction::Input,
    name: "take",
    kind: ValueKind::I32,
};

/// `order_by_field`: the registered sort-key name.
pub const ORDER_BY_FIELD: ParamSpec = ParamSpec {
    index: -2,
    direction: Direction::Input,
    name: "order_by_field",
    kind: ValueKind::String,
};

/// `order_by_ascending`: sort direction.
pub const ORDER_BY_ASCENDING: ParamSpec = ParamSpec {
    index: -1,
    direction: Direction::Input,
    name: "order_by_ascending",
    kind: ValueKind::Bool,
};

/// The four synthetic inputs, for inclusion in a handler's parameter array.
pub const INPUT_PARAMS: [ParamSpec; 4] = [SKIP, TAKE, ORDER_BY_FIELD, ORDER_BY_ASCENDING];

/// Constraints on the synthetic inputs, for inclusion in a handler's
/// constraint array.
pub const CONSTRAINTS: [Constraint; 3] = [
    Constraint {
        field: "skip",
        rule: Rule::AtLeast(0),
        failure: codes::INVALID_PARAMETERS,
    },
    Constraint {
        field: "take",
        rule: Rule::AtLeast(0),
        failure: codes::INVALID_PARAMETERS,
    },
    Constraint {
        field: "order_by_field",
        rule: Rule::NonEmpty,
        failure: codes::INVALID_PARAMETERS,
    },
];

/// The output list parameter, at index −1 so it precedes subclass outputs.
pub const fn list_param(element: &'static ValueKind) -> ParamSpec {
    ParamSpec {
        index: -1,
        direction: Direction::Output,
        name: "list",
        kind: ValueKind::List(element),
    }
}

/// A comparator registered under a sort-field name.
pub type SortKey<R> = fn(&R, &R) -> Ordering;

/// The synthetic paging inputs, extracted from a deserialized parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArgs {
    pub skip: i32,
    pub take: i32,
    pub order_by_field: String,
    pub order_by_ascending: bool,
}

impl PageArgs {
    /// Reads the four synthetic fields. Validation has already enforced
    /// `skip ≥ 0`, `take ≥ 0`, and a non-empty field name by the time a
    /// handler calls this.
    pub fn read(params: &ParamSet) -> Result<Self, SchemaError> {
        Ok(Self {
            skip: params.get_i32("skip")?,
            take: params.get_i32("take")?,
            order_by_field: params.get_str("order_by_field")?.to_owned(),
            order_by_ascending: params.get_bool("order_by_ascending")?,
        })
    }
}

/// Sorts `records` by the registered comparator named in `args`, applies
/// skip/take, and returns the page.
///
/// The sort is stable, so tie-breaks are consistent within a single call.
/// An unregistered sort field yields `INVALID_PARAMETERS`.
pub fn apply<R>(
    mut records: Vec<R>,
    args: &PageArgs,
    sort_keys: &[(&str, SortKey<R>)],
) -> Result<Vec<R>, ResponseCode> {
    let Some((_, compare)) = sort_keys
        .iter()
        .find(|(name, _)| *name == args.order_by_field)
    else {
        return Err(codes::INVALID_PARAMETERS);
    };

    records.sort_by(|a, b| compare(a, b));
    if !args.order_by_ascending {
        records.reverse();
    }
    Ok(records
        .into_iter()
        .skip(args.skip.max(0) as usize)
        .take(args.take.max(0) as usize)
        .collect())
}

/// Builds the output list from a page of records: one default-constructed
/// element per record, populated by field-name binding.
pub fn bind_page<R: Record>(
    list_node: &ParamNode,
    params: &mut ParamSet,
    page: &[R],
) -> Result<(), CodecError> {
    let ValueKind::List(element) = list_node.kind else {
        return Err(CodecError::KindMismatch {
            field: list_node.name,
        });
    };
    let ValueKind::Object(fields) = *element else {
        return Err(CodecError::KindMismatch {
            field: list_node.name,
        });
    };

    let mut items = Vec::with_capacity(page.len());
    for record in page {
        let mut entry = ParamSet::from_fields(fields);
        bind_record(&list_node.children, &mut entry, record)?;
        items.push(Value::Object(entry));
    }
    params.set(list_node.name, Value::List(items));
    Ok(())
}
