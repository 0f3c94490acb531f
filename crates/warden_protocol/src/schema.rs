//! Handler parameter schemas and runtime values.
//!
//! Handler wire layouts are described by static descriptor tables instead of
//! runtime reflection: each handler carries an ordered array of
//! [`ParamSpec`]s (and nested [`FieldSpec`]s for object-typed values). The
//! codec walks a [`ParamTree`] built from the descriptor, so producer and
//! consumer agree on the byte layout as long as they agree on the handler
//! set.
//!
//! Parameters are sorted ascending by `index` within each direction;
//! declaration order inside the descriptor array never affects the wire
//! layout. Negative indices are permitted and are used by generic fields
//! that must precede handler-defined ones (see the `paged` module).

use crate::validate::Constraint;
use crate::wire::default_epoch;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Integer width/signedness used by enum kinds and for coercion checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
}

impl IntKind {
    /// The plain value kind an enum of this underlying kind serializes as.
    pub fn as_value_kind(self) -> ValueKind {
        match self {
            IntKind::U8 => ValueKind::U8,
            IntKind::I8 => ValueKind::I8,
            IntKind::U16 => ValueKind::U16,
            IntKind::I16 => ValueKind::I16,
            IntKind::U32 => ValueKind::U32,
            IntKind::I32 => ValueKind::I32,
            IntKind::U64 => ValueKind::U64,
            IntKind::I64 => ValueKind::I64,
        }
    }
}

/// The kind of a declared parameter value.
///
/// Invariants: list kinds carry their element kind; object kinds carry their
/// children's specs; enum kinds serialize as their underlying integer kind;
/// scalar kinds have neither children nor element kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    String,
    Timestamp,
    /// Serialized as the underlying integer kind.
    Enum(IntKind),
    /// A nested object with its own ordered fields.
    Object(&'static [FieldSpec]),
    /// A variable-length list of the given element kind.
    List(&'static ValueKind),
}

/// A field of a nested object (no direction below the top level).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub index: i16,
    pub name: &'static str,
    pub kind: ValueKind,
}

/// Whether a top-level parameter belongs to the request or the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// A top-level parameter of a handler declaration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub index: i16,
    pub direction: Direction,
    pub name: &'static str,
    pub kind: ValueKind,
}

/// Which connections may invoke a handler.
///
/// Unauthenticated handlers serve connections whose `authenticated_id` is
/// zero; authenticated handlers serve everyone else. The two keyspaces are
/// disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScope {
    Unauthenticated,
    Authenticated,
}

/// Static declaration of one handler: identity, auth requirement, ordered
/// parameters, and validation constraints.
///
/// `server_id` names the node type the handler belongs to; `0` means the
/// handler is shared by every node type.
#[derive(Debug)]
pub struct HandlerDescriptor {
    pub category: u8,
    pub method: u8,
    pub server_id: u8,
    pub auth: AuthScope,
    pub params: &'static [ParamSpec],
    pub constraints: &'static [Constraint],
}

impl HandlerDescriptor {
    /// Packed `(category << 8) | method` registry key.
    pub fn key(&self) -> u16 {
        crate::frame::pack_key(self.category, self.method)
    }
}

/// A runtime parameter value.
///
/// Enum-kinded parameters are stored as their underlying integer variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Object(ParamSet),
}

impl Value {
    /// The default value for a declared kind: zero/false/empty scalars, the
    /// wire epoch for timestamps, an empty list, and a fully
    /// default-constructed object (so nested parameters are always present
    /// before deserialization populates them).
    pub fn default_for(kind: &ValueKind) -> Value {
        match *kind {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::U8 => Value::U8(0),
            ValueKind::I8 => Value::I8(0),
            ValueKind::U16 => Value::U16(0),
            ValueKind::I16 => Value::I16(0),
            ValueKind::U32 => Value::U32(0),
            ValueKind::I32 => Value::I32(0),
            ValueKind::U64 => Value::U64(0),
            ValueKind::I64 => Value::I64(0),
            ValueKind::F32 => Value::F32(0.0),
            ValueKind::F64 => Value::F64(0.0),
            ValueKind::String => Value::Str(String::new()),
            ValueKind::Timestamp => Value::Timestamp(default_epoch()),
            ValueKind::Enum(int_kind) => Self::default_for_int(int_kind),
            ValueKind::Object(fields) => Value::Object(ParamSet::from_fields(fields)),
            ValueKind::List(_) => Value::List(Vec::new()),
        }
    }

    fn default_for_int(kind: IntKind) -> Value {
        match kind {
            IntKind::U8 => Value::U8(0),
            IntKind::I8 => Value::I8(0),
            IntKind::U16 => Value::U16(0),
            IntKind::I16 => Value::I16(0),
            IntKind::U32 => Value::U32(0),
            IntKind::I32 => Value::I32(0),
            IntKind::U64 => Value::U64(0),
            IntKind::I64 => Value::I64(0),
        }
    }

    /// The integer content of this value, if it holds any integer variant.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::U8(v) => Some(*v as i128),
            Value::I8(v) => Some(*v as i128),
            Value::U16(v) => Some(*v as i128),
            Value::I16(v) => Some(*v as i128),
            Value::U32(v) => Some(*v as i128),
            Value::I32(v) => Some(*v as i128),
            Value::U64(v) => Some(*v as i128),
            Value::I64(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Converts this value to the given kind, preserving content.
    ///
    /// Integers convert between integer kinds when the content fits the
    /// target range; floats widen or narrow between `F32` and `F64`; other
    /// variants only pass through unchanged kinds. Returns `None` when the
    /// conversion would lose or reinterpret content.
    pub fn coerce_to(&self, kind: &ValueKind) -> Option<Value> {
        let target_int = match kind {
            ValueKind::Bool => return self.clone_if(matches!(self, Value::Bool(_))),
            ValueKind::String => return self.clone_if(matches!(self, Value::Str(_))),
            ValueKind::Timestamp => {
                return self.clone_if(matches!(self, Value::Timestamp(_)));
            }
            ValueKind::F32 => {
                return match self {
                    Value::F32(v) => Some(Value::F32(*v)),
                    Value::F64(v) => Some(Value::F32(*v as f32)),
                    _ => None,
                };
            }
            ValueKind::F64 => {
                return match self {
                    Value::F64(v) => Some(Value::F64(*v)),
                    Value::F32(v) => Some(Value::F64(*v as f64)),
                    _ => None,
                };
            }
            ValueKind::List(_) => return self.clone_if(matches!(self, Value::List(_))),
            ValueKind::Object(_) => return self.clone_if(matches!(self, Value::Object(_))),
            ValueKind::U8 => IntKind::U8,
            ValueKind::I8 => IntKind::I8,
            ValueKind::U16 => IntKind::U16,
            ValueKind::I16 => IntKind::I16,
            ValueKind::U32 => IntKind::U32,
            ValueKind::I32 => IntKind::I32,
            ValueKind::U64 => IntKind::U64,
            ValueKind::I64 => IntKind::I64,
            ValueKind::Enum(int_kind) => *int_kind,
        };

        let content = self.as_int()?;
        match target_int {
            IntKind::U8 => u8::try_from(content).ok().map(Value::U8),
            IntKind::I8 => i8::try_from(content).ok().map(Value::I8),
            IntKind::U16 => u16::try_from(content).ok().map(Value::U16),
            IntKind::I16 => i16::try_from(content).ok().map(Value::I16),
            IntKind::U32 => u32::try_from(content).ok().map(Value::U32),
            IntKind::I32 => i32::try_from(content).ok().map(Value::I32),
            IntKind::U64 => u64::try_from(content).ok().map(Value::U64),
            IntKind::I64 => i64::try_from(content).ok().map(Value::I64),
        }
    }

    fn clone_if(&self, matches: bool) -> Option<Value> {
        matches.then(|| self.clone())
    }
}

/// Errors from typed access to a [`ParamSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("parameter `{name}` is not declared")]
    MissingField { name: &'static str },

    #[error("parameter `{name}` does not hold the requested kind")]
    KindMismatch { name: &'static str },
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// Reads the named parameter as the requested kind.
        pub fn $name(&self, name: &'static str) -> Result<$ty, SchemaError> {
            match self.get(name) {
                Some(Value::$variant(v)) => Ok(v.clone()),
                Some(_) => Err(SchemaError::KindMismatch { name }),
                None => Err(SchemaError::MissingField { name }),
            }
        }
    };
}

/// The mutable bag of named fields a handler instance owns.
///
/// Constructed once from the handler's descriptor (every declared parameter
/// gets a kind-appropriate default) and overwritten by deserialization on
/// every request the owning worker processes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    fields: HashMap<&'static str, Value>,
}

impl ParamSet {
    /// Builds the field bag for a handler, covering both directions.
    pub fn for_descriptor(descriptor: &HandlerDescriptor) -> Self {
        let mut fields = HashMap::with_capacity(descriptor.params.len());
        for spec in descriptor.params {
            fields.insert(spec.name, Value::default_for(&spec.kind));
        }
        Self { fields }
    }

    /// Builds the field bag for a nested object or list element.
    pub fn from_fields(specs: &'static [FieldSpec]) -> Self {
        let mut fields = HashMap::with_capacity(specs.len());
        for spec in specs {
            fields.insert(spec.name, Value::default_for(&spec.kind));
        }
        Self { fields }
    }

    /// Raw access to a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Raw mutable access to a field value.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Overwrites a field value.
    pub fn set(&mut self, name: &'static str, value: Value) {
        self.fields.insert(name, value);
    }

    typed_getter!(get_bool, Bool, bool);
    typed_getter!(get_u8, U8, u8);
    typed_getter!(get_u16, U16, u16);
    typed_getter!(get_u32, U32, u32);
    typed_getter!(get_u64, U64, u64);
    typed_getter!(get_i32, I32, i32);
    typed_getter!(get_i64, I64, i64);
    typed_getter!(get_f64, F64, f64);
    typed_getter!(get_timestamp, Timestamp, DateTime<Utc>);

    /// Reads the named parameter as a string slice.
    pub fn get_str(&self, name: &'static str) -> Result<&str, SchemaError> {
        match self.get(name) {
            Some(Value::Str(v)) => Ok(v),
            Some(_) => Err(SchemaError::KindMismatch { name }),
            None => Err(SchemaError::MissingField { name }),
        }
    }

    /// Reads the named parameter as a list.
    pub fn get_list(&self, name: &'static str) -> Result<&[Value], SchemaError> {
        match self.get(name) {
            Some(Value::List(v)) => Ok(v),
            Some(_) => Err(SchemaError::KindMismatch { name }),
            None => Err(SchemaError::MissingField { name }),
        }
    }

    /// Mutable access to the named object-typed parameter.
    pub fn get_object_mut(&mut self, name: &'static str) -> Result<&mut ParamSet, SchemaError> {
        match self.get_mut(name) {
            Some(Value::Object(v)) => Ok(v),
            Some(_) => Err(SchemaError::KindMismatch { name }),
            None => Err(SchemaError::MissingField { name }),
        }
    }
}

/// One node of the serialization tree: a named value, its kind, and the
/// ordered child nodes for object-shaped content.
///
/// List nodes carry both the container kind (in `kind`) and, when the
/// element is an object, the element's field nodes as `children`.
#[derive(Debug, Clone)]
pub struct ParamNode {
    pub name: &'static str,
    pub kind: ValueKind,
    pub children: Vec<ParamNode>,
}

/// The ordered serialization trees for a handler, one per direction.
#[derive(Debug, Clone)]
pub struct ParamTree {
    pub input: Vec<ParamNode>,
    pub output: Vec<ParamNode>,
}

impl ParamTree {
    /// Builds both direction trees from a descriptor.
    ///
    /// Each direction's parameters are sorted ascending by index (a stable
    /// sort, so equal indices keep declaration order); object children are
    /// sorted the same way recursively.
    pub fn build(descriptor: &HandlerDescriptor) -> Self {
        Self {
            input: Self::direction_nodes(descriptor.params, Direction::Input),
            output: Self::direction_nodes(descriptor.params, Direction::Output),
        }
    }

    fn direction_nodes(params: &'static [ParamSpec], direction: Direction) -> Vec<ParamNode> {
        let mut specs: Vec<&ParamSpec> =
            params.iter().filter(|p| p.direction == direction).collect();
        specs.sort_by_key(|p| p.index);
        specs
            .into_iter()
            .map(|p| Self::node(p.name, p.kind))
            .collect()
    }

    fn node(name: &'static str, kind: ValueKind) -> ParamNode {
        let children = match kind {
            ValueKind::Object(fields) => Self::field_nodes(fields),
            ValueKind::List(element) => match *element {
                ValueKind::Object(fields) => Self::field_nodes(fields),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        ParamNode {
            name,
            kind,
            children,
        }
    }

    fn field_nodes(fields: &'static [FieldSpec]) -> Vec<ParamNode> {
        let mut specs: Vec<&FieldSpec> = fields.iter().collect();
        specs.sort_by_key(|f| f.index);
        specs
            .into_iter()
            .map(|f| Self::node(f.name, f.kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT_FIELDS: &[FieldSpec] = &[
        FieldSpec {
            index: 2,
            name: "y",
            kind: ValueKind::I32,
        },
        FieldSpec {
            index: 1,
            name: "x",
            kind: ValueKind::I32,
        },
    ];

    const PARAMS: &[ParamSpec] = &[
        ParamSpec {
            index: 2,
            direction: Direction::Input,
            name: "label",
            kind: ValueKind::String,
        },
        ParamSpec {
            index: -1,
            direction: Direction::Input,
            name: "skip",
            kind: ValueKind::I32,
        },
        ParamSpec {
            index: 1,
            direction: Direction::Input,
            name: "origin",
            kind: ValueKind::Object(POINT_FIELDS),
        },
        ParamSpec {
            index: 1,
            direction: Direction::Output,
            name: "points",
            kind: ValueKind::List(&ValueKind::Object(POINT_FIELDS)),
        },
    ];

    static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
        category: 9,
        method: 9,
        server_id: 0,
        auth: AuthScope::Unauthenticated,
        params: PARAMS,
        constraints: &[],
    };

    #[test]
    fn trees_sort_by_index_not_declaration_order() {
        let tree = ParamTree::build(&DESCRIPTOR);

        let input_names: Vec<_> = tree.input.iter().map(|n| n.name).collect();
        assert_eq!(input_names, ["skip", "origin", "label"]);

        let origin = &tree.input[1];
        let child_names: Vec<_> = origin.children.iter().map(|n| n.name).collect();
        assert_eq!(child_names, ["x", "y"]);
    }

    #[test]
    fn list_nodes_carry_element_children() {
        let tree = ParamTree::build(&DESCRIPTOR);
        let list = &tree.output[0];
        assert!(matches!(list.kind, ValueKind::List(_)));
        assert_eq!(list.children.len(), 2);
    }

    #[test]
    fn defaults_cover_every_declared_parameter() {
        let params = ParamSet::for_descriptor(&DESCRIPTOR);
        assert_eq!(params.get_i32("skip"), Ok(0));
        assert_eq!(params.get_str("label"), Ok(""));
        assert!(params.get_list("points").expect("list exists").is_empty());

        // Nested objects are fully constructed up front.
        let mut params = params;
        let origin = params.get_object_mut("origin").expect("origin exists");
        assert_eq!(origin.get_i32("x"), Ok(0));
    }

    #[test]
    fn coercion_is_checked() {
        assert_eq!(
            Value::U64(300).coerce_to(&ValueKind::U16),
            Some(Value::U16(300))
        );
        assert_eq!(Value::U64(70_000).coerce_to(&ValueKind::U16), None);
        assert_eq!(Value::I32(-1).coerce_to(&ValueKind::U64), None);
        assert_eq!(
            Value::I32(7).coerce_to(&ValueKind::Enum(IntKind::U8)),
            Some(Value::U8(7))
        );
        assert_eq!(Value::Str("x".into()).coerce_to(&ValueKind::U8), None);
    }
}
