//! # Warden Protocol
//!
//! The binary message layer of the Warden request server: wire primitives,
//! handler parameter schemas, the tree-walking codec, declarative input
//! validation, paged-list support, and frame layouts.
//!
//! ## Design
//!
//! Handlers describe their wire layout with static descriptor tables (an
//! ordered array of indexed, directed parameters). The codec builds a
//! serialization tree from the descriptor once, at registration time, and
//! walks it against the handler's mutable field bag for every request. There
//! is no schema evolution on the wire: producer and consumer must agree on
//! the handler set.
//!
//! ## Layout
//!
//! * [`wire`] - little-endian scalar readers and writers
//! * [`schema`] - value kinds, descriptors, parameter trees, parameter sets
//! * [`codec`] - the tree-walking serializer/deserializer and record binding
//! * [`validate`] - declarative input constraints
//! * [`paged`] - synthetic paging parameters and comparator-table sorting
//! * [`frame`] - request/response/notification frames and key packing
//! * [`codes`] - the reserved response-code space

pub mod codec;
pub mod codes;
pub mod frame;
pub mod paged;
pub mod schema;
pub mod validate;
pub mod wire;

pub use codec::{bind_record, Codec, CodecError, Record};
pub use codes::ResponseCode;
pub use frame::{encode_response, pack_key, RequestFrame};
pub use schema::{
    AuthScope, Direction, FieldSpec, HandlerDescriptor, IntKind, ParamNode, ParamSet, ParamSpec,
    ParamTree, SchemaError, Value, ValueKind,
};
pub use validate::{Constraint, Rule};
pub use wire::{WireError, WireReader, WireWriter};
