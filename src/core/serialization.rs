//! # Field Serialization
//!
//! Maps typed message fields to codec-neutral primitives and back.
//!
//! Every message declares a schema: an ordered list of `(field name, FieldKind)`.
//! The wire representation of a field is decided by its declared kind, never
//! by the runtime value, through the kind table in [`FieldKind::encode`] and
//! [`FieldKind::decode`]. Both directions go through that table, which is what
//! keeps `deserialize(serialize(m)) == m` true for every kind, nested and
//! container messages included.
//!
//! ## Kind table
//! | Kind | Primitive form |
//! |---|---|
//! | `None` | null |
//! | `Str`, `Int`, `Bool`, `Float` | native scalar |
//! | `Bytes` | standard base64 text, no line breaks |
//! | `Timestamp` | float seconds since the Unix epoch (millisecond resolution) |
//! | `Sequence` | array of primitives |
//! | `Set` | sorted array of unique strings |
//! | `TypeRef` | registered type tag |
//! | `Nested` | the nested message's own field map |
//! | `Messages` | array of nested field maps |
//!
//! Nested and container messages may wrap each other at most
//! [`MAX_NESTING_DEPTH`] levels deep on decode.

use crate::error::{ProtocolError, Result};
use crate::protocol::message::{AnyMessage, Message, MSG_TYPE_FIELD};
use crate::protocol::registry::TypeRegistry;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Deepest chain of `Nested`/`Messages` fields accepted on decode.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Encoded form of a message: field name to primitive value.
pub type FieldMap = BTreeMap<String, Primitive>;

/// Codec-neutral value. Every codec must be able to represent these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Primitive>),
    Map(FieldMap),
}

impl Primitive {
    /// Short name of the primitive's shape, for error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            Primitive::None => "null",
            Primitive::Bool(_) => "boolean",
            Primitive::Int(_) => "integer",
            Primitive::Float(_) => "float",
            Primitive::Str(_) => "string",
            Primitive::Seq(_) => "array",
            Primitive::Map(_) => "object",
        }
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::Str(s.to_string())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Primitive::Str(s)
    }
}

impl From<i64> for Primitive {
    fn from(i: i64) -> Self {
        Primitive::Int(i)
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Primitive::Bool(b)
    }
}

/// Point in time with millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    millis: i64,
}

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub fn as_millis(&self) -> i64 {
        self.millis
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        };
        Self { millis }
    }

    pub fn to_system_time(&self) -> SystemTime {
        let offset = Duration::from_millis(self.millis.unsigned_abs());
        if self.millis >= 0 {
            UNIX_EPOCH + offset
        } else {
            UNIX_EPOCH - offset
        }
    }

    /// Seconds since the epoch, as carried on the wire.
    pub fn as_secs_f64(&self) -> f64 {
        self.millis as f64 / 1000.0
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            millis: (secs * 1000.0).round() as i64,
        }
    }
}

/// Tag of a registered message type, carried as a field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef(pub String);

/// Primitive kinds a schema field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    None,
    Str,
    Int,
    Bool,
    Float,
    Bytes,
    Timestamp,
    Sequence,
    Set,
    TypeRef,
    Nested,
    Messages,
}

/// One entry of a message schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Typed field value, the in-memory side of the kind table.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    None,
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    Bytes(Vec<u8>),
    Timestamp(Timestamp),
    Sequence(Vec<Primitive>),
    Set(BTreeSet<String>),
    TypeRef(TypeRef),
    Nested(AnyMessage),
    Messages(Vec<AnyMessage>),
}

impl FieldValue {
    /// Kind this value naturally belongs to.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::None => FieldKind::None,
            FieldValue::Str(_) => FieldKind::Str,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Bytes(_) => FieldKind::Bytes,
            FieldValue::Timestamp(_) => FieldKind::Timestamp,
            FieldValue::Sequence(_) => FieldKind::Sequence,
            FieldValue::Set(_) => FieldKind::Set,
            FieldValue::TypeRef(_) => FieldKind::TypeRef,
            FieldValue::Nested(_) => FieldKind::Nested,
            FieldValue::Messages(_) => FieldKind::Messages,
        }
    }
}

/// Identifies the field being converted, for error reporting.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    pub type_name: &'a str,
    pub field: &'a str,
    /// How many messages enclose the one holding this field.
    pub depth: usize,
}

impl<'a> FieldRef<'a> {
    pub fn new(type_name: &'a str, field: &'a str) -> Self {
        Self {
            type_name,
            field,
            depth: 0,
        }
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    fn nested_depth(&self) -> Result<usize> {
        let depth = self.depth + 1;
        if depth > MAX_NESTING_DEPTH {
            return Err(self.deserialize_error(format!(
                "messages nested deeper than {MAX_NESTING_DEPTH}"
            )));
        }
        Ok(depth)
    }

    fn serialize_error(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::SerializeError {
            type_name: self.type_name.to_string(),
            field: self.field.to_string(),
            reason: reason.into(),
        }
    }

    fn deserialize_error(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::DeserializeError {
            type_name: self.type_name.to_string(),
            field: self.field.to_string(),
            reason: reason.into(),
        }
    }
}

impl FieldKind {
    /// Canonical encoder for this kind.
    pub fn encode(self, value: FieldValue, at: FieldRef<'_>) -> Result<Primitive> {
        let primitive = match (self, value) {
            (FieldKind::None, FieldValue::None) => Primitive::None,
            (FieldKind::Str, FieldValue::Str(s)) => Primitive::Str(s),
            (FieldKind::Int, FieldValue::Int(i)) => Primitive::Int(i),
            (FieldKind::Bool, FieldValue::Bool(b)) => Primitive::Bool(b),
            (FieldKind::Float, FieldValue::Float(f)) => Primitive::Float(f),
            (FieldKind::Bytes, FieldValue::Bytes(b)) => {
                Primitive::Str(general_purpose::STANDARD.encode(b))
            }
            (FieldKind::Timestamp, FieldValue::Timestamp(t)) => Primitive::Float(t.as_secs_f64()),
            (FieldKind::Sequence, FieldValue::Sequence(items)) => Primitive::Seq(items),
            (FieldKind::Set, FieldValue::Set(items)) => {
                Primitive::Seq(items.into_iter().map(Primitive::Str).collect())
            }
            (FieldKind::TypeRef, FieldValue::TypeRef(TypeRef(tag))) => Primitive::Str(tag),
            (FieldKind::Nested, FieldValue::Nested(msg)) => Primitive::Map(serialize(msg.as_ref())?),
            (FieldKind::Messages, FieldValue::Messages(msgs)) => Primitive::Seq(
                msgs.iter()
                    .map(|m| serialize(m.as_ref()).map(Primitive::Map))
                    .collect::<Result<Vec<_>>>()?,
            ),
            (kind, value) => {
                return Err(at.serialize_error(format!(
                    "declared {kind:?} but holds {:?}",
                    value.kind()
                )))
            }
        };
        Ok(primitive)
    }

    /// Canonical decoder for this kind.
    pub fn decode(
        self,
        primitive: Primitive,
        at: FieldRef<'_>,
        registry: &TypeRegistry,
    ) -> Result<FieldValue> {
        let value = match (self, primitive) {
            (FieldKind::None, Primitive::None) => FieldValue::None,
            (FieldKind::Str, Primitive::Str(s)) => FieldValue::Str(s),
            (FieldKind::Int, Primitive::Int(i)) => FieldValue::Int(i),
            (FieldKind::Bool, Primitive::Bool(b)) => FieldValue::Bool(b),
            (FieldKind::Float, Primitive::Float(f)) => FieldValue::Float(f),
            (FieldKind::Float, Primitive::Int(i)) => FieldValue::Float(i as f64),
            (FieldKind::Bytes, Primitive::Str(text)) => {
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = general_purpose::STANDARD
                    .decode(compact)
                    .map_err(|e| at.deserialize_error(format!("invalid base64: {e}")))?;
                FieldValue::Bytes(bytes)
            }
            (FieldKind::Timestamp, Primitive::Float(secs)) => {
                FieldValue::Timestamp(Timestamp::from_secs_f64(secs))
            }
            (FieldKind::Timestamp, Primitive::Int(secs)) => {
                FieldValue::Timestamp(Timestamp::from_millis(secs.saturating_mul(1000)))
            }
            (FieldKind::Sequence, Primitive::Seq(items)) => FieldValue::Sequence(items),
            (FieldKind::Set, Primitive::Seq(items)) => {
                let mut set = BTreeSet::new();
                for item in items {
                    match item {
                        Primitive::Str(s) => {
                            set.insert(s);
                        }
                        other => {
                            return Err(at.deserialize_error(format!(
                                "set element must be a string, found {}",
                                other.shape()
                            )))
                        }
                    }
                }
                FieldValue::Set(set)
            }
            (FieldKind::TypeRef, Primitive::Str(tag)) => {
                if !registry.contains(&tag) {
                    return Err(ProtocolError::UnknownMessageType(tag));
                }
                FieldValue::TypeRef(TypeRef(tag))
            }
            (FieldKind::Nested, Primitive::Map(map)) => {
                let depth = at.nested_depth()?;
                FieldValue::Nested(registry.parse_nested(&map, depth)?)
            }
            (FieldKind::Messages, Primitive::Seq(items)) => {
                let depth = at.nested_depth()?;
                let mut messages = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Primitive::Map(map) => messages.push(registry.parse_nested(&map, depth)?),
                        other => {
                            return Err(at.deserialize_error(format!(
                                "message element must be an object, found {}",
                                other.shape()
                            )))
                        }
                    }
                }
                FieldValue::Messages(messages)
            }
            (kind, primitive) => {
                return Err(at.deserialize_error(format!(
                    "expected {kind:?}, found {}",
                    primitive.shape()
                )))
            }
        };
        Ok(value)
    }
}

/// Serialize a message into its field map, walking the schema in order and
/// adding the reserved `msg_type` tag.
pub fn serialize(msg: &dyn Message) -> Result<FieldMap> {
    let type_name = msg.type_tag();
    let mut out = FieldMap::new();
    for def in msg.schema() {
        let at = FieldRef::new(type_name, def.name);
        let value = msg
            .field(def.name)
            .ok_or_else(|| at.serialize_error("field declared in schema but not provided"))?;
        out.insert(def.name.to_string(), def.kind.encode(value, at)?);
    }
    out.insert(MSG_TYPE_FIELD.to_string(), Primitive::Str(type_name.to_string()));
    Ok(out)
}

/// Fully decoded fields of one message, ready for typed extraction.
///
/// Every schema field is decoded before the concrete type is constructed, so
/// a failing field never leaves a half-built message behind.
#[derive(Debug)]
pub struct DecodedFields {
    type_name: &'static str,
    values: BTreeMap<&'static str, FieldValue>,
}

impl DecodedFields {
    /// Decode every field of `schema` out of `map`.
    pub fn decode(
        type_name: &'static str,
        schema: &'static [FieldDef],
        map: &FieldMap,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        Self::decode_nested(type_name, schema, map, registry, 0)
    }

    /// Decode a message enclosed by `depth` others.
    pub(crate) fn decode_nested(
        type_name: &'static str,
        schema: &'static [FieldDef],
        map: &FieldMap,
        registry: &TypeRegistry,
        depth: usize,
    ) -> Result<Self> {
        let mut values = BTreeMap::new();
        for def in schema {
            let at = FieldRef::new(type_name, def.name).at_depth(depth);
            let primitive = map
                .get(def.name)
                .cloned()
                .ok_or_else(|| at.deserialize_error("missing field"))?;
            values.insert(def.name, def.kind.decode(primitive, at, registry)?);
        }
        Ok(Self { type_name, values })
    }

    /// Remove a decoded field and convert it to its Rust type.
    pub fn take<T: FromFieldValue>(&mut self, name: &str) -> Result<T> {
        let at = FieldRef::new(self.type_name, name);
        let value = self
            .values
            .remove(name)
            .ok_or_else(|| at.deserialize_error("missing field"))?;
        T::from_field_value(value).map_err(|reason| at.deserialize_error(reason))
    }
}

/// Conversion from a decoded field value into a concrete Rust field type.
pub trait FromFieldValue: Sized {
    fn from_field_value(value: FieldValue) -> std::result::Result<Self, String>;
}

fn mismatch(expected: FieldKind, found: &FieldValue) -> String {
    format!("expected {expected:?}, found {:?}", found.kind())
}

macro_rules! field_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::$variant(value)
                }
            }

            impl FromFieldValue for $ty {
                fn from_field_value(value: FieldValue) -> std::result::Result<Self, String> {
                    match value {
                        FieldValue::$variant(inner) => Ok(inner),
                        other => Err(mismatch(FieldKind::$variant, &other)),
                    }
                }
            }
        )*
    };
}

field_conversions! {
    String => Str,
    i64 => Int,
    bool => Bool,
    f64 => Float,
    Vec<u8> => Bytes,
    Timestamp => Timestamp,
    Vec<Primitive> => Sequence,
    BTreeSet<String> => Set,
    TypeRef => TypeRef,
    AnyMessage => Nested,
    Vec<AnyMessage> => Messages,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<()> for FieldValue {
    fn from(_: ()) -> Self {
        FieldValue::None
    }
}

impl FromFieldValue for () {
    fn from_field_value(value: FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::None => Ok(()),
            other => Err(mismatch(FieldKind::None, &other)),
        }
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::Sequence(value.into_iter().map(Primitive::Str).collect())
    }
}

impl FromFieldValue for Vec<String> {
    fn from_field_value(value: FieldValue) -> std::result::Result<Self, String> {
        match value {
            FieldValue::Sequence(items) => items
                .into_iter()
                .map(|item| match item {
                    Primitive::Str(s) => Ok(s),
                    other => Err(format!(
                        "sequence element must be a string, found {}",
                        other.shape()
                    )),
                })
                .collect(),
            other => Err(mismatch(FieldKind::Sequence, &other)),
        }
    }
}
