//! # Type Registry
//!
//! Maps type tags to message descriptors so that a receiver can rebuild a
//! message without knowing its concrete type in advance.
//!
//! The registry is an explicit object: build it at start-up, register every
//! message type the process will exchange, then share it read-only
//! (`Arc<TypeRegistry>`) with every session. Schemas are validated once, at
//! registration time.

use crate::core::serialization::{self, DecodedFields, FieldDef, FieldMap, Primitive};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{ClientKeyMessage, IntroductionMessage, ServerKeysMessage};
use crate::protocol::message::{
    AnyMessage, ChoiceMessage, ChoiceResponseMessage, InfoMessage, Message, MessageType,
    MultiMessage, MSG_TYPE_FIELD,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

type DecodeFn = fn(&mut DecodedFields) -> Result<AnyMessage>;

#[derive(Clone, Copy)]
struct Descriptor {
    tag: &'static str,
    schema: &'static [FieldDef],
    decode: DecodeFn,
}

fn decode_boxed<T: MessageType>(fields: &mut DecodedFields) -> Result<AnyMessage> {
    Ok(Box::new(T::from_fields(fields)?))
}

/// Registry of message types, keyed by type tag.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<&'static str, Descriptor>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.types.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("types", &tags).finish()
    }
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the handshake messages and the built-in game messages.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry
            .register::<IntroductionMessage>()?
            .register::<ServerKeysMessage>()?
            .register::<ClientKeyMessage>()?
            .register::<InfoMessage>()?
            .register::<ChoiceMessage>()?
            .register::<ChoiceResponseMessage>()?
            .register::<MultiMessage>()?;
        Ok(registry)
    }

    /// Register a message type. Fails on an invalid schema or a tag that is
    /// already taken.
    pub fn register<T: MessageType>(&mut self) -> Result<&mut Self> {
        validate_schema(T::TAG, T::SCHEMA)?;
        if self.types.contains_key(T::TAG) {
            return Err(ProtocolError::DuplicateMessageType(T::TAG.to_string()));
        }
        self.types.insert(
            T::TAG,
            Descriptor {
                tag: T::TAG,
                schema: T::SCHEMA,
                decode: decode_boxed::<T>,
            },
        );
        debug!(tag = T::TAG, fields = T::SCHEMA.len(), "Registered message type");
        Ok(self)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.types.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.types.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Schema of a registered type.
    pub fn schema(&self, tag: &str) -> Option<&'static [FieldDef]> {
        self.types.get(tag).map(|d| d.schema)
    }

    /// Serialize a message whose type is registered here.
    pub fn encode(&self, msg: &dyn Message) -> Result<FieldMap> {
        if !self.contains(msg.type_tag()) {
            return Err(ProtocolError::UnknownMessageType(msg.type_tag().to_string()));
        }
        serialization::serialize(msg)
    }

    /// Rebuild a message of whatever type its `msg_type` names.
    pub fn parse(&self, map: &FieldMap) -> Result<AnyMessage> {
        self.parse_nested(map, 0)
    }

    pub(crate) fn parse_nested(&self, map: &FieldMap, depth: usize) -> Result<AnyMessage> {
        let tag = read_tag(map)?;
        let descriptor = self
            .types
            .get(tag)
            .ok_or_else(|| ProtocolError::UnknownMessageType(tag.to_string()))?;
        trace!(tag = descriptor.tag, depth, "Parsing message");
        let mut fields =
            DecodedFields::decode_nested(descriptor.tag, descriptor.schema, map, self, depth)?;
        (descriptor.decode)(&mut fields)
    }

    /// Rebuild a message that must be of type `T`.
    pub fn deserialize<T: MessageType>(&self, map: &FieldMap) -> Result<T> {
        if !self.contains(T::TAG) {
            return Err(ProtocolError::UnknownMessageType(T::TAG.to_string()));
        }
        let tag = read_tag(map)?;
        if tag != T::TAG {
            return Err(ProtocolError::UnexpectedMessage {
                expected: T::TAG.to_string(),
                found: tag.to_string(),
            });
        }
        let mut fields = DecodedFields::decode(T::TAG, T::SCHEMA, map, self)?;
        T::from_fields(&mut fields)
    }
}

fn read_tag(map: &FieldMap) -> Result<&str> {
    match map.get(MSG_TYPE_FIELD) {
        Some(Primitive::Str(tag)) => Ok(tag.as_str()),
        Some(other) => Err(ProtocolError::DeserializeError {
            type_name: "<untagged>".to_string(),
            field: MSG_TYPE_FIELD.to_string(),
            reason: format!("type tag must be a string, found {}", other.shape()),
        }),
        None => Err(ProtocolError::DeserializeError {
            type_name: "<untagged>".to_string(),
            field: MSG_TYPE_FIELD.to_string(),
            reason: "missing type tag".to_string(),
        }),
    }
}

fn validate_schema(tag: &'static str, schema: &'static [FieldDef]) -> Result<()> {
    let invalid = |reason: String| ProtocolError::InvalidSchema {
        type_name: tag.to_string(),
        reason,
    };

    if tag.is_empty() {
        return Err(invalid("type tag is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for def in schema {
        if def.name.is_empty() {
            return Err(invalid("field with empty name".to_string()));
        }
        if def.name == MSG_TYPE_FIELD {
            return Err(invalid(format!("field name '{MSG_TYPE_FIELD}' is reserved")));
        }
        if !seen.insert(def.name) {
            return Err(invalid(format!("field '{}' declared twice", def.name)));
        }
    }
    Ok(())
}
