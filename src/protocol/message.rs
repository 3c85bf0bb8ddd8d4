//! # Messages
//!
//! A message is any record type that declares a schema and a globally unique
//! type tag. Concrete types implement [`MessageType`]; code that handles "any
//! message" works with the object-safe [`Message`] trait through
//! [`AnyMessage`].
//!
//! Two messages are equal exactly when their encoded field maps are equal.

use crate::core::serialization::{
    self, DecodedFields, FieldDef, FieldKind, FieldMap, FieldValue,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::registry::TypeRegistry;
use std::any::Any;
use std::fmt;

/// Reserved field carrying the type tag in every encoded message.
pub const MSG_TYPE_FIELD: &str = "msg_type";

/// A boxed message of any registered type.
pub type AnyMessage = Box<dyn Message>;

/// Object-safe view of a message.
///
/// Implemented automatically for every [`MessageType`].
pub trait Message: fmt::Debug + Send + Sync + 'static {
    fn type_tag(&self) -> &'static str;
    fn schema(&self) -> &'static [FieldDef];
    /// Current value of a schema field, `None` for names outside the schema.
    fn field(&self, name: &str) -> Option<FieldValue>;
    fn clone_box(&self) -> AnyMessage;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A concrete message type with a static schema.
pub trait MessageType: fmt::Debug + Clone + Send + Sync + 'static {
    /// Globally unique type tag, written to `msg_type`.
    const TAG: &'static str;
    /// Ordered `(name, kind)` list. Must not contain `msg_type`.
    const SCHEMA: &'static [FieldDef];

    fn field_value(&self, name: &str) -> Option<FieldValue>;

    fn from_fields(fields: &mut DecodedFields) -> Result<Self>;

    fn serialize(&self) -> Result<FieldMap> {
        serialization::serialize(self)
    }

    fn deserialize(map: &FieldMap, registry: &TypeRegistry) -> Result<Self> {
        registry.deserialize::<Self>(map)
    }
}

impl<T: MessageType> Message for T {
    fn type_tag(&self) -> &'static str {
        T::TAG
    }

    fn schema(&self) -> &'static [FieldDef] {
        T::SCHEMA
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.field_value(name)
    }

    fn clone_box(&self) -> AnyMessage {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Clone for AnyMessage {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl PartialEq for dyn Message {
    fn eq(&self, other: &Self) -> bool {
        match (serialization::serialize(self), serialization::serialize(other)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl dyn Message {
    pub fn is<T: MessageType>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: MessageType>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Recover the concrete type of a boxed message.
pub fn downcast<T: MessageType>(msg: AnyMessage) -> Result<T> {
    let found = msg.type_tag();
    msg.into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| ProtocolError::UnexpectedMessage {
            expected: T::TAG.to_string(),
            found: found.to_string(),
        })
}

/// Human-readable one-line rendering: `Type[field:value,...]`.
pub fn describe(msg: &dyn Message) -> String {
    let fields: Vec<String> = msg
        .schema()
        .iter()
        .map(|def| match msg.field(def.name) {
            Some(value) => format!("{}:{}", def.name, render(&value)),
            None => format!("{}:?", def.name),
        })
        .collect();
    format!("{}[{}]", msg.type_tag(), fields.join(","))
}

fn render(value: &FieldValue) -> String {
    match value {
        FieldValue::None => "None".to_string(),
        FieldValue::Str(s) => s.clone(),
        FieldValue::Int(i) => i.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Float(f) => f.to_string(),
        FieldValue::Bytes(b) => format!("<{} bytes>", b.len()),
        FieldValue::Timestamp(t) => t.as_secs_f64().to_string(),
        FieldValue::Sequence(items) => format!("{items:?}"),
        FieldValue::Set(items) => format!("{items:?}"),
        FieldValue::TypeRef(t) => t.0.clone(),
        FieldValue::Nested(m) => describe(m.as_ref()),
        FieldValue::Messages(ms) => format!(
            "[{}]",
            ms.iter()
                .map(|m| describe(m.as_ref()))
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
}

// ---------------------------------------------------------------------------
// Game-level messages
// ---------------------------------------------------------------------------

/// Free-form text shown to a player.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoMessage {
    pub text: String,
}

impl InfoMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl MessageType for InfoMessage {
    const TAG: &'static str = "InfoMessage";
    const SCHEMA: &'static [FieldDef] = &[FieldDef::new("text", FieldKind::Str)];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "text" => Some(self.text.as_str().into()),
            _ => None,
        }
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            text: fields.take("text")?,
        })
    }
}

/// Asks a player to pick one of several options.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceMessage {
    pub description: String,
    pub choices: Vec<String>,
}

impl ChoiceMessage {
    pub fn new<I, S>(description: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }
}

impl MessageType for ChoiceMessage {
    const TAG: &'static str = "ChoiceMessage";
    const SCHEMA: &'static [FieldDef] = &[
        FieldDef::new("description", FieldKind::Str),
        FieldDef::new("choices", FieldKind::Sequence),
    ];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "description" => Some(self.description.as_str().into()),
            "choices" => Some(self.choices.clone().into()),
            _ => None,
        }
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            description: fields.take("description")?,
            choices: fields.take("choices")?,
        })
    }
}

/// A player's answer to a [`ChoiceMessage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceResponseMessage {
    pub choice: String,
}

impl ChoiceResponseMessage {
    pub fn new(choice: impl Into<String>) -> Self {
        Self {
            choice: choice.into(),
        }
    }
}

impl MessageType for ChoiceResponseMessage {
    const TAG: &'static str = "ChoiceResponseMessage";
    const SCHEMA: &'static [FieldDef] = &[FieldDef::new("choice", FieldKind::Str)];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "choice" => Some(self.choice.as_str().into()),
            _ => None,
        }
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            choice: fields.take("choice")?,
        })
    }
}

/// Container carrying several messages in order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiMessage {
    pub messages: Vec<AnyMessage>,
}

impl MultiMessage {
    pub fn new(messages: Vec<AnyMessage>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl MessageType for MultiMessage {
    const TAG: &'static str = "MultiMessage";
    const SCHEMA: &'static [FieldDef] = &[FieldDef::new("messages", FieldKind::Messages)];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "messages" => Some(self.messages.clone().into()),
            _ => None,
        }
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            messages: fields.take("messages")?,
        })
    }
}
