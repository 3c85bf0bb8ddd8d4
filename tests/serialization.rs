//! Integration tests for message serialization and polymorphic parsing
//! through the registry and both codecs.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use boardgame_protocol::core::codec::{AvailableCodecs, Codec, JsonCodec, MessagePackCodec};
use boardgame_protocol::core::serialization::{
    DecodedFields, FieldDef, FieldKind, FieldMap, FieldValue, Primitive, Timestamp, TypeRef,
};
use boardgame_protocol::error::{ProtocolError, Result};
use boardgame_protocol::protocol::handshake::{IntroductionMessage, ServerKeysMessage};
use boardgame_protocol::protocol::message::{
    AnyMessage, ChoiceMessage, ChoiceResponseMessage, InfoMessage, Message, MessageType,
    MultiMessage, MSG_TYPE_FIELD,
};
use boardgame_protocol::protocol::registry::TypeRegistry;
use std::collections::BTreeSet;

/// A message using every field kind.
#[derive(Debug, Clone)]
struct GameState {
    nothing: (),
    turn: i64,
    finished: bool,
    score: f64,
    seed: Vec<u8>,
    started: Timestamp,
    history: Vec<Primitive>,
    players: BTreeSet<String>,
    next: TypeRef,
    last: AnyMessage,
    log: Vec<AnyMessage>,
}

impl MessageType for GameState {
    const TAG: &'static str = "GameState";
    const SCHEMA: &'static [FieldDef] = &[
        FieldDef::new("nothing", FieldKind::None),
        FieldDef::new("turn", FieldKind::Int),
        FieldDef::new("finished", FieldKind::Bool),
        FieldDef::new("score", FieldKind::Float),
        FieldDef::new("seed", FieldKind::Bytes),
        FieldDef::new("started", FieldKind::Timestamp),
        FieldDef::new("history", FieldKind::Sequence),
        FieldDef::new("players", FieldKind::Set),
        FieldDef::new("next", FieldKind::TypeRef),
        FieldDef::new("last", FieldKind::Nested),
        FieldDef::new("log", FieldKind::Messages),
    ];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "nothing" => self.nothing.into(),
            "turn" => self.turn.into(),
            "finished" => self.finished.into(),
            "score" => self.score.into(),
            "seed" => self.seed.clone().into(),
            "started" => self.started.into(),
            "history" => self.history.clone().into(),
            "players" => self.players.clone().into(),
            "next" => self.next.clone().into(),
            "last" => self.last.clone().into(),
            "log" => self.log.clone().into(),
            _ => return None,
        })
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            nothing: fields.take("nothing")?,
            turn: fields.take("turn")?,
            finished: fields.take("finished")?,
            score: fields.take("score")?,
            seed: fields.take("seed")?,
            started: fields.take("started")?,
            history: fields.take("history")?,
            players: fields.take("players")?,
            next: fields.take("next")?,
            last: fields.take("last")?,
            log: fields.take("log")?,
        })
    }
}

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::with_defaults().unwrap();
    registry.register::<GameState>().unwrap();
    registry
}

fn sample_state() -> GameState {
    GameState {
        nothing: (),
        turn: 17,
        finished: false,
        score: -2.75,
        seed: (0u8..=255).collect(),
        started: Timestamp::from_millis(1_712_345_678_901),
        history: vec![Primitive::Str("e2e4".into()), Primitive::Int(3), Primitive::None],
        players: ["carol", "alice", "bob"].iter().map(|s| s.to_string()).collect(),
        next: TypeRef(ChoiceResponseMessage::TAG.to_string()),
        last: Box::new(ChoiceMessage::new("Your move", ["fold", "raise"])),
        log: vec![
            Box::new(InfoMessage::new("game started")),
            Box::new(MultiMessage::new(vec![Box::new(InfoMessage::new("inner"))])),
        ],
    }
}

fn codecs() -> Vec<Box<dyn Codec>> {
    vec![Box::new(JsonCodec), Box::new(MessagePackCodec)]
}

fn round_trip(registry: &TypeRegistry, codec: &dyn Codec, msg: &dyn Message) -> AnyMessage {
    let map = registry.encode(msg).unwrap();
    let bytes = codec.encode(&map).unwrap();
    let decoded = codec.decode(&bytes).unwrap();
    registry.parse(&decoded).unwrap()
}

#[test]
fn test_every_kind_round_trips() {
    let registry = registry();
    let state = sample_state();
    for codec in codecs() {
        let back = round_trip(&registry, codec.as_ref(), &state);
        assert!(
            (&state as &dyn Message) == back.as_ref(),
            "{} round trip changed the message",
            codec.name()
        );
        let back = back.downcast_ref::<GameState>().unwrap();
        assert_eq!(back.turn, 17);
        assert_eq!(back.seed.len(), 256);
        assert_eq!(back.started, state.started);
        assert_eq!(back.players.iter().next().unwrap(), "alice");
        assert!(back.last.is::<ChoiceMessage>());
        assert_eq!(back.log.len(), 2);
    }
}

#[test]
fn test_game_messages_round_trip() {
    let registry = registry();
    let messages: Vec<AnyMessage> = vec![
        Box::new(InfoMessage::new("")),
        Box::new(InfoMessage::new("Ünïcødé ♟")),
        Box::new(ChoiceMessage::new("Pick", Vec::<String>::new())),
        Box::new(ChoiceMessage::new("Pick", ["a", "b", "c"])),
        Box::new(ChoiceResponseMessage::new("b")),
        Box::new(MultiMessage::new(vec![])),
        Box::new(MultiMessage::new(vec![
            Box::new(InfoMessage::new("one")),
            Box::new(MultiMessage::new(vec![Box::new(ChoiceResponseMessage::new(
                "deep",
            ))])),
        ])),
        Box::new(IntroductionMessage::new("alice", "JSON")),
        Box::new(ServerKeysMessage::new(vec![7u8; 32], vec![])),
    ];

    for codec in codecs() {
        for msg in &messages {
            let back = round_trip(&registry, codec.as_ref(), msg.as_ref());
            assert_eq!(&back, msg, "{} via {}", msg.type_tag(), codec.name());
        }
    }
}

#[test]
fn test_polymorphic_parse_yields_concrete_type() {
    let registry = registry();
    let bytes = br#"{"msg_type": "ChoiceResponseMessage", "choice": "new_game"}"#;
    let map = JsonCodec.decode(bytes).unwrap();
    let msg = registry.parse(&map).unwrap();
    assert_eq!(msg.type_tag(), "ChoiceResponseMessage");
    let typed = msg.downcast_ref::<ChoiceResponseMessage>().unwrap();
    assert_eq!(typed.choice, "new_game");
}

#[test]
fn test_unknown_tag_is_registry_failure() {
    let registry = registry();
    let map = JsonCodec
        .decode(br#"{"msg_type": "ChatMessage", "text": "hi"}"#)
        .unwrap();
    let err = registry.parse(&map).unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownMessageType(tag) if tag == "ChatMessage"));
}

#[test]
fn test_unknown_nested_tag_fails_whole_message() {
    let registry = registry();
    let map = JsonCodec
        .decode(br#"{"msg_type": "MultiMessage", "messages": [{"msg_type": "Ghost"}]}"#)
        .unwrap();
    assert!(matches!(
        registry.parse(&map),
        Err(ProtocolError::UnknownMessageType(_))
    ));
}

#[test]
fn test_deeply_nested_messages_rejected() {
    let registry = registry();
    let mut msg: AnyMessage = Box::new(InfoMessage::new("bottom"));
    for _ in 0..50 {
        msg = Box::new(MultiMessage::new(vec![msg]));
    }
    let map = registry.encode(msg.as_ref()).unwrap();

    for codec in codecs() {
        let decoded = codec.decode(&codec.encode(&map).unwrap()).unwrap();
        let err = registry.parse(&decoded).unwrap_err();
        assert!(
            matches!(err, ProtocolError::DeserializeError { ref type_name, .. } if type_name == "MultiMessage"),
            "{}: {err}",
            codec.name()
        );
    }
}

#[test]
fn test_missing_field_names_type_and_field() {
    let registry = registry();
    let map = JsonCodec.decode(br#"{"msg_type": "ChoiceMessage", "description": "x"}"#).unwrap();
    match registry.parse(&map).unwrap_err() {
        ProtocolError::DeserializeError {
            type_name, field, ..
        } => {
            assert_eq!(type_name, "ChoiceMessage");
            assert_eq!(field, "choices");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_wrong_field_kind_rejected() {
    let registry = registry();
    let map = JsonCodec
        .decode(br#"{"msg_type": "ChoiceResponseMessage", "choice": 5}"#)
        .unwrap();
    assert!(matches!(
        registry.parse(&map),
        Err(ProtocolError::DeserializeError { .. })
    ));
}

#[test]
fn test_extra_fields_ignored() {
    let registry = registry();
    let map = JsonCodec
        .decode(br#"{"msg_type": "InfoMessage", "text": "hi", "colour": "red"}"#)
        .unwrap();
    let msg = registry.parse(&map).unwrap();
    assert_eq!(msg.downcast_ref::<InfoMessage>().unwrap().text, "hi");
}

#[test]
fn test_wire_form_of_bytes_and_timestamps() {
    let registry = registry();
    let keys = ServerKeysMessage::new(b"hello".to_vec(), Vec::new());
    let map = registry.encode(&keys).unwrap();
    assert_eq!(map.get("server_key"), Some(&Primitive::Str("aGVsbG8=".into())));
    assert_eq!(map.get("client_key"), Some(&Primitive::Str(String::new())));

    let state = sample_state();
    let map: FieldMap = registry.encode(&state).unwrap();
    assert_eq!(map.get("started"), Some(&Primitive::Float(1_712_345_678.901)));
    assert_eq!(map.get(MSG_TYPE_FIELD), Some(&Primitive::Str("GameState".into())));
}

#[test]
fn test_field_order_does_not_change_encoding() {
    let codec = JsonCodec;
    let a = codec
        .decode(br#"{"msg_type": "ChoiceMessage", "description": "d", "choices": ["x"]}"#)
        .unwrap();
    let b = codec
        .decode(br#"{"choices": ["x"], "description": "d", "msg_type": "ChoiceMessage"}"#)
        .unwrap();
    assert_eq!(codec.encode(&a).unwrap(), codec.encode(&b).unwrap());
}

#[test]
fn test_unregistered_codec_name() {
    let codecs = AvailableCodecs::with_defaults();
    assert!(matches!(codecs.get("XML"), Err(ProtocolError::UnknownCodec(_))));
}
