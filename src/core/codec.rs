//! # Codecs
//!
//! A codec turns a [`FieldMap`] into bytes and back. Codecs are pure and
//! stateless; one is chosen per connection during the handshake and looked up
//! by name in [`AvailableCodecs`].
//!
//! ## Built-in codecs
//! - `"JSON"`: UTF-8 JSON object (`serde_json`)
//! - `"MSGPACK"`: MessagePack map (`rmp-serde`)
//!
//! Field maps are ordered, so encoding the same map twice yields the same bytes.

use crate::core::serialization::FieldMap;
use crate::error::{ProtocolError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name of the codec every introduction is encoded with.
pub const HANDSHAKE_CODEC: &str = JsonCodec::NAME;

/// Byte encoding for field maps.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Name used to select this codec during the handshake.
    fn name(&self) -> &'static str;

    fn encode(&self, map: &FieldMap) -> Result<Vec<u8>>;

    /// Decode a payload. Anything other than a structured object is a
    /// [`ProtocolError::CodecDecode`].
    fn decode(&self, bytes: &[u8]) -> Result<FieldMap>;
}

/// JSON codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub const NAME: &'static str = "JSON";
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode(&self, map: &FieldMap) -> Result<Vec<u8>> {
        serde_json::to_vec(map).map_err(|e| ProtocolError::CodecEncode {
            codec: Self::NAME,
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<FieldMap> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::CodecDecode {
            codec: Self::NAME,
            reason: e.to_string(),
        })
    }
}

/// MessagePack codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackCodec;

impl MessagePackCodec {
    pub const NAME: &'static str = "MSGPACK";
}

impl Codec for MessagePackCodec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode(&self, map: &FieldMap) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(map).map_err(|e| ProtocolError::CodecEncode {
            codec: Self::NAME,
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<FieldMap> {
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::CodecDecode {
            codec: Self::NAME,
            reason: e.to_string(),
        })
    }
}

/// Codecs a peer is willing to speak, keyed by name.
#[derive(Clone, Default)]
pub struct AvailableCodecs {
    codecs: HashMap<&'static str, Arc<dyn Codec>>,
}

impl fmt::Debug for AvailableCodecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvailableCodecs")
            .field("codecs", &self.names())
            .finish()
    }
}

impl AvailableCodecs {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON and MessagePack.
    pub fn with_defaults() -> Self {
        let mut codecs = Self::new();
        codecs.register(Arc::new(JsonCodec));
        codecs.register(Arc::new(MessagePackCodec));
        codecs
    }

    /// Add a codec, replacing any codec with the same name.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> &mut Self {
        debug!(codec = codec.name(), "Registered codec");
        self.codecs.insert(codec.name(), codec);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownCodec(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.codecs.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::serialization::Primitive;

    fn sample() -> FieldMap {
        let mut nested = FieldMap::new();
        nested.insert("inner".into(), Primitive::Bool(true));

        let mut map = FieldMap::new();
        map.insert("msg_type".into(), "InfoMessage".into());
        map.insert("count".into(), Primitive::Int(-42));
        map.insert("ratio".into(), Primitive::Float(0.5));
        map.insert("nothing".into(), Primitive::None);
        map.insert(
            "list".into(),
            Primitive::Seq(vec!["a".into(), Primitive::Int(1)]),
        );
        map.insert("nested".into(), Primitive::Map(nested));
        map
    }

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;
        let bytes = codec.encode(&sample()).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_msgpack_round_trip() {
        let codec = MessagePackCodec;
        let bytes = codec.encode(&sample()).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let codec = JsonCodec;
        assert_eq!(
            codec.encode(&sample()).unwrap(),
            codec.encode(&sample()).unwrap()
        );
    }

    #[test]
    fn test_non_object_payload_rejected() {
        for payload in [&b"[1,2,3]"[..], b"42", b"\"text\"", b"{not json", b""] {
            let err = JsonCodec.decode(payload).unwrap_err();
            assert!(matches!(err, ProtocolError::CodecDecode { codec: "JSON", .. }));
        }
    }

    #[test]
    fn test_garbage_msgpack_rejected() {
        let err = MessagePackCodec.decode(&[0xc1, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::CodecDecode { codec: "MSGPACK", .. }));
    }

    #[test]
    fn test_unknown_codec_is_distinct_error() {
        let codecs = AvailableCodecs::with_defaults();
        assert!(codecs.get("JSON").is_ok());
        let err = codecs.get("XML").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCodec(name) if name == "XML"));
    }

    #[test]
    fn test_names_sorted() {
        assert_eq!(AvailableCodecs::with_defaults().names(), vec!["JSON", "MSGPACK"]);
        assert!(AvailableCodecs::new().names().is_empty());
    }
}
