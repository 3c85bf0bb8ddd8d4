//! # Core Protocol Components
//!
//! Framing, codecs, and field-level serialization.
//!
//! This module provides the foundation for the protocol: how bytes are cut
//! into frames, how a field map becomes bytes, and how typed message fields
//! become field maps.
//!
//! ## Components
//! - **Frame**: Tokio codec for length-prefixed frames over byte streams
//! - **Codec**: Pluggable field-map encodings (JSON, MessagePack)
//! - **Serialization**: Field kinds and the canonical kind table
//!
//! ## Wire Format
//! ```text
//! [Length(2, big-endian)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum frame payload: 65535 bytes
//! - Length validation before allocation
//! - Oversized payloads are rejected, never truncated

pub mod codec;
pub mod frame;
pub mod serialization;
