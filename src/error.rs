//! # Error Types
//!
//! Error handling for the board game protocol.
//!
//! Every failure the protocol core can produce is a distinct variant, so that
//! callers can decide between retrying, dropping a message and closing the
//! connection without inspecting error strings.
//!
//! ## Error Categories
//! - **Transport**: stream I/O, refused/unreachable connects, truncated or oversized frames
//! - **Codec**: unknown codec names, payloads that do not parse
//! - **Serialization**: a message field that cannot be encoded (schema/programming error)
//! - **Deserialization / registry**: unknown type tags, missing or mistyped fields
//! - **Handshake**: retry exhaustion, unsupported codec, out-of-order messages
//! - **Cryptographic**: authentication failures on decrypt, invalid keys
//!
//! ## Example Usage
//! ```rust
//! use boardgame_protocol::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn check_len(len: usize) -> Result<()> {
//!     if len > u16::MAX as usize {
//!         return Err(ProtocolError::OversizedFrame(len));
//!     }
//!     Ok(())
//! }
//!
//! match check_len(70_000) {
//!     Ok(()) => info!("fits in one frame"),
//!     Err(e) => error!(error = %e, "frame rejected"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry / dispatcher lock errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Handshake preconditions
    pub const ERR_SESSION_BEFORE_CODEC: &str = "Handshake not yet completed: codec not negotiated";
    pub const ERR_SESSION_BEFORE_KEYS: &str = "Key exchange not yet completed";
    pub const ERR_SESSION_BEFORE_USERNAME: &str = "Handshake not yet completed: username unknown";
    pub const ERR_HANDSHAKE_ABORTED: &str = "Handshake already aborted";
    pub const ERR_HANDSHAKE_OUT_OF_ORDER: &str = "Handshake step invoked out of order";
    pub const ERR_CLIENT_KEY_MISMATCH: &str = "Server holds a different public key for this user";

    /// Cryptographic errors
    pub const ERR_RNG_UNAVAILABLE: &str = "Operating system RNG unavailable";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    // ---- transport -------------------------------------------------------
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection closed mid-frame ({missing} bytes missing)")]
    TruncatedFrame { missing: usize },

    #[error("Frame payload too large: {0} bytes (maximum 65535)")]
    OversizedFrame(usize),

    #[error("Timeout occurred")]
    Timeout,

    // ---- codec -----------------------------------------------------------
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),

    #[error("{codec} encode error: {reason}")]
    CodecEncode { codec: &'static str, reason: String },

    #[error("{codec} decode error: {reason}")]
    CodecDecode { codec: &'static str, reason: String },

    // ---- serialization ---------------------------------------------------
    #[error("Cannot serialize field '{field}' of {type_name}: {reason}")]
    SerializeError {
        type_name: String,
        field: String,
        reason: String,
    },

    // ---- deserialization / registry ---------------------------------------
    #[error("Cannot deserialize field '{field}' of {type_name}: {reason}")]
    DeserializeError {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Unexpected message: expected {expected}, found {found}")]
    UnexpectedMessage { expected: String, found: String },

    #[error("Message type registered twice: {0}")]
    DuplicateMessageType(String),

    #[error("Invalid schema for {type_name}: {reason}")]
    InvalidSchema { type_name: String, reason: String },

    // ---- handshake -------------------------------------------------------
    #[error("Client {peer} did not complete handshake")]
    HandshakeIncomplete { peer: String },

    #[error("Client {peer} requested unavailable codec {codec}")]
    UnsupportedCodec { peer: String, codec: String },

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Precondition violated: {0}")]
    Precondition(&'static str),

    // ---- cryptographic ---------------------------------------------------
    #[error("Decryption failed: message could not be authenticated")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    // ---- other -----------------------------------------------------------
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Failures of the underlying byte stream. The connection is unusable afterwards.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ConnectFailed { .. }
                | ProtocolError::ConnectionClosed
                | ProtocolError::TruncatedFrame { .. }
                | ProtocolError::Timeout
        )
    }

    /// Failures that count as one failed attempt at the introduction step of
    /// the server handshake: the frame arrived but did not hold a usable
    /// introduction.
    pub fn is_retryable_introduction(&self) -> bool {
        matches!(
            self,
            ProtocolError::CodecDecode { .. }
                | ProtocolError::DeserializeError { .. }
                | ProtocolError::UnknownMessageType(_)
                | ProtocolError::UnexpectedMessage { .. }
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
