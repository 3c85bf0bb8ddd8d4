//! # Board Game Protocol
//!
//! Secure, codec-negotiated messaging between board game servers and clients.
//!
//! A connection starts with a handshake that agrees on a codec and derives an
//! authenticated-encryption context from X25519 keys. After that, both ends
//! hold a [`PeerSession`](service::session::PeerSession) that sends and
//! receives typed messages.
//!
//! ## Layers
//! - **Frame transport** ([`core::frame`], [`transport`]): `u16` length-prefixed frames
//! - **Codecs** ([`core::codec`]): JSON and MessagePack field-map encodings
//! - **Messages** ([`protocol::message`], [`protocol::registry`]): schemas, type tags, polymorphic parsing
//! - **Secure channel** ([`service::secure`]): XChaCha20-Poly1305 over the frame transport
//! - **Handshake** ([`protocol::handshake`]): introduction, key exchange, session build
//! - **Services** ([`service::server`], [`service::client`]): TCP server loop and client login
//!
//! ## Example
//! ```no_run
//! use boardgame_protocol::config::NetworkConfig;
//! use boardgame_protocol::core::codec::AvailableCodecs;
//! use boardgame_protocol::protocol::message::{ChoiceMessage, ChoiceResponseMessage};
//! use boardgame_protocol::protocol::registry::TypeRegistry;
//! use boardgame_protocol::service::client;
//! use std::sync::Arc;
//!
//! # async fn play() -> boardgame_protocol::Result<()> {
//! let config = NetworkConfig::from_env()?;
//! let registry = Arc::new(TypeRegistry::with_defaults()?);
//! let session = client::connect(&config.client, registry, &AvailableCodecs::with_defaults()).await?;
//!
//! let question: ChoiceMessage = session.receive().await?;
//! session.send(&ChoiceResponseMessage::new(&question.choices[0])).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
