//! # Protocol Layer
//!
//! Messages, the type registry, the handshake and message routing.
//!
//! ## Components
//! - **Message**: object-safe message trait, typed messages and built-in game messages
//! - **Registry**: type tag to constructor lookup, built explicitly at start-up
//! - **Handshake**: server and client state machines that produce a session
//! - **KeyStore**: known-user public keys consulted by the server handshake
//! - **Dispatcher**: routes received messages to handlers by type tag

pub mod dispatcher;
pub mod handshake;
pub mod keystore;
pub mod message;
pub mod registry;
