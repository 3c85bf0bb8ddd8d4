//! # Transport Layer
//!
//! Frame transports over reliable byte streams.
//!
//! ## Components
//! - **FrameIo**: the send/receive-a-frame capability the secure channel builds on
//! - **FrameTransport**: frames over any connected async stream
//! - **LazyTcpTransport**: TCP client transport that dials on first use

pub mod stream;

pub use stream::{FrameIo, FrameTransport, LazyTcpTransport};
