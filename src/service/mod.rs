//! # Services
//!
//! Encrypted sessions and the TCP endpoints that create them.
//!
//! ## Components
//! - **SecureChannel**: authenticated encryption over a frame transport
//! - **PeerSession**: post-handshake send/receive of typed messages
//! - **Server**: accept loop running one handshake per connection
//! - **Client**: login over a lazily connecting TCP transport

pub mod client;
pub mod secure;
pub mod server;
pub mod session;

pub use secure::SecureChannel;
pub use session::PeerSession;
