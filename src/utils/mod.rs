//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics, and timing.
//!
//! ## Components
//! - **Crypto**: X25519 key agreement with XChaCha20-Poly1305 AEAD
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async timeout wrappers
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Memory zeroing for derived key material (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use crypto::{CryptoBox, KeyPair};
pub use metrics::{Metrics, MetricsSnapshot};
