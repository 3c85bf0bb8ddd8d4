//! Known-user public key storage.
//!
//! The server consults a [`KeyStore`] during the handshake: a user whose key is
//! already known skips the client-key step, and the client must then hold the
//! matching secret. Clients that generate a fresh key pair per login need a
//! store that never pins keys, which is what [`EphemeralKeyStore`] is.
//! [`MemoryKeyStore`] pins the first key seen for each user for the life of
//! the process; persistence is left to the application.

use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, trace};
use x25519_dalek::PublicKey;

/// Lookup and storage of users' long-term public keys.
pub trait KeyStore: Send + Sync {
    fn lookup(&self, username: &str) -> Result<Option<PublicKey>>;

    fn save(&self, username: &str, key: PublicKey) -> Result<()>;
}

/// A [`KeyStore`] that knows no keys, so every login performs the
/// client-key step.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralKeyStore;

impl KeyStore for EphemeralKeyStore {
    fn lookup(&self, _username: &str) -> Result<Option<PublicKey>> {
        Ok(None)
    }

    fn save(&self, username: &str, _key: PublicKey) -> Result<()> {
        trace!(username, "Session key not retained");
        Ok(())
    }
}

/// In-memory [`KeyStore`] pinning each user's first key.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, [u8; 32]>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryKeyStore {
    fn lookup(&self, username: &str) -> Result<Option<PublicKey>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        Ok(keys.get(username).map(|bytes| PublicKey::from(*bytes)))
    }

    fn save(&self, username: &str, key: PublicKey) -> Result<()> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        keys.insert(username.to_string(), key.to_bytes());
        debug!(username, "Stored public key");
        Ok(())
    }
}
