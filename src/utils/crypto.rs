//! # Authenticated Encryption
//!
//! X25519 key agreement feeding an XChaCha20-Poly1305 AEAD.
//!
//! A [`CryptoBox`] is built from the local key pair and the peer's public key;
//! both ends of a connection derive the same box. Every sealed message is
//! `nonce(24) || ciphertext || tag(16)` with a fresh random nonce, and opening
//! a message that was altered in any way fails with
//! [`ProtocolError::DecryptionFailure`].

use crate::error::{constants, ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// Size of an encoded public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// XChaCha20 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Bytes added to every plaintext by [`CryptoBox::encrypt`].
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

const KEY_DOMAIN: &[u8] = b"boardgame-protocol/box/v1";

/// Fill `buf` from the operating system RNG.
fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| {
        ProtocolError::KeyGeneration(format!("{}: {e}", constants::ERR_RNG_UNAVAILABLE))
    })
}

/// An X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        fill_random(&mut bytes)?;
        let pair = Self::from_secret_bytes(bytes);
        bytes.zeroize();
        Ok(pair)
    }

    /// Rebuild a key pair from a stored secret.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }
}

/// Decode a public key received on the wire.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    let array: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
        ProtocolError::InvalidKey(format!(
            "expected {PUBLIC_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from(array))
}

/// Per-connection authenticated encryption context.
pub struct CryptoBox {
    cipher: XChaCha20Poly1305,
    peer: PublicKey,
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBox")
            .field("peer", &self.peer.as_bytes())
            .finish_non_exhaustive()
    }
}

impl CryptoBox {
    /// Derive the shared box between `local` and `remote`.
    pub fn new(local: &KeyPair, remote: &PublicKey) -> Self {
        let shared = local.secret.diffie_hellman(remote);

        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(shared.as_bytes());
        let mut key: [u8; 32] = hasher.finalize().into();

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();

        Self {
            cipher,
            peer: *remote,
        }
    }

    /// Public key of the other end.
    pub fn peer_key(&self) -> &PublicKey {
        &self.peer
    }

    /// Seal `plaintext` as `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        fill_random(&mut nonce)?;

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionFailure)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Open a message produced by [`CryptoBox::encrypt`] on the other end.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }
}
