//! Connection handshake
//!
//! Negotiates the codec and the encryption context of a connection before any
//! application message is exchanged. Steps run in a fixed order:
//!
//! 1. **Introduction** (client to server, plaintext, always JSON): username and
//!    requested codec name.
//! 2. **Key exchange** (plaintext, negotiated codec): the server sends its public
//!    key and the key it already holds for the user, or an empty key. When the
//!    key was empty the client answers with its own public key.
//! 3. **Completion**: both sides derive the same [`CryptoBox`] and freeze the
//!    username, codec and box into a [`PeerSession`].
//!
//! The server state is kept per connection in a [`ServerHandshake`]; nothing is
//! shared between connections except the registry, the codec set and the
//! server's long-term key pair, all read-only.

use crate::core::codec::{AvailableCodecs, Codec, JsonCodec};
use crate::core::serialization::{DecodedFields, FieldDef, FieldKind, FieldValue};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::keystore::KeyStore;
use crate::protocol::message::{Message, MessageType};
use crate::protocol::registry::TypeRegistry;
use crate::service::secure::SecureChannel;
use crate::service::session::PeerSession;
use crate::transport::stream::FrameIo;
use crate::utils::crypto::{decode_public_key, CryptoBox, KeyPair};
use crate::utils::metrics::{Metrics, Timer};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use x25519_dalek::PublicKey;

/// Number of frames the server reads before giving up on an introduction.
pub const DEFAULT_INTRODUCTION_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Handshake messages
// ---------------------------------------------------------------------------

/// First message of every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct IntroductionMessage {
    pub username: String,
    pub codec: String,
}

impl IntroductionMessage {
    pub fn new(username: impl Into<String>, codec: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            codec: codec.into(),
        }
    }
}

impl MessageType for IntroductionMessage {
    const TAG: &'static str = "IntroductionMessage";
    const SCHEMA: &'static [FieldDef] = &[
        FieldDef::new("username", FieldKind::Str),
        FieldDef::new("codec", FieldKind::Str),
    ];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "username" => Some(self.username.as_str().into()),
            "codec" => Some(self.codec.as_str().into()),
            _ => None,
        }
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            username: fields.take("username")?,
            codec: fields.take("codec")?,
        })
    }
}

/// Server's public key plus the key it already holds for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerKeysMessage {
    pub server_key: Vec<u8>,
    /// Empty when the server does not know the user's key.
    pub client_key: Vec<u8>,
}

impl ServerKeysMessage {
    pub fn new(server_key: Vec<u8>, client_key: Vec<u8>) -> Self {
        Self {
            server_key,
            client_key,
        }
    }

    pub fn is_client_key_missing(&self) -> bool {
        self.client_key.is_empty()
    }
}

impl MessageType for ServerKeysMessage {
    const TAG: &'static str = "ServerKeysMessage";
    const SCHEMA: &'static [FieldDef] = &[
        FieldDef::new("server_key", FieldKind::Bytes),
        FieldDef::new("client_key", FieldKind::Bytes),
    ];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "server_key" => Some(self.server_key.clone().into()),
            "client_key" => Some(self.client_key.clone().into()),
            _ => None,
        }
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            server_key: fields.take("server_key")?,
            client_key: fields.take("client_key")?,
        })
    }
}

/// Client's public key, sent only when the server asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientKeyMessage {
    pub client_key: Vec<u8>,
}

impl ClientKeyMessage {
    pub fn new(client_key: Vec<u8>) -> Self {
        Self { client_key }
    }
}

impl MessageType for ClientKeyMessage {
    const TAG: &'static str = "ClientKeyMessage";
    const SCHEMA: &'static [FieldDef] = &[FieldDef::new("client_key", FieldKind::Bytes)];

    fn field_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            "client_key" => Some(self.client_key.clone().into()),
            _ => None,
        }
    }

    fn from_fields(fields: &mut DecodedFields) -> Result<Self> {
        Ok(Self {
            client_key: fields.take("client_key")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Plaintext message helpers
// ---------------------------------------------------------------------------

async fn send_plain<T: FrameIo>(
    transport: &T,
    codec: &dyn Codec,
    registry: &TypeRegistry,
    msg: &dyn Message,
) -> Result<()> {
    let map = registry.encode(msg)?;
    transport.send_frame(codec.encode(&map)?).await
}

async fn receive_plain<T: FrameIo, M: MessageType>(
    transport: &T,
    codec: &dyn Codec,
    registry: &TypeRegistry,
) -> Result<M> {
    let frame = transport.recv_frame().await?;
    let map = codec.decode(&frame)?;
    registry.deserialize::<M>(&map)
}

/// Receive a handshake message that must be an `M`. A frame holding anything
/// else is a protocol violation.
async fn expect_plain<T: FrameIo, M: MessageType>(
    transport: &T,
    codec: &dyn Codec,
    registry: &TypeRegistry,
) -> Result<M> {
    receive_plain::<T, M>(transport, codec, registry)
        .await
        .map_err(|e| {
            if e.is_retryable_introduction() {
                ProtocolError::HandshakeError(format!("expected {}: {e}", M::TAG))
            } else {
                e
            }
        })
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Progress of a server-side handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingIntroduction,
    /// Username and codec are known; keys not yet exchanged.
    Introduced,
    AwaitingClientKey,
    /// Keys exchanged; the session can be built.
    SessionReady,
    /// Terminal failure. The caller must close the connection.
    Aborted,
}

/// Server-side handshake for one connection.
pub struct ServerHandshake<T> {
    transport: T,
    peer: String,
    keys: Arc<KeyPair>,
    codecs: Arc<AvailableCodecs>,
    registry: Arc<TypeRegistry>,
    introduction_attempts: u32,
    metrics: Option<Arc<Metrics>>,
    state: HandshakeState,
    username: Option<String>,
    codec: Option<Arc<dyn Codec>>,
    client_key: Option<PublicKey>,
    key_was_known: bool,
    crypto: Option<CryptoBox>,
}

impl<T> std::fmt::Debug for ServerHandshake<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandshake")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl<T: FrameIo> ServerHandshake<T> {
    pub fn new(
        transport: T,
        peer: impl Into<String>,
        keys: Arc<KeyPair>,
        codecs: Arc<AvailableCodecs>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            transport,
            peer: peer.into(),
            keys,
            codecs,
            registry,
            introduction_attempts: DEFAULT_INTRODUCTION_ATTEMPTS,
            metrics: None,
            state: HandshakeState::AwaitingIntroduction,
            username: None,
            codec: None,
            client_key: None,
            key_was_known: false,
            crypto: None,
        }
    }

    /// Override how many frames are read before the introduction is given up.
    pub fn with_introduction_attempts(mut self, attempts: u32) -> Self {
        self.introduction_attempts = attempts.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn codec_name(&self) -> Option<&'static str> {
        self.codec.as_ref().map(|c| c.name())
    }

    /// The client's public key, once known.
    pub fn client_key(&self) -> Option<&PublicKey> {
        self.client_key.as_ref()
    }

    fn ensure_state(&self, expected: HandshakeState) -> Result<()> {
        match self.state {
            HandshakeState::Aborted => Err(ProtocolError::Precondition(
                constants::ERR_HANDSHAKE_ABORTED,
            )),
            state if state == expected => Ok(()),
            _ => Err(ProtocolError::Precondition(
                constants::ERR_HANDSHAKE_OUT_OF_ORDER,
            )),
        }
    }

    fn settle<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            warn!(peer = %self.peer, error = %e, "Handshake aborted");
            self.state = HandshakeState::Aborted;
        }
        result
    }

    /// Step 1: read the introduction and resolve the requested codec.
    ///
    /// Frames that do not hold a decodable introduction are retried up to
    /// the attempt limit. Transport failures and unknown codecs are not.
    #[instrument(skip(self), fields(peer = %self.peer))]
    pub async fn await_introduction(&mut self) -> Result<IntroductionMessage> {
        self.ensure_state(HandshakeState::AwaitingIntroduction)?;
        let result = self.read_introduction().await;
        let intro = self.settle(result)?;

        let codec = self.codecs.get(&intro.codec).map_err(|_| ProtocolError::UnsupportedCodec {
            peer: self.peer.clone(),
            codec: intro.codec.clone(),
        });
        let codec = self.settle(codec)?;

        info!(username = %intro.username, codec = codec.name(), "Client introduced");
        self.username = Some(intro.username.clone());
        self.codec = Some(codec);
        self.state = HandshakeState::Introduced;
        Ok(intro)
    }

    async fn read_introduction(&self) -> Result<IntroductionMessage> {
        for attempt in 1..=self.introduction_attempts {
            match receive_plain::<T, IntroductionMessage>(&self.transport, &JsonCodec, &self.registry)
                .await
            {
                Ok(intro) => return Ok(intro),
                Err(e) if e.is_retryable_introduction() => {
                    warn!(
                        attempt,
                        max_attempts = self.introduction_attempts,
                        error = %e,
                        "Unusable introduction frame"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.introduction_retry();
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(ProtocolError::HandshakeIncomplete {
            peer: self.peer.clone(),
        })
    }

    /// Step 2: send the server keys and, if `known_client_key` is `None`,
    /// wait for the client's key. Derives the encryption context.
    #[instrument(skip(self, known_client_key), fields(peer = %self.peer, known = known_client_key.is_some()))]
    pub async fn exchange_keys(&mut self, known_client_key: Option<PublicKey>) -> Result<()> {
        self.ensure_state(HandshakeState::Introduced)?;
        let result = self.exchange(known_client_key).await;
        let client_key = self.settle(result)?;

        self.crypto = Some(CryptoBox::new(&self.keys, &client_key));
        self.key_was_known = known_client_key.is_some();
        self.client_key = Some(client_key);
        self.state = HandshakeState::SessionReady;
        debug!("Keys exchanged");
        Ok(())
    }

    async fn exchange(&mut self, known_client_key: Option<PublicKey>) -> Result<PublicKey> {
        let codec = self
            .codec
            .clone()
            .ok_or(ProtocolError::Precondition(constants::ERR_SESSION_BEFORE_CODEC))?;

        let offer = ServerKeysMessage::new(
            self.keys.public_bytes().to_vec(),
            known_client_key
                .map(|key| key.to_bytes().to_vec())
                .unwrap_or_default(),
        );
        send_plain(&self.transport, codec.as_ref(), &self.registry, &offer).await?;

        match known_client_key {
            Some(key) => Ok(key),
            None => {
                self.state = HandshakeState::AwaitingClientKey;
                let reply: ClientKeyMessage =
                    expect_plain(&self.transport, codec.as_ref(), &self.registry).await?;
                decode_public_key(&reply.client_key)
            }
        }
    }

    /// Step 3: freeze the negotiated state into a session.
    pub fn build(self) -> Result<PeerSession<T>> {
        if self.state == HandshakeState::Aborted {
            return Err(ProtocolError::Precondition(constants::ERR_HANDSHAKE_ABORTED));
        }
        let codec = self
            .codec
            .ok_or(ProtocolError::Precondition(constants::ERR_SESSION_BEFORE_CODEC))?;
        let username = self
            .username
            .ok_or(ProtocolError::Precondition(constants::ERR_SESSION_BEFORE_USERNAME))?;
        let crypto = self
            .crypto
            .ok_or(ProtocolError::Precondition(constants::ERR_SESSION_BEFORE_KEYS))?;

        let mut channel = SecureChannel::new(self.transport, crypto);
        if let Some(metrics) = self.metrics {
            channel = channel.with_metrics(metrics);
        }
        if self.key_was_known {
            channel = channel.awaiting_confirmation();
        }
        Ok(PeerSession::new(
            username,
            self.peer,
            codec,
            channel,
            self.registry,
        ))
    }

    /// Run every step, consulting `store` for the user's key and saving a
    /// newly learned key.
    ///
    /// With a stored key the client has proved nothing yet, so the handshake
    /// is only counted once the session's first frame authenticates.
    #[instrument(skip(self, store), fields(peer = %self.peer))]
    pub async fn run(mut self, store: &dyn KeyStore) -> Result<PeerSession<T>> {
        let _timer = Timer::start("server_handshake");
        if let Some(metrics) = &self.metrics {
            metrics.handshake_attempt();
        }

        let result = self.run_steps(store).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(()) if self.key_was_known => {}
                Ok(()) => metrics.handshake_success(),
                Err(_) => metrics.handshake_failed(),
            }
        }
        result?;
        self.build()
    }

    async fn run_steps(&mut self, store: &dyn KeyStore) -> Result<()> {
        let intro = self.await_introduction().await?;

        let known = store.lookup(&intro.username);
        let known = self.settle(known)?;
        self.exchange_keys(known).await?;

        if known.is_none() {
            if let Some(key) = self.client_key {
                let saved = store.save(&intro.username, key);
                self.settle(saved)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Client-side handshake.
pub struct ClientLogin<T> {
    transport: T,
    peer: String,
    username: String,
    codec: Arc<dyn Codec>,
    registry: Arc<TypeRegistry>,
    keys: KeyPair,
}

impl<T> std::fmt::Debug for ClientLogin<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLogin")
            .field("peer", &self.peer)
            .field("username", &self.username)
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}

impl<T: FrameIo> ClientLogin<T> {
    /// Prepare a login with a freshly generated key pair.
    pub fn new(
        transport: T,
        username: impl Into<String>,
        codec: Arc<dyn Codec>,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            peer: "server".to_string(),
            username: username.into(),
            codec,
            registry,
            keys: KeyPair::generate()?,
        })
    }

    /// Log in with an existing key pair, e.g. one the server already knows.
    pub fn with_key_pair(mut self, keys: KeyPair) -> Self {
        self.keys = keys;
        self
    }

    /// Label for the server in logs and on the session.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Introduce, exchange keys and build the session.
    #[instrument(skip(self), fields(username = %self.username, codec = self.codec.name(), peer = %self.peer))]
    pub async fn login(self) -> Result<PeerSession<T>> {
        let _timer = Timer::start("client_login");

        let intro = IntroductionMessage::new(self.username.as_str(), self.codec.name());
        send_plain(&self.transport, &JsonCodec, &self.registry, &intro).await?;
        debug!("Introduction sent");

        let offer: ServerKeysMessage =
            expect_plain(&self.transport, self.codec.as_ref(), &self.registry).await?;
        let server_key = decode_public_key(&offer.server_key)?;

        if offer.is_client_key_missing() {
            let reply = ClientKeyMessage::new(self.keys.public_bytes().to_vec());
            send_plain(&self.transport, self.codec.as_ref(), &self.registry, &reply).await?;
            debug!("Client key sent");
        } else if offer.client_key != self.keys.public_bytes() {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_CLIENT_KEY_MISMATCH.into(),
            ));
        }

        let crypto = CryptoBox::new(&self.keys, &server_key);
        info!("Logged in");
        Ok(PeerSession::new(
            self.username,
            self.peer,
            self.codec,
            SecureChannel::new(self.transport, crypto),
            self.registry,
        ))
    }
}
