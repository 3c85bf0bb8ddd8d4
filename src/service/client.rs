use crate::config::ClientConfig;
use crate::core::codec::AvailableCodecs;
use crate::error::Result;
use crate::protocol::handshake::ClientLogin;
use crate::protocol::registry::TypeRegistry;
use crate::service::session::PeerSession;
use crate::transport::stream::LazyTcpTransport;
use crate::utils::crypto::KeyPair;

use std::sync::Arc;
use tracing::instrument;

/// Session type returned by [`connect`].
pub type ClientSession = PeerSession<LazyTcpTransport>;

/// Connect to the configured server and log in with a fresh key pair.
///
/// The TCP connection is opened by the first handshake frame. An unknown
/// codec name fails before any connection attempt.
#[instrument(skip(config, registry, codecs), fields(addr = %config.address, username = %config.username))]
pub async fn connect(
    config: &ClientConfig,
    registry: Arc<TypeRegistry>,
    codecs: &AvailableCodecs,
) -> Result<ClientSession> {
    login(config, registry, codecs, None).await
}

/// Like [`connect`], logging in with a key pair the server may already know.
#[instrument(skip(config, registry, codecs, keys), fields(addr = %config.address, username = %config.username))]
pub async fn connect_with_keys(
    config: &ClientConfig,
    registry: Arc<TypeRegistry>,
    codecs: &AvailableCodecs,
    keys: KeyPair,
) -> Result<ClientSession> {
    login(config, registry, codecs, Some(keys)).await
}

async fn login(
    config: &ClientConfig,
    registry: Arc<TypeRegistry>,
    codecs: &AvailableCodecs,
    keys: Option<KeyPair>,
) -> Result<ClientSession> {
    let codec = codecs.get(&config.codec)?;
    let transport = LazyTcpTransport::new(config.address.clone(), config.connection_timeout);

    let mut login = ClientLogin::new(transport, config.username.clone(), codec, registry)?
        .with_peer(config.address.clone());
    if let Some(keys) = keys {
        login = login.with_key_pair(keys);
    }
    login.login().await
}
