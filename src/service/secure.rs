use crate::error::Result;
use crate::transport::stream::FrameIo;
use crate::utils::crypto::CryptoBox;
use crate::utils::metrics::Metrics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use x25519_dalek::PublicKey;

/// Authenticated encryption over a frame transport.
///
/// Every frame written through the channel is sealed by the connection's
/// [`CryptoBox`]; every frame read is opened and authenticated before its
/// bytes are returned.
///
/// A channel built from a key the server already held starts unconfirmed:
/// the handshake is counted as a success at the first frame that
/// authenticates, and as a failure if the transport or authentication fails
/// before that.
pub struct SecureChannel<T> {
    transport: T,
    crypto: CryptoBox,
    metrics: Option<Arc<Metrics>>,
    unconfirmed: AtomicBool,
}

impl<T> std::fmt::Debug for SecureChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("crypto", &self.crypto)
            .finish_non_exhaustive()
    }
}

impl<T: FrameIo> SecureChannel<T> {
    pub fn new(transport: T, crypto: CryptoBox) -> Self {
        Self {
            transport,
            crypto,
            metrics: None,
            unconfirmed: AtomicBool::new(false),
        }
    }

    /// Count traffic and authentication failures in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Defer the handshake outcome until the peer proves it holds its key.
    pub(crate) fn awaiting_confirmation(self) -> Self {
        self.unconfirmed.store(true, Ordering::Release);
        self
    }

    /// Whether the peer has yet to send a frame that authenticates.
    pub fn is_unconfirmed(&self) -> bool {
        self.unconfirmed.load(Ordering::Acquire)
    }

    fn confirm(&self, authenticated: bool) {
        if !self.unconfirmed.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(metrics) = &self.metrics {
            if authenticated {
                metrics.handshake_success();
            } else {
                warn!("Peer failed to prove its stored key");
                metrics.handshake_failed();
            }
        }
    }

    pub fn peer_key(&self) -> &PublicKey {
        self.crypto.peer_key()
    }

    /// Underlying frame transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[instrument(skip(self, plaintext), fields(len = plaintext.len()), level = "debug")]
    pub async fn send(&self, plaintext: &[u8]) -> Result<()> {
        let sealed = self.crypto.encrypt(plaintext)?;
        let sealed_len = sealed.len() as u64;
        if let Err(e) = self.transport.send_frame(sealed).await {
            self.confirm(false);
            return Err(e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.message_sent(sealed_len);
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn receive(&self) -> Result<Vec<u8>> {
        let sealed = match self.transport.recv_frame().await {
            Ok(sealed) => sealed,
            Err(e) => {
                self.confirm(false);
                return Err(e);
            }
        };
        let sealed_len = sealed.len() as u64;
        let plaintext = match self.crypto.decrypt(&sealed) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(bytes = sealed_len, "Rejected frame that failed authentication");
                if let Some(metrics) = &self.metrics {
                    metrics.decryption_failure();
                }
                self.confirm(false);
                return Err(e);
            }
        };
        self.confirm(true);
        if let Some(metrics) = &self.metrics {
            metrics.message_received(sealed_len);
        }
        debug!(bytes = plaintext.len(), "Frame opened");
        Ok(plaintext)
    }
}

impl<T> SecureChannel<T> {
    /// Give back the transport, discarding the encryption context.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::transport::stream::FrameTransport;
    use crate::utils::crypto::KeyPair;

    fn channels() -> (
        SecureChannel<FrameTransport<tokio::io::DuplexStream>>,
        SecureChannel<FrameTransport<tokio::io::DuplexStream>>,
    ) {
        let server = KeyPair::generate().unwrap();
        let client = KeyPair::generate().unwrap();
        let (a, b) = FrameTransport::memory_pair();
        (
            SecureChannel::new(a, CryptoBox::new(&server, &client.public_key())),
            SecureChannel::new(b, CryptoBox::new(&client, &server.public_key())),
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (server, client) = channels();
        client.send(b"hello").await.unwrap();
        assert_eq!(server.receive().await.unwrap(), b"hello");
        server.send(b"").await.unwrap();
        assert_eq!(client.receive().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_plaintext_never_on_wire() {
        let server = KeyPair::generate().unwrap();
        let client = KeyPair::generate().unwrap();
        let (a, b) = FrameTransport::memory_pair();
        let channel = SecureChannel::new(a, CryptoBox::new(&client, &server.public_key()));
        channel.send(b"secret move").await.unwrap();
        let raw = b.recv_frame().await.unwrap();
        assert!(!raw.windows(11).any(|w| w == b"secret move"));
    }

    #[tokio::test]
    async fn test_tampered_frame_counts_failure() {
        let server = KeyPair::generate().unwrap();
        let client = KeyPair::generate().unwrap();
        let (a, b) = FrameTransport::memory_pair();
        let metrics = Arc::new(Metrics::new());
        let channel = SecureChannel::new(b, CryptoBox::new(&server, &client.public_key()))
            .with_metrics(metrics.clone());

        let sealer = CryptoBox::new(&client, &server.public_key());
        let mut sealed = sealer.encrypt(b"resign").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        a.send_frame(sealed).await.unwrap();

        assert!(matches!(
            channel.receive().await,
            Err(ProtocolError::DecryptionFailure)
        ));
        assert_eq!(metrics.snapshot().decryption_failures, 1);
    }

    #[tokio::test]
    async fn test_first_authenticated_frame_confirms_handshake() {
        let (server, client) = channels();
        let metrics = Arc::new(Metrics::new());
        let server = server.with_metrics(metrics.clone()).awaiting_confirmation();
        assert!(server.is_unconfirmed());

        client.send(b"move e4").await.unwrap();
        client.send(b"move d4").await.unwrap();
        server.receive().await.unwrap();
        server.receive().await.unwrap();

        assert!(!server.is_unconfirmed());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.handshakes_success, 1);
        assert_eq!(snapshot.handshakes_failed, 0);
    }

    #[tokio::test]
    async fn test_peer_leaving_unconfirmed_counts_failure() {
        let server = KeyPair::generate().unwrap();
        let client = KeyPair::generate().unwrap();
        let (a, b) = FrameTransport::memory_pair();
        let metrics = Arc::new(Metrics::new());
        let channel = SecureChannel::new(b, CryptoBox::new(&server, &client.public_key()))
            .with_metrics(metrics.clone())
            .awaiting_confirmation();

        a.close().await.unwrap();
        assert!(channel.receive().await.is_err());
        assert!(channel.receive().await.is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.handshakes_success, 0);
        assert_eq!(snapshot.handshakes_failed, 1);
    }
}
