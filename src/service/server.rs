//! # Game Server
//!
//! Accepts TCP connections, runs the handshake on each, and hands every ready
//! [`PeerSession`] to an application handler.
//!
//! Connections are independent tasks. They share only the registry, the codec
//! set, the key store and the server's long-term key pair.
//!
//! ## Shutdown
//! [`Server::run`] stops on Ctrl-C; [`Server::run_with_shutdown`] and
//! [`Server::serve`] stop when the given channel receives a message or all of
//! its senders are dropped. Either way the server stops accepting and then
//! waits up to `shutdown_timeout` for live connections to finish.

use crate::config::ServerConfig;
use crate::core::codec::AvailableCodecs;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::ServerHandshake;
use crate::protocol::keystore::{EphemeralKeyStore, KeyStore};
use crate::protocol::registry::TypeRegistry;
use crate::service::session::PeerSession;
use crate::transport::stream::FrameTransport;
use crate::utils::crypto::KeyPair;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use x25519_dalek::PublicKey;

/// Session type handed to server-side handlers.
pub type ServerSession = PeerSession<FrameTransport<TcpStream>>;

/// TCP game server.
pub struct Server {
    config: ServerConfig,
    keys: Arc<KeyPair>,
    codecs: Arc<AvailableCodecs>,
    registry: Arc<TypeRegistry>,
    store: Arc<dyn KeyStore>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("codecs", &self.codecs)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Server with a fresh key pair, the default codecs and an
    /// [`EphemeralKeyStore`], so clients may log in with a new key pair each
    /// time. Pin keys with [`Server::with_key_store`].
    pub fn new(config: ServerConfig, registry: Arc<TypeRegistry>) -> Result<Self> {
        Ok(Self {
            config,
            keys: Arc::new(KeyPair::generate()?),
            codecs: Arc::new(AvailableCodecs::with_defaults()),
            registry,
            store: Arc::new(EphemeralKeyStore),
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn with_key_pair(mut self, keys: KeyPair) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    pub fn with_codecs(mut self, codecs: AvailableCodecs) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }

    pub fn with_key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.store = store;
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.address).await?;
        info!(address = %listener.local_addr()?, "Listening");
        Ok(listener)
    }

    /// Serve until Ctrl-C.
    pub async fn run<H, Fut>(self, handler: H) -> Result<()>
    where
        H: Fn(ServerSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(handler, shutdown_rx).await
    }

    /// Bind the configured address and serve until `shutdown_rx` fires.
    pub async fn run_with_shutdown<H, Fut>(
        self,
        handler: H,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()>
    where
        H: Fn(ServerSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve(listener, handler, shutdown_rx).await
    }

    /// Serve connections from an already bound listener.
    #[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
    pub async fn serve<H, Fut>(
        self,
        listener: TcpListener,
        handler: H,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()>
    where
        H: Fn(ServerSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let slots = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    self.drain(&slots).await;
                    self.metrics.log_metrics();
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = slots.clone().try_acquire_owned() else {
                                warn!(peer = %addr, max = self.config.max_connections, "Connection limit reached, refusing");
                                self.metrics.connection_rejected();
                                continue;
                            };
                            info!(peer = %addr, "New connection established");
                            self.metrics.connection_established();

                            let connection = self.connection_task(stream, addr, handler.clone());
                            tokio::spawn(async move {
                                connection.await;
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }

    fn connection_task<H, Fut>(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<H>,
    ) -> impl Future<Output = ()> + Send + 'static
    where
        H: Fn(ServerSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handshake = ServerHandshake::new(
            FrameTransport::new(stream),
            addr.to_string(),
            self.keys.clone(),
            self.codecs.clone(),
            self.registry.clone(),
        )
        .with_introduction_attempts(self.config.introduction_attempts)
        .with_metrics(self.metrics.clone());
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let deadline = self.config.handshake_timeout;

        async move {
            match with_timeout_error(handshake.run(store.as_ref()), deadline).await {
                Ok(session) => {
                    debug!(peer = %addr, username = session.username(), "Handing session to handler");
                    if let Err(e) = handler(session).await {
                        warn!(peer = %addr, error = %e, "Session handler failed");
                    }
                }
                Err(ProtocolError::Timeout) => {
                    warn!(peer = %addr, "Handshake deadline exceeded");
                    metrics.handshake_failed();
                }
                Err(e) => {
                    warn!(peer = %addr, error = %e, "Handshake failed, closing connection");
                }
            }
            metrics.connection_closed();
            info!(peer = %addr, "Connection closed");
        }
    }

    async fn drain(&self, slots: &Semaphore) {
        let timeout = tokio::time::sleep(self.config.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            let active = self.config.max_connections - slots.available_permits();
            if active == 0 {
                info!("All connections closed, shutting down");
                return;
            }
            tokio::select! {
                _ = &mut timeout => {
                    warn!(connections = active, "Shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    debug!(connections = active, "Waiting for connections to close");
                }
            }
        }
    }
}
