use crate::core::codec::Codec;
use crate::error::Result;
use crate::protocol::message::{AnyMessage, Message, MessageType};
use crate::protocol::registry::TypeRegistry;
use crate::service::secure::SecureChannel;
use crate::transport::stream::FrameIo;

use std::sync::Arc;
use tracing::{debug, instrument};

/// A connection that completed the handshake.
///
/// Username, codec and encryption context are fixed for the life of the
/// session. Both ends of a connection hold one. `send` may be called from
/// several tasks at once; frames are written whole, one after another.
pub struct PeerSession<T> {
    username: String,
    peer: String,
    codec: Arc<dyn Codec>,
    channel: SecureChannel<T>,
    registry: Arc<TypeRegistry>,
}

impl<T> std::fmt::Debug for PeerSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("username", &self.username)
            .field("peer", &self.peer)
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}

impl<T: FrameIo> PeerSession<T> {
    pub(crate) fn new(
        username: String,
        peer: String,
        codec: Arc<dyn Codec>,
        channel: SecureChannel<T>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        debug!(username = %username, peer = %peer, codec = codec.name(), "Session ready");
        Self {
            username,
            peer,
            codec,
            channel,
            registry,
        }
    }

    /// Serialize, encode, encrypt and frame `msg`.
    ///
    /// Returns once the frame is handed to the transport.
    #[instrument(skip(self, msg), fields(user = %self.username, msg_type = msg.type_tag()), level = "debug")]
    pub async fn send(&self, msg: &dyn Message) -> Result<()> {
        let map = self.registry.encode(msg)?;
        let bytes = self.codec.encode(&map)?;
        self.channel.send(&bytes).await
    }

    /// Next message, whatever its type.
    #[instrument(skip(self), fields(user = %self.username), level = "debug")]
    pub async fn receive_any(&self) -> Result<AnyMessage> {
        let bytes = self.channel.receive().await?;
        let map = self.codec.decode(&bytes)?;
        self.registry.parse(&map)
    }

    /// Next message, which must be an `M`.
    #[instrument(skip(self), fields(user = %self.username, expected = M::TAG), level = "debug")]
    pub async fn receive<M: MessageType>(&self) -> Result<M> {
        let bytes = self.channel.receive().await?;
        let map = self.codec.decode(&bytes)?;
        self.registry.deserialize::<M>(&map)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Peer description, e.g. its socket address.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &SecureChannel<T> {
        &self.channel
    }
}
