use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{AnyMessage, Message, MessageType};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

type HandlerFn = dyn Fn(&dyn Message) -> Result<Option<AnyMessage>> + Send + Sync + 'static;

/// Routes received messages to handlers by type tag.
///
/// A handler may answer with a reply message, which the caller is expected to
/// send back on the same session.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<&'static str, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tags", &self.tags())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handler for the message type `M`, replacing any previous one.
    pub fn register<M, F>(&self, handler: F) -> Result<()>
    where
        M: MessageType,
        F: Fn(&M) -> Result<Option<AnyMessage>> + Send + Sync + 'static,
    {
        self.register_tag(M::TAG, move |msg: &dyn Message| {
            let typed = msg
                .downcast_ref::<M>()
                .ok_or_else(|| ProtocolError::UnexpectedMessage {
                    expected: M::TAG.to_string(),
                    found: msg.type_tag().to_string(),
                })?;
            handler(typed)
        })
    }

    /// Register an untyped handler for a tag.
    pub fn register_tag<F>(&self, tag: &'static str, handler: F) -> Result<()>
    where
        F: Fn(&dyn Message) -> Result<Option<AnyMessage>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;

        handlers.insert(tag, Box::new(handler));
        Ok(())
    }

    pub fn dispatch(&self, msg: &dyn Message) -> Result<Option<AnyMessage>> {
        let tag = msg.type_tag();
        trace!(tag, "Dispatching message");

        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;

        handlers
            .get(tag)
            .ok_or_else(|| ProtocolError::UnknownMessageType(tag.to_string()))
            .and_then(|handler| handler(msg))
    }

    /// Tags with a handler, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self
            .handlers
            .read()
            .map(|handlers| handlers.keys().copied().collect())
            .unwrap_or_default();
        tags.sort_unstable();
        tags
    }
}
