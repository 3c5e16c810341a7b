//! Conversation transport
//!
//! Drives one turn of a conversation:
//! 1. Appends the user message and a loading bot placeholder
//! 2. Opens a stream on the configured backend
//! 3. Replaces the placeholder with the running transcript on every delta
//! 4. Persists the finished turn once, then names the chat after its first turn
//!
//! Only one turn may be in flight per chat id. Errors never roll back the
//! user message; they replace the bot placeholder with an error message.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::client::NamingConfig;
use crate::conversation::{Chat, Message};
use crate::providers::{ChatBackend, ProviderError};
use crate::stream::{decode_stream, StreamError};

use super::memory::{ChatStore, StoreError};
use super::naming::derive_name;

/// Lifecycle of a single send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("A reply is already being generated for chat {0}")]
    Busy(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of a send that was not ignored
#[derive(Debug)]
pub struct Turn {
    /// `Completed`, `Failed` or `Cancelled`
    pub state: TurnState,
    /// The chat as persisted at the end of the turn
    pub chat: Chat,
    /// Background naming task, started after a chat's first completed turn
    pub naming: Option<JoinHandle<()>>,
}

pub struct ConversationTransport {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ChatStore>,
    naming: NamingConfig,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a chat id busy until dropped
struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

enum StreamEnd {
    Finished,
    Cancelled,
}

impl ConversationTransport {
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<dyn ChatStore>) -> Self {
        Self {
            backend,
            store,
            naming: NamingConfig::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_naming(mut self, naming: NamingConfig) -> Self {
        self.naming = naming;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Whether a turn is currently running for `chat_id`
    pub fn is_busy(&self, chat_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(chat_id)
    }

    fn begin(&self, chat_id: &str) -> Result<InFlight<'_>, TransportError> {
        let mut ids = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(chat_id.to_string()) {
            return Err(TransportError::Busy(chat_id.to_string()));
        }

        Ok(InFlight {
            ids: &self.in_flight,
            id: chat_id.to_string(),
        })
    }

    /// Send `text` as the next user turn of `chat_id` and stream the reply.
    ///
    /// `on_update` sees the chat after every change: the appended turn, each
    /// delta, and the final error message if the turn fails. Returns
    /// `Ok(None)` without touching anything when `text` is blank.
    pub async fn send_message<F>(
        &self,
        chat_id: &str,
        text: &str,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<Option<Turn>, TransportError>
    where
        F: FnMut(&Chat) + Send,
    {
        let prompt = text.trim();
        if prompt.is_empty() {
            return Ok(None);
        }

        let _guard = self.begin(chat_id)?;

        let mut chat = self
            .store
            .get(chat_id)
            .await?
            .unwrap_or_else(|| Chat::with_id(chat_id));
        let first_turn = chat.messages.is_empty();

        chat.messages.push(Message::user(prompt));
        chat.messages.push(Message::pending_bot());
        on_update(&chat);

        tracing::debug!(chat_id = %chat_id, state = ?TurnState::Sending, "Sending message");

        let state = match self.stream_reply(&mut chat, prompt, cancel, &mut on_update).await {
            Ok(StreamEnd::Finished) => TurnState::Completed,
            Ok(StreamEnd::Cancelled) => {
                tracing::info!(chat_id = %chat_id, "Stream cancelled");
                TurnState::Cancelled
            }
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Turn failed");
                chat.replace_last(Message::error(&e));
                TurnState::Failed
            }
        };

        if let Some(last) = chat.messages.last_mut() {
            last.loading = false;
        }
        on_update(&chat);

        self.store.upsert(&chat).await?;
        tracing::debug!(chat_id = %chat_id, state = ?state, "Turn finished");

        let naming = (state == TurnState::Completed && first_turn && self.naming.enabled)
            .then(|| self.spawn_naming(chat_id, prompt));

        Ok(Some(Turn {
            state,
            chat,
            naming,
        }))
    }

    async fn stream_reply<F>(
        &self,
        chat: &mut Chat,
        prompt: &str,
        cancel: &CancellationToken,
        on_update: &mut F,
    ) -> Result<StreamEnd, TransportError>
    where
        F: FnMut(&Chat) + Send,
    {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            body = self.backend.open_stream(prompt) => body?,
        };

        tracing::debug!(chat_id = %chat.id, state = ?TurnState::Streaming, "Receiving reply");

        let stream = decode_stream(body, self.backend.wire_format());
        futures::pin_mut!(stream);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = stream.next() => next,
            };

            match next {
                None => return Ok(StreamEnd::Finished),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(chunk)) => {
                    chat.replace_last(Message::bot(chunk.transcript));
                    on_update(chat);
                }
            }
        }
    }

    fn spawn_naming(&self, chat_id: &str, first_message: &str) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let prefix = self.naming.prompt.clone();
        let chat_id = chat_id.to_string();
        let first_message = first_message.to_string();

        tokio::spawn(async move {
            if let Err(e) = derive_name(
                backend.as_ref(),
                store.as_ref(),
                &chat_id,
                &prefix,
                &first_message,
            )
            .await
            {
                tracing::warn!(chat_id = %chat_id, error = %e, "Failed to name conversation");
            }
        })
    }
}
