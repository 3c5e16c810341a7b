//! Conversation naming and thought markup
//!
//! Reasoning models wrap their chain of thought in `<think>...</think>`.
//! Names must not contain it; the terminal client shows it separately.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::config::prompts::naming_prompt;
use crate::providers::{ChatBackend, ProviderError};

use super::memory::{ChatStore, StoreError};

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model returned an empty name")]
    Empty,

    #[error("Chat {0} no longer exists")]
    ChatGone(String),
}

fn think_block() -> &'static Regex {
    static THINK: OnceLock<Regex> = OnceLock::new();
    THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("Invalid regex"))
}

/// Remove every complete thought block and trim the rest.
pub fn strip_thoughts(text: &str) -> String {
    think_block().replace_all(text, "").trim().to_string()
}

/// Split a response into its leading thought (if any) and the answer.
/// An unclosed `<think>` means the model is still thinking: everything after
/// it is thought and the answer is empty.
pub fn split_thoughts(text: &str) -> (Option<String>, String) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let Some(start) = text.find(OPEN) else {
        return (None, text.to_string());
    };

    let body = &text[start + OPEN.len()..];
    match body.find(CLOSE) {
        Some(end) => {
            let thought = body[..end].trim().to_string();
            let answer = format!("{}{}", &text[..start], body[end + CLOSE.len()..].trim_start());
            (Some(thought), answer)
        }
        None => (Some(body.trim().to_string()), text[..start].to_string()),
    }
}

/// Ask the backend for a short name and store it on the chat.
pub async fn derive_name(
    backend: &dyn ChatBackend,
    store: &dyn ChatStore,
    chat_id: &str,
    prompt_prefix: &str,
    first_message: &str,
) -> Result<String, NamingError> {
    let raw = backend
        .complete(&naming_prompt(prompt_prefix, first_message))
        .await?;

    let name = strip_thoughts(&raw);
    if name.is_empty() {
        return Err(NamingError::Empty);
    }

    if !store.rename(chat_id, &name).await? {
        return Err(NamingError::ChatGone(chat_id.to_string()));
    }

    tracing::info!(chat_id = %chat_id, name = %name, "Named conversation");
    Ok(name)
}
