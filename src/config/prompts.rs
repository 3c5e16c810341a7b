//! Prompt templates used by the client

/// Built-in prompts
pub mod builtin {
    /// Asks the model for a conversation name. The first user message is
    /// appended as context.
    pub const CHAT_NAME: &str = "Create a short rememberable name for this chat with a little slavic twist. Only respond with the name and nothing else. The context of the chat is: ";
}

/// Build the naming request from a prompt prefix and the first user message.
pub fn naming_prompt(prefix: &str, first_message: &str) -> String {
    format!("{}{}", prefix, first_message)
}
