//! Streaming chat client core and relay server for Ollama-style backends
//!
//! The client side sends a turn, decodes the streamed reply into deltas and
//! keeps chat history in a pluggable store. The relay side forwards chat
//! requests to the engine's OpenAI-compatible API and re-streams the reply.

pub mod config;
pub mod conversation;
pub mod core;
pub mod providers;
pub mod routes;
pub mod stream;

pub use config::{ClientConfig, Config, EndpointMode};
pub use conversation::{Chat, Message, Role};
pub use crate::core::{ChatStore, ConversationTransport, TransportError, Turn, TurnState};
pub use stream::{decode_stream, LineDecoder, StreamChunk, WireFormat};
