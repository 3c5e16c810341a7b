//! Client core: conversation transport, naming and chat storage

mod memory;
mod naming;
mod transport;

pub use memory::{ChatStore, InMemoryChatStore, SqliteChatStore, StoreError};
pub use naming::{derive_name, split_thoughts, strip_thoughts, NamingError};
pub use transport::{ConversationTransport, TransportError, Turn, TurnState};
