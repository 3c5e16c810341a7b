//! Terminal chat client
//!
//! Usage: `chat [config.toml]` (or set `CHAT_CONFIG`). Every input line is
//! sent as a turn and the reply is printed as it streams in. Ctrl-C stops
//! the current reply without leaving.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ollama_chat_relay::config::ClientConfig;
use ollama_chat_relay::conversation::{Chat, Role};
use ollama_chat_relay::core::{
    split_thoughts, ChatStore, ConversationTransport, InMemoryChatStore, SqliteChatStore, TurnState,
};
use ollama_chat_relay::providers::{ChatBackend, Provider};

const HELP: &str = "Commands: /new, /list, /open <id>, /delete <id>, /models, /help, /quit";

/// Prints the answer part of a streaming bot message as it grows.
#[derive(Default)]
struct LivePrinter {
    printed: String,
    thinking_shown: bool,
}

impl LivePrinter {
    fn update(&mut self, chat: &Chat) {
        let Some(last) = chat.messages.last().filter(|m| m.role == Role::Bot) else {
            return;
        };
        if last.loading {
            return;
        }

        let (thought, answer) = split_thoughts(&last.content);
        let mut out = std::io::stdout();

        if thought.is_some() && answer.is_empty() && !self.thinking_shown {
            let _ = write!(out, "(thinking…) ");
            self.thinking_shown = true;
        }

        if let Some(suffix) = answer.strip_prefix(self.printed.as_str()) {
            let _ = write!(out, "{}", suffix);
            self.printed = answer;
        } else if last.is_error() {
            let _ = write!(out, "\n{}", last.content);
            self.printed = last.content.clone();
        }
        let _ = out.flush();
    }
}

async fn open_store(config: &ClientConfig) -> anyhow::Result<Arc<dyn ChatStore>> {
    let store: Arc<dyn ChatStore> = match &config.storage.path {
        Some(path) => Arc::new(SqliteChatStore::new(path).await?),
        None => Arc::new(InMemoryChatStore::new()),
    };
    Ok(store)
}

fn load_config() -> anyhow::Result<ClientConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CHAT_CONFIG").ok())
        .map(PathBuf::from);

    Ok(match path {
        Some(path) => ClientConfig::from_file(&path)?,
        None => ClientConfig::default(),
    })
}

async fn run_command(
    line: &str,
    transport: &ConversationTransport,
    current: &mut String,
) -> anyhow::Result<bool> {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match command {
        "/quit" | "/exit" => return Ok(false),
        "/new" => {
            *current = Chat::new().id;
            println!("Started chat {}", current);
        }
        "/list" => {
            for chat in transport.store().list().await? {
                let marker = if chat.id == *current { "*" } else { " " };
                println!("{} {}  {} ({} messages)", marker, chat.id, chat.title(), chat.messages.len());
            }
        }
        "/open" => match transport.store().get(arg).await? {
            Some(chat) => {
                for message in &chat.messages {
                    let who = match message.role {
                        Role::User => "You",
                        Role::Bot => "Bot",
                    };
                    let (_, answer) = split_thoughts(&message.content);
                    println!("{}: {}", who, answer);
                }
                *current = chat.id;
            }
            None => println!("No chat with id {}", arg),
        },
        "/delete" => {
            transport.store().delete(arg).await?;
            if arg == current.as_str() {
                *current = Chat::new().id;
            }
            println!("Deleted {}", arg);
        }
        "/models" => match transport.backend().list_models().await {
            Ok(models) => models.iter().for_each(|m| println!("  {}", m)),
            Err(e) => println!("Could not list models: {}", e),
        },
        _ => println!("{}", HELP),
    }

    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ollama_chat_relay=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config()?;
    let backend: Arc<dyn ChatBackend> = Arc::new(Provider::from_config(&config)?);
    let store = open_store(&config).await?;
    let transport = ConversationTransport::new(backend, store).with_naming(config.naming.clone());

    let mut current = Chat::new().id;
    println!("Ready ({:?} mode). {}", config.endpoint.mode, HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();

        if line.starts_with('/') {
            if !run_command(line, &transport, &mut current).await? {
                break;
            }
            continue;
        }

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let mut printer = LivePrinter::default();
        let result = transport
            .send_message(&current, line, &cancel, |chat| printer.update(chat))
            .await;
        watcher.abort();

        match result {
            Ok(Some(turn)) if turn.state == TurnState::Cancelled => println!("\n[stopped]"),
            Ok(Some(_)) => println!(),
            Ok(None) => {}
            Err(e) => println!("\n{}", e),
        }
    }

    Ok(())
}
