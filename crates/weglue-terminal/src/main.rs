//! Terminal chat client
//!
//! Wires the messaging core together the way the mobile application does at
//! startup: one connection manager, one conversation store, one dispatcher,
//! all created before any "screen" exists and torn down once on exit.
//!
//! With `--url` it talks to a real WebSocket backend. Without it, an
//! in-process backend is started with a scripted peer that echoes whatever
//! you type, so the full optimistic-send/ack/broadcast loop can be exercised
//! offline:
//!
//! ```bash
//! weglue --name sam
//! weglue --url ws://localhost:3000 --conversation 7b6d…
//! ```

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use weglue_chat::{
    ConversationStore, DispatcherConfig, InMemoryHistoryBackend, MessageDispatcher, StoreEvent,
    SubscriptionScope, UserProfile, UserRole, UserSession,
};
use weglue_core::{
    ClientFrame, ConversationId, DeliveryState, MessageId, ServerFrame, Timestamp, UserId,
    WireMessage,
};
use weglue_transport::{
    ConnectionConfig, ConnectionManager, MemoryBackend, Transport, WebSocketTransport,
};

#[derive(Parser)]
#[command(name = "weglue", about = "Weglue campus messaging client", long_about = None)]
struct Cli {
    /// WebSocket URL of the messaging backend. Omit to run against a local
    /// in-process backend with a demo peer.
    #[arg(long)]
    url: Option<String>,

    /// Display name for this session
    #[arg(long, default_value = "student")]
    name: String,

    /// Conversation to join; a fresh one is generated when omitted
    #[arg(long)]
    conversation: Option<ConversationId>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let profile = UserProfile {
        id: UserId::new(),
        name: cli.name.clone(),
        role: UserRole::Student,
    };
    let session = Arc::new(UserSession::logged_in(profile.clone()));
    let conversation = cli.conversation.unwrap_or_else(ConversationId::new);

    let transport: Arc<dyn Transport> = match &cli.url {
        Some(url) => {
            info!(%url, "using websocket backend");
            Arc::new(WebSocketTransport::new(url.clone()))
        }
        None => {
            info!("no --url given; starting local demo backend");
            let backend = MemoryBackend::new();
            spawn_echo_peer(&backend).await?;
            Arc::new(backend.transport())
        }
    };

    // The singleton core, built once for the process.
    let connection = ConnectionManager::new(transport, ConnectionConfig::default());
    let store = Arc::new(ConversationStore::new(profile.id));
    let history = Arc::new(InMemoryHistoryBackend::new());
    let dispatcher = MessageDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&connection),
        Arc::clone(&session),
        history,
        DispatcherConfig::default(),
    );
    dispatcher.attach();

    render_store_events(&store, profile.id);
    render_connection_states(&connection);

    connection.connect().await?;
    dispatcher.hydrate(conversation).await?;
    info!(user = %profile.name, %conversation, "joined conversation");
    println!("type a message and press enter; /status shows the connection, /quit exits");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "/quit" | "/exit" => break,
            "/status" => {
                println!("connection: {}", connection.state());
                continue;
            }
            _ => {}
        }
        match dispatcher.send_message(conversation, input).await {
            Ok(message) => debug!(message_id = %message.id, "message queued"),
            Err(err) => error!(%err, "send failed"),
        }
    }

    connection.disconnect().await?;
    session.logout();
    info!("goodbye");
    Ok(())
}

/// Print incoming messages and delivery failures as the store changes.
fn render_store_events(store: &Arc<ConversationStore>, me: UserId) {
    store.subscribe(SubscriptionScope::Global, move |event| match event {
        StoreEvent::MessageAppended { message } if message.sender_id != me => {
            println!("<< [{}] {}", short_id(message.sender_id), message.body);
        }
        StoreEvent::MessageUpdated { message }
            if message.sender_id == me
                && message.delivery_state == DeliveryState::Failed =>
        {
            println!("!! send failed: {} (type it again to retry)", message.body);
        }
        _ => {}
    });
}

/// Print connection-state transitions as advisory lines.
fn render_connection_states(connection: &Arc<ConnectionManager>) {
    let mut states = connection.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow();
            println!("-- connection {state}");
        }
    });
}

/// A scripted participant on the demo backend: it echoes every message it
/// sees back into the conversation, so sends get both an ack and a reply.
async fn spawn_echo_peer(backend: &MemoryBackend) -> Result<()> {
    let peer_id = UserId::new();
    let session = backend.transport().connect().await?;
    tokio::spawn(async move {
        loop {
            match session.recv().await {
                Ok(Some(ServerFrame::ReceiveMessage(wire))) if wire.sender_id != peer_id => {
                    let reply = WireMessage {
                        id: MessageId::new(),
                        sender_id: peer_id,
                        conversation_id: wire.conversation_id,
                        text: format!("{} -- right back at you", wire.text),
                        timestamp: Timestamp::now(),
                    };
                    if session
                        .send(ClientFrame::SendMessage(reply))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        debug!("demo peer stopped");
    });
    Ok(())
}

fn short_id(id: UserId) -> String {
    let id = id.to_string();
    id[..8.min(id.len())].to_string()
}
