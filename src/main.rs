//! matchday-chat: terminal client for live match chat rooms.
//!
//! Architecture:
//! - Tokio async runtime for concurrent I/O
//! - One shared WebSocket connection with automatic reconnect
//! - A chat room bound to a single match, fed from that connection
//! - REST lookups for the match header and the user's display name
//!
//! Usage: `matchday-chat [MATCH_ID]`. Each stdin line is sent to the room.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use matchday_chat::api::ApiClient;
use matchday_chat::config::Settings;
use matchday_chat::connection::{ConnectionConfig, ConnectionHandle, ConnectionState};
use matchday_chat::data::models::{ChatMessage, Delivery, MatchSummary, TopicId};
use matchday_chat::room::{ChatRoom, RoomConfig, RoomUpdate};
use matchday_chat::transport::WsConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration.
    let settings = Settings::from_env();

    // Initialize logging.
    init_logging(&settings);

    info!(
        socket_url = %settings.socket_url,
        api_url = %settings.api_url,
        authenticated = settings.auth_token.is_some(),
        "Configuration loaded"
    );

    // Validate settings.
    if let Err(errors) = settings.validate() {
        for e in &errors {
            error!(error = %e, "Configuration error");
        }
        anyhow::bail!("Configuration validation failed");
    }

    let client = ApiClient::new(
        &settings.api_url,
        settings.auth_token.clone(),
        settings.http_timeout_secs,
        settings.http_max_retries,
        settings.http_rate_limit,
    )
    .context("building API client")?;

    // =========================================================================
    // Pick the room
    // =========================================================================
    let topic = std::env::args()
        .nth(1)
        .and_then(|arg| TopicId::parse_input(&arg))
        .or_else(|| settings.match_id.as_deref().and_then(TopicId::parse_input));
    let topic = match topic {
        Some(topic) => topic,
        None => {
            list_live_matches(&client).await;
            anyhow::bail!("No match id given (pass one as the first argument or set CHAT_MATCH_ID)");
        }
    };

    let header = match client.get_match(topic.as_str()).await {
        Ok(summary) => room_header(&summary),
        Err(e) => {
            warn!(error = %e, match_id = %topic, "Match lookup failed, using placeholder header");
            format!("Match {topic}")
        }
    };

    let author = resolve_author(&client, &settings).await;

    // =========================================================================
    // Connect and join
    // =========================================================================
    let connector = WsConnector::new(&settings.socket_url).with_token(settings.auth_token.clone());
    let connection = ConnectionHandle::open(connector, ConnectionConfig::from(&settings));
    let mut state_rx = connection.watch_state();

    let mut room = ChatRoom::new(
        connection.clone(),
        author.clone(),
        RoomConfig {
            max_messages: settings.max_messages,
        },
    );
    room.bind(topic.clone());

    println!("== {header} ==");
    println!("(chatting as {author}; Ctrl+C to leave)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(text)) => {
                        if let Some(message) = room.submit(&text) {
                            let delivery = room
                                .store()
                                .delivery(&message.id)
                                .unwrap_or(Delivery::Pending);
                            print_message(&message, delivery);
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed, still listening");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                    }
                }
            }
            update = room.recv() => {
                let Some(update) = update else { break };
                render_update(&room, update);
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => info!("Connected"),
                    ConnectionState::Reconnecting { attempt } => {
                        warn!(attempt, "Connection lost, reconnecting");
                    }
                    ConnectionState::Disconnected => {
                        error!("Connection gave up; messages can no longer be sent");
                    }
                    ConnectionState::Connecting => {}
                }
            }
        }
    }

    // Graceful shutdown.
    info!("Leaving room...");
    room.unbind();
    connection.close().await;
    info!("Chat client shutdown complete.");

    Ok(())
}

/// Log the matches currently in progress so the user can pick one.
async fn list_live_matches(client: &ApiClient) {
    match client.live_matches().await {
        Ok(matches) if matches.is_empty() => info!("No live matches right now"),
        Ok(matches) => {
            for m in &matches {
                info!("  [{}] {}", m.id, room_header(m));
            }
        }
        Err(e) => warn!(error = %e, "Failed to list live matches"),
    }
}

/// Use the profile's display name when logged in, else the configured one.
async fn resolve_author(client: &ApiClient, settings: &Settings) -> String {
    if !client.has_token() {
        return settings.display_name.clone();
    }
    match client.get_profile().await {
        Ok(profile) => profile.display_name().to_string(),
        Err(e) => {
            warn!(error = %e, "Profile lookup failed, using CHAT_DISPLAY_NAME");
            settings.display_name.clone()
        }
    }
}

fn room_header(summary: &MatchSummary) -> String {
    let mut header = format!("{} ({})", summary.title(), summary.scoreline());
    if let Some(minute) = summary.minute.filter(|_| summary.is_live()) {
        header.push_str(&format!(" {minute}'"));
    }
    if !summary.league.is_empty() {
        header.push_str(&format!(" | {}", summary.league));
    }
    header
}

fn render_update(room: &ChatRoom, update: RoomUpdate) {
    match update {
        RoomUpdate::HistoryLoaded { count } => {
            info!(count, "Chat history loaded");
            for entry in room.store().entries() {
                print_message(&entry.message, entry.delivery);
            }
        }
        RoomUpdate::HistoryMerged(added) => {
            for message in &added {
                print_message(message, Delivery::Confirmed);
            }
        }
        RoomUpdate::Appended(message) => print_message(&message, Delivery::Confirmed),
        RoomUpdate::Confirmed(_) | RoomUpdate::Ignored(_) => {}
    }
}

fn print_message(message: &ChatMessage, delivery: Delivery) {
    let marker = match delivery {
        Delivery::Confirmed => "",
        Delivery::Pending => " …",
        Delivery::Failed => " (not sent)",
    };
    println!(
        "[{}] {}: {}{}",
        message.sent_at.format("%H:%M"),
        message.author,
        message.body,
        marker
    );
}

fn init_logging(settings: &Settings) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    // Chat lines own stdout.
    if settings.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
