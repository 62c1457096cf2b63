//! # pharmalink
//!
//! Terminal front-end for the Pharmalink real-time layer.
//!
//! Opens a session with the credential in `PHARMALINK_TOKEN`, prints live
//! chat, presence and notification events, and reads commands from stdin.
//! Every other setting comes from `PHARMALINK_*` variables (see
//! [`ClientConfig::from_env`]).

mod commands;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use pharmalink_client::{ClientConfig, ClientEvent, ImageAttachment, Session};
use pharmalink_net::{Dialer, HttpApi, PresenceStatus, RestApi, WsDialer};
use pharmalink_shared::constants::APP_NAME;
use pharmalink_shared::{Credential, Message, PharmacyId};

use crate::commands::{Command, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    pharmalink_client::init_tracing();
    info!("Starting {APP_NAME} CLI v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(
        api = %config.api_base_url,
        socket = %config.socket_url,
        optimistic_send = config.optimistic_send,
        "Loaded configuration"
    );

    let token = std::env::var("PHARMALINK_TOKEN").context("PHARMALINK_TOKEN is not set")?;
    let credential = Credential::new(token);

    // -----------------------------------------------------------------------
    // 3. Open the session
    // -----------------------------------------------------------------------
    let api = HttpApi::new(&config.api_base_url, credential.clone(), config.request_timeout)?;
    let dialer = WsDialer::new(config.socket_url.clone());
    let mut session = Session::open(&config, credential, api, dialer)
        .await
        .context("Failed to open session")?;

    let actor = session.actor().id.clone();
    println!(
        "Signed in as {} ({})",
        session.actor().display_name.as_deref().unwrap_or("unnamed pharmacy"),
        actor
    );
    if let Some(badge) = session.badge() {
        println!("{badge} unread notification(s), /notifications to list");
    }
    println!("{HELP}");

    // -----------------------------------------------------------------------
    // 4. Print live events in the background
    // -----------------------------------------------------------------------
    tokio::spawn(print_events(session.subscribe(), actor));

    // -----------------------------------------------------------------------
    // 5. Read commands until /quit, EOF or Ctrl+C
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match commands::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = run(&session, command).await {
                            println!("! {e:#}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("! {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    session.close();
    Ok(())
}

async fn run<A: RestApi, D: Dialer>(session: &Session<A, D>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => {
            for pharmacy in session.directory().await? {
                let dot = match session.presence_status(&pharmacy.id) {
                    PresenceStatus::Online => "●",
                    PresenceStatus::Offline => "○",
                    PresenceStatus::Unknown => "?",
                };
                println!("{dot} {:<24} {}", pharmacy.display_name, pharmacy.id);
            }
        }
        Command::Open(id) => {
            let history = session.select(&id).await?;
            println!("--- conversation with {id} ({} messages) ---", history.len());
            for message in &history {
                println!("{}", render_message(&session.actor().id, message));
            }
        }
        Command::Send(text) => {
            session.send(Some(text.as_str()), None).await?;
        }
        Command::Image { path, caption } => {
            let mime = commands::image_mime(&path)?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            session
                .send(caption.as_deref(), Some(ImageAttachment::new(mime, bytes)))
                .await?;
        }
        Command::Notifications => {
            let visible = session.notifications();
            if visible.is_empty() {
                println!("No unread notifications");
            }
            for n in visible {
                println!("[{}] {:?}: {}", n.id, n.kind, n.message);
            }
            if session.unread_count() > 0 {
                println!("{} unread in total", session.unread_count());
            }
        }
        Command::Ack(id) => {
            if !session.acknowledge(&id).await? {
                println!("Nothing to acknowledge for {id}");
            }
        }
        Command::Status => {
            println!(
                "connection: {:?}, unread: {}, open conversation: {}",
                session.connection_state(),
                session.badge().unwrap_or_else(|| "0".into()),
                session
                    .selected_counterparty()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "none".into())
            );
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<ClientEvent>, actor: PharmacyId) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::MessageReceived(message)) => {
                let with = message.counterparty_for(&actor);
                println!("<{}> {}", with.short(), render_message(&actor, &message));
            }
            Ok(ClientEvent::ConversationUpdated { .. }) => {}
            Ok(ClientEvent::PresenceChanged { pharmacy, online }) => {
                let state = if online { "online" } else { "offline" };
                println!("* {pharmacy} is {state}");
            }
            Ok(ClientEvent::PresenceSnapshot { online }) => {
                println!("* {online} pharmacies online");
            }
            Ok(ClientEvent::NotificationsChanged { unread }) => {
                println!("* {unread} unread notification(s)");
            }
            Ok(ClientEvent::ConnectionStateChanged(state)) => {
                println!("* connection {state:?}");
            }
            Ok(ClientEvent::AuthRequired) => {
                println!("! session expired for {actor}, sign in again and restart with a fresh token");
            }
            Ok(ClientEvent::Error(message)) => println!("! {message}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn render_message(actor: &PharmacyId, message: &Message) -> String {
    let who = if message.is_from(actor) {
        "you".to_string()
    } else if message.anonymous_sender {
        "anonymous".to_string()
    } else {
        message.sender.short().to_string()
    };
    let mut line = format!("[{}] {who}:", message.created_at.format("%Y-%m-%d %H:%M"));
    if let Some(text) = &message.text {
        line.push(' ');
        line.push_str(text);
    }
    if message.image.is_some() {
        line.push_str(" [image]");
    }
    if message.key.is_pending() {
        line.push_str(" (sending)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pharmalink_shared::MessageKey;

    fn message(sender: &str, text: Option<&str>, image: bool) -> Message {
        Message {
            key: MessageKey::Confirmed("m1".into()),
            sender: sender.into(),
            receiver: "other".into(),
            text: text.map(str::to_string),
            image: image.then(|| "data:image/png;base64,AA".to_string()),
            created_at: chrono::Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap(),
            anonymous_sender: false,
        }
    }

    #[test]
    fn test_render_own_message() {
        let line = render_message(&"me".into(), &message("me", Some("hello"), false));
        assert_eq!(line, "[2024-03-05 09:30] you: hello");
    }

    #[test]
    fn test_render_image_from_counterparty() {
        let line = render_message(&"me".into(), &message("pharmacy-b", None, true));
        assert_eq!(line, "[2024-03-05 09:30] pharmacy: [image]");
    }
}
