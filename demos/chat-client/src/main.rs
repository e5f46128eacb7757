use flare::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Chat types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    user: String,
    body: String,
}

/// Renders a `new_msg` broadcast, or `None` if it isn't a chat message.
fn render(msg: &SocketMessage) -> Option<String> {
    let text = msg.payload().as_json()?;
    let chat: ChatMessage = serde_json::from_str(text).ok()?;
    Some(format!("[{}] {}", chat.user, chat.body))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// Joins `room:lobby` on a Phoenix endpoint and chats over stdin/stdout.
///
/// ```text
/// chat-client [endpoint] [user]
/// RUST_LOG=flare=debug chat-client ws://localhost:4000/socket alice
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .unwrap_or_else(|| "ws://localhost:4000/socket".to_owned());
    let user = args.next().unwrap_or_else(|| "guest".to_owned());

    let socket = Socket::builder(endpoint).param("user", user.clone()).build()?;
    socket.on_open(|| info!("connected"));
    socket.on_close(|code, reason| info!(code, reason, "disconnected"));
    socket.connect();

    let lobby = socket.channel("room:lobby", "{}");
    lobby.on("new_msg", |msg| match render(msg) {
        Some(line) => println!("{line}"),
        None => warn!(payload = %msg.payload(), "unrecognized message"),
    });
    let _join = lobby
        .join()
        .receive(PushStatus::Ok, |_| info!("joined room:lobby"))
        .receive(PushStatus::Error, |resp| warn!(%resp, "join rejected"))
        .receive(PushStatus::Timeout, |_| warn!("join timed out, retrying"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(body) = line? else { break };
                if body.trim().is_empty() {
                    continue;
                }
                let message = ChatMessage { user: user.clone(), body };
                lobby
                    .push_json("new_msg", &message)?
                    .receive(PushStatus::Error, |resp| warn!(%resp, "message rejected"))
                    .receive(PushStatus::Timeout, |_| warn!("message timed out"));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _leave = lobby.leave();
    socket.disconnect().await?;
    Ok(())
}
