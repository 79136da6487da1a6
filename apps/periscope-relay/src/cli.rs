use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use periscope_proto::{ClientFrame, PresenceStatus, ServerFrame};

#[derive(Parser, Debug)]
#[command(name = "periscope-relay")]
#[command(about = "Periscope signaling relay and diagnostic client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate against a running relay and print the online snapshot.
    Who {
        /// Relay URL (e.g., ws://localhost:4310)
        #[arg(short, long, default_value = "ws://localhost:4310")]
        url: String,

        /// Login token presented to the relay
        #[arg(short, long, env = "PERISCOPE_TOKEN")]
        token: String,
    },
}

pub async fn run_who_client(url: String, token: String) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!("connecting to {}", ws_url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            return Err(anyhow::anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "Connection timeout - is the relay running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let auth = serde_json::to_string(&ClientFrame::Auth { token })?;
    write.send(Message::Text(auth.into())).await?;

    let users = timeout(Duration::from_secs(5), async {
        loop {
            let Some(msg) = read.next().await else {
                return Err(anyhow::anyhow!("Connection closed unexpectedly"));
            };
            if let Message::Text(text) = msg? {
                match serde_json::from_str::<ServerFrame>(&text)? {
                    ServerFrame::AuthOk => {
                        let request = serde_json::to_string(&ClientFrame::GetOnlineUsers)?;
                        write.send(Message::Text(request.into())).await?;
                    }
                    ServerFrame::AuthFail { reason } => {
                        return Err(anyhow::anyhow!("Authentication failed: {}", reason));
                    }
                    ServerFrame::OnlineUsers { users } => {
                        return Ok(users);
                    }
                    ServerFrame::Error { message } => {
                        return Err(anyhow::anyhow!("Relay error: {}", message));
                    }
                    _ => {}
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("Timed out waiting for the relay"))??;

    if users.is_empty() {
        println!("No other users online.");
    } else {
        println!("{:<28} {:<32} {}", "IDENTITY", "LABEL", "STATUS");
        for user in users {
            let status = match user.status {
                PresenceStatus::Available => "available",
                PresenceStatus::Hosting => "hosting",
                PresenceStatus::Viewing => "viewing",
            };
            println!("{:<28} {:<32} {}", user.identity, user.label, status);
        }
    }

    write.send(Message::Close(None)).await?;
    Ok(())
}
