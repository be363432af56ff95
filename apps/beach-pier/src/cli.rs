use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::handlers::MessageResponse;
use crate::signaling::{ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "beach-pier")]
#[command(about = "Beach Pier rendezvous and relay server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the bind host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Override the listening port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server (default when no command is given)
    Serve,
    /// Diagnostic client for a running pier
    Debug {
        /// Pier base URL (e.g., http://localhost:5040)
        #[arg(short, long, default_value = "http://localhost:5040")]
        url: String,

        /// Identity to act as or address
        #[arg(short, long)]
        identity: String,

        #[command(subcommand)]
        command: DebugCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DebugCommands {
    /// Register on the control channel and print every signal received
    Register {
        /// Stop after this many seconds (runs until the server closes otherwise)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Ask the pier to push a launch-edge command to the identity
    Launch {
        /// URL to open; the server default applies when omitted
        #[arg(long)]
        target: Option<String>,
    },
}

pub async fn run_debug_client(url: String, identity: String, command: DebugCommands) -> Result<()> {
    match command {
        DebugCommands::Register { seconds } => {
            let listen = watch_signals(&url, &identity);
            match seconds {
                Some(secs) => match timeout(Duration::from_secs(secs), listen).await {
                    Ok(result) => result,
                    Err(_) => Ok(()),
                },
                None => listen.await,
            }
        }
        DebugCommands::Launch { target } => request_launch(&url, &identity, target).await,
    }
}

/// Map an http(s) base URL onto the control-channel endpoint.
pub fn control_channel_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/ws")
}

async fn watch_signals(url: &str, identity: &str) -> Result<()> {
    let ws_url = control_channel_url(url);
    debug!("Connecting to {} as {}", ws_url, identity);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", ws_url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            return Err(anyhow!("Connection timeout - is the pier running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let register = serde_json::to_string(&ClientMessage::Register {
        identity: identity.to_string(),
    })?;
    write.send(Message::Text(register.into())).await?;

    while let Some(msg) = read.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(&text)? {
            ServerMessage::Registered { identity } => println!("registered as {identity}"),
            ServerMessage::Signal { identity, signal } => {
                println!("signal for {identity}:");
                println!("{}", serde_json::to_string_pretty(&signal)?);
            }
            ServerMessage::Pong => {}
            ServerMessage::Error { message } => eprintln!("server error: {message}"),
        }
    }
    Ok(())
}

async fn request_launch(url: &str, identity: &str, target: Option<String>) -> Result<()> {
    let endpoint = format!("{}/launch-edge", url.trim_end_matches('/'));
    let mut query = vec![("userId", identity.to_string())];
    if let Some(target) = target {
        query.push(("url", target));
    }

    let response = reqwest::Client::new()
        .get(&endpoint)
        .query(&query)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?;
    let status = response.status();
    let body: MessageResponse = response.json().await?;
    if status.is_success() {
        println!("{}", body.message);
        Ok(())
    } else {
        Err(anyhow!("{} ({})", body.message, status))
    }
}
