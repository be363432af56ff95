use serde::{Deserialize, Serialize};

/// Messages sent from a client to the pier over its control channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim an identity; the pier answers with a fresh peer connection
    Register { identity: String },
    /// Handshake payload for the peer connection owned by `identity`
    Signal {
        identity: String,
        signal: serde_json::Value,
    },
    /// Heartbeat to keep connection alive
    Ping,
}

/// Messages sent from the pier to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    Registered { identity: String },
    /// Handshake payload generated by the pier side of the peer connection
    Signal {
        identity: String,
        signal: serde_json::Value,
    },
    /// Response to ping
    Pong,
    /// Error message
    Error { message: String },
}

/// Commands pushed to a client over its established peer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    /// Open `url` in Microsoft Edge on the client
    LaunchEdge { url: String },
}

impl Command {
    pub fn launch_edge(url: impl Into<String>) -> Self {
        Command::LaunchEdge { url: url.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::LaunchEdge { .. } => "launch-edge",
        }
    }
}
