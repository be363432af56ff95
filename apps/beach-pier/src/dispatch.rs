use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use crate::signaling::Command;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Ack {
    pub identity: String,
    pub command: &'static str,
}

/// Pushes commands over a client's direct peer channel. Never queues and
/// never retries: a command either goes out now or the call fails.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, identity: &str, command: &Command) -> Result<Ack, RelayError> {
        let session = self
            .registry
            .lookup(identity)
            .ok_or_else(|| RelayError::NotConnected(identity.to_string()))?;

        let text = serde_json::to_string(command)?;
        if let Err(source) = session.peer.send_text(text).await {
            warn!(
                identity = %identity,
                command = command.kind(),
                error = %source,
                "command not delivered"
            );
            return Err(RelayError::PeerChannel {
                identity: identity.to_string(),
                source,
            });
        }

        info!(identity = %identity, command = command.kind(), "command sent to client");
        Ok(Ack {
            identity: identity.to_string(),
            command: command.kind(),
        })
    }
}
