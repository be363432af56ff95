use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::peer::PeerHandle;
use crate::signaling::ServerMessage;

/// Identifies one control-channel connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Owning end of a control channel, held by the socket task.
pub struct ControlChannel {
    id: ChannelId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ControlChannel {
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: ChannelId::new(),
            tx,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn send(&self, message: ServerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Non-owning reference for storage inside a session.
    pub fn downgrade(&self) -> ChannelRef {
        ChannelRef {
            id: self.id,
            tx: self.tx.downgrade(),
        }
    }
}

/// Weak back-reference to the control channel that registered a session.
#[derive(Clone)]
pub struct ChannelRef {
    id: ChannelId,
    tx: mpsc::WeakUnboundedSender<ServerMessage>,
}

impl ChannelRef {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns false once the channel is gone.
    pub fn emit(&self, message: ServerMessage) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRef").field("id", &self.id).finish()
    }
}

/// Per-identity state: the peer connection and who registered it.
#[derive(Clone)]
pub struct PeerSession {
    pub identity: String,
    /// Distinguishes successive registrations of the same identity.
    pub session_id: Uuid,
    pub peer: Arc<dyn PeerHandle>,
    pub channel: ChannelRef,
    pub registered_at: Instant,
}

impl PeerSession {
    pub fn new(identity: String, peer: Arc<dyn PeerHandle>, channel: ChannelRef) -> Self {
        Self {
            identity,
            session_id: Uuid::new_v4(),
            peer,
            channel,
            registered_at: Instant::now(),
        }
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("identity", &self.identity)
            .field("session_id", &self.session_id)
            .field("state", &self.peer.state())
            .field("channel", &self.channel)
            .finish()
    }
}
