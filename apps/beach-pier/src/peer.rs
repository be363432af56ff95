//! Seam between the relay and whatever performs the actual peer-connection
//! handshake. The pier only ever answers: it never creates offers and never
//! trickles candidates.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::PeerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Negotiating,
    Ready,
    Closed,
}

/// Events raised by a peer connection towards the relay.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A handshake payload that must reach the remote client.
    Signal(serde_json::Value),
    /// The direct data channel opened.
    Ready,
    /// Application data arrived over the direct channel.
    Data(Bytes),
    /// The connection failed or was closed.
    Closed,
}

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Feed a handshake payload received from the remote client.
    async fn signal(&self, payload: serde_json::Value) -> Result<(), PeerError>;

    /// Write a text message on the established data channel.
    async fn send_text(&self, text: String) -> Result<(), PeerError>;

    fn state(&self) -> PeerState;

    /// Tear the connection down. Safe to call more than once.
    async fn close(&self);
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        identity: &str,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerHandle>, PeerError>;
}
