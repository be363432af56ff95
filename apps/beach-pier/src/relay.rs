use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PeerError, RelayError};
use crate::peer::PeerEvent;
use crate::registry::ConnectionRegistry;
use crate::session::{ChannelRef, ControlChannel, PeerSession};
use crate::signaling::ServerMessage;

/// Shuttles handshake payloads between control channels and peer connections.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Register `identity` for `channel` and start forwarding the new peer's
    /// events back to that channel.
    pub async fn register(
        &self,
        identity: &str,
        channel: &ControlChannel,
    ) -> Result<PeerSession, PeerError> {
        let (session, events) = self.registry.register(identity, channel.downgrade()).await?;
        info!(
            identity = %identity,
            channel = %channel.id(),
            session_id = %session.session_id,
            "peer session registered"
        );

        let pump = EventPump {
            registry: self.registry.clone(),
            identity: session.identity.clone(),
            session_id: session.session_id,
            channel: session.channel.clone(),
        };
        tokio::spawn(pump.run(events));
        Ok(session)
    }

    /// Feed an inbound handshake payload to the peer registered under
    /// `identity`. Failures are logged here; callers only need the result for
    /// diagnostics.
    pub async fn signal(
        &self,
        identity: &str,
        payload: serde_json::Value,
    ) -> Result<(), RelayError> {
        let Some(session) = self.registry.lookup(identity) else {
            debug!(identity = %identity, "dropping signal for unregistered identity");
            return Err(RelayError::StaleSignal(identity.to_string()));
        };

        session.peer.signal(payload).await.map_err(|source| {
            warn!(
                identity = %identity,
                session_id = %session.session_id,
                error = %source,
                "handshake payload rejected"
            );
            RelayError::HandshakeRejected {
                identity: identity.to_string(),
                source,
            }
        })
    }
}

struct EventPump {
    registry: Arc<ConnectionRegistry>,
    identity: String,
    session_id: Uuid,
    channel: ChannelRef,
}

impl EventPump {
    async fn run(self, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::Signal(signal) => {
                    let delivered = self.channel.emit(ServerMessage::Signal {
                        identity: self.identity.clone(),
                        signal,
                    });
                    if !delivered {
                        debug!(
                            identity = %self.identity,
                            channel = %self.channel.id(),
                            "control channel gone; dropping outbound signal"
                        );
                    }
                }
                PeerEvent::Ready => {
                    info!(identity = %self.identity, "peer channel ready");
                }
                PeerEvent::Data(data) => {
                    info!(identity = %self.identity, len = data.len(), "received data from client");
                    debug!(
                        identity = %self.identity,
                        data = %data_preview(&data),
                        "client data"
                    );
                }
                PeerEvent::Closed => {
                    if self
                        .registry
                        .remove_session(&self.identity, self.session_id)
                        .await
                    {
                        info!(identity = %self.identity, "peer connection closed; session evicted");
                    }
                    break;
                }
            }
        }
        debug!(identity = %self.identity, session_id = %self.session_id, "peer event pump stopped");
    }
}

const DATA_PREVIEW_BYTES: usize = 256;

/// Lossy UTF-8 view of at most `DATA_PREVIEW_BYTES` of a client payload.
fn data_preview(data: &[u8]) -> String {
    let shown = &data[..data.len().min(DATA_PREVIEW_BYTES)];
    let mut preview = String::from_utf8_lossy(shown).into_owned();
    if data.len() > DATA_PREVIEW_BYTES {
        preview.push_str(&format!("... ({} more bytes)", data.len() - DATA_PREVIEW_BYTES));
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::testing::{MockPeerFactory, MOCK_ANSWER_SDP};
    use crate::peer::{PeerHandle, PeerState};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn relay() -> (Arc<MockPeerFactory>, Arc<ConnectionRegistry>, SignalingRelay) {
        let factory = Arc::new(MockPeerFactory::default());
        let registry = Arc::new(ConnectionRegistry::new(factory.clone()));
        let relay = SignalingRelay::new(registry.clone());
        (factory, registry, relay)
    }

    fn channel() -> (ControlChannel, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ControlChannel::new(tx), rx)
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("message within deadline")
            .expect("channel open")
    }

    async fn wait_until_absent(registry: &ConnectionRegistry, identity: &str) {
        for _ in 0..200 {
            if registry.lookup(identity).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{identity} still registered");
    }

    #[test_timeout::tokio_timeout_test]
    async fn offer_is_answered_on_registering_channel_only() {
        let (factory, _registry, relay) = relay();
        let (alice_channel, mut alice_rx) = channel();
        let (other_channel, mut other_rx) = channel();

        relay.register("alice", &alice_channel).await.unwrap();
        relay.register("bob", &other_channel).await.unwrap();
        relay
            .signal("alice", json!({ "type": "offer", "sdp": "v=0" }))
            .await
            .unwrap();

        match next_message(&mut alice_rx).await {
            ServerMessage::Signal { identity, signal } => {
                assert_eq!(identity, "alice");
                assert_eq!(signal["type"], "answer");
                assert_eq!(signal["sdp"], MOCK_ANSWER_SDP);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(other_rx.try_recv().is_err());
        assert_eq!(factory.latest("alice").unwrap().signals().len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn signal_for_unknown_identity_changes_nothing() {
        let (factory, registry, relay) = relay();

        let result = relay
            .signal("ghost", json!({ "type": "offer", "sdp": "v=0" }))
            .await;

        assert!(matches!(result, Err(RelayError::StaleSignal(identity)) if identity == "ghost"));
        assert!(registry.is_empty());
        assert!(factory.created().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn malformed_signal_is_rejected_without_eviction() {
        let (_factory, registry, relay) = relay();
        let (control, mut rx) = channel();
        relay.register("alice", &control).await.unwrap();

        let result = relay.signal("alice", json!({ "type": "answer", "sdp": "v=0" })).await;

        assert!(matches!(result, Err(RelayError::HandshakeRejected { .. })));
        assert!(registry.lookup("alice").is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn inbound_data_is_diagnostic_only() {
        let (factory, registry, relay) = relay();
        let (control, mut rx) = channel();
        relay.register("alice", &control).await.unwrap();
        let peer = factory.latest("alice").unwrap();

        peer.open();
        peer.deliver("hello from alice");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("alice").unwrap().peer.state(), PeerState::Ready);
        assert!(rx.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn closed_peer_is_evicted() {
        let (factory, registry, relay) = relay();
        let (control, _rx) = channel();
        relay.register("alice", &control).await.unwrap();

        factory.latest("alice").unwrap().fail();

        wait_until_absent(&registry, "alice").await;
    }

    #[test_timeout::tokio_timeout_test]
    async fn closing_replaced_peer_keeps_new_registration() {
        let (factory, registry, relay) = relay();
        let (control, _rx) = channel();
        relay.register("alice", &control).await.unwrap();
        let second = relay.register("alice", &control).await.unwrap();

        // The first peer was closed on replacement; its pump must not evict
        // the newer session.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(factory.created()[0].state(), PeerState::Closed);
        assert_eq!(
            registry.lookup("alice").unwrap().session_id,
            second.session_id
        );
    }

    #[test_timeout::timeout]
    fn data_preview_truncates_large_payloads() {
        assert_eq!(data_preview(b"edge launched"), "edge launched");

        let large = vec![b'x'; DATA_PREVIEW_BYTES + 44];
        let preview = data_preview(&large);
        assert!(preview.starts_with(&"x".repeat(DATA_PREVIEW_BYTES)));
        assert!(preview.ends_with("... (44 more bytes)"));
        assert!(preview.len() < large.len());
    }
}
