use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PeerError;
use crate::peer::{PeerEvent, PeerFactory, PeerState};
use crate::session::{ChannelId, ChannelRef, PeerSession};

/// Identity -> session map. The lock is only ever held for map operations;
/// peer construction and teardown happen outside it.
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<String, PeerSession>>,
    factory: Arc<dyn PeerFactory>,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn PeerFactory>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Create a fresh answering peer for `identity` and store it. Any previous
    /// session under the same identity is replaced and closed.
    pub async fn register(
        &self,
        identity: &str,
        channel: ChannelRef,
    ) -> Result<(PeerSession, mpsc::UnboundedReceiver<PeerEvent>), PeerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = self.factory.create(identity, events_tx).await?;
        let session = PeerSession::new(identity.to_string(), peer, channel);

        let displaced = self
            .entries
            .lock()
            .insert(identity.to_string(), session.clone());

        if let Some(previous) = displaced {
            info!(
                identity = %identity,
                previous_channel = %previous.channel.id(),
                channel = %session.channel.id(),
                "identity re-registered; releasing previous peer"
            );
            release(previous).await;
        }
        Ok((session, events_rx))
    }

    pub fn lookup(&self, identity: &str) -> Option<PeerSession> {
        self.entries.lock().get(identity).cloned()
    }

    pub async fn remove(&self, identity: &str) -> Option<PeerSession> {
        let removed = self.entries.lock().remove(identity);
        if let Some(session) = &removed {
            release(session.clone()).await;
        }
        removed
    }

    /// Remove `identity` only while it still refers to the registration
    /// `session_id`; a newer registration is left alone.
    pub async fn remove_session(&self, identity: &str, session_id: Uuid) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let current = entries
                .get(identity)
                .is_some_and(|session| session.session_id == session_id);
            if current {
                entries.remove(identity)
            } else {
                None
            }
        };
        match removed {
            Some(session) => {
                release(session).await;
                true
            }
            None => false,
        }
    }

    /// Evict every session registered by `channel`. Returns the evicted
    /// identities; zero matches is not an error.
    pub async fn remove_by_control_channel(&self, channel: ChannelId) -> Vec<String> {
        let evicted = self.drain_where(|session| session.channel.id() == channel);
        release_all(evicted).await
    }

    /// Evict closed sessions, plus sessions still negotiating after `max_age`.
    pub async fn remove_stale(&self, max_age: Duration) -> Vec<String> {
        let evicted = self.drain_where(|session| match session.peer.state() {
            PeerState::Closed => true,
            PeerState::Negotiating => session.registered_at.elapsed() >= max_age,
            PeerState::Ready => false,
        });
        release_all(evicted).await
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.entries.lock().keys().cloned().collect();
        identities.sort();
        identities
    }

    fn drain_where<F>(&self, mut predicate: F) -> Vec<PeerSession>
    where
        F: FnMut(&PeerSession) -> bool,
    {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, session)| predicate(session))
            .map(|(identity, _)| identity.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|identity| entries.remove(&identity))
            .collect()
    }
}

async fn release(session: PeerSession) {
    debug!(
        identity = %session.identity,
        session_id = %session.session_id,
        "releasing peer connection"
    );
    session.peer.close().await;
}

async fn release_all(sessions: Vec<PeerSession>) -> Vec<String> {
    let mut identities = Vec::with_capacity(sessions.len());
    for session in sessions {
        identities.push(session.identity.clone());
        release(session).await;
    }
    identities
}
