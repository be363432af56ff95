use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::ConnectionRegistry;
use crate::session::ChannelId;

/// Evicts sessions whose owner went away.
#[derive(Clone)]
pub struct LifecycleManager {
    registry: Arc<ConnectionRegistry>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Handle a control-channel disconnect: evict and release every session
    /// the channel registered.
    pub async fn disconnect(&self, channel: ChannelId) -> Vec<String> {
        let evicted = self.registry.remove_by_control_channel(channel).await;
        if evicted.is_empty() {
            debug!(channel = %channel, "disconnected channel owned no sessions");
        } else {
            info!(channel = %channel, identities = ?evicted, "evicted sessions on disconnect");
        }
        evicted
    }

    /// Periodically evict sessions that never finished negotiating.
    pub fn spawn_stale_sweep(&self, max_age: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let period = (max_age / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = registry.remove_stale(max_age).await;
                if !evicted.is_empty() {
                    info!(
                        identities = ?evicted,
                        max_age_secs = max_age.as_secs(),
                        "evicted stale sessions"
                    );
                }
            }
        })
    }
}
