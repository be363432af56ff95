use std::sync::Arc;

use crate::dispatch::CommandDispatcher;
use crate::lifecycle::LifecycleManager;
use crate::peer::PeerFactory;
use crate::registry::ConnectionRegistry;
use crate::relay::SignalingRelay;

/// Everything a request or socket handler needs, sharing one registry.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub relay: SignalingRelay,
    pub dispatcher: CommandDispatcher,
    pub lifecycle: LifecycleManager,
    pub default_launch_url: Arc<str>,
}

impl AppState {
    pub fn new(factory: Arc<dyn PeerFactory>, default_launch_url: &str) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(factory));
        Self {
            relay: SignalingRelay::new(registry.clone()),
            dispatcher: CommandDispatcher::new(registry.clone()),
            lifecycle: LifecycleManager::new(registry.clone()),
            registry,
            default_launch_url: Arc::from(default_launch_url),
        }
    }
}
