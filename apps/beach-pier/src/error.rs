use thiserror::Error;

/// Failures reported by a peer-connection capability.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("handshake payload rejected: {0}")]
    Rejected(String),
    #[error("peer data channel is not open")]
    NotReady,
    #[error("peer connection is closed")]
    Closed,
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),
}

/// Failures scoped to a single session or a single message.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("identity {0} is not connected")]
    NotConnected(String),
    #[error("handshake rejected for {identity}: {source}")]
    HandshakeRejected {
        identity: String,
        #[source]
        source: PeerError,
    },
    #[error("signal for unregistered identity {0}")]
    StaleSignal(String),
    #[error("peer channel for {identity} failed: {source}")]
    PeerChannel {
        identity: String,
        #[source]
        source: PeerError,
    },
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}
