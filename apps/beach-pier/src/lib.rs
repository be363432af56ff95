//! Rendezvous and relay service: clients register an identity over a
//! WebSocket control channel, complete a WebRTC handshake with the pier, and
//! can then be sent commands over the resulting direct data channel.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod peer;
pub mod registry;
pub mod relay;
pub mod rtc;
pub mod server;
pub mod session;
pub mod signaling;
pub mod state;
pub mod websocket;
