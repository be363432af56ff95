use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc_ice::udp_network::{EphemeralUDP, UDPNetwork};

use crate::error::PeerError;
use crate::peer::{PeerEvent, PeerEvents, PeerFactory, PeerHandle, PeerState};

/// ICE knobs applied to every peer connection the pier creates.
#[derive(Debug, Clone, Default)]
pub struct IceSettings {
    pub servers: Vec<String>,
    pub port_range: Option<(u16, u16)>,
    pub public_ip: Option<String>,
    /// Gather 127.0.0.1 candidates; only useful for same-host peers.
    pub include_loopback: bool,
}

pub struct WebRtcPeerFactory {
    ice: IceSettings,
}

impl WebRtcPeerFactory {
    pub fn new(ice: IceSettings) -> Self {
        Self { ice }
    }

    fn build_api(&self) -> API {
        let mut setting = SettingEngine::default();

        if let Some((start, end)) = self.ice.port_range {
            match EphemeralUDP::new(start, end) {
                Ok(ephemeral) => setting.set_udp_network(UDPNetwork::Ephemeral(ephemeral)),
                Err(err) => warn!(
                    target = "rtc",
                    port_start = start,
                    port_end = end,
                    error = %err,
                    "invalid ICE UDP port range; using defaults"
                ),
            }
        }

        // Advertise a host-reachable address when running behind NAT (e.g. in Docker).
        if let Some(ip) = &self.ice.public_ip {
            setting.set_nat_1to1_ips(vec![ip.clone()], RTCIceCandidateType::Host);
        }

        if self.ice.include_loopback {
            setting.set_include_loopback_candidate(true);
        }

        APIBuilder::new().with_setting_engine(setting).build()
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.ice.servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice.servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        identity: &str,
        events: PeerEvents,
    ) -> Result<Arc<dyn PeerHandle>, PeerError> {
        let api = self.build_api();
        let pc = Arc::new(api.new_peer_connection(self.rtc_config()).await?);
        let peer = WebRtcPeer {
            identity: identity.to_string(),
            pc,
            channel: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(PeerState::Negotiating)),
            events,
        };
        peer.install_handlers();
        Ok(Arc::new(peer))
    }
}

/// Answering side of a WebRTC connection. The remote client creates the data
/// channel; the pier adopts it once it arrives.
pub struct WebRtcPeer {
    identity: String,
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    state: Arc<RwLock<PeerState>>,
    events: PeerEvents,
}

impl WebRtcPeer {
    // Handlers never capture the peer connection itself, so dropping the
    // session drops the connection.
    fn install_handlers(&self) {
        let identity = self.identity.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |pc_state: RTCPeerConnectionState| {
                debug!(target = "rtc", identity = %identity, state = %pc_state, "peer connection state changed");
                if matches!(
                    pc_state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    mark_closed(&state, &events);
                }
                Box::pin(async {})
            }));

        let identity = self.identity.clone();
        let channel = self.channel.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                info!(target = "rtc", identity = %identity, label = %dc.label(), "data channel announced");
                install_channel_handlers(&dc, &identity, &state, &events);
                *channel.write() = Some(dc);
                Box::pin(async {})
            }));
    }

    async fn answer(&self, sdp: String) -> Result<(), PeerError> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|err| PeerError::Rejected(err.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|err| PeerError::Rejected(err.to_string()))?;

        let answer = self.pc.create_answer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;

        // No trickle: the answer goes out once, with every candidate inlined.
        let pc = self.pc.clone();
        let events = self.events.clone();
        let identity = self.identity.clone();
        tokio::spawn(async move {
            let _ = gathered.recv().await;
            match pc.local_description().await {
                Some(desc) => {
                    let payload = serde_json::json!({
                        "type": desc.sdp_type.to_string(),
                        "sdp": desc.sdp,
                    });
                    let _ = events.send(PeerEvent::Signal(payload));
                }
                None => warn!(
                    target = "rtc",
                    identity = %identity,
                    "ICE gathering finished without a local description"
                ),
            }
        });
        Ok(())
    }
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    async fn signal(&self, payload: serde_json::Value) -> Result<(), PeerError> {
        if self.state() == PeerState::Closed {
            return Err(PeerError::Closed);
        }
        match Handshake::parse(payload)? {
            Handshake::Offer(sdp) => self.answer(sdp).await,
            Handshake::Candidate(init) => {
                self.pc.add_ice_candidate(init).await?;
                Ok(())
            }
        }
    }

    async fn send_text(&self, text: String) -> Result<(), PeerError> {
        if self.state() == PeerState::Closed {
            return Err(PeerError::Closed);
        }
        let dc = self.channel.read().clone().ok_or(PeerError::NotReady)?;
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(PeerError::NotReady);
        }
        dc.send_text(text).await?;
        Ok(())
    }

    fn state(&self) -> PeerState {
        *self.state.read()
    }

    async fn close(&self) {
        mark_closed(&self.state, &self.events);
        self.channel.write().take();
        if let Err(err) = self.pc.close().await {
            debug!(target = "rtc", identity = %self.identity, error = %err, "peer connection close failed");
        }
    }
}

fn install_channel_handlers(
    dc: &Arc<RTCDataChannel>,
    identity: &str,
    state: &Arc<RwLock<PeerState>>,
    events: &PeerEvents,
) {
    let open_state = state.clone();
    let open_events = events.clone();
    let open_identity = identity.to_string();
    dc.on_open(Box::new(move || {
        let opened = {
            let mut guard = open_state.write();
            if *guard == PeerState::Negotiating {
                *guard = PeerState::Ready;
                true
            } else {
                false
            }
        };
        if opened {
            info!(target = "rtc", identity = %open_identity, "data channel open");
            let _ = open_events.send(PeerEvent::Ready);
        }
        Box::pin(async {})
    }));

    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let _ = message_events.send(PeerEvent::Data(msg.data));
        Box::pin(async {})
    }));

    let close_state = state.clone();
    let close_events = events.clone();
    dc.on_close(Box::new(move || {
        mark_closed(&close_state, &close_events);
        Box::pin(async {})
    }));
}

fn mark_closed(state: &RwLock<PeerState>, events: &PeerEvents) {
    let previous = std::mem::replace(&mut *state.write(), PeerState::Closed);
    if previous != PeerState::Closed {
        let _ = events.send(PeerEvent::Closed);
    }
}

/// Handshake payloads the answering side understands.
#[derive(Debug)]
enum Handshake {
    Offer(String),
    Candidate(RTCIceCandidateInit),
}

#[derive(Deserialize)]
struct SdpPayload {
    sdp: String,
}

#[derive(Deserialize)]
struct CandidatePayload {
    candidate: CandidateInit,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateInit {
    candidate: String,
    #[serde(default)]
    sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    sdp_mline_index: Option<u16>,
    #[serde(default)]
    username_fragment: Option<String>,
}

impl Handshake {
    fn parse(payload: serde_json::Value) -> Result<Self, PeerError> {
        let kind = payload
            .get("type")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match kind.as_deref() {
            Some("offer") => {
                let SdpPayload { sdp } = serde_json::from_value(payload)
                    .map_err(|err| PeerError::Rejected(format!("malformed offer: {err}")))?;
                Ok(Handshake::Offer(sdp))
            }
            Some("candidate") | None if payload.get("candidate").is_some() => {
                let CandidatePayload { candidate } = serde_json::from_value(payload)
                    .map_err(|err| PeerError::Rejected(format!("malformed candidate: {err}")))?;
                Ok(Handshake::Candidate(RTCIceCandidateInit {
                    candidate: candidate.candidate,
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                    username_fragment: candidate.username_fragment,
                }))
            }
            Some("answer") => Err(PeerError::Rejected(
                "unexpected answer; the pier never initiates".into(),
            )),
            Some(other) => Err(PeerError::Rejected(format!(
                "unsupported signal type {other}"
            ))),
            None => Err(PeerError::Rejected("signal carries no type".into())),
        }
    }
}
