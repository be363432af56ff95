use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use beach_pier::rtc::{IceSettings, WebRtcPeerFactory};
use beach_pier::server::build_router;
use beach_pier::signaling::{ClientMessage, ServerMessage};
use beach_pier::state::AppState;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Pier {
    addr: SocketAddr,
    state: AppState,
}

impl Pier {
    async fn start() -> Self {
        let factory = Arc::new(WebRtcPeerFactory::new(IceSettings {
            include_loopback: true,
            ..Default::default()
        }));
        let state = AppState::new(factory, "https://www.example.com");
        let app = build_router(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        Pier { addr, state }
    }

    async fn connect(&self) -> Socket {
        let (socket, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        socket
    }

    async fn launch(&self, identity: &str) -> (reqwest::StatusCode, serde_json::Value) {
        let response = reqwest::Client::new()
            .get(format!("http://{}/launch-edge", self.addr))
            .query(&[("userId", identity)])
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn wait_until_absent(&self, identity: &str) {
        for _ in 0..200 {
            if self.state.registry.lookup(identity).is_none() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("{identity} still registered");
    }
}

async fn send(socket: &mut Socket, message: &ClientMessage) {
    let text = serde_json::to_string(message).unwrap();
    socket.send(Message::Text(text.into())).await.unwrap();
}

async fn next_message(socket: &mut Socket) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(20), socket.next())
            .await
            .expect("server message within deadline")
            .expect("socket open")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn register(socket: &mut Socket, identity: &str) {
    send(
        socket,
        &ClientMessage::Register {
            identity: identity.to_string(),
        },
    )
    .await;
    match next_message(socket).await {
        ServerMessage::Registered { identity: echoed } => assert_eq!(echoed, identity),
        other => panic!("unexpected {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test(60)]
async fn register_dispatch_and_disconnect_over_the_wire() {
    let pier = Pier::start().await;
    let mut socket = pier.connect().await;

    let (status, body) = pier.launch("alice").await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User not connected.");

    register(&mut socket, "alice").await;

    // Stale and malformed signals are dropped without a reply.
    send(
        &mut socket,
        &ClientMessage::Signal {
            identity: "ghost".into(),
            signal: json!({ "type": "offer", "sdp": "v=0" }),
        },
    )
    .await;
    send(
        &mut socket,
        &ClientMessage::Signal {
            identity: "alice".into(),
            signal: json!({ "type": "answer", "sdp": "v=0" }),
        },
    )
    .await;
    send(&mut socket, &ClientMessage::Ping).await;
    assert!(matches!(next_message(&mut socket).await, ServerMessage::Pong));
    assert!(pier.state.registry.lookup("ghost").is_none());

    // Registered but never negotiated: the peer channel is not open.
    let (status, _) = pier.launch("alice").await;
    assert_eq!(status, reqwest::StatusCode::CONFLICT);

    socket.close(None).await.unwrap();
    pier.wait_until_absent("alice").await;

    let (status, _) = pier.launch("alice").await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}

#[test_timeout::tokio_timeout_test(60)]
async fn disconnect_only_evicts_the_closing_channel() {
    let pier = Pier::start().await;
    let mut first = pier.connect().await;
    let mut second = pier.connect().await;

    register(&mut first, "alice").await;
    register(&mut second, "bob").await;
    register(&mut second, "carol").await;
    assert_eq!(pier.state.registry.len(), 3);

    second.close(None).await.unwrap();
    pier.wait_until_absent("bob").await;
    pier.wait_until_absent("carol").await;

    assert_eq!(pier.state.registry.identities(), vec!["alice".to_string()]);
}

#[test_timeout::tokio_timeout_test(60)]
async fn reregistering_keeps_a_single_session() {
    let pier = Pier::start().await;
    let mut socket = pier.connect().await;

    register(&mut socket, "alice").await;
    let first = pier.state.registry.lookup("alice").unwrap();
    register(&mut socket, "alice").await;
    let second = pier.state.registry.lookup("alice").unwrap();

    assert_eq!(pier.state.registry.len(), 1);
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(first.peer.state(), beach_pier::peer::PeerState::Closed);
}

#[test_timeout::tokio_timeout_test(90)]
async fn launch_reaches_client_after_handshake() {
    let pier = Pier::start().await;
    let mut socket = pier.connect().await;
    register(&mut socket, "alice").await;

    let mut setting = SettingEngine::default();
    setting.set_include_loopback_candidate(true);
    let api = APIBuilder::new().with_setting_engine(setting).build();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );

    let dc = pc.create_data_channel("commands", None).await.unwrap();
    let (open_tx, open_rx) = oneshot::channel();
    dc.on_open(Box::new(move || {
        let _ = open_tx.send(());
        Box::pin(async {})
    }));
    let (message_tx, mut message_rx) = mpsc::unbounded_channel::<String>();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let _ = message_tx.send(String::from_utf8_lossy(&msg.data).to_string());
        Box::pin(async {})
    }));

    let offer = pc.create_offer(None).await.unwrap();
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.unwrap();
    let _ = gathered.recv().await;
    let local = pc.local_description().await.unwrap();

    send(
        &mut socket,
        &ClientMessage::Signal {
            identity: "alice".into(),
            signal: json!({ "type": "offer", "sdp": local.sdp }),
        },
    )
    .await;

    let answer = match next_message(&mut socket).await {
        ServerMessage::Signal { identity, signal } => {
            assert_eq!(identity, "alice");
            assert_eq!(signal["type"], "answer");
            signal["sdp"].as_str().unwrap().to_string()
        }
        other => panic!("unexpected {other:?}"),
    };
    pc.set_remote_description(RTCSessionDescription::answer(answer).unwrap())
        .await
        .unwrap();

    timeout(Duration::from_secs(30), open_rx)
        .await
        .expect("data channel opened")
        .unwrap();

    // The pier side may observe the open a moment after the client does.
    let mut delivered = false;
    for _ in 0..100 {
        let (status, _) = pier.launch("alice").await;
        if status == reqwest::StatusCode::OK {
            delivered = true;
            break;
        }
        assert_eq!(status, reqwest::StatusCode::CONFLICT);
        sleep(Duration::from_millis(50)).await;
    }
    assert!(delivered, "pier never saw the data channel open");

    let text = timeout(Duration::from_secs(10), message_rx.recv())
        .await
        .expect("command within deadline")
        .unwrap();
    let command: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        command,
        json!({ "type": "launch-edge", "url": "https://www.example.com" })
    );

    // Data from the client is diagnostic only.
    dc.send_text("edge launched".to_string()).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(pier.state.registry.len(), 1);

    pc.close().await.unwrap();
    socket.close(None).await.unwrap();
    pier.wait_until_absent("alice").await;
}
