//! WebSocket gateway integration tests.
//!
//! Serves the full router on 127.0.0.1:0 and drives it with real sockets.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use axum::{body::Body, http::Request, http::StatusCode};
use common::jwt::{AccessClaims, TokenScope, DEFAULT_CLOCK_SKEW};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use signaling_service::bus::{BusActorHandle, ConnectPolicy};
use signaling_service::routes::{build_routes, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use token_service::crypto::SigningKey;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    key: SigningKey,
    bus: BusActorHandle,
    router: axum::Router,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let key = SigningKey::generate("gateway-test").unwrap();
        let bus = BusActorHandle::new(key.verifier(DEFAULT_CLOCK_SKEW), ConnectPolicy::Supersede);
        let state = Arc::new(AppState { bus: bus.clone() });
        let router = build_routes(state, PrometheusBuilder::new().build_recorder().handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            key,
            bus,
            router,
            _handle: handle,
        }
    }

    fn bus_token(&self, sub: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        self.key
            .sign(&AccessClaims {
                sub: sub.to_string(),
                scope: TokenScope::Bus,
                chan: None,
                iat: now,
                exp: now + 600,
                jti: format!("jti-{sub}"),
            })
            .unwrap()
    }

    async fn open(&self, identity: &str, token: &str) -> Socket {
        let url = format!(
            "ws://{}/api/v1/bus?identity={identity}&token={token}",
            self.addr
        );
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    /// Open a socket and consume the `connected` frame.
    async fn connect(&self, identity: &str) -> Socket {
        let mut socket = self.open(identity, &self.bus_token(identity)).await;
        let frame = next_frame(&mut socket).await;
        assert_eq!(frame["type"], "connection_state");
        assert_eq!(frame["state"], "connected");
        socket
    }
}

async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame within timeout")
            .expect("socket open")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_op(socket: &mut Socket, op: Value) {
    socket.send(Message::Text(op.to_string())).await.unwrap();
}

fn invite(from: &str, to: &str) -> Value {
    let (a, b) = if from < to { (from, to) } else { (to, from) };
    json!({
        "type": "invite",
        "channel_id": format!("{}.{a}.{b}", a.len()),
        "call_type": "video",
        "from_id": "someone-else",
        "caller_name": from.to_uppercase(),
    })
}

#[tokio::test]
async fn test_auth_failure_sends_error_and_closes() {
    let server = TestServer::spawn().await;
    let mut socket = server.open("alice", "not-a-token").await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "AUTH_FAILURE");

    let rest = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap();
    assert!(matches!(rest, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn test_token_for_other_identity_is_refused() {
    let server = TestServer::spawn().await;
    let mut socket = server.open("alice", &server.bus_token("bob")).await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["code"], "AUTH_FAILURE");
}

#[tokio::test]
async fn test_envelope_round_trip_stamps_sender() {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    send_op(
        &mut alice,
        json!({"op": "send", "to": "bob", "envelope": invite("alice", "bob")}),
    )
    .await;

    let result = next_frame(&mut alice).await;
    assert_eq!(result["type"], "send_result");
    assert_eq!(result["delivered"], true);

    let delivered = next_frame(&mut bob).await;
    assert_eq!(delivered["type"], "message");
    assert_eq!(delivered["envelope"]["type"], "invite");
    assert_eq!(delivered["envelope"]["from_id"], "alice");
    assert_eq!(delivered["envelope"]["caller_name"], "ALICE");
}

#[tokio::test]
async fn test_send_to_offline_peer_reports_unreachable() {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("alice").await;

    send_op(
        &mut alice,
        json!({"op": "send", "to": "bob", "envelope": invite("alice", "bob")}),
    )
    .await;

    let result = next_frame(&mut alice).await;
    assert_eq!(result["delivered"], false);
    assert_eq!(result["error"], "PEER_UNREACHABLE");
}

#[tokio::test]
async fn test_presence_subscription_over_socket() {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("alice").await;

    send_op(&mut alice, json!({"op": "subscribe", "peers": ["bob"]})).await;
    let snapshot = next_frame(&mut alice).await;
    assert_eq!(snapshot["type"], "subscribed");
    assert_eq!(snapshot["peers"][0]["peer"], "bob");
    assert_eq!(snapshot["peers"][0]["online"], false);

    let bob = server.connect("bob").await;
    let online = next_frame(&mut alice).await;
    assert_eq!(online["type"], "presence");
    assert_eq!(online["online"], true);

    drop(bob);
    let offline = next_frame(&mut alice).await;
    assert_eq!(offline["type"], "presence");
    assert_eq!(offline["peer"], "bob");
    assert_eq!(offline["online"], false);
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_socket_survives() {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("alice").await;

    send_op(&mut alice, json!({"op": "dance"})).await;
    let error = next_frame(&mut alice).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "BAD_FRAME");

    send_op(&mut alice, json!({"op": "subscribe", "peers": []})).await;
    assert_eq!(next_frame(&mut alice).await["type"], "subscribed");
}

#[tokio::test]
async fn test_second_socket_supersedes_first() {
    let server = TestServer::spawn().await;
    let mut first = server.connect("alice").await;
    let _second = server.connect("alice").await;

    let frame = next_frame(&mut first).await;
    assert_eq!(frame["type"], "connection_state");
    assert_eq!(frame["state"], "superseded");
    assert_eq!(server.bus.status().await.unwrap().connections, 1);
}

#[tokio::test]
async fn test_force_disconnect_and_health() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("alice").await;

    let alice_id = common::types::IdentityId::new("alice")?;
    assert!(server.bus.force_disconnect(alice_id).await?);
    let frame = next_frame(&mut alice).await;
    assert_eq!(frame["state"], "disconnected");

    let response = server
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(&body[..], b"OK");

    server.bus.cancel();
    let response = server
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
