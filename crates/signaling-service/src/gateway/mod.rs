//! WebSocket gateway onto the bus.
//!
//! `GET /api/v1/bus?identity=..&token=..` upgrades first and authenticates
//! second, so an auth failure reaches the client as an `error` frame
//! followed by a close. One socket holds one [`Connection`]; the socket
//! closes when the connection is superseded, disconnected or the hub shuts
//! down.

pub mod frames;

use crate::bus::{BusActorHandle, BusEvent, Connection, ConnectionState};
use crate::errors::SignalingError;
use crate::observability::metrics::{record_gateway_frame, record_gateway_session};
use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use common::types::IdentityId;
use frames::{ClientFrame, ServerFrame};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Deserialize)]
pub struct BusQuery {
    pub identity: String,
    pub token: String,
}

// Tokens never reach logs.
impl std::fmt::Debug for BusQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusQuery")
            .field("identity", &self.identity)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[instrument(skip_all, name = "sig.gateway.upgrade")]
pub async fn bus_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BusQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let bus = state.bus.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, bus, query))
}

type FrameSink = SplitSink<WebSocket, Message>;

#[instrument(skip_all, name = "sig.gateway.socket")]
async fn serve_socket(socket: WebSocket, bus: BusActorHandle, query: BusQuery) {
    let (mut sink, mut stream) = socket.split();

    let connected = match IdentityId::new(query.identity) {
        Ok(identity) => bus.connect(identity, &query.token).await,
        Err(_) => Err(SignalingError::AuthFailure),
    };
    let mut connection = match connected {
        Ok(connection) => connection,
        Err(e) => {
            debug!(target: "sig.gateway", error_code = e.error_code(), "Bus connect refused");
            record_gateway_session(e.error_code());
            let _ = send_frame(&mut sink, &ServerFrame::error(&e)).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    record_gateway_session("connected");

    loop {
        tokio::select! {
            event = connection.recv() => {
                let Some(event) = event else { break };
                let terminal = matches!(
                    event,
                    BusEvent::ConnectionState(state) if state != ConnectionState::Connected
                );
                if send_frame(&mut sink, &ServerFrame::from(event)).await.is_err() || terminal {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_frame(&connection, &text).await;
                        if send_frame(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong is answered by axum; binary frames carry nothing.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(target: "sig.gateway", error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    connection.disconnect().await;
}

async fn handle_client_frame(connection: &Connection, text: &str) -> ServerFrame {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(target: "sig.gateway", error = %e, "Malformed client frame");
            record_gateway_frame("malformed");
            return ServerFrame::malformed("Frame is not a valid bus operation");
        }
    };

    match frame {
        ClientFrame::Send { to, envelope } => {
            record_gateway_frame("send");
            match connection.send(&to, envelope).await {
                Ok(()) => ServerFrame::SendResult {
                    to,
                    delivered: true,
                    error: None,
                },
                Err(e) => ServerFrame::SendResult {
                    to,
                    delivered: false,
                    error: Some(e.error_code().to_string()),
                },
            }
        }
        ClientFrame::Subscribe { peers } => {
            record_gateway_frame("subscribe");
            match connection.subscribe_presence(peers).await {
                Ok(peers) => ServerFrame::Subscribed { peers },
                Err(e) => ServerFrame::error(&e),
            }
        }
        ClientFrame::Unsubscribe { peers } => {
            record_gateway_frame("unsubscribe");
            match connection.unsubscribe_presence(peers.clone()).await {
                Ok(()) => ServerFrame::Unsubscribed { peers },
                Err(e) => ServerFrame::error(&e),
            }
        }
    }
}

async fn send_frame(sink: &mut FrameSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(text)).await
}
