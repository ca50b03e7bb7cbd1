//! Extension WebSocket handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS, identity from `?name=`
//! - Handshake: `handshake` -> `capability_request` -> `capability_response`
//!   -> register -> `connected`
//! - Session loop: broker deliveries out, dispositions and pushes in
//! - Lifecycle: ping/pong + idle timeout, unregister on exit

use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use gtproxy_core::error::{ProxyError, Result};
use gtproxy_core::protocol::control::{ControlMessage, CONTROL_VERSION};
use gtproxy_core::protocol::frame::{ExtFrame, FrameOp};

use crate::app_state::AppState;
use crate::broker;
use crate::interest::{compile_interests, Interest};
use crate::registry::{Extension, ExtensionId};
use crate::transport::codec::{self, decode, Inbound};

#[derive(Debug, Deserialize)]
pub struct ExtQuery {
    pub name: String,
}

pub async fn ws_upgrade(
    State(app): State<AppState>,
    ws: WebSocketUpgrade,
    Query(q): Query<ExtQuery>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let name = q.name.clone();
        if let Err(e) = run_session(app, q, socket).await {
            tracing::debug!(ext = %name, error = %e, "extension session ended");
        }
    })
}

async fn run_session(app: AppState, q: ExtQuery, mut socket: WebSocket) -> Result<()> {
    let ext_cfg = &app.cfg().extensions;
    let handshake_timeout = Duration::from_millis(ext_cfg.handshake_timeout_ms);

    let handshake = tokio::time::timeout(handshake_timeout, handshake(&mut socket, &q.name)).await;
    let interests = match handshake {
        Ok(Ok(interests)) => interests,
        Ok(Err(e)) => return reject(&app, socket, e).await,
        Err(_) => {
            let e = ProxyError::BadRequest("handshake timed out".into());
            return reject(&app, socket, e).await;
        }
    };

    let id: ExtensionId = Arc::from(q.name.as_str());
    let (link, mut deliveries) = mpsc::channel::<ExtFrame>(app.cfg().broker.outbound_queue);
    let session = app.broker().register(Extension {
        id: Arc::clone(&id),
        interests,
        link,
    });
    tracing::info!(ext = %id, session, "extension connected");

    let result = session_loop(&app, &id, session, socket, &mut deliveries).await;

    // No-op when a newer session with the same name replaced this one.
    app.broker().unregister_session(&id, session);
    tracing::info!(ext = %id, session, "extension disconnected");
    result
}

async fn reject(app: &AppState, mut socket: WebSocket, e: ProxyError) -> Result<()> {
    app.metrics()
        .handshake_rejections
        .inc(&[("code", e.code().as_str())]);
    tracing::warn!(error = %e, "extension handshake rejected");
    let _ = socket.send(codec::error(&e)).await;
    let _ = socket.send(Message::Close(None)).await;
    Err(e)
}

/// Run the text-lane handshake and return the declared interests.
async fn handshake(socket: &mut WebSocket, expected: &str) -> Result<Vec<Interest>> {
    if expected.is_empty() {
        return Err(ProxyError::BadRequest("missing extension name".into()));
    }

    match next_control(socket, expected).await? {
        ControlMessage::Handshake { v, name } => {
            if v != CONTROL_VERSION {
                return Err(ProxyError::UnsupportedVersion);
            }
            if name != expected {
                return Err(ProxyError::BadRequest(format!(
                    "handshake name {name:?} does not match {expected:?}"
                )));
            }
        }
        other => {
            return Err(ProxyError::BadRequest(format!(
                "expected handshake, got {other:?}"
            )))
        }
    }

    send(socket, codec::control(&ControlMessage::CapabilityRequest)).await?;

    match next_control(socket, expected).await? {
        ControlMessage::CapabilityResponse { interests } => compile_interests(interests),
        other => Err(ProxyError::BadRequest(format!(
            "expected capability_response, got {other:?}"
        ))),
    }
}

/// Next control message. Binary frames sent before registration are
/// answered with an error and skipped.
async fn next_control(socket: &mut WebSocket, name: &str) -> Result<ControlMessage> {
    loop {
        let Some(Ok(msg)) = socket.recv().await else {
            return Err(ProxyError::ExtensionGone(name.to_string()));
        };
        match decode(msg) {
            Ok(Inbound::Control(ControlMessage::Disconnect)) | Ok(Inbound::Close) => {
                return Err(ProxyError::ExtensionGone(name.to_string()))
            }
            Ok(Inbound::Control(ctl)) => return Ok(ctl),
            Ok(Inbound::Frame(_)) => {
                let e = ProxyError::UnknownExtension(name.to_string());
                send(socket, codec::error(&e)).await?;
            }
            Ok(Inbound::Ping(payload)) => send(socket, Message::Pong(payload)).await?,
            Ok(Inbound::Pong(_)) => {}
            Err(e) => return Err(e),
        }
    }
}

async fn send(socket: &mut WebSocket, msg: Message) -> Result<()> {
    socket
        .send(msg)
        .await
        .map_err(|e| ProxyError::Internal(format!("socket send failed: {e}")))
}

async fn session_loop(
    app: &AppState,
    id: &ExtensionId,
    session: u64,
    socket: WebSocket,
    deliveries: &mut mpsc::Receiver<ExtFrame>,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if ws_tx
        .send(codec::control(&ControlMessage::Connected))
        .await
        .is_err()
    {
        return Err(ProxyError::ExtensionGone(id.to_string()));
    }

    let ext_cfg = &app.cfg().extensions;
    let ping_every = Duration::from_millis(ext_cfg.ping_interval_ms);
    let idle_timeout = Duration::from_millis(ext_cfg.idle_timeout_ms);

    let mut ping_tick = tokio::time::interval(ping_every);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            // broker -> extension
            maybe_frame = deliveries.recv() => {
                let Some(frame) = maybe_frame else { break; };
                if ws_tx.send(codec::frame(&frame)).await.is_err() {
                    break;
                }
            }

            // extension -> broker
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break; };
                let Ok(msg) = incoming else { break; };

                last_activity = Instant::now();

                let reply = match decode(msg) {
                    Ok(Inbound::Frame(frame)) => handle_frame(app, id, session, frame).err(),
                    Ok(Inbound::Control(ControlMessage::Disconnect)) | Ok(Inbound::Close) => break,
                    Ok(Inbound::Control(other)) => Some(ProxyError::BadRequest(format!(
                        "unexpected control message after registration: {other:?}"
                    ))),
                    Ok(Inbound::Ping(payload)) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                        None
                    }
                    Ok(Inbound::Pong(_)) => None,
                    Err(e) => Some(e),
                };

                if let Some(e) = reply {
                    tracing::debug!(ext = %id, error = %e, "rejected extension message");
                    if ws_tx.send(codec::error(&e)).await.is_err() {
                        break;
                    }
                }
            }

            _ = ping_tick.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            // idle timeout
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if last_activity.elapsed() >= idle_timeout {
                    tracing::warn!(ext = %id, "extension idle timeout");
                    let e = ProxyError::ExtensionGone(format!("{id}: idle timeout"));
                    let _ = ws_tx.send(codec::error(&e)).await;
                    break;
                }
            }
        }
    }

    let _ = ws_tx.send(codec::control(&ControlMessage::Disconnect)).await;
    Ok(())
}

fn handle_frame(app: &AppState, id: &ExtensionId, session: u64, frame: ExtFrame) -> Result<()> {
    if !app.broker().is_current(id, session) {
        return Err(ProxyError::ExtensionGone(format!("{id}: replaced by a newer session")));
    }
    match frame.op {
        FrameOp::Push => app
            .broker()
            .inject(frame.packet, frame.direction, frame.packet_flags),
        FrameOp::Deliver => Err(ProxyError::BadRequest(
            "deliver is a broker-to-extension op".into(),
        )),
        _ => {
            let resp = broker::Response::from_frame(frame)?;
            app.broker().respond(id, resp)
        }
    }
}
