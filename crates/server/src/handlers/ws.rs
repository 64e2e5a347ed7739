//! WebSocket progress channel handler.

use crate::error::{ApiError, ApiResult};
use crate::progress::ProgressSession;
use crate::state::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::SinkExt;
use std::sync::Arc;
use stemwell_core::{JobId, Message};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Upgrade to the per-job progress channel.
///
/// Unknown job IDs are rejected before the upgrade so the client sees a
/// plain HTTP 404 rather than an immediately closed socket.
pub async fn job_progress_ws(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let job_id = JobId::parse(&job_id)?;
    let session = state
        .coordinator
        .sessions()
        .lookup(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no progress session for job {job_id}")))?;

    Ok(upgrade.on_upgrade(move |socket| stream_progress(state, session, socket)))
}

async fn stream_progress(state: AppState, session: Arc<ProgressSession>, mut socket: WebSocket) {
    let job_id = session.job_id();
    debug!(%job_id, "progress channel attached");

    let attach = session.attach();
    let mut rx = attach.rx;

    // Replay state for clients attaching late or reconnecting: current
    // progress first, then the terminal message if the job already ended.
    if let Some((percent, status)) = attach.last_progress {
        let replay = Message::Progress { percent, status };
        if send_json(&mut socket, &replay).await.is_err() {
            return;
        }
    }
    if let Some(terminal) = attach.terminal {
        let _ = send_json(&mut socket, &terminal).await;
        let _ = socket.close().await;
        state.coordinator.sessions().unregister(job_id).await;
        return;
    }

    let mut keepalive = tokio::time::interval(state.ping_interval());
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            received = rx.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Intermediate progress is disposable; resync from
                        // the snapshot and keep going.
                        warn!(%job_id, skipped, "progress receiver lagged");
                        let attach = session.attach();
                        rx = attach.rx;
                        if let Some(terminal) = attach.terminal {
                            let _ = send_json(&mut socket, &terminal).await;
                            break;
                        }
                        if let Some((percent, status)) = attach.last_progress {
                            let resync = Message::Progress { percent, status };
                            if send_json(&mut socket, &resync).await.is_err() {
                                return;
                            }
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let terminal = message.is_terminal();
                if send_json(&mut socket, &message).await.is_err() {
                    // Session stays registered; the client may reconnect
                    // and collect the terminal message later.
                    return;
                }
                if terminal {
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_client_message(&session, &mut socket, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        session.touch();
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(%job_id, "client closed progress channel");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%job_id, error = %err, "progress channel error");
                        return;
                    }
                }
            }

            _ = keepalive.tick() => {
                if send_json(&mut socket, &Message::Ping).await.is_err() {
                    return;
                }
            }
        }
    }

    // Terminal message delivered; the session is drained.
    let _ = socket.close().await;
    state.coordinator.sessions().unregister(job_id).await;
    debug!(%job_id, "progress channel drained");
}

async fn handle_client_message(session: &ProgressSession, socket: &mut WebSocket, raw: &str) {
    match serde_json::from_str::<Message>(raw) {
        Ok(Message::Ping) => {
            session.touch();
            let _ = send_json(socket, &Message::Pong).await;
        }
        Ok(Message::Pong) => session.touch(),
        Ok(_) => {
            // Clients have no business sending progress or terminal
            // messages; ignore them.
        }
        Err(err) => {
            debug!(error = %err, "ignoring malformed client message");
        }
    }
}

async fn send_json(socket: &mut WebSocket, message: &Message) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(WsMessage::Text(text.into())).await
}
