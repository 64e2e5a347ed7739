//! WebSocket progress channel with bounded reconnection.

use crate::error::ClientResult;
use crate::session::SessionStore;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use stemwell_core::Message;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnection policy for the progress channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// First reconnect delay; doubles per attempt.
    pub base_backoff: Duration,
    /// Reconnect attempts per disconnect before giving up.
    pub max_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Events delivered to the channel consumer.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A decoded server message. Keepalives are handled internally and
    /// never forwarded.
    Message(Message),
    /// The transport dropped; a reconnect attempt is pending.
    Reconnecting { attempt: u32 },
    /// Reconnect attempts are exhausted; the caller must resubmit.
    Disconnected,
}

/// A resilient progress channel for one job.
///
/// Transient transport loss is recovered transparently with exponential
/// backoff; the server replays the session snapshot on reattach. An
/// explicit `close` suppresses reconnection entirely, including aborting
/// a backoff sleep already in progress.
pub struct ProgressChannel {
    events: mpsc::Receiver<ChannelEvent>,
    close_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ProgressChannel {
    /// Connect to a job's progress channel.
    pub async fn connect(url: &str) -> ClientResult<Self> {
        Self::connect_with(url, ChannelConfig::default(), None).await
    }

    /// Connect with an explicit policy and an optional session store that
    /// is cleared once the job delivers its terminal message.
    pub async fn connect_with(
        url: &str,
        config: ChannelConfig,
        session: Option<SessionStore>,
    ) -> ClientResult<Self> {
        // The initial connect is the caller's problem; only drops after a
        // successful attach are retried.
        let (ws, _) = connect_async(url).await?;
        debug!(url, "progress channel connected");

        let (events_tx, events_rx) = mpsc::channel(64);
        let (close_tx, close_rx) = watch::channel(false);
        let task = tokio::spawn(run_channel(
            url.to_string(),
            config,
            ws,
            events_tx,
            close_rx,
            session,
        ));

        Ok(Self {
            events: events_rx,
            close_tx,
            task,
        })
    }

    /// Receive the next event. Returns `None` once the channel completes
    /// (terminal message delivered, retries exhausted, or closed).
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Close the channel. Sets the close intent before touching the
    /// socket, so no reconnection can race the shutdown.
    pub async fn close(self) {
        let _ = self.close_tx.send(true);
        let _ = self.task.await;
    }
}

enum SocketOutcome {
    /// Terminal message forwarded; the channel is done.
    Finished,
    /// Transport lost without a terminal message.
    Dropped,
    /// Close intent observed.
    Closed,
}

async fn run_channel(
    url: String,
    config: ChannelConfig,
    mut ws: WsStream,
    events: mpsc::Sender<ChannelEvent>,
    mut close_rx: watch::Receiver<bool>,
    session: Option<SessionStore>,
) {
    loop {
        match pump_socket(&mut ws, &events, &mut close_rx).await {
            SocketOutcome::Finished => {
                if let Some(session) = &session {
                    if let Err(e) = session.clear().await {
                        warn!(error = %e, "failed to clear resume record");
                    }
                }
                return;
            }
            SocketOutcome::Closed => {
                let _ = ws.close(None).await;
                return;
            }
            SocketOutcome::Dropped => {}
        }

        match reconnect(&url, &config, &events, &mut close_rx).await {
            Some(socket) => ws = socket,
            None => return,
        }
    }
}

/// Pump one socket until it finishes, drops, or close intent is set.
async fn pump_socket(
    ws: &mut WsStream,
    events: &mpsc::Sender<ChannelEvent>,
    close_rx: &mut watch::Receiver<bool>,
) -> SocketOutcome {
    loop {
        tokio::select! {
            incoming = ws.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => return SocketOutcome::Dropped,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(error = %e, "progress channel transport error");
                        return SocketOutcome::Dropped;
                    }
                };

                let message: Message = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed server message");
                        continue;
                    }
                };

                match message {
                    Message::Ping => {
                        let pong = match serde_json::to_string(&Message::Pong) {
                            Ok(pong) => pong,
                            Err(_) => continue,
                        };
                        if ws.send(WsMessage::Text(pong.into())).await.is_err() {
                            return SocketOutcome::Dropped;
                        }
                    }
                    Message::Pong => {}
                    message => {
                        let terminal = message.is_terminal();
                        if events.send(ChannelEvent::Message(message)).await.is_err() {
                            // Consumer dropped the receiver; stop quietly.
                            return SocketOutcome::Closed;
                        }
                        if terminal {
                            let _ = ws.close(None).await;
                            return SocketOutcome::Finished;
                        }
                    }
                }
            }

            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    return SocketOutcome::Closed;
                }
            }
        }
    }
}

/// Reconnect with exponential backoff. Returns `None` when attempts are
/// exhausted or close intent is set.
async fn reconnect(
    url: &str,
    config: &ChannelConfig,
    events: &mpsc::Sender<ChannelEvent>,
    close_rx: &mut watch::Receiver<bool>,
) -> Option<WsStream> {
    let mut delay = config.base_backoff;
    for attempt in 1..=config.max_attempts {
        if *close_rx.borrow() {
            return None;
        }
        if events
            .send(ChannelEvent::Reconnecting { attempt })
            .await
            .is_err()
        {
            return None;
        }

        // The backoff sleep races the close intent so an explicit close
        // never waits out the delay.
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    return None;
                }
            }
        }
        if *close_rx.borrow() {
            return None;
        }

        match connect_async(url).await {
            Ok((ws, _)) => {
                debug!(url, attempt, "progress channel reconnected");
                return Some(ws);
            }
            Err(e) => {
                warn!(url, attempt, error = %e, "reconnect attempt failed");
                delay = delay.saturating_mul(2);
            }
        }
    }

    let _ = events.send(ChannelEvent::Disconnected).await;
    None
}
