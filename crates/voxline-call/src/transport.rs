//! Message transport to the voice server.
//!
//! A [`Connector`] hands back a channel immediately and reports the outcome of the
//! handshake through the session queue. The WebSocket implementation keeps the
//! socket inside a spawned task that multiplexes an outbound queue with inbound
//! frames, so `send` and `close` never block the caller.

use crate::error::{CallError, CallResult};
use crate::event::{EventSender, TransportEvent, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::protocol::TransportMessage;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// Close code reported when the peer's close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// How long to wait for the server to answer our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One bidirectional connection. Terminal once closed or failed.
pub trait TransportChannel {
    /// Queue a message. Fails fast unless the channel is open.
    fn send(&mut self, message: &TransportMessage) -> CallResult<()>;

    /// Start an orderly close. Later calls are no-ops.
    fn close(&mut self) -> CallResult<()>;

    fn is_open(&self) -> bool;
}

/// Opens transport channels. Never reconnects on its own.
pub trait Connector {
    /// Begin connecting to `endpoint`.
    ///
    /// Returns at once; `Opened`, `Message`, `Closed` and `Failed` arrive on `events`.
    fn connect(&mut self, endpoint: &Url, events: EventSender) -> Box<dyn TransportChannel>;
}

/// WebSocket connector (`ws://` and `wss://`).
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, endpoint: &Url, events: EventSender) -> Box<dyn TransportChannel> {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_connection(
            endpoint.clone(),
            rx,
            Arc::clone(&open),
            events,
        ));
        Box::new(WsChannel {
            outbound: Some(tx),
            open,
            task,
        })
    }
}

enum Outbound {
    Frame(Message),
    Close,
}

pub struct WsChannel {
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// Set by the connection task once the handshake completes, cleared when it ends.
    open: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TransportChannel for WsChannel {
    fn send(&mut self, message: &TransportMessage) -> CallResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CallError::TransportSend("connection is not open".into()));
        }
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| CallError::TransportSend("connection was closed".into()))?;
        let json =
            serde_json::to_string(message).map_err(|e| CallError::TransportSend(e.to_string()))?;
        outbound
            .send(Outbound::Frame(Message::Text(json.into())))
            .map_err(|_| CallError::TransportSend("connection task has stopped".into()))
    }

    fn close(&mut self) -> CallResult<()> {
        let outbound = match self.outbound.take() {
            Some(outbound) => outbound,
            None => return Ok(()),
        };

        if !self.open.swap(false, Ordering::SeqCst) {
            // Still handshaking, or already gone: nothing to negotiate.
            self.task.abort();
            return Ok(());
        }

        outbound.send(Outbound::Close).map_err(|_| {
            CallError::TransportClose("connection task stopped before the close frame was queued".into())
        })
    }

    fn is_open(&self) -> bool {
        self.outbound.is_some() && self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("close on drop: {}", e);
        }
    }
}

async fn run_connection(
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    events: EventSender,
) {
    // The session may already be gone; its queue closing is not our problem.
    let emit = |event: TransportEvent| {
        let _ = events.send(event.into());
    };

    info!("Connecting to voice server: {}", url);
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            error!("WebSocket connect failed: {}", e);
            emit(TransportEvent::Failed(e.to_string()));
            emit(TransportEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            });
            return;
        }
    };

    info!("✅ Connected to voice server");
    let (mut ws_sink, mut ws_stream) = ws.split();
    open.store(true, Ordering::SeqCst);
    emit(TransportEvent::Opened);

    let mut closing = false;
    let mut close_deadline = tokio::time::Instant::now();

    let (code, reason) = loop {
        tokio::select! {
            next = outbound.recv(), if !closing => match next {
                Some(Outbound::Frame(message)) => {
                    if let Err(e) = ws_sink.send(message).await {
                        error!("Failed to send WebSocket message: {}", e);
                        emit(TransportEvent::Failed(e.to_string()));
                        break (ABNORMAL_CLOSURE, String::new());
                    }
                }
                // Explicit close, or the channel handle was dropped.
                Some(Outbound::Close) | None => {
                    closing = true;
                    close_deadline = tokio::time::Instant::now() + CLOSE_GRACE;
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "call ended".to_string().into(),
                    };
                    if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
                        debug!("close frame not delivered: {}", e);
                        break (NORMAL_CLOSURE, "call ended".to_string());
                    }
                }
            },

            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    emit(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    emit(TransportEvent::Binary(data.len()));
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed by server");
                    break match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    emit(TransportEvent::Failed(e.to_string()));
                    break (ABNORMAL_CLOSURE, String::new());
                }
                None => break (ABNORMAL_CLOSURE, "connection dropped".to_string()),
            },

            _ = tokio::time::sleep_until(close_deadline), if closing => {
                debug!("server did not answer the close frame in time");
                break (NORMAL_CLOSURE, "call ended".to_string());
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    debug!(code, reason = %reason, "connection task finished");
    emit(TransportEvent::Closed { code, reason });
}
