// src/network/channel.rs
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use super::error::{ConnectError, ProtocolError};
use super::protocol::{channel_url, decode_inbound, InboundMessage};
use crate::capture::{DropReason, FrameSink, SendOutcome};
use crate::core::types::SessionId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Everything the channel reports upward, in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Message(Result<InboundMessage, ProtocolError>),
    Closed { code: Option<u16>, reason: String },
    Failed(String),
}

struct Link {
    session_id: SessionId,
    outbound: mpsc::Sender<Vec<u8>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Sole owner of the duplex connection for one session at a time.
pub struct SessionChannel {
    ws_base: String,
    connect_timeout: Duration,
    close_timeout: Duration,
    state: Arc<watch::Sender<ChannelState>>,
    link: Mutex<Option<Link>>,
    in_flight: Arc<AtomicBool>,
}

impl SessionChannel {
    pub fn new(ws_base: impl Into<String>, connect_timeout: Duration, close_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            ws_base: ws_base.into(),
            connect_timeout,
            close_timeout,
            state: Arc::new(state),
            link: Mutex::new(None),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Connects to `{ws_base}/ws/attendance/{session_id}`. On failure the
    /// channel is left `Closed` with no tasks running.
    pub async fn open(
        &self,
        session_id: SessionId,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<(), ConnectError> {
        let current = self.state();
        if matches!(current, ChannelState::Connecting | ChannelState::Open | ChannelState::Closing) {
            return Err(ConnectError::AlreadyOpen(format!("{:?}", current)));
        }
        self.state.send_replace(ChannelState::Connecting);

        let url = channel_url(&self.ws_base, session_id);
        info!(%url, "Connecting session channel");

        let stream = match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.state.send_replace(ChannelState::Closed);
                error!(%url, error = %e, "Session channel connection failed");
                return Err(ConnectError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                self.state.send_replace(ChannelState::Closed);
                error!(%url, "Session channel connection timed out");
                return Err(ConnectError::Timeout);
            }
        };

        if self.state() != ChannelState::Connecting {
            // close() ran during the handshake
            let mut stream = stream;
            let _ = stream.close(None).await;
            self.state.send_replace(ChannelState::Closed);
            return Err(ConnectError::ConnectionFailed("closed during handshake".into()));
        }

        let (sink, stream) = stream.split();
        let (outbound, frames) = mpsc::channel(1);
        self.in_flight.store(false, Ordering::SeqCst);

        // Opened must precede any message event.
        let _ = events.send(ChannelEvent::Opened);
        let writer = tokio::spawn(write_loop(sink, frames, self.in_flight.clone()));
        let reader = tokio::spawn(read_loop(stream, events, self.state.clone()));

        *self.link.lock() = Some(Link {
            session_id,
            outbound,
            writer,
            reader,
        });
        self.state.send_if_modified(|state| {
            if *state == ChannelState::Connecting {
                *state = ChannelState::Open;
                true
            } else {
                false
            }
        });
        info!(session_id = %session_id, "Session channel open");
        Ok(())
    }

    /// Idempotent graceful close: sends close code 1000 if still writable,
    /// then waits (bounded) for both directions to wind down.
    pub async fn close(&self) {
        let link = self.link.lock().take();
        let Some(link) = link else {
            if self.state() != ChannelState::Idle {
                self.state.send_replace(ChannelState::Closed);
            }
            return;
        };

        self.state.send_replace(ChannelState::Closing);
        let Link {
            session_id,
            outbound,
            mut writer,
            mut reader,
        } = link;

        // Dropping the sender makes the writer emit the close frame.
        drop(outbound);
        if tokio::time::timeout(self.close_timeout, &mut writer).await.is_err() {
            warn!(session_id = %session_id, "Channel writer did not finish in time");
            writer.abort();
        }
        if tokio::time::timeout(self.close_timeout, &mut reader).await.is_err() {
            debug!(session_id = %session_id, "No close acknowledgement from peer");
            reader.abort();
        }

        self.in_flight.store(false, Ordering::SeqCst);
        self.state.send_replace(ChannelState::Closed);
        info!(session_id = %session_id, "Session channel closed");
    }

    /// Synchronous teardown for drop paths; no close frame is sent.
    pub fn abort(&self) {
        if let Some(link) = self.link.lock().take() {
            link.writer.abort();
            link.reader.abort();
            self.state.send_replace(ChannelState::Closed);
        }
    }
}

impl FrameSink for SessionChannel {
    fn is_ready(&self) -> bool {
        self.state() == ChannelState::Open && !self.in_flight.load(Ordering::SeqCst)
    }

    fn send_frame(&self, frame: Vec<u8>) -> SendOutcome {
        if self.state() != ChannelState::Open {
            return SendOutcome::Dropped(DropReason::NotOpen);
        }
        let link = self.link.lock();
        let Some(link) = link.as_ref() else {
            return SendOutcome::Dropped(DropReason::NotOpen);
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SendOutcome::Dropped(DropReason::Busy);
        }

        match link.outbound.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                SendOutcome::Dropped(DropReason::Busy)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                SendOutcome::Dropped(DropReason::Transport)
            }
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    in_flight: Arc<AtomicBool>,
) {
    while let Some(frame) = frames.recv().await {
        let len = frame.len();
        match sink.send(Message::Binary(frame)).await {
            Ok(()) => trace!(bytes = len, "Frame transmitted"),
            Err(e) => debug!(error = %e, "Frame transmit failed"),
        }
        in_flight.store(false, Ordering::SeqCst);
    }

    let close = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "session stopped".into(),
    }));
    if let Err(e) = sink.send(close).await {
        debug!(error = %e, "Close frame not sent, channel already gone");
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<watch::Sender<ChannelState>>,
) {
    let mut closed = ChannelEvent::Closed {
        code: None,
        reason: "stream ended".into(),
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => {
                let _ = events.send(ChannelEvent::Message(decode_inbound(&text, Utc::now())));
            }
            Ok(Message::Close(frame)) => {
                closed = match frame {
                    Some(frame) => ChannelEvent::Closed {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.into_owned(),
                    },
                    None => ChannelEvent::Closed {
                        code: None,
                        reason: String::new(),
                    },
                };
                break;
            }
            Ok(Message::Binary(data)) => debug!(bytes = data.len(), "Ignoring binary message"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Session channel read failed");
                let _ = events.send(ChannelEvent::Failed(e.to_string()));
                break;
            }
        }
    }

    state.send_if_modified(|current| {
        if *current == ChannelState::Open {
            *current = ChannelState::Closed;
            true
        } else {
            false
        }
    });
    let _ = events.send(closed);
}
