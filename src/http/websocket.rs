//! Per-connection WebSocket echo handling.
//!
//! # Responsibilities
//! - Run the receive loop of one upgraded session
//! - Decode the inbound trace context from the captured handshake headers
//! - Open, annotate and close one span per data message
//! - Echo each message back with the configured prefix
//!
//! # State Machine
//! ```text
//! AwaitingMessage ──data──▶ Processing ──echo sent──▶ AwaitingMessage
//!        │                       │
//!        │ close / error /       │ send failure
//!        │ shutdown              ▼
//!        └─────────────────▶  Closed
//! ```
//!
//! # Design Decisions
//! - Messages of one session are handled strictly one at a time
//! - Shutdown is only observed while awaiting a message, so an in-flight
//!   message always completes and its span is ended
//! - Ping/pong are answered by the transport and produce no span

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::http::HeaderMap;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;

use crate::config::TransportKind;
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{ConnectionGuard, ConnectionId};
use crate::observability::metrics;
use crate::telemetry::{SpanError, Telemetry};

/// Event recorded when a message enters processing.
pub const DATA_RECEIVED_EVENT: &str = "data_received";
/// Event recorded once the echo has been written.
pub const ECHO_SENT_EVENT: &str = "echo_sent";

/// Handshake data captured once, at upgrade time.
#[derive(Debug, Clone)]
pub struct HandshakeMetadata {
    pub connection_id: ConnectionId,
    pub peer: SocketAddr,
    pub transport: TransportKind,
    pub headers: HeaderMap,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingMessage,
    Processing,
    Closed,
}

/// Failures that close a session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("receive failed: {0}")]
    Receive(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error(transparent)]
    Span(#[from] SpanError),
}

/// Build the echo reply for a data message. Returns `None` for control frames.
pub fn echo_reply(prefix: &str, message: &Message) -> Option<Message> {
    match message {
        Message::Text(text) => Some(Message::Text(format!("{prefix}{}", text.as_str()).into())),
        Message::Binary(data) => {
            let mut reply = Vec::with_capacity(prefix.len() + data.len());
            reply.extend_from_slice(prefix.as_bytes());
            reply.extend_from_slice(data);
            Some(Message::Binary(reply.into()))
        }
        _ => None,
    }
}

/// Echo handler for one WebSocket session.
#[derive(Debug)]
pub struct ConnectionHandler {
    telemetry: Arc<Telemetry>,
    prefix: Arc<str>,
    metadata: HandshakeMetadata,
    state: SessionState,
    processed: u64,
}

impl ConnectionHandler {
    pub fn new(telemetry: Arc<Telemetry>, prefix: Arc<str>, metadata: HandshakeMetadata) -> Self {
        Self {
            telemetry,
            prefix,
            metadata,
            state: SessionState::AwaitingMessage,
            processed: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of messages echoed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Drive the session until the peer closes, an error occurs or shutdown
    /// is requested. The handler is always `Closed` afterwards.
    pub async fn run<S, R, SE, RE>(
        &mut self,
        mut sink: S,
        mut stream: R,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), ConnectionError>
    where
        S: Sink<Message, Error = SE> + Unpin,
        R: Stream<Item = Result<Message, RE>> + Unpin,
        SE: Display,
        RE: Display,
    {
        let result = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    self.close_for_shutdown(&mut sink).await;
                    break Ok(());
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %self.metadata.connection_id, ?frame, "Peer closed session");
                    break Ok(());
                }
                Some(Ok(message)) => {
                    if let Some(reply) = echo_reply(&self.prefix, &message) {
                        if let Err(e) = self.process(&mut sink, &message, reply).await {
                            break Err(e);
                        }
                    }
                }
                Some(Err(e)) => break Err(ConnectionError::Receive(e.to_string())),
                None => break Ok(()),
            }
        };

        self.transition(SessionState::Closed);
        result
    }

    async fn process<S, SE>(&mut self, sink: &mut S, message: &Message, reply: Message) -> Result<(), ConnectionError>
    where
        S: Sink<Message, Error = SE> + Unpin,
        SE: Display,
    {
        self.transition(SessionState::Processing);
        let start = Instant::now();
        let transport = self.metadata.transport.as_str();

        let parent = self.telemetry.extract(&self.metadata.headers);
        let mut span = self.telemetry.start_message_span(parent.as_ref());
        span.set_tag("request.websocket", true)?;
        span.set_tag("transport", transport)?;
        span.set_tag("connection.id", self.metadata.connection_id.to_string())?;
        span.set_tag("peer.address", self.metadata.peer.to_string())?;
        let (kind, size) = match message {
            Message::Text(text) => ("text", text.as_str().len()),
            Message::Binary(data) => ("binary", data.len()),
            _ => ("control", 0),
        };
        span.set_tag("message.kind", kind)?;
        span.set_tag("message.bytes", size)?;
        span.add_event(DATA_RECEIVED_EVENT)?;

        tracing::debug!(
            connection_id = %self.metadata.connection_id,
            transport = transport,
            kind = kind,
            bytes = size,
            parent_trace_id = ?parent.map(|p| p.trace_id.to_string()),
            "Received from client"
        );

        match sink.send(reply).await {
            Ok(()) => {
                span.add_event(ECHO_SENT_EVENT)?;
                span.end()?;
                self.processed += 1;
                metrics::record_message(transport, "ok", start);
                self.transition(SessionState::AwaitingMessage);
                Ok(())
            }
            Err(e) => {
                let error = e.to_string();
                span.set_error(format!("echo send failed: {error}"))?;
                span.end()?;
                metrics::record_message(transport, "error", start);
                self.transition(SessionState::Closed);
                Err(ConnectionError::Send(error))
            }
        }
    }

    async fn close_for_shutdown<S, SE>(&mut self, sink: &mut S)
    where
        S: Sink<Message, Error = SE> + Unpin,
        SE: Display,
    {
        let frame = CloseFrame {
            code: close_code::AWAY,
            reason: "gateway shutting down".into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(connection_id = %self.metadata.connection_id, error = %e, "Close frame not delivered");
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(
            connection_id = %self.metadata.connection_id,
            from = ?self.state,
            to = ?next,
            "Session state change"
        );
        self.state = next;
    }
}

/// Entry point for an upgraded socket.
pub async fn handle_session(
    socket: WebSocket,
    telemetry: Arc<Telemetry>,
    prefix: Arc<str>,
    metadata: HandshakeMetadata,
    shutdown: ShutdownSignal,
    _connection: Arc<ConnectionGuard>,
) {
    let connection_id = metadata.connection_id;
    let transport = metadata.transport;
    tracing::info!(connection_id = %connection_id, transport = %transport, peer = %metadata.peer, "WebSocket session opened");

    let (sink, stream) = socket.split();
    let mut handler = ConnectionHandler::new(telemetry, prefix, metadata);
    match handler.run(sink, stream, shutdown).await {
        Ok(()) => tracing::info!(
            connection_id = %connection_id,
            messages = handler.processed(),
            "WebSocket session closed"
        ),
        Err(e) => tracing::warn!(
            connection_id = %connection_id,
            messages = handler.processed(),
            error = %e,
            "WebSocket session closed with error"
        ),
    }
}
