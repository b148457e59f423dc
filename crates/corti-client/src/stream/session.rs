//! Configuration handshake layered on a [`ReconnectingSocket`].

use std::collections::VecDeque;

use crate::error::{Result, StreamError};
use crate::stream::protocol::{ClientMessage, ServerMessageKind, message_kind};
use crate::stream::socket::{NORMAL_CLOSURE, Payload, ReconnectingSocket, SocketEvent};

/// Handshake progress of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    /// Open, configuration not sent yet.
    Open,
    /// Configuration sent, waiting for the server's verdict.
    Configuring,
    Accepted,
    Denied,
    TimedOut,
    Closed,
}

/// A transcription or interaction stream.
///
/// Each time the underlying socket opens, the configuration given at connect
/// time (if any) is sent. `CONFIG_DENIED`, `CONFIG_TIMEOUT` and server `error`
/// messages turn into one [`SocketEvent::Error`] followed by closure; `ended`
/// closes the stream.
#[derive(Debug)]
pub struct StreamSession {
    socket: ReconnectingSocket,
    configuration: Option<serde_json::Value>,
    state: SessionState,
    /// Set once the session asked the socket to close.
    closing: bool,
    pending: VecDeque<SocketEvent>,
}

impl StreamSession {
    pub fn new(socket: ReconnectingSocket, configuration: Option<serde_json::Value>) -> Self {
        Self {
            socket,
            configuration,
            state: SessionState::Connecting,
            closing: false,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn socket(&self) -> &ReconnectingSocket {
        &self.socket
    }

    /// Receive the next event. `None` once the stream is closed for good.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        let event = self.socket.next_event().await;
        match &event {
            Some(event) => self.observe(event),
            None => self.state = SessionState::Closed,
        }
        event
    }

    fn observe(&mut self, event: &SocketEvent) {
        match event {
            SocketEvent::Open => {
                self.state = SessionState::Open;
                if let Some(configuration) = self.configuration.clone()
                    && let Err(e) = self.send_configuration(configuration)
                {
                    tracing::warn!(error = %e, "failed to send stream configuration");
                }
            }
            SocketEvent::Message(Payload::Text(text)) => self.observe_message(text),
            SocketEvent::Message(Payload::Binary(_)) => {}
            SocketEvent::Close { code, .. } => {
                self.state = if self.closing || *code == NORMAL_CLOSURE {
                    SessionState::Closed
                } else {
                    SessionState::Connecting
                };
            }
            SocketEvent::Error(StreamError::RetriesExhausted { .. }) => {
                self.state = SessionState::Closed;
            }
            SocketEvent::Error(_) => {}
        }
    }

    fn observe_message(&mut self, text: &str) {
        let Some(kind) = message_kind(text) else {
            return;
        };
        let awaiting_verdict = matches!(self.state, SessionState::Open | SessionState::Configuring);

        match kind {
            ServerMessageKind::ConfigAccepted if awaiting_verdict => {
                tracing::debug!("stream configuration accepted");
                self.state = SessionState::Accepted;
            }
            ServerMessageKind::ConfigDenied if awaiting_verdict => {
                self.state = SessionState::Denied;
                self.fail(StreamError::Denied(text.to_string()), "configuration denied");
            }
            ServerMessageKind::ConfigTimeout if awaiting_verdict => {
                self.state = SessionState::TimedOut;
                self.fail(StreamError::ConfigTimeout(text.to_string()), "configuration timeout");
            }
            ServerMessageKind::Error => {
                self.fail(StreamError::Server(text.to_string()), "server error");
            }
            ServerMessageKind::Ended => {
                tracing::info!("stream ended by server");
                self.close();
            }
            _ => {}
        }
    }

    /// Queue one error event and close. Later failures on a closing session
    /// are not reported again.
    fn fail(&mut self, error: StreamError, reason: &str) {
        if self.closing {
            return;
        }
        tracing::warn!(%error, "closing stream");
        self.pending.push_back(SocketEvent::Error(error));
        self.closing = true;
        self.socket.close(NORMAL_CLOSURE, reason);
    }

    /// Send a configuration message now.
    ///
    /// Needed only when no configuration was given at connect time; the
    /// server times out sessions that stay unconfigured.
    pub fn send_configuration(&mut self, configuration: serde_json::Value) -> Result<()> {
        self.socket.send_json(&ClientMessage::Config { configuration })?;
        self.state = SessionState::Configuring;
        Ok(())
    }

    /// Send a chunk of audio.
    pub fn send_audio(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.socket.send_binary(data)
    }

    /// Ask the server to emit results for the audio received so far.
    pub fn flush(&self) -> Result<()> {
        self.socket.send_json(&ClientMessage::Flush)
    }

    /// Tell the server no more audio follows. It answers with `ended`.
    pub fn end(&self) -> Result<()> {
        self.socket.send_json(&ClientMessage::End)
    }

    /// Send any JSON message.
    pub fn send_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.socket.send_json(value)
    }

    /// Close the stream. No reconnect follows.
    pub fn close(&mut self) {
        self.closing = true;
        self.socket.close(NORMAL_CLOSURE, "");
    }

    /// Wait until the underlying socket has shut down.
    pub async fn closed(&mut self) {
        self.socket.closed().await;
    }
}
