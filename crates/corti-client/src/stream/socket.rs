//! WebSocket wrapper that reconnects after abnormal closure.
//!
//! A background task owns the transport. Events reach the caller through one
//! receiver held by [`ReconnectingSocket`], so the caller's listener survives
//! every reconnect.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::error::{Error, Result, StreamError};

/// Default bound on consecutive reconnect attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 30;

/// Close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

const NO_STATUS: u16 = 1005;
const ABNORMAL_CLOSURE: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnection behavior.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Log every state transition and event.
    pub debug: bool,
    /// Reconnect attempts allowed after a connection is lost.
    pub max_retries: u32,
    /// Delay before the first reconnect attempt; doubles per attempt.
    pub min_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Limit on a single connection attempt, handshake included.
    pub connect_timeout: Duration,
    /// How long a connection must stay open before the retry counter resets.
    pub min_uptime: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_retries: DEFAULT_MAX_RETRIES,
            min_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            min_uptime: Duration::from_secs(5),
        }
    }
}

impl SocketConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.min_reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }
}

/// Where to connect. Reused unchanged for every reconnect.
#[derive(Clone, Default)]
pub struct SocketTarget {
    pub url: String,
    /// Values for `Sec-WebSocket-Protocol`, in order.
    pub protocols: Vec<String>,
    pub query: Vec<(String, String)>,
    /// Extra handshake headers.
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for SocketTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTarget")
            .field("url", &self.url)
            .field("protocols", &self.protocols.len())
            .field("query", &self.query.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("headers", &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

impl SocketTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// URL with the query parameters appended.
    pub fn full_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }

    /// Build the handshake request.
    pub fn request(&self) -> Result<Request> {
        let mut request = self.full_url()?.as_str().into_client_request()?;
        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name {name}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid value for header {name}: {e}")))?;
            headers.insert(header_name, header_value);
        }
        if !self.protocols.is_empty() {
            let protocols = HeaderValue::from_str(&self.protocols.join(", "))
                .map_err(|e| Error::Config(format!("Invalid subprotocol list: {e}")))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, protocols);
        }
        Ok(request)
    }
}

/// Application data received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }
}

/// Events observed by the socket's single listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A connection (first or reconnected) is open.
    Open,
    Message(Payload),
    /// A connection closed. Abnormal codes are followed by a reconnect.
    Close { code: u16, reason: String },
    Error(StreamError),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    Open,
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    Closed,
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting ({})", attempt),
            Self::Closed => write!(f, "closed"),
        }
    }
}

enum Command {
    Send(Message),
    Close { code: u16, reason: String },
}

/// A WebSocket that reconnects on abnormal closure, up to `max_retries` times
/// in a row. Connections shorter than `min_uptime` do not reset the count.
pub struct ReconnectingSocket {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    state: watch::Receiver<SocketState>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ReconnectingSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingSocket")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ReconnectingSocket {
    /// Start connecting in the background.
    ///
    /// Fails only when the target cannot form a handshake request; connection
    /// failures are retried and eventually reported as events.
    pub fn connect(target: SocketTarget, config: SocketConfig) -> Result<Self> {
        target.request()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SocketState::Idle);

        let task = tokio::spawn(connection_loop(
            target, config, command_rx, event_tx, state_tx,
        ));

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            state: state_rx,
            task: Some(task),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    /// Receive the next event. `None` once the socket is closed for good.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }

    /// Send a text frame on the open connection.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let text: String = text.into();
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        let data: Vec<u8> = data.into();
        self.send(Message::Binary(data.into()))
    }

    /// Serialize `value` as JSON and send it as a text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.send_text(serde_json::to_string(value)?)
    }

    fn send(&self, message: Message) -> Result<()> {
        match self.state() {
            SocketState::Open => {}
            SocketState::Closed => return Err(Error::Closed),
            _ => return Err(Error::NotConnected),
        }
        self.commands
            .send(Command::Send(message))
            .map_err(|_| Error::Closed)
    }

    /// Close for good. No reconnect follows.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let command = Command::Close {
            code,
            reason: reason.into(),
        };
        if self.commands.send(command).is_err() {
            tracing::debug!("close requested on finished socket");
        }
    }

    /// Wait until the background task has stopped.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "socket task failed");
        }
    }
}

fn set_state(state: &watch::Sender<SocketState>, config: &SocketConfig, next: SocketState) {
    if config.debug {
        tracing::debug!(state = %next, "socket state");
    }
    state.send_replace(next);
}

/// Connection loop that handles reconnection with exponential backoff.
async fn connection_loop(
    target: SocketTarget,
    config: SocketConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SocketEvent>,
    state: watch::Sender<SocketState>,
) {
    let mut retries = 0u32;

    loop {
        set_state(&state, &config, SocketState::Connecting);
        tracing::info!(url = %target.url, "Connecting");

        let Some(result) = unless_closed(connect(&target, &config), &mut commands, &events).await
        else {
            set_state(&state, &config, SocketState::Closed);
            return;
        };

        match result {
            Ok(ws_stream) => {
                set_state(&state, &config, SocketState::Open);
                tracing::info!("Connected");
                if events.send(SocketEvent::Open).is_err() {
                    set_state(&state, &config, SocketState::Closed);
                    return;
                }

                match handle_connection(ws_stream, &mut commands, &events, &config, &mut retries)
                    .await
                {
                    ConnectionEnd::Finished => {
                        set_state(&state, &config, SocketState::Closed);
                        return;
                    }
                    ConnectionEnd::Lost { code, reason } => {
                        tracing::warn!(code, %reason, "Connection lost, will reconnect");
                        let _ = events.send(SocketEvent::Close { code, reason });
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connection failed");
            }
        }

        if retries >= config.max_retries {
            tracing::error!(attempts = retries, "Reconnect attempts exhausted");
            let _ = events.send(SocketEvent::Error(StreamError::RetriesExhausted {
                attempts: retries,
            }));
            set_state(&state, &config, SocketState::Closed);
            return;
        }

        retries += 1;
        let backoff = config.backoff(retries);
        set_state(&state, &config, SocketState::Reconnecting { attempt: retries });
        tracing::debug!("Reconnecting in {:?}", backoff);
        if unless_closed(tokio::time::sleep(backoff), &mut commands, &events)
            .await
            .is_none()
        {
            set_state(&state, &config, SocketState::Closed);
            return;
        }
    }
}

/// Drive `future` while no connection is open.
///
/// Returns `None` when the caller closes the socket in the meantime.
async fn unless_closed<F: Future>(
    future: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<SocketEvent>,
) -> Option<F::Output> {
    tokio::pin!(future);
    loop {
        tokio::select! {
            output = &mut future => return Some(output),
            command = commands.recv() => match command {
                Some(Command::Send(_)) => {
                    tracing::debug!("Dropping message sent while disconnected");
                }
                Some(Command::Close { code, reason }) => {
                    let _ = events.send(SocketEvent::Close { code, reason });
                    return None;
                }
                None => return None,
            },
        }
    }
}

async fn connect(
    target: &SocketTarget,
    config: &SocketConfig,
) -> std::result::Result<WsStream, StreamError> {
    let request = target
        .request()
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    let (ws_stream, _response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| StreamError::Transport("connection timeout".to_string()))?
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    Ok(ws_stream)
}

enum ConnectionEnd {
    /// Closed normally or by the caller.
    Finished,
    /// Closed abnormally; reconnect.
    Lost { code: u16, reason: String },
}

/// Handle an active WebSocket connection.
///
/// `retries` resets once the connection has been up for `min_uptime`.
async fn handle_connection(
    ws_stream: WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<SocketEvent>,
    config: &SocketConfig,
    retries: &mut u32,
) -> ConnectionEnd {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let uptime = tokio::time::sleep(config.min_uptime);
    tokio::pin!(uptime);
    let mut stable = false;

    loop {
        tokio::select! {
            _ = &mut uptime, if !stable => {
                stable = true;
                if *retries > 0 {
                    tracing::debug!(retries = *retries, "Connection stable, retry counter reset");
                }
                *retries = 0;
            }

            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(e) = ws_sink.send(message).await {
                        return ConnectionEnd::Lost {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        };
                    }
                }
                Some(Command::Close { code, reason }) => {
                    tracing::info!(code, %reason, "Closing connection");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "Close frame not delivered");
                    }
                    let _ = events.send(SocketEvent::Close { code, reason });
                    return ConnectionEnd::Finished;
                }
                None => {
                    let _ = ws_sink.close().await;
                    return ConnectionEnd::Finished;
                }
            },

            message = ws_stream.next() => {
                let payload = match message {
                    Some(Ok(Message::Text(text))) => Payload::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => Payload::Binary(data.to_vec()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                            .unwrap_or((NO_STATUS, String::new()));
                        if code == NORMAL_CLOSURE {
                            tracing::info!(%reason, "Server closed connection");
                            let _ = events.send(SocketEvent::Close { code, reason });
                            return ConnectionEnd::Finished;
                        }
                        return ConnectionEnd::Lost { code, reason };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return ConnectionEnd::Lost {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        return ConnectionEnd::Lost {
                            code: ABNORMAL_CLOSURE,
                            reason: "connection dropped".to_string(),
                        };
                    }
                };

                if config.debug {
                    tracing::debug!(?payload, "socket message");
                }
                if events.send(SocketEvent::Message(payload)).is_err() {
                    // Listener dropped
                    let _ = ws_sink.close().await;
                    return ConnectionEnd::Finished;
                }
            }
        }
    }
}
