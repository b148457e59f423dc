//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use corti_auth::Environment;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use corti_client::{ReconnectingSocket, SocketConfig, SocketEvent, StreamSession};

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Upper bound on waiting for any single event.
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket settings that keep reconnect tests fast.
pub fn fast_socket_config(max_retries: u32) -> SocketConfig {
    SocketConfig {
        max_retries,
        min_reconnect_delay: Duration::from_millis(10),
        max_reconnect_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Build an unsigned token with the given claims object.
pub fn fake_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// Environment whose every endpoint points at one local server.
pub fn local_environment(http_base: &str, ws_base: &str) -> Environment {
    Environment {
        base: format!("{http_base}/v2"),
        wss: ws_base.to_string(),
        login: format!("{http_base}/realms"),
    }
}

/// What the server saw during one WebSocket handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Path and query of the request.
    pub uri: String,
    pub protocols: Option<String>,
}

/// A local WebSocket server running one handler per accepted connection.
pub struct WsServer {
    pub addr: SocketAddr,
    pub handshakes: Arc<Mutex<Vec<Handshake>>>,
    _handle: JoinHandle<()>,
}

impl WsServer {
    /// Start a server. The handler receives the 0-based connection index.
    ///
    /// The first offered subprotocol, if any, is echoed back.
    pub async fn start<F, Fut>(handler: F) -> Result<Self>
    where
        F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handshakes = Arc::new(Mutex::new(Vec::new()));

        let recorded = handshakes.clone();
        let handle = tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let callback = move |request: &Request,
                                     mut response: Response|
                      -> std::result::Result<Response, ErrorResponse> {
                    let protocols = request
                        .headers()
                        .get(SEC_WEBSOCKET_PROTOCOL)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    if let Some(first) = protocols
                        .as_deref()
                        .and_then(|list| list.split(',').next())
                        && let Ok(value) = HeaderValue::from_str(first.trim())
                    {
                        response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                    }
                    recorded.lock().push(Handshake {
                        uri: request.uri().to_string(),
                        protocols,
                    });
                    Ok(response)
                };

                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };
                tokio::spawn(handler(index, ws));
                index += 1;
            }
        });

        Ok(Self {
            addr,
            handshakes,
            _handle: handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().clone()
    }
}

/// A listener that accepts TCP connections and drops them before the
/// WebSocket handshake.
pub struct DroppingListener {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
    _handle: JoinHandle<()>,
}

impl DroppingListener {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        Ok(Self {
            addr,
            accepted,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/transcribe", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server-side helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Next text frame from the client, skipping everything else.
pub async fn next_text(ws: &mut ServerSocket) -> Option<String> {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            return Some(text.as_str().to_owned());
        }
    }
    None
}

pub async fn send_json(ws: &mut ServerSocket, value: serde_json::Value) {
    let _ = ws.send(Message::Text(value.to_string().into())).await;
}

/// Close with 1000 and wait for the client to finish the close handshake.
pub async fn close_normally(mut ws: ServerSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.into(),
    };
    let _ = ws.close(Some(frame)).await;
    drain(ws).await;
}

/// Read until the client goes away.
pub async fn drain(mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Client-side helpers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn next_socket_event(socket: &mut ReconnectingSocket) -> Option<SocketEvent> {
    timeout(EVENT_TIMEOUT, socket.next_event())
        .await
        .expect("timed out waiting for socket event")
}

/// Collect socket events until the socket closes for good.
pub async fn collect_socket_events(socket: &mut ReconnectingSocket) -> Vec<SocketEvent> {
    let mut events = Vec::new();
    while let Some(event) = next_socket_event(socket).await {
        events.push(event);
    }
    events
}

pub async fn next_session_event(session: &mut StreamSession) -> Option<SocketEvent> {
    timeout(EVENT_TIMEOUT, session.next_event())
        .await
        .expect("timed out waiting for session event")
}

/// Collect session events until the stream closes for good.
pub async fn collect_session_events(session: &mut StreamSession) -> Vec<SocketEvent> {
    let mut events = Vec::new();
    while let Some(event) = next_session_event(session).await {
        events.push(event);
    }
    events
}
