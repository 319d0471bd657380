//! [`CockpitServer`] – HTTP + WebSocket front door for operators.
//!
//! Listens on `0.0.0.0:5000` (configurable via [`CockpitServer::with_port`]).
//!
//! * WebSocket upgrades on `/Delivery/ws` or `/Order/ws` → live snapshot
//!   stream from the [`BroadcastHub`].
//! * Everything else is parsed as a single HTTP/1.1 request, routed, and
//!   answered with `Connection: close`.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | `GET` | `/`, `/Delivery`, `/Order` | embedded operator page |
//! | `POST` | `/register_order` | `{"result":"order registered","order_id":…}` |
//! | `POST` | `/start_delivery` | `{"result":"delivery started"}` |
//!
//! Failures are `{"error": "..."}` with the status from
//! [`DeliveryError::http_status`].

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use courier_middleware::BroadcastHub;
use courier_runtime::DeliveryCoordinator;
use courier_types::DeliveryError;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5000;

/// The compiled-in operator page.
const COCKPIT_HTML: &str = include_str!("cockpit.html");

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;

const WS_PATHS: [&str; 2] = ["/Delivery/ws", "/Order/ws"];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum CockpitError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed request: {0}")]
    BadRequest(String),
    #[error("Request body too large")]
    TooLarge,
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Everything a connection handler needs.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DeliveryCoordinator>,
    pub hub: BroadcastHub,
}

pub struct CockpitServer {
    state: AppState,
    host: IpAddr,
    port: u16,
}

impl CockpitServer {
    /// Serve `coordinator` and `hub` on the [`DEFAULT_PORT`], all interfaces.
    pub fn new(coordinator: Arc<DeliveryCoordinator>, hub: BroadcastHub) -> Self {
        Self {
            state: AppState { coordinator, hub },
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind and serve until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// [`CockpitError::Bind`] if the listener cannot be opened.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), CockpitError> {
        let addr = SocketAddr::new(self.host, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| CockpitError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), CockpitError> {
        let local = listener.local_addr()?;
        info!(addr = %local, "Cockpit listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, state, shutdown).await {
                                debug!(%peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
        info!("Cockpit stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), CockpitError> {
    // `peek` leaves the bytes in place for tungstenite's handshake.
    let mut buf = [0u8; 1024];
    let n = stream.peek(&mut buf).await?;
    let preview = String::from_utf8_lossy(&buf[..n]);
    let path = preview
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(strip_query)
        .unwrap_or("/")
        .to_string();
    let is_upgrade = preview.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    if is_upgrade && WS_PATHS.contains(&path.as_str()) {
        return handle_ws(stream, peer, state, shutdown).await;
    }

    let response = match read_request(&mut stream).await {
        Ok(request) => {
            debug!(%peer, method = %request.method, path = %request.path, "HTTP request");
            route(&request, &state).await
        }
        Err(CockpitError::TooLarge) => HttpResponse::error(413, "request body too large"),
        Err(CockpitError::BadRequest(msg)) => HttpResponse::error(400, &msg),
        Err(e) => return Err(e),
    };
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// HTTP parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

fn strip_query(target: &str) -> &str {
    target.split(['?', '#']).next().unwrap_or(target)
}

/// Read one request: headers up to the blank line, then `Content-Length`
/// bytes of body.
pub(crate) async fn read_request<R>(reader: &mut R) -> Result<HttpRequest, CockpitError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(CockpitError::BadRequest("header section too large".to_string()));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(CockpitError::BadRequest("connection closed mid-request".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| CockpitError::BadRequest("headers are not UTF-8".to_string()))?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(CockpitError::BadRequest(format!("bad request line {request_line:?}")));
    };
    let method = method.to_ascii_uppercase();
    let path = strip_query(target).to_string();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| CockpitError::BadRequest("bad Content-Length".to_string()))?;
            }
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(CockpitError::TooLarge);
    }

    let mut body = buf.split_off(header_end);
    while body.len() < content_length {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(CockpitError::BadRequest("body shorter than Content-Length".to_string()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method,
        path,
        body,
    })
}

// ---------------------------------------------------------------------------
// HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
        }
    }

    fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    fn from_delivery_error(e: &DeliveryError) -> Self {
        Self::error(e.http_status(), &e.to_string())
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            self.status,
            reason(self.status),
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        502 => "Bad Gateway",
        _ => "Error",
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

pub(crate) async fn route(request: &HttpRequest, state: &AppState) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/" | "/Delivery" | "/Order") => HttpResponse::html(COCKPIT_HTML),
        ("POST", "/register_order") => register_order(&request.body, &state.coordinator).await,
        ("POST", "/start_delivery") => start_delivery(&request.body, &state.coordinator).await,
        (_, "/register_order" | "/start_delivery") => HttpResponse::error(405, "method not allowed"),
        _ => HttpResponse::error(404, "not found"),
    }
}

fn parse_body(body: &[u8]) -> Result<serde_json::Map<String, Value>, HttpResponse> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(HttpResponse::error(400, "body must be a JSON object")),
        Err(e) => Err(HttpResponse::error(400, &format!("invalid JSON: {e}"))),
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts `{"items": {...}, "destination": "P2"}` and the flat form
/// `{"omurice": 2, "point": {"dest_id": "P2"}}`.
fn parse_order(
    mut body: serde_json::Map<String, Value>,
) -> Result<(BTreeMap<String, Value>, String), String> {
    let destination = body
        .get("destination")
        .and_then(id_string)
        .or_else(|| {
            body.get("point")
                .and_then(|p| p.get("dest_id"))
                .and_then(id_string)
        })
        .ok_or_else(|| "destination is required".to_string())?;

    let items = match body.remove("items") {
        Some(Value::Object(items)) => items.into_iter().collect(),
        Some(_) => return Err("items must be an object".to_string()),
        None => body
            .into_iter()
            .filter(|(k, _)| k != "point" && k != "destination")
            .collect(),
    };
    Ok((items, destination))
}

async fn register_order(body: &[u8], coordinator: &DeliveryCoordinator) -> HttpResponse {
    let body = match parse_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let (items, destination) = match parse_order(body) {
        Ok(parsed) => parsed,
        Err(msg) => return HttpResponse::error(400, &msg),
    };
    match coordinator.register_order(&items, &destination).await {
        Ok(order_id) => HttpResponse::json(
            200,
            json!({ "result": "order registered", "order_id": order_id }),
        ),
        Err(e) => HttpResponse::from_delivery_error(&e),
    }
}

async fn start_delivery(body: &[u8], coordinator: &DeliveryCoordinator) -> HttpResponse {
    let body = match parse_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let Some(order_id) = body.get("order_id").and_then(id_string) else {
        return HttpResponse::error(400, "order_id is required");
    };
    match coordinator.begin_delivery(&order_id).await {
        Ok(()) => HttpResponse::json(200, json!({ "result": "delivery started" })),
        Err(e) => {
            info!(order_id = %order_id, error = %e, "Delivery request refused");
            HttpResponse::from_delivery_error(&e)
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket: snapshot stream
// ---------------------------------------------------------------------------

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), CockpitError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| CockpitError::Handshake(e.to_string()))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut subscription = state.hub.subscribe();
    info!(%peer, subscriber = subscription.id, "Observer connected");

    // Paint the page immediately instead of waiting for the next tick.
    let first = serde_json::to_string(&state.coordinator.snapshot().await).unwrap_or_default();
    let mut open = first.is_empty() || ws_tx.send(Message::Text(first.into())).await.is_ok();

    while open {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                open = false;
            }
            frame = subscription.receiver.recv() => match frame {
                Some(frame) => {
                    open = ws_tx.send(Message::Text(frame.to_string().into())).await.is_ok();
                }
                None => open = false,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => open = false,
                // Observers are read-only; inbound frames are ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unsubscribe(subscription.id);
    info!(%peer, subscriber = subscription.id, "Observer disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
