//! Reload endpoint.
//!
//! Serves only the live-reload socket and its client script; the built site
//! itself is opened from disk.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;

use crate::websocket::{reload_client_script, ReloadHub, RELOAD_TOKEN};

/// WebSocket route.
pub const RELOAD_PATH: &str = "/__reload";

/// Client script route.
pub const SCRIPT_PATH: &str = "/__reload.js";

/// Errors that can occur with the reload server or the watcher.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {message}")]
    BindError { addr: String, message: String },

    #[error("Server error: {0}")]
    ServeError(String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error("Failed to fingerprint {path}: {message}")]
    Fingerprint { path: PathBuf, message: String },
}

struct ServerState {
    hub: ReloadHub,
    script: String,
}

/// A bound reload server.
pub struct ReloadServer {
    listener: TcpListener,
    addr: SocketAddr,
    hub: ReloadHub,
}

impl ReloadServer {
    /// Bind to `host:port`. Port 0 picks a free port.
    pub async fn bind(host: &str, port: u16, hub: ReloadHub) -> Result<Self, ServerError> {
        let bind_error = |e: std::io::Error| ServerError::BindError {
            addr: format!("{}:{}", host, port),
            message: e.to_string(),
        };

        let listener = TcpListener::bind((host, port)).await.map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        Ok(Self {
            listener,
            addr,
            hub,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL of the client script, for injection into pages.
    pub fn script_url(&self) -> String {
        format!("http://{}{}", self.addr, SCRIPT_PATH)
    }

    pub fn socket_url(&self) -> String {
        format!("ws://{}{}", self.addr, RELOAD_PATH)
    }

    /// Serve until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        let state = Arc::new(ServerState {
            script: reload_client_script(&self.socket_url()),
            hub: self.hub,
        });

        let app = Router::new()
            .route(RELOAD_PATH, get(ws_handler))
            .route(SCRIPT_PATH, get(script_handler))
            .with_state(state);

        tracing::info!("Live reload listening on ws://{}{}", self.addr, RELOAD_PATH);

        axum::serve(self.listener, app)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let rx = state.hub.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, rx))
}

/// Forward reload signals until either side goes away.
async fn handle_ws(mut socket: WebSocket, mut rx: tokio::sync::broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    if socket.send(Message::Text(RELOAD_TOKEN.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Reload client disconnected");
}

async fn script_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        state.script.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_client_script() {
        let server = ReloadServer::bind("127.0.0.1", 0, ReloadHub::new())
            .await
            .unwrap();
        let addr = server.local_addr();
        assert_eq!(server.script_url(), format!("http://{}/__reload.js", addr));

        let handle = tokio::spawn(server.run());
        let response = get(addr, SCRIPT_PATH).await;
        handle.abort();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("application/javascript"));
        assert!(response.contains(&format!("ws://{}/__reload", addr)));
    }

    #[tokio::test]
    async fn serves_nothing_else() {
        let server = ReloadServer::bind("127.0.0.1", 0, ReloadHub::new())
            .await
            .unwrap();
        let addr = server.local_addr();

        let handle = tokio::spawn(server.run());
        let response = get(addr, "/index.html").await;
        handle.abort();

        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn bind_conflict_is_an_error() {
        let first = ReloadServer::bind("127.0.0.1", 0, ReloadHub::new())
            .await
            .unwrap();
        let port = first.local_addr().port();

        let second = ReloadServer::bind("127.0.0.1", port, ReloadHub::new()).await;

        assert!(matches!(second, Err(ServerError::BindError { .. })));
    }
}
