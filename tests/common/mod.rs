//! Shared test harness: an in-process mock fleet backend
//!
//! Serves the `/ws/machines/{mode}` subscription endpoints and plays back a
//! scripted sequence of frames per accepted connection, recording the query
//! parameters each connection presented.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// One scripted server-side step
pub enum ServerAction {
    /// Send a text frame
    Send(String),
    /// Send a close frame and end the connection
    Close { code: u16, reason: &'static str },
    /// Keep the connection open until the client goes away
    Hold,
}

/// Connection observed by the mock server
#[derive(Debug, Clone)]
pub struct SeenConnection {
    pub mode: String,
    pub access_token: String,
    pub machine_uuid: Option<String>,
}

#[derive(Clone)]
struct ServerState {
    scripts: Arc<Mutex<VecDeque<Vec<ServerAction>>>>,
    connections: Arc<Mutex<Vec<SeenConnection>>>,
}

pub struct MockFleetServer {
    addr: SocketAddr,
    connections: Arc<Mutex<Vec<SeenConnection>>>,
}

impl MockFleetServer {
    /// Start the server with one script per expected connection, in order.
    /// Connections beyond the scripts are accepted and held open.
    pub async fn start(scripts: Vec<Vec<ServerAction>>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = ServerState {
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
            connections: Arc::new(Mutex::new(Vec::new())),
        };
        let connections = state.connections.clone();

        let app = Router::new()
            .route("/ws/machines/:mode", get(ws_handler))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, connections }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connections(&self) -> Vec<SeenConnection> {
        self.connections.lock().unwrap().clone()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(mode): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<ServerState>,
) -> Response {
    state.connections.lock().unwrap().push(SeenConnection {
        mode,
        access_token: params.get("access_token").cloned().unwrap_or_default(),
        machine_uuid: params.get("machine_uuid").cloned(),
    });

    let script = state
        .scripts
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| vec![ServerAction::Hold]);

    ws.on_upgrade(move |socket| run_script(socket, script))
}

async fn run_script(mut socket: WebSocket, script: Vec<ServerAction>) {
    for action in script {
        match action {
            ServerAction::Send(text) => {
                if socket.send(Message::Text(text)).await.is_err() {
                    return;
                }
            },
            ServerAction::Close { code, reason } => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                return;
            },
            ServerAction::Hold => {
                while socket.recv().await.is_some() {}
                return;
            },
        }
    }

    // Script exhausted without Close/Hold: keep the connection open
    while socket.recv().await.is_some() {}
}

/// Build a stream message envelope as the backend would send it.
pub fn envelope(message_type: &str, body: serde_json::Value) -> String {
    serde_json::json!({
        "id": uuid_like(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "type": message_type,
        "body": body,
    })
    .to_string()
}

fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("msg-{:08x}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
