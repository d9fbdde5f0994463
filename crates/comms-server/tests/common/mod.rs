#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use comms_common::{ClientEvent, ServerEvent};
use comms_server::config::{AppState, RelayConfig, RelayTopology};
use comms_server::store::SqliteMessageStore;

/// Bind the relay on an ephemeral port and serve it in the background.
pub async fn start_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = comms_server::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub async fn sqlite_state(
    dir: &tempfile::TempDir,
    topology: RelayTopology,
) -> (AppState, Arc<SqliteMessageStore>) {
    let mut config = RelayConfig::with_data_dir(dir.path());
    config.topology = topology;
    let store = Arc::new(SqliteMessageStore::new(dir.path()).await.unwrap());
    (AppState::new(config, store.clone()), store)
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Raw wire-level client for exercising the relay directly.
pub struct TestClient {
    tx: WsSink,
    rx: WsSource,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr, user_id: Option<&str>) -> Self {
        let url = match user_id {
            Some(user) => format!("ws://{}/ws?userId={}", addr, user),
            None => format!("ws://{}/ws", addr),
        };
        let (stream, _) = connect_async(url.as_str()).await.unwrap();
        let (tx, rx) = stream.split();
        Self { tx, rx }
    }

    pub async fn send(&mut self, event: &ClientEvent) {
        let raw = serde_json::to_string(event).unwrap();
        self.send_raw(&raw).await;
    }

    pub async fn send_raw(&mut self, raw: &str) {
        self.tx.send(Message::text(raw.to_string())).await.unwrap();
    }

    /// Next decodable server event, or None after a 2s quiet period.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            let frame = timeout(Duration::from_secs(2), self.rx.next())
                .await
                .ok()??
                .ok()?;
            match frame {
                Message::Text(text) => {
                    if let Ok(event) = ServerEvent::decode(text.as_str()) {
                        return Some(event);
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Skip events until one matches; panics after the timeout.
    pub async fn next_matching<F>(&mut self, mut predicate: F) -> ServerEvent
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        loop {
            let event = self
                .next_event()
                .await
                .expect("timed out waiting for a matching event");
            if predicate(&event) {
                return event;
            }
        }
    }

    /// Assert nothing arrives within the window; returns the intruder if
    /// something does.
    pub async fn expect_silence(&mut self, window: Duration) -> Option<ServerEvent> {
        match timeout(window, self.rx.next()).await {
            Err(_) => None,
            Ok(Some(Ok(Message::Text(text)))) => ServerEvent::decode(text.as_str()).ok(),
            Ok(_) => None,
        }
    }

    pub async fn close(mut self) {
        let _ = self.tx.send(Message::Close(None)).await;
    }
}

/// Minimal HTTP POST against the running server (side-channel tests).
pub async fn http_post(addr: SocketAddr, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        path,
        addr,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

/// The online set carried by an `online-users` event.
pub fn online_set(event: &ServerEvent) -> Option<std::collections::HashSet<String>> {
    match event {
        ServerEvent::OnlineUsers(payload) => Some(payload.clone().into_set()),
        _ => None,
    }
}
