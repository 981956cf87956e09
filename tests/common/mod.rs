//! Shared helpers for integration tests

#![allow(dead_code)]

use officeviz_core::{
    ApiServer, ApiServerConfig, BroadcastHub, MemoryStore, PreferenceStore, SessionSettings,
    SessionStore, SnapshotStore,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A hub served on an ephemeral local port
pub struct TestServer {
    pub addr: SocketAddr,
    pub sessions: Arc<SessionStore>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Graceful shutdown: actors stop and flush their snapshots
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Start a server over an in-memory store
pub async fn start_test_api_server() -> TestServer {
    let store = Arc::new(MemoryStore::new());
    start_test_api_server_with(store.clone(), store, SessionSettings::default(), 64).await
}

/// Start a server over the given stores
pub async fn start_test_api_server_with(
    snapshots: Arc<dyn SnapshotStore>,
    preferences: Arc<dyn PreferenceStore>,
    settings: SessionSettings,
    subscriber_buffer: usize,
) -> TestServer {
    let hub = Arc::new(BroadcastHub::new(subscriber_buffer));
    let sessions = Arc::new(SessionStore::new(snapshots, hub, settings));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ApiServer::new(ApiServerConfig { addr }, sessions.clone(), preferences);

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = rx.await;
        };
        if let Err(e) = server.serve_on(listener, shutdown).await {
            tracing::error!("API server error: {}", e);
        }
    });

    TestServer {
        addr,
        sessions,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

/// Raw event payload as a producer would post it
pub fn event(session_id: &str, sequence: u64, event_type: &str, data: Value) -> Value {
    json!({
        "event_type": event_type,
        "session_id": session_id,
        "sequence": sequence,
        "timestamp": format!("2026-01-01T00:00:{:02}Z", sequence % 60),
        "data": data,
    })
}

pub fn tool_end(session_id: &str, sequence: u64, tool_name: &str, success: bool) -> Value {
    event(
        session_id,
        sequence,
        "tool_use_end",
        json!({ "tool_name": tool_name, "success": success }),
    )
}

/// POST one event, returning status and body
pub async fn post_event(client: &reqwest::Client, server: &TestServer, body: &Value) -> (u16, Value) {
    let response = client
        .post(server.url("/events"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

/// Poll until `check` passes or the timeout expires
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
