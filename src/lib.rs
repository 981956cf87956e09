//! OfficeViz - live office whiteboards for coding-agent sessions
//!
//! Ingests agent lifecycle and tool-usage events over HTTP, folds them into a
//! per-session state, and fans every change out to WebSocket viewers.
//!
//! # Architecture
//!
//! - **Events**: wire model and validation of incoming payloads
//! - **Session**: pure reducer, reorder window, one actor per session, and
//!   the store that owns them
//! - **Whiteboard**: derived views projected from a session state
//! - **Storage**: snapshot and preference persistence (SQLite, in-memory)
//! - **API**: axum router, broadcast hub, WebSocket subscriptions
//!
//! # Example
//!
//! ```ignore
//! use officeviz_core::{ApiServer, ApiServerConfig, BroadcastHub, ServerConfig, SessionStore, SqliteStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let store = Arc::new(SqliteStore::open(&config.db_path).await?);
//!     let hub = Arc::new(BroadcastHub::new(config.subscriber_buffer));
//!     let sessions = Arc::new(SessionStore::new(store.clone(), hub, config.session_settings()));
//!     sessions.recover().await?;
//!
//!     ApiServer::new(ApiServerConfig { addr: config.addr }, sessions, store)
//!         .serve()
//!         .await
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod storage;
pub mod types;
pub mod whiteboard;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, BroadcastHub};
pub use config::ServerConfig;
pub use error::{OfficeError, Result, ValidationError};
pub use events::{validate, Event, EventKind};
pub use session::{SessionSettings, SessionState, SessionStore, SubmitOutcome};
pub use storage::{MemoryStore, PreferenceStore, SnapshotStore, SqliteStore};
pub use types::{AgentId, SessionId, TaskId};
pub use whiteboard::{project, ViewMode, ViewPayload};
