//! HTTP and WebSocket surface of the hub
//!
//! Provides:
//! - Event ingestion (`POST /events`)
//! - Session management and read endpoints
//! - Per-session WebSocket subscriptions fed by the broadcast hub
//! - Viewer preferences

pub mod hub;
pub mod server;
pub mod ws;

pub use hub::{BroadcastHub, StateUpdate, SubscriberOverrun, Subscription};
pub use server::{ApiServer, ApiServerConfig};
