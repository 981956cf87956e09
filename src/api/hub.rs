//! Broadcast hub: fans session state updates out to WebSocket subscribers
//!
//! One tokio broadcast channel per session. Every subscriber owns its own
//! receiver, so a slow reader never holds up publication; a reader that falls
//! more than the channel capacity behind is dropped and must resubscribe.

use crate::session::{SessionState, StateDelta};
use crate::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Default per-session channel capacity
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// One applied event as seen by viewers
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub session_id: SessionId,
    pub sequence: u64,
    /// Full state after the event
    pub state: Arc<SessionState>,
    pub delta: StateDelta,
}

/// The subscriber fell too far behind and was dropped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("subscriber overrun: {missed} updates missed")]
pub struct SubscriberOverrun {
    pub missed: u64,
}

/// Per-session broadcast channels
pub struct BroadcastHub {
    channels: RwLock<HashMap<SessionId, broadcast::Sender<StateUpdate>>>,
    capacity: usize,
}

impl BroadcastHub {
    /// Create hub whose channels buffer `capacity` updates per subscriber
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish an update to the session's current subscribers.
    /// Returns how many subscribers it was queued for.
    pub async fn publish(&self, update: StateUpdate) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&update.session_id) {
            Some(tx) => tx.send(update).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to a session's updates.
    /// Channels whose subscribers have all gone are pruned here.
    pub async fn subscribe(&self, session_id: &SessionId) -> Subscription {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
        let tx = channels
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!(
            "New subscriber for session {} ({} total)",
            session_id,
            tx.receiver_count() + 1
        );
        Subscription {
            rx: tx.subscribe(),
            last_sequence: 0,
        }
    }

    /// Drop a session's channel; its subscribers see the stream end
    pub async fn close(&self, session_id: &SessionId) {
        self.channels.write().await.remove(session_id);
    }

    /// Drop every channel
    pub async fn close_all(&self) {
        self.channels.write().await.clear();
    }

    /// Subscribers of one session
    pub async fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.channels
            .read()
            .await
            .get(session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Subscribers across all sessions
    pub async fn total_subscribers(&self) -> usize {
        self.channels
            .read()
            .await
            .values()
            .map(|tx| tx.receiver_count())
            .sum()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// A single subscriber's ordered view of one session
pub struct Subscription {
    rx: broadcast::Receiver<StateUpdate>,
    last_sequence: u64,
}

impl Subscription {
    /// Skip every update already covered by a snapshot at `sequence`
    pub fn skip_through(&mut self, sequence: u64) {
        self.last_sequence = self.last_sequence.max(sequence);
    }

    /// Next update in sequence order; `Ok(None)` once the session is gone
    pub async fn next(&mut self) -> Result<Option<StateUpdate>, SubscriberOverrun> {
        loop {
            match self.rx.recv().await {
                Ok(update) if update.sequence <= self.last_sequence => continue,
                Ok(update) => {
                    self.last_sequence = update.sequence;
                    return Ok(Some(update));
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Err(SubscriberOverrun { missed })
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
