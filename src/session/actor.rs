//! Session actor
//!
//! One actor per session id is the serialization point for that session:
//! events are reordered, reduced and published one message at a time.
//! Snapshot writes run on spawned tasks so storage latency never stalls
//! the mailbox.

use crate::api::hub::{BroadcastHub, StateUpdate};
use crate::events::Event;
use crate::session::reducer::apply;
use crate::session::reorder::{OrderingViolation, ReorderBuffer};
use crate::session::state::SessionState;
use crate::storage::{SnapshotRecord, SnapshotStore};
use crate::types::SessionId;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-session tuning shared by every actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Buffered out-of-order events that force a gap closed
    pub reorder_window_events: usize,
    /// How long a gap may stay open
    pub reorder_window: Duration,
    /// Persist a snapshot every N applied events
    pub snapshot_every: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reorder_window_events: 32,
            reorder_window: Duration::from_millis(2000),
            snapshot_every: 10,
        }
    }
}

/// Serializes snapshot writes against deletion of the session.
///
/// Writers hold the lock for the duration of a save and skip the save once
/// the session is purged; deletion sets the flag and then takes the lock, so
/// no write can land after the snapshot row is removed.
#[derive(Debug, Default)]
pub struct PersistGate {
    lock: Mutex<()>,
    purged: AtomicBool,
}

impl PersistGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block further writes and wait for an in-flight one to finish
    pub async fn purge(&self) {
        self.purged.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock().await;
    }

    pub fn is_purged(&self) -> bool {
        self.purged.load(Ordering::SeqCst)
    }

    /// Save unless purged; `None` means the write was skipped
    async fn save(
        &self,
        snapshots: &dyn SnapshotStore,
        record: &SnapshotRecord,
    ) -> Option<crate::Result<()>> {
        let _guard = self.lock.lock().await;
        if self.is_purged() {
            return None;
        }
        Some(snapshots.save_snapshot(record).await)
    }
}

/// Result of submitting one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Applied, together with any buffered successors; sequences in order
    Applied(Vec<u64>),
    /// Held in the reorder window waiting for a gap to fill
    Buffered(u64),
    /// Arrived too late or twice, discarded
    Discarded(OrderingViolation),
}

/// Point-in-time view of a session actor
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: Arc<SessionState>,
    /// Last snapshot write failed
    pub degraded: bool,
    /// Events waiting in the reorder window
    pub pending_events: usize,
}

/// Messages accepted by the session actor
pub enum SessionMessage {
    Submit(Event, RpcReplyPort<SubmitOutcome>),
    Snapshot(RpcReplyPort<SessionSnapshot>),
    /// Reorder deadline passed
    FlushReorder,
    /// A spawned snapshot write finished
    Persisted {
        sequence: u64,
        error: Option<String>,
    },
}

pub struct SessionActorArgs {
    pub session_id: SessionId,
    /// Recovered state; loaded from `snapshots` when absent
    pub initial: Option<SessionState>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub hub: Arc<BroadcastHub>,
    pub gate: Arc<PersistGate>,
    pub settings: SessionSettings,
}

/// Session actor state
pub struct SessionActorState {
    state: SessionState,
    reorder: ReorderBuffer,
    snapshots: Arc<dyn SnapshotStore>,
    hub: Arc<BroadcastHub>,
    gate: Arc<PersistGate>,
    settings: SessionSettings,
    applied_since_snapshot: u64,
    degraded: bool,
    flush_at: Option<Instant>,
    /// Most recent spawned snapshot write
    in_flight: Option<JoinHandle<()>>,
}

impl SessionActorState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: Arc::new(self.state.clone()),
            degraded: self.degraded,
            pending_events: self.reorder.pending_len(),
        }
    }
}

pub struct SessionActor;

impl SessionActor {
    /// Reduce ready events in order and publish each resulting state
    async fn apply_ready(
        myself: &ActorRef<SessionMessage>,
        state: &mut SessionActorState,
        ready: Vec<Event>,
    ) -> Vec<u64> {
        let mut applied = Vec::with_capacity(ready.len());
        let mut ended = false;

        for event in ready {
            let current = std::mem::replace(
                &mut state.state,
                SessionState::new(event.session_id.clone()),
            );
            let (next, delta) = apply(current, &event);
            state.state = next;

            for agent in &delta.unknown_agents {
                warn!(
                    "Session {}: {} references unknown agent {}",
                    state.state.session_id, delta.event_type, agent
                );
            }
            if delta.session_ended {
                info!("Session {} ended", state.state.session_id);
                ended = true;
            }
            debug!(
                "Session {}: applied {} at sequence {}",
                state.state.session_id, delta.event_type, delta.sequence
            );

            applied.push(delta.sequence);
            state.applied_since_snapshot += 1;

            let update = StateUpdate {
                session_id: state.state.session_id.clone(),
                sequence: delta.sequence,
                state: Arc::new(state.state.clone()),
                delta,
            };
            state.hub.publish(update).await;
        }

        if ended || state.applied_since_snapshot >= state.settings.snapshot_every {
            Self::persist(myself, state);
        }
        applied
    }

    /// Start a snapshot write without waiting for it
    fn persist(myself: &ActorRef<SessionMessage>, state: &mut SessionActorState) {
        state.applied_since_snapshot = 0;
        let record = SnapshotRecord::from_state(&state.state);
        let snapshots = state.snapshots.clone();
        let gate = state.gate.clone();
        let actor = myself.clone();

        state.in_flight = Some(tokio::spawn(async move {
            if let Some(result) = gate.save(snapshots.as_ref(), &record).await {
                let _ = actor.cast(SessionMessage::Persisted {
                    sequence: record.last_sequence,
                    error: result.err().map(|e| e.to_string()),
                });
            }
        }));
    }

    fn schedule_flush(myself: &ActorRef<SessionMessage>, state: &mut SessionActorState) {
        let Some(deadline) = state.reorder.deadline() else {
            return;
        };
        if matches!(state.flush_at, Some(at) if at <= deadline) {
            return;
        }
        state.flush_at = Some(deadline);

        let actor = myself.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = actor.cast(SessionMessage::FlushReorder);
        });
    }
}

#[ractor::async_trait]
impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionActorState;
    type Arguments = SessionActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        let mut degraded = false;
        let state = match args.initial {
            Some(state) => state,
            None => match args.snapshots.load_snapshot(&args.session_id).await {
                Ok(Some(record)) => record.state,
                Ok(None) => SessionState::new(args.session_id.clone()),
                Err(e) => {
                    error!(
                        "Failed to load snapshot for session {}: {}",
                        args.session_id, e
                    );
                    degraded = true;
                    SessionState::new(args.session_id.clone())
                }
            },
        };

        debug!(
            "Session actor {} starting at sequence {}",
            args.session_id, state.last_sequence
        );

        let reorder = ReorderBuffer::new(
            state.last_sequence.saturating_add(1),
            args.settings.reorder_window_events,
            args.settings.reorder_window,
        );

        Ok(SessionActorState {
            state,
            reorder,
            snapshots: args.snapshots,
            hub: args.hub,
            gate: args.gate,
            settings: args.settings,
            applied_since_snapshot: 0,
            degraded,
            flush_at: None,
            in_flight: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::Submit(event, reply) => {
                let outcome = match state.reorder.offer(event, Instant::now()) {
                    Ok(ready) if ready.is_empty() => {
                        Self::schedule_flush(&myself, state);
                        SubmitOutcome::Buffered(state.reorder.pending_len() as u64)
                    }
                    Ok(ready) => {
                        let applied = Self::apply_ready(&myself, state, ready).await;
                        Self::schedule_flush(&myself, state);
                        SubmitOutcome::Applied(applied)
                    }
                    Err(violation) => {
                        warn!(
                            "Session {}: discarding event: {}",
                            state.state.session_id, violation
                        );
                        SubmitOutcome::Discarded(violation)
                    }
                };
                // The caller may have given up waiting; nothing to do then
                let _ = reply.send(outcome);
            }
            SessionMessage::Snapshot(reply) => {
                let _ = reply.send(state.snapshot());
            }
            SessionMessage::FlushReorder => {
                state.flush_at = None;
                let ready = state.reorder.flush_expired(Instant::now());
                if !ready.is_empty() {
                    warn!(
                        "Session {}: reorder window expired, skipping to sequence {}",
                        state.state.session_id,
                        ready.first().and_then(|e| e.sequence).unwrap_or_default()
                    );
                    Self::apply_ready(&myself, state, ready).await;
                }
                Self::schedule_flush(&myself, state);
            }
            SessionMessage::Persisted { sequence, error } => match error {
                Some(e) => {
                    error!(
                        "Session {}: snapshot at sequence {} failed: {}",
                        state.state.session_id, sequence, e
                    );
                    state.degraded = true;
                }
                None => {
                    debug!(
                        "Session {}: snapshot saved at sequence {}",
                        state.state.session_id, sequence
                    );
                    state.degraded = false;
                }
            },
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        if let Some(handle) = state.in_flight.take() {
            let _ = handle.await;
        }
        // Flush on shutdown; a purged session skips the write
        if state.applied_since_snapshot > 0 {
            let record = SnapshotRecord::from_state(&state.state);
            if let Some(Err(e)) = state.gate.save(state.snapshots.as_ref(), &record).await {
                error!(
                    "Session {}: final snapshot failed: {}",
                    state.state.session_id, e
                );
            }
        }
        debug!("Session actor {} stopped", state.state.session_id);
        Ok(())
    }
}
