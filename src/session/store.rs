//! Session store: id-keyed registry of session actors
//!
//! The registry is the only place sessions come into and go out of
//! existence. Each entry spawns its actor at most once, even under
//! concurrent first events. Deleted ids are tombstoned so stray events
//! cannot silently resurrect them.

use crate::api::hub::{BroadcastHub, Subscription};
use crate::error::{OfficeError, Result, ValidationError};
use crate::events::{Event, MAX_SEQUENCE};
use crate::session::actor::{
    PersistGate, SessionActor, SessionActorArgs, SessionMessage, SessionSettings,
    SessionSnapshot, SubmitOutcome,
};
use crate::session::state::{SessionState, SessionStatus};
use crate::storage::SnapshotStore;
use crate::types::SessionId;
use chrono::{DateTime, Utc};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One row of `GET /sessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub project_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_sequence: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub agent_count: usize,
    pub degraded: bool,
    pub subscribers: usize,
}

struct RunningSession {
    actor: ActorRef<SessionMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct SessionEntry {
    running: OnceCell<RunningSession>,
    gate: Arc<PersistGate>,
}

impl SessionEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            running: OnceCell::new(),
            gate: PersistGate::new(),
        })
    }

    async fn stop(&self) {
        if let Some(running) = self.running.get() {
            running.actor.stop(None);
            if let Some(handle) = running.handle.lock().await.take() {
                let _ = handle.await;
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Arc<SessionEntry>>,
    tombstones: HashSet<SessionId>,
}

/// Owns every session actor
pub struct SessionStore {
    registry: RwLock<Registry>,
    snapshots: Arc<dyn SnapshotStore>,
    hub: Arc<BroadcastHub>,
    settings: SessionSettings,
}

impl SessionStore {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        hub: Arc<BroadcastHub>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            snapshots,
            hub,
            settings,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Route a validated event to its session, creating the session if needed
    pub async fn submit(&self, event: Event) -> Result<SubmitOutcome> {
        if matches!(event.sequence, Some(seq) if seq > MAX_SEQUENCE) {
            return Err(ValidationError::InvalidField {
                event_type: event.event_type().to_string(),
                reason: format!("sequence must be an integer in 1..={}", MAX_SEQUENCE),
            }
            .into());
        }
        let session_id = event.session_id.clone();
        let entry = self
            .entry(&session_id, event.kind.can_create_session())
            .await?;
        let actor = self.ensure_running(&session_id, &entry, None).await?;

        let result = actor
            .call(|reply| SessionMessage::Submit(event, reply), None)
            .await;
        self.unwrap_call(&session_id, result).await
    }

    /// Current state of a session, if it exists
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>> {
        let entry = {
            let registry = self.registry.read().await;
            match registry.sessions.get(session_id) {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            }
        };
        let Some(running) = entry.running.get() else {
            return Ok(None);
        };
        let actor = running.actor.clone();
        self.query(session_id, &actor).await.map(Some)
    }

    /// Summaries of every live session, ordered by id
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let actors: Vec<(SessionId, ActorRef<SessionMessage>)> = {
            let registry = self.registry.read().await;
            registry
                .sessions
                .iter()
                .filter_map(|(id, entry)| {
                    entry
                        .running
                        .get()
                        .map(|running| (id.clone(), running.actor.clone()))
                })
                .collect()
        };

        let mut summaries = Vec::with_capacity(actors.len());
        for (session_id, actor) in actors {
            match self.query(&session_id, &actor).await {
                Ok(snapshot) => {
                    let subscribers = self.hub.subscriber_count(&session_id).await;
                    summaries.push(summarize(&snapshot, subscribers));
                }
                // Deleted while we were listing
                Err(OfficeError::SessionNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(summaries)
    }

    /// Subscribe to a session and return the snapshot the stream continues from
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
    ) -> Result<(Arc<SessionState>, Subscription)> {
        if self.registry.read().await.tombstones.contains(session_id) {
            return Err(OfficeError::SessionNotFound(session_id.to_string()));
        }

        // Subscribe before reading the snapshot so no update falls in between
        let mut subscription = self.hub.subscribe(session_id).await;
        let state = match self.snapshot(session_id).await? {
            Some(snapshot) => snapshot.state,
            None => Arc::new(SessionState::new(session_id.clone())),
        };
        subscription.skip_through(state.last_sequence);
        Ok((state, subscription))
    }

    /// Terminate a session and purge its snapshot. Returns whether it existed.
    pub async fn delete(&self, session_id: &SessionId) -> Result<bool> {
        let entry = {
            let mut registry = self.registry.write().await;
            registry.tombstones.insert(session_id.clone());
            registry.sessions.remove(session_id)
        };

        let mut existed = false;
        if let Some(entry) = entry {
            entry.gate.purge().await;
            entry.stop().await;
            existed = true;
        }
        existed |= self.snapshots.delete_snapshot(session_id).await?;
        self.hub.close(session_id).await;

        info!("Deleted session {} (existed: {})", session_id, existed);
        Ok(existed)
    }

    /// Terminate and purge every session. Returns how many were removed.
    pub async fn delete_all(&self) -> Result<usize> {
        let persisted = self.snapshots.list_snapshots().await?;
        let entries: Vec<(SessionId, Arc<SessionEntry>)> = {
            let mut registry = self.registry.write().await;
            let entries: Vec<_> = registry.sessions.drain().collect();
            for (id, _) in &entries {
                registry.tombstones.insert(id.clone());
            }
            for record in &persisted {
                registry.tombstones.insert(record.session_id.clone());
            }
            entries
        };

        let mut removed: HashSet<SessionId> = HashSet::new();
        for (id, entry) in entries {
            entry.gate.purge().await;
            entry.stop().await;
            removed.insert(id);
        }
        self.snapshots.delete_all_snapshots().await?;
        removed.extend(persisted.into_iter().map(|r| r.session_id));
        self.hub.close_all().await;

        info!("Deleted all sessions ({})", removed.len());
        Ok(removed.len())
    }

    /// Respawn an actor for every persisted snapshot. Returns how many.
    pub async fn recover(&self) -> Result<usize> {
        let records = self.snapshots.list_snapshots().await?;
        let mut recovered = 0;
        for record in records {
            let session_id = record.session_id.clone();
            let entry = self.entry(&session_id, true).await?;
            self.ensure_running(&session_id, &entry, Some(record.state))
                .await?;
            debug!(
                "Recovered session {} at sequence {}",
                session_id, record.last_sequence
            );
            recovered += 1;
        }
        info!("Recovered {} sessions from snapshots", recovered);
        Ok(recovered)
    }

    /// Live sessions
    pub async fn session_count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }

    /// Stop every actor, letting each flush its final snapshot
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<SessionEntry>> = {
            let mut registry = self.registry.write().await;
            registry.sessions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.stop().await;
        }
        self.hub.close_all().await;
        info!("Session store shut down");
    }

    /// Registry entry for an id, honouring tombstones
    async fn entry(&self, session_id: &SessionId, can_create: bool) -> Result<Arc<SessionEntry>> {
        if let Some(entry) = self.registry.read().await.sessions.get(session_id) {
            return Ok(entry.clone());
        }

        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.sessions.get(session_id) {
            return Ok(entry.clone());
        }
        if registry.tombstones.contains(session_id) {
            if !can_create {
                return Err(OfficeError::SessionNotFound(session_id.to_string()));
            }
            registry.tombstones.remove(session_id);
            info!("Session {} recreated after deletion", session_id);
        }

        let entry = SessionEntry::new();
        registry.sessions.insert(session_id.clone(), entry.clone());
        Ok(entry)
    }

    /// Spawn the entry's actor on first use
    async fn ensure_running(
        &self,
        session_id: &SessionId,
        entry: &SessionEntry,
        initial: Option<SessionState>,
    ) -> Result<ActorRef<SessionMessage>> {
        let running = entry
            .running
            .get_or_try_init(|| async {
                let args = SessionActorArgs {
                    session_id: session_id.clone(),
                    initial,
                    snapshots: self.snapshots.clone(),
                    hub: self.hub.clone(),
                    gate: entry.gate.clone(),
                    settings: self.settings,
                };
                let (actor, handle) = Actor::spawn(None, SessionActor, args)
                    .await
                    .map_err(|e| {
                        OfficeError::Actor(format!(
                            "Failed to spawn actor for session {}: {}",
                            session_id, e
                        ))
                    })?;
                info!("Started session {}", session_id);
                Ok::<_, OfficeError>(RunningSession {
                    actor,
                    handle: Mutex::new(Some(handle)),
                })
            })
            .await?;

        // Deleted between the registry lookup and the spawn
        if entry.gate.is_purged() {
            entry.stop().await;
            return Err(OfficeError::SessionNotFound(session_id.to_string()));
        }
        Ok(running.actor.clone())
    }

    async fn query(
        &self,
        session_id: &SessionId,
        actor: &ActorRef<SessionMessage>,
    ) -> Result<SessionSnapshot> {
        let result = actor
            .call(
                |reply: RpcReplyPort<SessionSnapshot>| SessionMessage::Snapshot(reply),
                None,
            )
            .await;
        self.unwrap_call(session_id, result).await
    }

    /// Map an actor call failure; a stopped actor of a deleted session is
    /// reported as not found
    async fn unwrap_call<T, E: std::fmt::Display>(
        &self,
        session_id: &SessionId,
        result: std::result::Result<CallResult<T>, E>,
    ) -> Result<T> {
        let failure = match result {
            Ok(CallResult::Success(value)) => return Ok(value),
            Ok(CallResult::Timeout) => "call timed out".to_string(),
            Ok(CallResult::SenderError) => "actor dropped the reply".to_string(),
            Err(e) => e.to_string(),
        };

        let registry = self.registry.read().await;
        if registry.tombstones.contains(session_id) || !registry.sessions.contains_key(session_id)
        {
            return Err(OfficeError::SessionNotFound(session_id.to_string()));
        }
        warn!("Session {} actor unavailable: {}", session_id, failure);
        Err(OfficeError::Actor(failure))
    }
}

fn summarize(snapshot: &SessionSnapshot, subscribers: usize) -> SessionSummary {
    let state = &snapshot.state;
    SessionSummary {
        session_id: state.session_id.clone(),
        status: state.status,
        project_name: state.project_name.clone(),
        started_at: state.started_at,
        ended_at: state.ended_at,
        last_sequence: state.last_sequence,
        last_event_at: state.last_event_at,
        agent_count: state.agents.len(),
        degraded: snapshot.degraded,
        subscribers,
    }
}
