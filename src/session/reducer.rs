//! Session state machine
//!
//! `apply` is a pure, total function over the closed event set: no I/O, no
//! clock reads, no logging. Anything worth logging comes back in the delta
//! and the caller decides what to do with it.

use crate::events::validate::effective_todo_id;
use crate::events::{
    BackgroundTaskData, BackgroundTaskStatus, Event, EventKind, PermissionRequestData,
    SessionStartData, SubagentStartData, SubagentStopData, TodoWriteData, ToolUseEndData,
    ToolUseStartData,
};
use crate::session::state::{
    Agent, AgentRole, AgentStatus, BackgroundTask, Lifespan, NewsCategory, NewsItem,
    SessionState, SessionStatus,
};
use crate::session::tools::{categorize, writes_code};
use crate::types::AgentId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// What an applied event changed, beyond the new state itself
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDelta {
    pub sequence: u64,
    pub event_type: String,
    /// News item appended by this event, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news: Option<NewsItem>,
    /// References to agents the session does not know about
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_agents: Vec<AgentId>,
    /// The event ended the session
    pub session_ended: bool,
}

/// Apply one event to a session state
pub fn apply(mut state: SessionState, event: &Event) -> (SessionState, StateDelta) {
    let sequence = event
        .sequence
        .unwrap_or_else(|| state.last_sequence.saturating_add(1));
    let ts = event.timestamp;

    state.last_sequence = sequence;
    state.last_event_at = Some(ts);
    if state.started_at.is_none() {
        state.started_at = Some(ts);
    }
    ensure_boss(&mut state, ts);

    let mut delta = StateDelta {
        sequence,
        event_type: event.event_type().to_string(),
        ..Default::default()
    };

    match &event.kind {
        EventKind::SessionStart(data) => session_start(&mut state, data),
        EventKind::SessionStop(_) => {
            session_stop(&mut state, ts);
            delta.session_ended = true;
        }
        EventKind::ToolUseStart(data) => tool_use_start(&mut state, data, &mut delta),
        EventKind::ToolUseEnd(data) => tool_use_end(&mut state, data, ts, &mut delta),
        EventKind::SubagentStart(data) => subagent_start(&mut state, data, ts, &mut delta),
        EventKind::SubagentStop(data) => subagent_stop(&mut state, data, ts, &mut delta),
        EventKind::ContextCompaction(_) => {
            state.counters.compactions += 1;
            state.counters.tool_uses_since_compaction = 0;
            state.last_compaction_at = Some(ts);
            let headline = format!(
                "Coffee break #{}: context compacted",
                state.counters.compactions
            );
            delta.news = Some(news(&mut state, sequence, ts, NewsCategory::Coffee, headline));
        }
        EventKind::BackgroundTaskNotification(data) => {
            background_task(&mut state, data, ts, &mut delta)
        }
        EventKind::TodoWrite(data) => todo_write(&mut state, data),
        EventKind::UserPromptSubmit(_) => {
            let status = if state.active_employees().next().is_some() {
                AgentStatus::Delegating
            } else {
                AgentStatus::Working
            };
            if let Some(boss) = state.agents.get_mut(&AgentId::boss()) {
                boss.status = status;
            }
        }
        EventKind::PermissionRequest(data) => permission_request(&mut state, data, &mut delta),
    }

    (state, delta)
}

/// Replay an ordered event sequence from an empty state
pub fn replay<'a>(
    initial: SessionState,
    events: impl IntoIterator<Item = &'a Event>,
) -> SessionState {
    events
        .into_iter()
        .fold(initial, |state, event| apply(state, event).0)
}

fn ensure_boss(state: &mut SessionState, ts: DateTime<Utc>) {
    if state.agents.contains_key(&AgentId::boss()) {
        return;
    }
    let boss = Agent::boss(None, ts);
    state.lifespans.insert(
        boss.id.clone(),
        Lifespan {
            name: boss.name.clone(),
            role: AgentRole::Boss,
            started_at: ts,
            ended_at: None,
        },
    );
    state.agents.insert(boss.id.clone(), boss);
}

fn session_start(state: &mut SessionState, data: &SessionStartData) {
    let resumed = state.is_ended();
    state.status = SessionStatus::Active;
    state.ended_at = None;
    if data.project_name.is_some() {
        state.project_name = data.project_name.clone();
    }
    if data.project_root.is_some() {
        state.project_root = data.project_root.clone();
    }

    // Transient counters only; totals survive a resumed session
    state.counters.consecutive_successes = 0;
    state.counters.tool_uses_since_compaction = 0;
    for agent in state.agents.values_mut() {
        agent.current_tool = None;
    }

    let boss_id = AgentId::boss();
    if let Some(boss) = state.agents.get_mut(&boss_id) {
        boss.status = AgentStatus::Idle;
        if let Some(name) = &data.agent_name {
            boss.name = name.clone();
        }
    }
    if let Some(lifespan) = state.lifespans.get_mut(&boss_id) {
        if let Some(name) = &data.agent_name {
            lifespan.name = name.clone();
        }
        if resumed {
            lifespan.ended_at = None;
        }
    }
}

fn session_stop(state: &mut SessionState, ts: DateTime<Utc>) {
    state.status = SessionStatus::Ended;
    state.ended_at = Some(ts);

    // Freeze open lifespans so timelines stop advancing
    let freeze_at = state.latest_agent_end().unwrap_or(ts);
    for lifespan in state.lifespans.values_mut() {
        if lifespan.ended_at.is_none() {
            lifespan.ended_at = Some(freeze_at);
        }
    }

    for agent in state.agents.values_mut() {
        agent.current_tool = None;
        match agent.role {
            AgentRole::Boss => agent.status = AgentStatus::Done,
            AgentRole::Employee if agent.is_active() => agent.status = AgentStatus::Idle,
            AgentRole::Employee => {}
        }
    }
}

fn tool_use_start(state: &mut SessionState, data: &ToolUseStartData, delta: &mut StateDelta) {
    let agent_id = data.agent_id.clone().unwrap_or_else(AgentId::boss);
    match state.agents.get_mut(&agent_id) {
        Some(agent) => {
            if agent.status != AgentStatus::Done {
                agent.status = AgentStatus::Working;
            }
            agent.current_tool = Some(data.tool_name.clone());
        }
        None => delta.unknown_agents.push(agent_id),
    }
}

fn tool_use_end(
    state: &mut SessionState,
    data: &ToolUseEndData,
    ts: DateTime<Utc>,
    delta: &mut StateDelta,
) {
    let counters = &mut state.counters;
    counters.tool_uses += 1;
    counters.tool_uses_since_compaction += 1;
    *counters
        .by_category
        .entry(categorize(&data.tool_name))
        .or_insert(0) += 1;

    if data.success {
        counters.successes += 1;
        counters.consecutive_successes += 1;
        counters.best_streak = counters.best_streak.max(counters.consecutive_successes);
    } else {
        counters.failures += 1;
        counters.consecutive_successes = 0;
        state.last_incident_at = Some(ts);
    }

    if writes_code(&data.tool_name) {
        counters.code_written += 1;
        if let Some(name) = data.file_path.as_deref().and_then(basename) {
            *counters.file_edits.entry(name).or_insert(0) += 1;
        }
    }

    let agent_id = data.agent_id.clone().unwrap_or_else(AgentId::boss);
    match state.agents.get_mut(&agent_id) {
        Some(agent) => {
            agent.tool_uses += 1;
            if agent.current_tool.as_deref() == Some(data.tool_name.as_str()) {
                agent.current_tool = None;
            }
        }
        None => delta.unknown_agents.push(agent_id),
    }
}

fn subagent_start(
    state: &mut SessionState,
    data: &SubagentStartData,
    ts: DateTime<Utc>,
    delta: &mut StateDelta,
) {
    if state.agents.contains_key(&data.agent_id) {
        return;
    }

    let mut agent = Agent::employee(data.agent_id.clone(), data.agent_name.clone(), ts);
    agent.task_description = data.task_description.clone();
    let headline = format!("{} joined the office", agent.name);

    state.lifespans.insert(
        agent.id.clone(),
        Lifespan {
            name: agent.name.clone(),
            role: AgentRole::Employee,
            started_at: ts,
            ended_at: None,
        },
    );
    state.agents.insert(agent.id.clone(), agent);

    if let Some(boss) = state.agents.get_mut(&AgentId::boss()) {
        if boss.status != AgentStatus::Done {
            boss.status = AgentStatus::Delegating;
        }
    }

    let sequence = delta.sequence;
    delta.news = Some(news(state, sequence, ts, NewsCategory::Hire, headline));
}

fn subagent_stop(
    state: &mut SessionState,
    data: &SubagentStopData,
    ts: DateTime<Utc>,
    delta: &mut StateDelta,
) {
    let headline = match state.agents.get_mut(&data.agent_id) {
        None => {
            delta.unknown_agents.push(data.agent_id.clone());
            return;
        }
        // Already stopped: end time is set once
        Some(agent) if agent.ended_at.is_some() => return,
        Some(agent) => {
            agent.ended_at = Some(ts);
            agent.status = AgentStatus::Done;
            agent.current_tool = None;
            match data.success {
                Some(false) => format!("{} left the office (task failed)", agent.name),
                _ => format!("{} finished and left the office", agent.name),
            }
        }
    };

    if let Some(lifespan) = state.lifespans.get_mut(&data.agent_id) {
        if lifespan.ended_at.is_none() {
            lifespan.ended_at = Some(ts);
        }
    }

    let still_delegating = state.active_employees().next().is_some();
    if let Some(boss) = state.agents.get_mut(&AgentId::boss()) {
        if boss.status == AgentStatus::Delegating && !still_delegating {
            boss.status = AgentStatus::Working;
        }
    }

    let sequence = delta.sequence;
    delta.news = Some(news(state, sequence, ts, NewsCategory::Departure, headline));
}

fn background_task(
    state: &mut SessionState,
    data: &BackgroundTaskData,
    ts: DateTime<Utc>,
    delta: &mut StateDelta,
) {
    state.upsert_background_task(BackgroundTask {
        task_id: data.task_id.clone(),
        status: data.status,
        summary: data.summary.clone(),
        command: data.command.clone(),
        updated_at: ts,
    });

    let verb = match data.status {
        BackgroundTaskStatus::Running => "started",
        BackgroundTaskStatus::Completed => "completed",
        BackgroundTaskStatus::Failed => "failed",
        BackgroundTaskStatus::Killed => "was killed",
    };
    let headline = format!("Background task {} {}", data.task_id, verb);
    let sequence = delta.sequence;
    delta.news = Some(news(
        state,
        sequence,
        ts,
        NewsCategory::BackgroundTask,
        headline,
    ));
}

fn todo_write(state: &mut SessionState, data: &TodoWriteData) {
    state.todos = data
        .todos
        .iter()
        .enumerate()
        .map(|(idx, todo)| {
            let mut todo = todo.clone();
            todo.task_id = Some(effective_todo_id(todo.task_id.as_ref(), idx));
            todo
        })
        .collect();
}

fn permission_request(
    state: &mut SessionState,
    data: &PermissionRequestData,
    delta: &mut StateDelta,
) {
    let agent_id = data.agent_id.clone().unwrap_or_else(AgentId::boss);
    match state.agents.get_mut(&agent_id) {
        Some(agent) if agent.status != AgentStatus::Done => agent.status = AgentStatus::Waiting,
        Some(_) => {}
        None => delta.unknown_agents.push(agent_id),
    }
}

fn news(
    state: &mut SessionState,
    sequence: u64,
    timestamp: DateTime<Utc>,
    category: NewsCategory,
    headline: String,
) -> NewsItem {
    let item = NewsItem {
        sequence,
        timestamp,
        category,
        headline,
    };
    state.push_news(item.clone());
    item
}

fn basename(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
