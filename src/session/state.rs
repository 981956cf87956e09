//! Canonical per-session state
//!
//! Everything here is a pure fold over the applied event sequence. Maps are
//! ordered (`BTreeMap`) so two replays serialize to identical bytes.

use crate::events::{BackgroundTaskStatus, TodoItem};
use crate::session::tools::ToolCategory;
use crate::types::{AgentId, SessionId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Maximum news feed entries kept; oldest evicted first
pub const NEWS_CAPACITY: usize = 20;

/// Maximum background tasks kept; least recently updated evicted first
pub const BACKGROUND_TASK_CAPACITY: usize = 10;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Boss,
    Employee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Delegating,
    Waiting,
    Done,
}

/// An agent on the session roster. Stopped agents stay on the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, by the agent's stop event
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_tool: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub tool_uses: u64,
}

impl Agent {
    pub fn boss(name: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: AgentId::boss(),
            name: name.unwrap_or_else(|| "Boss".to_string()),
            role: AgentRole::Boss,
            status: AgentStatus::Idle,
            started_at,
            ended_at: None,
            current_tool: None,
            task_description: None,
            tool_uses: 0,
        }
    }

    pub fn employee(id: AgentId, name: Option<String>, started_at: DateTime<Utc>) -> Self {
        let name = name.unwrap_or_else(|| id.to_string());
        Self {
            id,
            name,
            role: AgentRole::Employee,
            status: AgentStatus::Working,
            started_at,
            ended_at: None,
            current_tool: None,
            task_description: None,
            tool_uses: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none() && self.status != AgentStatus::Done
    }
}

/// Counters folded from tool and compaction events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub tool_uses: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_successes: u64,
    /// Longest success streak seen in this session
    pub best_streak: u64,
    pub compactions: u64,
    pub code_written: u64,
    /// Tool uses since the last compaction (or session start)
    pub tool_uses_since_compaction: u64,
    pub by_category: BTreeMap<ToolCategory, u64>,
    /// Edit counts keyed by file basename
    pub file_edits: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsCategory {
    Hire,
    Departure,
    Coffee,
    BackgroundTask,
}

/// One entry of the bounded news feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub category: NewsCategory,
    pub headline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub task_id: TaskId,
    pub status: BackgroundTaskStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Start and end of an agent's time in the office
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifespan {
    pub name: String,
    pub role: AgentRole,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Canonical reducer output for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub status: SessionStatus,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub agents: BTreeMap<AgentId, Agent>,
    /// Latest TodoWrite payload, ids resolved and unique
    pub todos: Vec<TodoItem>,
    pub counters: Counters,
    /// Most recent last
    pub news: VecDeque<NewsItem>,
    /// Most recent first
    pub background_tasks: VecDeque<BackgroundTask>,
    pub lifespans: BTreeMap<AgentId, Lifespan>,
    #[serde(default)]
    pub last_incident_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_compaction_at: Option<DateTime<Utc>>,
    /// Sequence number of the last applied event (0 before any)
    pub last_sequence: u64,
    /// Timestamp of the last applied event; the reference "now" for views
    #[serde(default)]
    pub last_event_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Empty state for a new session
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            status: SessionStatus::Active,
            project_name: None,
            project_root: None,
            started_at: None,
            ended_at: None,
            agents: BTreeMap::new(),
            todos: Vec::new(),
            counters: Counters::default(),
            news: VecDeque::with_capacity(NEWS_CAPACITY),
            background_tasks: VecDeque::with_capacity(BACKGROUND_TASK_CAPACITY),
            lifespans: BTreeMap::new(),
            last_incident_at: None,
            last_compaction_at: None,
            last_sequence: 0,
            last_event_at: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    pub fn boss(&self) -> Option<&Agent> {
        self.agents.get(&AgentId::boss())
    }

    /// Employees that have not stopped yet
    pub fn active_employees(&self) -> impl Iterator<Item = &Agent> {
        self.agents
            .values()
            .filter(|a| a.role == AgentRole::Employee && a.is_active())
    }

    /// Append to the news feed, evicting the oldest entry at capacity
    pub fn push_news(&mut self, item: NewsItem) {
        while self.news.len() >= NEWS_CAPACITY {
            self.news.pop_front();
        }
        self.news.push_back(item);
    }

    /// Insert or update a background task and move it to the front
    pub fn upsert_background_task(&mut self, task: BackgroundTask) {
        if let Some(pos) = self
            .background_tasks
            .iter()
            .position(|t| t.task_id == task.task_id)
        {
            self.background_tasks.remove(pos);
        }
        self.background_tasks.push_front(task);
        self.background_tasks.truncate(BACKGROUND_TASK_CAPACITY);
    }

    /// Latest end time among agents that have stopped
    pub fn latest_agent_end(&self) -> Option<DateTime<Utc>> {
        self.agents.values().filter_map(|a| a.ended_at).max()
    }
}
