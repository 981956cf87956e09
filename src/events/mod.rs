//! Event model for coding-agent lifecycle and tool usage
//!
//! Producers post one event per request. Events form a closed set of typed
//! variants so that the session reducer can match on them exhaustively.

pub mod validate;

use crate::types::{AgentId, SessionId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use validate::{validate, validate_at};

/// Largest accepted sequence number; snapshots store sequences as SQLite
/// integers
pub const MAX_SEQUENCE: u64 = i64::MAX as u64;

/// A validated event addressed to one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Target session
    pub session_id: SessionId,
    /// Per-session ordering authority; assigned by the session actor when
    /// the producer does not supply one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Wall-clock time reported by the producer (or ingestion time)
    pub timestamp: DateTime<Utc>,
    /// Variant payload
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event variants
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    SessionStart(SessionStartData),
    SessionStop(SessionStopData),
    ToolUseStart(ToolUseStartData),
    ToolUseEnd(ToolUseEndData),
    SubagentStart(SubagentStartData),
    SubagentStop(SubagentStopData),
    ContextCompaction(ContextCompactionData),
    BackgroundTaskNotification(BackgroundTaskData),
    TodoWrite(TodoWriteData),
    UserPromptSubmit(UserPromptData),
    PermissionRequest(PermissionRequestData),
}

impl EventKind {
    /// Wire name of the variant
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::SessionStart(_) => "session_start",
            EventKind::SessionStop(_) => "session_stop",
            EventKind::ToolUseStart(_) => "tool_use_start",
            EventKind::ToolUseEnd(_) => "tool_use_end",
            EventKind::SubagentStart(_) => "subagent_start",
            EventKind::SubagentStop(_) => "subagent_stop",
            EventKind::ContextCompaction(_) => "context_compaction",
            EventKind::BackgroundTaskNotification(_) => "background_task_notification",
            EventKind::TodoWrite(_) => "todo_write",
            EventKind::UserPromptSubmit(_) => "user_prompt_submit",
            EventKind::PermissionRequest(_) => "permission_request",
        }
    }

    /// Whether this variant may bring a deleted session back to life
    pub fn can_create_session(&self) -> bool {
        matches!(self, EventKind::SessionStart(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStartData {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_root: Option<String>,
    /// Display name for the main agent
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStopData {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseStartData {
    pub tool_name: String,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub input_summary: Option<String>,
    /// Acting agent; the main agent when absent
    #[serde(default)]
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseEndData {
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Path touched by Edit/Write style tools
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub output_summary: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentStartData {
    pub agent_id: AgentId,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentStopData {
    pub agent_id: AgentId,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextCompactionData {
    /// "auto" or "manual"
    #[serde(default)]
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTaskData {
    pub task_id: TaskId,
    pub status: BackgroundTaskStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundTaskStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoWriteData {
    pub todos: Vec<TodoItem>,
}

/// A single item from the TodoWrite tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Assigned from the 1-based position when the producer omits it
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub active_form: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub blocks: Vec<TaskId>,
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPromptData {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequestData {
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Event {
    /// Create new event without a sequence number
    pub fn new(session_id: impl Into<SessionId>, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            session_id: session_id.into(),
            sequence: None,
            timestamp,
            kind,
        }
    }

    /// Attach a producer-assigned sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Create session start event
    pub fn session_start(session_id: impl Into<SessionId>, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::SessionStart(SessionStartData::default()),
        )
    }

    /// Create session stop event
    pub fn session_stop(session_id: impl Into<SessionId>, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::SessionStop(SessionStopData::default()),
        )
    }

    /// Create tool use start event for the main agent
    pub fn tool_use_start(
        session_id: impl Into<SessionId>,
        timestamp: DateTime<Utc>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::ToolUseStart(ToolUseStartData {
                tool_name: tool_name.into(),
                tool_use_id: None,
                input_summary: None,
                agent_id: None,
            }),
        )
    }

    /// Create tool use end event for the main agent
    pub fn tool_use_end(
        session_id: impl Into<SessionId>,
        timestamp: DateTime<Utc>,
        tool_name: impl Into<String>,
        success: bool,
    ) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::ToolUseEnd(ToolUseEndData {
                tool_name: tool_name.into(),
                success,
                tool_use_id: None,
                agent_id: None,
                file_path: None,
                output_summary: None,
                error_type: None,
            }),
        )
    }

    /// Create subagent start event
    pub fn subagent_start(
        session_id: impl Into<SessionId>,
        timestamp: DateTime<Utc>,
        agent_id: impl Into<AgentId>,
        agent_name: Option<String>,
    ) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::SubagentStart(SubagentStartData {
                agent_id: agent_id.into(),
                agent_name,
                task_description: None,
            }),
        )
    }

    /// Create subagent stop event
    pub fn subagent_stop(
        session_id: impl Into<SessionId>,
        timestamp: DateTime<Utc>,
        agent_id: impl Into<AgentId>,
    ) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::SubagentStop(SubagentStopData {
                agent_id: agent_id.into(),
                success: None,
                summary: None,
            }),
        )
    }

    /// Create context compaction event
    pub fn context_compaction(session_id: impl Into<SessionId>, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::ContextCompaction(ContextCompactionData::default()),
        )
    }

    /// Create background task notification event
    pub fn background_task(
        session_id: impl Into<SessionId>,
        timestamp: DateTime<Utc>,
        task_id: impl Into<TaskId>,
        status: BackgroundTaskStatus,
    ) -> Self {
        Self::new(
            session_id,
            timestamp,
            EventKind::BackgroundTaskNotification(BackgroundTaskData {
                task_id: task_id.into(),
                status,
                summary: None,
                command: None,
            }),
        )
    }

    /// Create todo write event
    pub fn todo_write(
        session_id: impl Into<SessionId>,
        timestamp: DateTime<Utc>,
        todos: Vec<TodoItem>,
    ) -> Self {
        Self::new(session_id, timestamp, EventKind::TodoWrite(TodoWriteData { todos }))
    }
}

impl TodoItem {
    pub fn new(task_id: impl Into<TaskId>, content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            task_id: Some(task_id.into()),
            content: content.into(),
            status,
            active_form: None,
            description: None,
            blocks: Vec::new(),
            blocked_by: Vec::new(),
            owner: None,
        }
    }
}
