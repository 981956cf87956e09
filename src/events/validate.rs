//! Parse and validate raw event payloads
//!
//! Validation is pure: it never touches session state. Unknown event types
//! are rejected so producers get feedback instead of silent drops.

use super::{Event, EventKind, MAX_SEQUENCE};
use crate::error::ValidationError;
use crate::types::{SessionId, TaskId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Validate a raw payload, stamping events without a timestamp with now
pub fn validate(raw: &Value) -> Result<Event, ValidationError> {
    validate_at(raw, Utc::now())
}

/// Validate a raw payload using `received_at` as the default timestamp
pub fn validate_at(raw: &Value, received_at: DateTime<Utc>) -> Result<Event, ValidationError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::MalformedPayload(type_name(raw).to_string()))?;

    let session_id = obj
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or(ValidationError::MissingSessionId)?;

    let event_type = obj
        .get("event_type")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingEventType)?;

    let sequence = match obj.get("sequence") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_u64() {
            Some(seq) if (1..=MAX_SEQUENCE).contains(&seq) => Some(seq),
            _ => {
                return Err(ValidationError::InvalidField {
                    event_type: event_type.to_string(),
                    reason: format!("sequence must be an integer in 1..={}", MAX_SEQUENCE),
                })
            }
        },
    };

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => received_at,
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ValidationError::InvalidField {
                event_type: event_type.to_string(),
                reason: format!("timestamp is not RFC 3339: {}", e),
            })?,
        Some(_) => {
            return Err(ValidationError::InvalidField {
                event_type: event_type.to_string(),
                reason: "timestamp must be a string".to_string(),
            })
        }
    };

    let data = match obj.get("data") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value) => value.clone(),
    };

    let kind = parse_kind(event_type, data)?;
    check_kind(&kind)?;

    Ok(Event {
        session_id: SessionId::new(session_id),
        sequence,
        timestamp,
        kind,
    })
}

fn parse_kind(event_type: &str, data: Value) -> Result<EventKind, ValidationError> {
    let kind = match event_type {
        "session_start" => EventKind::SessionStart(payload(event_type, data)?),
        "session_stop" => EventKind::SessionStop(payload(event_type, data)?),
        "tool_use_start" => EventKind::ToolUseStart(payload(event_type, data)?),
        "tool_use_end" => EventKind::ToolUseEnd(payload(event_type, data)?),
        "subagent_start" => EventKind::SubagentStart(payload(event_type, data)?),
        "subagent_stop" => EventKind::SubagentStop(payload(event_type, data)?),
        "context_compaction" => EventKind::ContextCompaction(payload(event_type, data)?),
        "background_task_notification" => {
            EventKind::BackgroundTaskNotification(payload(event_type, data)?)
        }
        "todo_write" => EventKind::TodoWrite(payload(event_type, data)?),
        "user_prompt_submit" => EventKind::UserPromptSubmit(payload(event_type, data)?),
        "permission_request" => EventKind::PermissionRequest(payload(event_type, data)?),
        other => return Err(ValidationError::UnknownEventType(other.to_string())),
    };
    Ok(kind)
}

/// Deserialize a variant payload, translating serde's message into a
/// missing/invalid field error
fn payload<T: DeserializeOwned>(event_type: &str, data: Value) -> Result<T, ValidationError> {
    serde_json::from_value(data).map_err(|e| {
        let message = e.to_string();
        match missing_field_name(&message) {
            Some(field) => ValidationError::MissingField {
                event_type: event_type.to_string(),
                field,
            },
            None => ValidationError::InvalidField {
                event_type: event_type.to_string(),
                reason: message,
            },
        }
    })
}

fn missing_field_name(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

/// Checks serde cannot express: non-empty names and unique todo ids
fn check_kind(kind: &EventKind) -> Result<(), ValidationError> {
    let event_type = kind.event_type();
    let empty = |field: &str| ValidationError::InvalidField {
        event_type: event_type.to_string(),
        reason: format!("{} must not be empty", field),
    };

    match kind {
        EventKind::ToolUseStart(data) if data.tool_name.trim().is_empty() => {
            Err(empty("tool_name"))
        }
        EventKind::ToolUseEnd(data) if data.tool_name.trim().is_empty() => Err(empty("tool_name")),
        EventKind::SubagentStart(data) if data.agent_id.is_empty() => Err(empty("agent_id")),
        EventKind::SubagentStop(data) if data.agent_id.is_empty() => Err(empty("agent_id")),
        EventKind::BackgroundTaskNotification(data) if data.task_id.is_empty() => {
            Err(empty("task_id"))
        }
        EventKind::TodoWrite(data) => {
            let mut seen = HashSet::new();
            for (idx, todo) in data.todos.iter().enumerate() {
                let id = effective_todo_id(todo.task_id.as_ref(), idx);
                if !seen.insert(id.clone()) {
                    return Err(ValidationError::DuplicateTodoId(id.to_string()));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Todo id as stored: the producer's id, or the 1-based position
pub(crate) fn effective_todo_id(task_id: Option<&TaskId>, index: usize) -> TaskId {
    match task_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => TaskId::new((index + 1).to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
