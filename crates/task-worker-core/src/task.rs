use crate::{TaskError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// Identifier of a task row, used as the persistence key.
///
/// The frontend issues integer keys; string keys are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Int(i64),
    Text(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Int(id) => write!(f, "{}", id),
            TaskId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        TaskId::Int(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        TaskId::Text(id.to_string())
    }
}

/// Built-in task types understood by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Single ICMP echo
    Ping,
    /// Hostname to IP address resolution
    DnsLookup,
    /// URL discovery with the katana crawler
    Katana,
    /// Case-insensitive word count over a fetched page
    OnlineWordCount,
    /// Shell command execution
    Command,
    /// Plain HTTP fetch
    HttpGet,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::Ping,
        TaskType::DnsLookup,
        TaskType::Katana,
        TaskType::OnlineWordCount,
        TaskType::Command,
        TaskType::HttpGet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Ping => "ping",
            TaskType::DnsLookup => "dns_lookup",
            TaskType::Katana => "katana",
            TaskType::OnlineWordCount => "online_word_count",
            TaskType::Command => "command",
            TaskType::HttpGet => "http_get",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        TaskType::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler-specific payload carried in `task_data`.
///
/// Most task types carry a bare string. Structured payloads arrive either as
/// a JSON object or as a string holding encoded JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPayload(Value);

impl TaskPayload {
    pub fn new(value: Value) -> Self {
        TaskPayload(value)
    }

    /// Payload as plain text. Non-string values are rendered as JSON.
    pub fn text(&self) -> Cow<'_, str> {
        match &self.0 {
            Value::String(s) => Cow::Borrowed(s),
            Value::Null => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// Decode a structured payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.0 {
            Value::String(s) => serde_json::from_str(s),
            other => T::deserialize(other),
        }
        .map_err(TaskError::InvalidPayload)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for TaskPayload {
    fn from(s: &str) -> Self {
        TaskPayload(Value::String(s.to_string()))
    }
}

impl From<Value> for TaskPayload {
    fn from(value: Value) -> Self {
        TaskPayload(value)
    }
}

/// Task message as published on the work queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,

    /// Raw type tag. Unrecognized tags are kept as-is; a missing, `null` or
    /// non-string tag is `None` and matches no handler.
    #[serde(default, deserialize_with = "lenient_tag")]
    pub task_type: Option<String>,

    #[serde(default)]
    pub task_data: TaskPayload,
}

impl TaskMessage {
    pub fn new(task_id: impl Into<TaskId>, task_type: impl Into<String>, task_data: TaskPayload) -> Self {
        TaskMessage {
            task_id: task_id.into(),
            task_type: Some(task_type.into()),
            task_data,
        }
    }

    /// Decode a message body
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(TaskError::MalformedMessage)
    }

    /// Encode to the JSON wire format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(TaskError::MalformedMessage)
    }

    /// Type tag as a string, if present
    pub fn tag(&self) -> Option<&str> {
        self.task_type.as_deref()
    }

    /// Built-in type for this message, if the tag is recognized
    pub fn known_type(&self) -> Option<TaskType> {
        self.tag().and_then(TaskType::from_str)
    }
}

fn lenient_tag<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(tag) => Ok(Some(tag)),
        _ => Ok(None),
    }
}

/// Status written to the task row.
///
/// Handler failures are reported through the result text, so every task
/// that reaches persistence is `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
        }
    }
}

/// Terminal state produced by one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: TaskStatus,

    /// Result text; `None` when no handler matched the task type
    pub result: Option<String>,
}

impl TaskOutcome {
    pub fn completed(result: Option<String>) -> Self {
        TaskOutcome {
            status: TaskStatus::Completed,
            result,
        }
    }
}
