//! Client side of the task service.
//!
//! Provides a `TaskApi` trait over the REST endpoints, with:
//! - `client::RestClient`, the HTTP implementation (reqwest)
//! - `events::EventChannel`, the server-sent event subscription

pub mod client;
pub mod events;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ActionError, LoadError};
use crate::line::LogLine;

pub type TaskId = u64;

/// Lifecycle state of a task, numbered as on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskStatus {
    Queued = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    Canceled = 5,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "Queued",
            TaskStatus::Running => "Running",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Canceled => "Canceled",
        }
    }

    /// Queued and running tasks can be cancelled but not downloaded
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

impl TryFrom<u8> for TaskStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskStatus::Queued),
            2 => Ok(TaskStatus::Running),
            3 => Ok(TaskStatus::Completed),
            4 => Ok(TaskStatus::Failed),
            5 => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status {}", other)),
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        status as u8
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A task as listed by the server
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub command: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub exit_code: i32,
    /// Unix seconds, 0 when not started
    #[serde(default)]
    pub start_time: u64,
    /// Unix seconds, 0 when not finished
    #[serde(default)]
    pub end_time: u64,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Format a Unix timestamp for display, "N/A" when unset
pub fn format_timestamp(secs: u64) -> String {
    if secs == 0 {
        return "N/A".to_string();
    }
    match Local.timestamp_opt(secs as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "N/A".to_string(),
    }
}

/// One page of the task list
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TaskPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub total: u64,
}

/// Parameters of a task list request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub offset: usize,
    pub limit: usize,
    pub status: Option<TaskStatus>,
}

/// Body of a create-task request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub name: String,
    pub command: String,
}

impl NewTask {
    /// Trim both fields and require them to be non-empty
    pub fn new(name: &str, command: &str) -> Result<Self, ActionError> {
        let name = name.trim();
        let command = command.trim();
        if name.is_empty() {
            return Err(ActionError::Invalid("Task name is required".to_string()));
        }
        if command.is_empty() {
            return Err(ActionError::Invalid("Command is required".to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            command: command.to_string(),
        })
    }
}

/// A contiguous run of numbered log lines plus the task's total line count
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogChunk {
    pub lines: Vec<LogLine>,
    pub total_lines: u64,
}

impl LogChunk {
    /// Number the bare strings returned by the logs endpoint.
    ///
    /// `from == 0 && to == 0` is a tail read: the lines end at `total_lines`.
    /// Otherwise the lines start at `from` and at most `to - from + 1` are kept.
    pub fn from_wire(from: u64, to: u64, logs: Vec<String>, total_lines: u64) -> Self {
        let (first, keep) = if from == 0 && to == 0 {
            let count = logs.len() as u64;
            (total_lines.saturating_sub(count) + 1, logs.len())
        } else {
            let span = to.saturating_sub(from) + 1;
            (from.max(1), logs.len().min(span as usize))
        };

        let lines = logs
            .into_iter()
            .take(keep)
            .enumerate()
            .map(|(i, text)| LogLine::new(first + i as u64, text))
            .collect();

        Self { lines, total_lines }
    }

    pub fn first_line(&self) -> Option<u64> {
        self.lines.first().map(|l| l.number)
    }

    pub fn last_line(&self) -> Option<u64> {
        self.lines.last().map(|l| l.number)
    }
}

/// Operations the client needs from the task service
#[async_trait::async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(&self, query: &ListQuery) -> Result<TaskPage, LoadError>;

    /// Fetch lines `from..=to`; `0, 0` asks for the server's default tail window
    async fn fetch_log_range(&self, task_id: TaskId, from: u64, to: u64)
    -> Result<LogChunk, LoadError>;

    async fn create_task(&self, task: &NewTask) -> Result<Task, ActionError>;

    /// Request cancellation; the resulting status arrives on the event stream
    async fn cancel_task(&self, task_id: TaskId) -> Result<(), ActionError>;

    /// Save the complete log of a finished task into `dir`, returning the file written
    async fn download_logs(&self, task_id: TaskId, dir: &Path) -> Result<PathBuf, ActionError>;
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_values() {
        let status: TaskStatus = serde_json::from_str("5").unwrap();
        assert_eq!(status, TaskStatus::Canceled);
        assert!(serde_json::from_str::<TaskStatus>("9").is_err());
        assert_eq!(serde_json::to_string(&TaskStatus::Running).unwrap(), "2");
    }

    #[test]
    fn test_active_statuses() {
        assert!(TaskStatus::Queued.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(!TaskStatus::Failed.is_active());
    }

    #[test]
    fn test_task_page_with_null_tasks() {
        let page: TaskPage = serde_json::from_str(r#"{"tasks": null, "total": 0}"#).unwrap();
        assert!(page.tasks.is_empty());
    }

    #[test]
    fn test_task_decoding() {
        let json = r#"{
            "id": 7, "name": "primes", "command": "print_100000_prime_numbers",
            "status": 4, "reason": "exit status 1", "exit_code": 1,
            "start_time": 1700000000, "end_time": 1700000042
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, 7);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, 1);
        assert!(!task.is_active());
    }

    #[test]
    fn test_format_timestamp_unset() {
        assert_eq!(format_timestamp(0), "N/A");
        assert_ne!(format_timestamp(1_700_000_000), "N/A");
    }

    #[test]
    fn test_new_task_requires_fields() {
        assert!(NewTask::new("  ", "ls").is_err());
        assert!(NewTask::new("list", "").is_err());
        let task = NewTask::new(" list ", " ls -la ").unwrap();
        assert_eq!(task.name, "list");
        assert_eq!(task.command, "ls -la");
    }

    #[test]
    fn test_tail_chunk_numbering() {
        let logs = (151..=250).map(|n| format!("line {}", n)).collect();
        let chunk = LogChunk::from_wire(0, 0, logs, 250);
        assert_eq!(chunk.first_line(), Some(151));
        assert_eq!(chunk.last_line(), Some(250));
        assert_eq!(chunk.lines[0].text, "line 151");
    }

    #[test]
    fn test_range_chunk_is_clamped_to_request() {
        let logs = vec!["a".to_string(), "b".to_string()];
        let chunk = LogChunk::from_wire(12, 12, logs, 40);
        assert_eq!(chunk.lines, vec![LogLine::new(12, "a")]);
    }

    #[test]
    fn test_short_tail_starts_at_one() {
        let logs = vec!["only".to_string()];
        let chunk = LogChunk::from_wire(0, 0, logs, 1);
        assert_eq!(chunk.first_line(), Some(1));
    }
}
