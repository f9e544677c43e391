//! Store domain models
//!
//! Snapshots of the records held by the scheduling store: desired process
//! specs, actual process instances and one-shot tasks. Every value here is
//! owned; watch notifications and hub events carry copies, never references
//! into store state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optimistic-concurrency tag attached to mutable store records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationTag {
    /// Record generation, changes when the record is recreated
    pub epoch: u64,
    /// Monotonic update counter within an epoch
    pub index: u64,
}

impl ModificationTag {
    /// Tag for the next update of the same record.
    #[must_use]
    pub fn incremented(self) -> Self {
        Self {
            epoch: self.epoch,
            index: self.index + 1,
        }
    }
}

/// Declared target configuration for a long-running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredSpec {
    /// Unique process identifier
    pub process_guid: String,
    /// Domain the process belongs to
    pub domain: String,
    /// Root filesystem the instances run on
    #[serde(default)]
    pub root_fs: String,
    /// Target number of instances
    pub instances: u32,
    /// Opaque action definition executed by each instance
    #[serde(default)]
    pub action: serde_json::Value,
    /// Memory limit in megabytes
    #[serde(default)]
    pub memory_mb: u32,
    /// Disk limit in megabytes
    #[serde(default)]
    pub disk_mb: u32,
    /// Container ports exposed by each instance
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Routes mapped to the process
    #[serde(default)]
    pub routes: Vec<String>,
    /// Free-form annotation set by the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Concurrency tag
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl DesiredSpec {
    /// Create a spec with the given identity and instance count.
    pub fn new(process_guid: impl Into<String>, domain: impl Into<String>, instances: u32) -> Self {
        Self {
            process_guid: process_guid.into(),
            domain: domain.into(),
            root_fs: String::new(),
            instances,
            action: serde_json::Value::Null,
            memory_mb: 0,
            disk_mb: 0,
            ports: Vec::new(),
            routes: Vec::new(),
            annotation: None,
            modification_tag: ModificationTag::default(),
        }
    }
}

/// Lifecycle state of an actual instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualState {
    /// Not yet placed on a cell
    Unclaimed,
    /// Placed on a cell, starting
    Claimed,
    /// Running and reachable
    Running,
    /// Exited unexpectedly
    Crashed,
}

/// Host to container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container
    pub container_port: u16,
    /// Port on the host
    pub host_port: u16,
}

/// Observed state of one instance of a long-running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualInstance {
    /// Process this instance belongs to
    pub process_guid: String,
    /// Instance index within the process
    pub index: u32,
    /// Unique identifier of this incarnation
    #[serde(default)]
    pub instance_guid: String,
    /// Cell the instance is placed on
    #[serde(default)]
    pub cell_id: String,
    /// Domain the process belongs to
    pub domain: String,
    /// Current state
    pub state: ActualState,
    /// Host address when running
    #[serde(default)]
    pub address: String,
    /// Port mappings when running
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Number of crashes observed so far
    #[serde(default)]
    pub crash_count: u32,
    /// Reason for the last crash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_reason: Option<String>,
    /// Time of the last state change
    pub since: DateTime<Utc>,
    /// Concurrency tag
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl ActualInstance {
    /// Create an unclaimed instance record.
    pub fn new(process_guid: impl Into<String>, index: u32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            instance_guid: String::new(),
            cell_id: String::new(),
            domain: domain.into(),
            state: ActualState::Unclaimed,
            address: String::new(),
            ports: Vec::new(),
            crash_count: 0,
            crash_reason: None,
            since: Utc::now(),
            modification_tag: ModificationTag::default(),
        }
    }

    /// Store key of this instance.
    #[must_use]
    pub fn key(&self) -> (String, u32) {
        (self.process_guid.clone(), self.index)
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Desired but not yet started
    Pending,
    /// Executing on a cell
    Running,
    /// Finished, result awaiting delivery
    Completed,
    /// A dispatcher claimed the result for delivery
    Resolving,
    /// Result delivered or acknowledged
    Resolved,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Resolving => write!(f, "resolving"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// A one-shot unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub task_guid: String,
    /// Domain the task belongs to
    pub domain: String,
    /// Opaque action definition
    #[serde(default)]
    pub action: serde_json::Value,
    /// URL notified when the task completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_callback_url: Option<String>,
    /// Current state
    pub state: TaskState,
    /// Whether the task failed
    #[serde(default)]
    pub failed: bool,
    /// Failure description when `failed`
    #[serde(default)]
    pub failure_reason: String,
    /// Result payload captured from the task
    #[serde(default)]
    pub result: String,
    /// Free-form annotation set by the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task.
    pub fn new(task_guid: impl Into<String>, domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_guid: task_guid.into(),
            domain: domain.into(),
            action: serde_json::Value::Null,
            completion_callback_url: None,
            state: TaskState::Pending,
            failed: false,
            failure_reason: String::new(),
            result: String::new(),
            annotation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the completion callback URL.
    #[must_use]
    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.completion_callback_url = Some(url.into());
        self
    }

    /// Build the representation posted to the completion callback.
    #[must_use]
    pub fn to_response(&self) -> TaskResponse {
        TaskResponse::from(self)
    }
}

/// Client-facing view of a task, as posted to completion callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Task identifier
    pub task_guid: String,
    /// Task domain
    pub domain: String,
    /// State at the time of delivery
    pub state: TaskState,
    /// Whether the task failed
    pub failed: bool,
    /// Failure description
    pub failure_reason: String,
    /// Result payload
    pub result: String,
    /// Client annotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_guid: task.task_guid.clone(),
            domain: task.domain.clone(),
            state: task.state,
            failed: task.failed,
            failure_reason: task.failure_reason.clone(),
            result: task.result.clone(),
            annotation: task.annotation.clone(),
            created_at: task.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_response_omits_action_and_callback() {
        let mut task = Task::new("task-1", "tests").with_callback("http://example.com/done");
        task.state = TaskState::Completed;
        task.result = "42".to_string();
        task.action = serde_json::json!({"run": {"path": "ls"}});

        let json = serde_json::to_value(task.to_response()).unwrap();
        assert_eq!(json["task_guid"], "task-1");
        assert_eq!(json["state"], "completed");
        assert_eq!(json["result"], "42");
        assert!(json.get("action").is_none());
        assert!(json.get("completion_callback_url").is_none());
        assert!(json.get("annotation").is_none());
    }

    #[test]
    fn test_modification_tag_increment() {
        let tag = ModificationTag { epoch: 7, index: 1 };
        assert_eq!(tag.incremented(), ModificationTag { epoch: 7, index: 2 });
    }

    #[test]
    fn test_desired_spec_defaults_on_deserialize() {
        let spec: DesiredSpec = serde_json::from_str(
            r#"{"process_guid":"web","domain":"apps","instances":3}"#,
        )
        .unwrap();
        assert_eq!(spec.instances, 3);
        assert!(spec.routes.is_empty());
        assert_eq!(spec.modification_tag, ModificationTag::default());
    }
}
