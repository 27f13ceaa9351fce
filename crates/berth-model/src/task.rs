//! Scheduler-side descriptors.
//!
//! Field names follow the scheduler's camelCase JSON so that a definition can be
//! described, mutated and registered again without losing fields this crate
//! does not model. Unmodelled fields land in the `extra` maps verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TaskEnv;

/// Top-level keys the scheduler assigns on registration and rejects on input.
const SERVER_ASSIGNED_KEYS: &[&str] = &[
    "compatibilities",
    "registeredAt",
    "registeredBy",
    "deregisteredAt",
];

/// Versioned, immutable task descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_attributes: Option<Value>,
    #[serde(default)]
    pub container_definitions: Vec<ContainerDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskDefinition {
    /// Copy of this definition suitable for registering as a new revision.
    ///
    /// Drops the ARN, revision number, status and every other server-assigned field.
    pub fn registration(&self) -> TaskDefinition {
        let mut out = self.clone();
        out.task_definition_arn = None;
        out.revision = None;
        out.status = None;
        out.requires_attributes = None;
        for key in SERVER_ASSIGNED_KEYS {
            out.extra.remove(*key);
        }
        out
    }

    /// Container for `name`, falling back to the only container of a single-container definition.
    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        let idx = self.container_index(name)?;
        self.container_definitions.get(idx)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerDefinition> {
        let idx = self.container_index(name)?;
        self.container_definitions.get_mut(idx)
    }

    fn container_index(&self, name: &str) -> Option<usize> {
        self.container_definitions
            .iter()
            .position(|c| c.name == name)
            .or_else(|| (self.container_definitions.len() == 1).then_some(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    #[serde(default)]
    pub environment: TaskEnv,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Mutable binding of a cluster service to one task definition revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningService {
    pub service_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub task_definition: String,
    #[serde(default)]
    pub desired_count: u32,
    #[serde(default)]
    pub running_count: u32,
}

impl RunningService {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }
}

/// Desired-status filter accepted by the scheduler's task listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredStatus {
    Running,
    Pending,
    Stopped,
}

impl DesiredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesiredStatus::Running => "RUNNING",
            DesiredStatus::Pending => "PENDING",
            DesiredStatus::Stopped => "STOPPED",
        }
    }
}

/// Lifecycle state reported for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskLifecycle {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl TaskLifecycle {
    /// Returns `true` if the task will not transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskLifecycle::Stopped | TaskLifecycle::Deleted)
    }

}

impl Default for TaskLifecycle {
    fn default() -> Self {
        TaskLifecycle::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    pub task_arn: String,
    #[serde(default)]
    pub task_definition_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_instance_arn: Option<String>,
    #[serde(default)]
    pub last_status: TaskLifecycle,
    #[serde(default)]
    pub containers: Vec<ContainerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<String>,
}

impl TaskDetail {
    /// Exit code of the first container, once it has one.
    pub fn exit_code(&self) -> Option<i32> {
        self.containers.first().and_then(|c| c.exit_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Command override for a one-off task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    pub name: String,
    pub command: Vec<String>,
}
