use async_trait::async_trait;

use berth_model::{ContainerOverride, DesiredStatus, RunningService, TaskDefinition, TaskDetail};

use crate::CloudResult;

/// Change applied by [`TaskRegistry::update_service`]; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceUpdate {
    pub task_definition: Option<String>,
    pub desired_count: Option<u32>,
}

impl ServiceUpdate {
    pub fn task_definition(arn: impl Into<String>) -> Self {
        Self {
            task_definition: Some(arn.into()),
            desired_count: None,
        }
    }

    pub fn desired_count(count: u32) -> Self {
        Self {
            task_definition: None,
            desired_count: Some(count),
        }
    }
}

/// Task definitions, services and tasks of the container scheduler.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Latest active revision of `family`, or `None` if the family does not exist.
    ///
    /// A full task definition ARN selects that exact revision instead.
    async fn describe_task_definition(
        &self,
        region: &str,
        family: &str,
    ) -> CloudResult<Option<TaskDefinition>>;

    /// Register `definition` and return it as stored, with its new ARN and revision.
    async fn register_task_definition(
        &self,
        region: &str,
        definition: &TaskDefinition,
    ) -> CloudResult<TaskDefinition>;

    async fn describe_service(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
    ) -> CloudResult<Option<RunningService>>;

    /// Fails with [`CloudError::ServiceNotFound`](crate::CloudError::ServiceNotFound)
    /// when the service is missing or inactive.
    async fn update_service(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
        update: &ServiceUpdate,
    ) -> CloudResult<RunningService>;

    /// Task ARNs of `service` in `cluster` with the given desired status.
    async fn list_tasks(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
        status: DesiredStatus,
    ) -> CloudResult<Vec<String>>;

    async fn describe_tasks(
        &self,
        region: &str,
        cluster: &str,
        task_arns: &[String],
    ) -> CloudResult<Vec<TaskDetail>>;

    /// Start one task of `family` with the given container overrides.
    async fn run_task(
        &self,
        region: &str,
        cluster: &str,
        family: &str,
        overrides: &[ContainerOverride],
    ) -> CloudResult<TaskDetail>;
}

/// Worker node hosting a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeNode {
    pub instance_id: String,
    pub vpc_id: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    /// Security group ids attached to the node, in the order reported.
    pub security_groups: Vec<String>,
}

/// Maps scheduler container instances to fleet nodes.
#[async_trait]
pub trait ComputeRegistry: Send + Sync {
    async fn resolve_node(
        &self,
        region: &str,
        cluster: &str,
        container_instance_arn: &str,
    ) -> CloudResult<ComputeNode>;
}
