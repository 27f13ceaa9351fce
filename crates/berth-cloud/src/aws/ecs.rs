use async_trait::async_trait;
use serde_json::{Value, json};

use berth_model::{ContainerOverride, DesiredStatus, RunningService, TaskDefinition, TaskDetail};

use super::{AwsCli, at, has_code, string_at};
use crate::scheduler::{ComputeNode, ComputeRegistry, ServiceUpdate, TaskRegistry};
use crate::{CloudError, CloudResult};

const SERVICE_GONE: &[&str] = &["ServiceNotFoundException", "ServiceNotActiveException"];

impl AwsCli {
    fn service_gone(err: CloudError, cluster: &str, service: &str) -> CloudError {
        if has_code(&err, SERVICE_GONE) {
            CloudError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            }
        } else {
            err
        }
    }
}

#[async_trait]
impl TaskRegistry for AwsCli {
    async fn describe_task_definition(
        &self,
        region: &str,
        family: &str,
    ) -> CloudResult<Option<TaskDefinition>> {
        let op = "describe-task-definition";
        match self
            .call(region, "ecs", op, ["--task-definition", family])
            .await
        {
            Ok(resp) => Ok(Some(at(&resp, "/taskDefinition", op)?)),
            Err(err) if has_code(&err, &["ClientException"]) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn register_task_definition(
        &self,
        region: &str,
        definition: &TaskDefinition,
    ) -> CloudResult<TaskDefinition> {
        let op = "register-task-definition";
        let input = serde_json::to_string(&definition.registration())
            .map_err(|e| CloudError::decode(op, e))?;
        let resp = self
            .call(region, "ecs", op, ["--cli-input-json".to_string(), input])
            .await?;
        at(&resp, "/taskDefinition", op)
    }

    async fn describe_service(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
    ) -> CloudResult<Option<RunningService>> {
        let op = "describe-services";
        let resp = self
            .call(region, "ecs", op, ["--cluster", cluster, "--services", service])
            .await?;
        let services: Vec<RunningService> = at(&resp, "/services", op)?;
        Ok(services.into_iter().next())
    }

    async fn update_service(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
        update: &ServiceUpdate,
    ) -> CloudResult<RunningService> {
        let op = "update-service";
        let mut args = vec![
            "--cluster".to_string(),
            cluster.to_string(),
            "--service".to_string(),
            service.to_string(),
        ];
        if let Some(arn) = &update.task_definition {
            args.extend(["--task-definition".to_string(), arn.clone()]);
        }
        if let Some(count) = update.desired_count {
            args.extend(["--desired-count".to_string(), count.to_string()]);
        }

        let resp = self
            .call(region, "ecs", op, args)
            .await
            .map_err(|e| Self::service_gone(e, cluster, service))?;
        at(&resp, "/service", op)
    }

    async fn list_tasks(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
        status: DesiredStatus,
    ) -> CloudResult<Vec<String>> {
        let op = "list-tasks";
        let resp = self
            .call(
                region,
                "ecs",
                op,
                [
                    "--cluster",
                    cluster,
                    "--service-name",
                    service,
                    "--desired-status",
                    status.as_str(),
                ],
            )
            .await
            .map_err(|e| Self::service_gone(e, cluster, service))?;
        at(&resp, "/taskArns", op)
    }

    async fn describe_tasks(
        &self,
        region: &str,
        cluster: &str,
        task_arns: &[String],
    ) -> CloudResult<Vec<TaskDetail>> {
        if task_arns.is_empty() {
            return Ok(Vec::new());
        }
        let op = "describe-tasks";
        let mut args = vec!["--cluster".to_string(), cluster.to_string(), "--tasks".to_string()];
        args.extend(task_arns.iter().cloned());

        let resp = self.call(region, "ecs", op, args).await?;
        at(&resp, "/tasks", op)
    }

    async fn run_task(
        &self,
        region: &str,
        cluster: &str,
        family: &str,
        overrides: &[ContainerOverride],
    ) -> CloudResult<TaskDetail> {
        let op = "run-task";
        let overrides = json!({ "containerOverrides": overrides }).to_string();
        let resp = self
            .call(
                region,
                "ecs",
                op,
                [
                    "--cluster",
                    cluster,
                    "--task-definition",
                    family,
                    "--count",
                    "1",
                    "--overrides",
                    overrides.as_str(),
                ],
            )
            .await?;

        let mut tasks: Vec<TaskDetail> = at(&resp, "/tasks", op)?;
        if tasks.is_empty() {
            let failures: Vec<Value> = at(&resp, "/failures", op).unwrap_or_default();
            let reason = failures
                .first()
                .and_then(|f| f.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or("no task started")
                .to_string();
            return Err(CloudError::Rejected {
                operation: format!("ecs {op}"),
                message: reason,
            });
        }
        Ok(tasks.swap_remove(0))
    }
}

#[async_trait]
impl ComputeRegistry for AwsCli {
    async fn resolve_node(
        &self,
        region: &str,
        cluster: &str,
        container_instance_arn: &str,
    ) -> CloudResult<ComputeNode> {
        let op = "describe-container-instances";
        let resp = self
            .call(
                region,
                "ecs",
                op,
                [
                    "--cluster",
                    cluster,
                    "--container-instances",
                    container_instance_arn,
                ],
            )
            .await?;
        let instance_id = string_at(&resp, "/containerInstances/0/ec2InstanceId", op)
            .map_err(|_| CloudError::NodeNotFound(container_instance_arn.to_string()))?;

        let op = "describe-instances";
        let resp = self
            .call(region, "ec2", op, ["--instance-ids", instance_id.as_str()])
            .await?;
        let instance = resp
            .pointer("/Reservations/0/Instances/0")
            .ok_or_else(|| CloudError::NodeNotFound(instance_id.clone()))?;

        let security_groups: Vec<Value> = at(instance, "/SecurityGroups", op)?;
        Ok(ComputeNode {
            vpc_id: string_at(instance, "/VpcId", op)?,
            public_ip: at(instance, "/PublicIpAddress", op)?,
            private_ip: at(instance, "/PrivateIpAddress", op)?,
            security_groups: security_groups
                .iter()
                .filter_map(|g| g.get("GroupId").and_then(Value::as_str))
                .map(str::to_string)
                .collect(),
            instance_id,
        })
    }
}
