//! Exec sessions against running workloads.
//!
//! Interactive sessions open an SSH connection to the node hosting a running
//! task and start a fresh container from the task's image with its declared
//! environment. Detached sessions run the service's task definition as a
//! one-off task with a command override and wait for it to exit.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use berth_cloud::{CloudError, ComputeNode};
use berth_exec::{CommandSpec, ExecError, quote};
use berth_model::{
    AccessConfig, ContainerDefinition, ContainerOverride, DeployTarget, DesiredStatus,
    ProjectConfig, TaskDefinition, TaskDetail,
};

use crate::context::Backends;
use crate::grant::{GrantError, GrantManager, ReleaseReport};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("service '{service}' has no {environment} deployment{}", region_suffix(.region))]
    UnknownTarget {
        service: String,
        environment: String,
        region: Option<String>,
    },
    #[error("no running task for '{service}' in cluster '{cluster}' ({region})")]
    NoRunningTask {
        service: String,
        cluster: String,
        region: String,
    },
    #[error("task definition '{reference}' not found in {region}")]
    MissingTaskDefinition { reference: String, region: String },
    #[error("task definition '{family}' has no container '{container}'")]
    MissingContainer { family: String, container: String },
    #[error("task {0} is not placed on a container instance")]
    Unplaced(String),
    #[error("task {task_arn} exited with code {code}")]
    TaskExitedNonZero { task_arn: String, code: i32 },
    #[error("task {task_arn} stopped without an exit code: {reason}")]
    TaskStoppedWithoutExit { task_arn: String, reason: String },
    #[error("session interrupted")]
    Cancelled,
    #[error(transparent)]
    Grant(#[from] GrantError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

fn region_suffix(region: &Option<String>) -> String {
    region
        .as_deref()
        .map(|r| format!(" in {r}"))
        .unwrap_or_default()
}

impl SessionError {
    /// Exit code the operator's process should end with.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::TaskExitedNonZero { code, .. } => *code,
            SessionError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Result of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Remote exit code.
    pub exit_code: i32,
    /// Cleanup report of the interactive session's grant.
    pub release: Option<ReleaseReport>,
}

/// First triple for `service` in `environment`, optionally restricted to `region`.
pub fn session_target(
    config: &ProjectConfig,
    service: &str,
    environment: &str,
    region: Option<&str>,
) -> Result<DeployTarget, SessionError> {
    config
        .targets_for(service, environment, region)
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::UnknownTarget {
            service: service.to_string(),
            environment: environment.to_string(),
            region: region.map(str::to_string),
        })
}

/// `docker run -it --rm -e K=V ... image args...`, quoted for the remote shell.
pub fn container_command(container: &ContainerDefinition, args: &[String]) -> String {
    let mut words = vec![
        "docker".to_string(),
        "run".to_string(),
        "-it".to_string(),
        "--rm".to_string(),
    ];
    for (key, value) in container.environment.effective() {
        words.push("-e".to_string());
        words.push(format!("{key}={value}"));
    }
    words.push(container.image.clone());
    words.extend(args.iter().cloned());
    quote::join(words)
}

/// SSH invocation running `remote` on `address` with a terminal attached.
pub fn ssh_command(access: &AccessConfig, address: &str, remote: String) -> CommandSpec {
    let mut cmd = CommandSpec::new("ssh").arg("-t");
    if let Some(key) = &access.private_key {
        cmd = cmd.arg("-i").arg(key.to_string_lossy());
    }
    cmd = cmd
        .arg("-o")
        .arg(format!("ConnectTimeout={}", access.connect_timeout().as_secs()))
        .arg("-o")
        .arg("StrictHostKeyChecking=accept-new");
    if access.ssh_port != 22 {
        cmd = cmd.arg("-p").arg(access.ssh_port.to_string());
    }
    cmd.arg(format!("{}@{address}", access.ssh_user)).arg(remote)
}

pub struct SessionManager<'a> {
    config: &'a ProjectConfig,
    backends: &'a Backends,
}

impl<'a> SessionManager<'a> {
    pub fn new(config: &'a ProjectConfig, backends: &'a Backends) -> Self {
        Self { config, backends }
    }

    /// Run `args` in a new container next to a running task of `target`, over SSH.
    ///
    /// The network grant is released on every outcome. A remote non-zero exit is
    /// reported through [`SessionOutcome::exit_code`], not as an error.
    pub async fn run_interactive(
        &self,
        target: &DeployTarget,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let cluster = self.config.cluster_name(&target.environment);
        let task = self.running_task(target, &cluster).await?;
        let definition = self
            .definition(&target.region, &task.task_definition_arn, target)
            .await?;
        let container = self.container(&definition, &target.service)?;
        let node = self.node(target, &cluster, &task).await?;

        let access = &self.config.access;
        let grants = GrantManager::new(
            self.backends.network.as_ref(),
            self.backends.address.as_ref(),
            access,
        );
        let grant = grants.acquire(&target.region, &cluster, &node).await?;

        let remote = container_command(container, args);
        let ssh = ssh_command(access, grant.address(), remote);
        info!(target: "berth.core.session", %target, grant = %grant.name(), address = grant.address(), "opening session");
        debug!(target: "berth.core.session", command = %ssh, "ssh");

        let res = self.backends.runner.interactive(&ssh, cancel).await;
        let release = grants.release(grant).await;
        if !release.is_clean() {
            warn!(target: "berth.core.session", failed = ?release.failed, "some access resources were not released");
        }

        match res {
            Ok(code) => {
                info!(target: "berth.core.session", %target, code, "session ended");
                Ok(SessionOutcome {
                    exit_code: code,
                    release: Some(release),
                })
            }
            Err(ExecError::Cancelled) => Err(SessionError::Cancelled),
            Err(e) => Err(SessionError::Exec(e)),
        }
    }

    /// Run the service's task definition once with `args` as the container command.
    ///
    /// Polls every `poll_interval` until the container reports an exit code.
    pub async fn run_detached(
        &self,
        target: &DeployTarget,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let cluster = self.config.cluster_name(&target.environment);
        let family = self.config.task_family(&target.service, &target.environment);
        let definition = self.definition(&target.region, &family, target).await?;
        let container = self.container(&definition, &target.service)?;

        let overrides = [ContainerOverride {
            name: container.name.clone(),
            command: args.to_vec(),
        }];
        let tasks = self.backends.tasks.as_ref();
        let started = tasks
            .run_task(&target.region, &cluster, &family, &overrides)
            .await?;
        let task_arn = started.task_arn.clone();
        info!(target: "berth.core.session", %target, task = %task_arn, "task started");

        let arns = [task_arn.clone()];
        let interval = self.config.poll_interval();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(target: "berth.core.session", task = %task_arn, "stopped waiting; the task keeps running");
                    return Err(SessionError::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let detail = tasks
                .describe_tasks(&target.region, &cluster, &arns)
                .await?
                .into_iter()
                .find(|t| t.task_arn == task_arn);
            let Some(detail) = detail else {
                continue;
            };
            debug!(target: "berth.core.session", task = %task_arn, status = ?detail.last_status, "poll");

            if let Some(code) = detail.exit_code() {
                info!(target: "berth.core.session", task = %task_arn, code, "task exited");
                if code != 0 {
                    return Err(SessionError::TaskExitedNonZero { task_arn, code });
                }
                return Ok(SessionOutcome {
                    exit_code: 0,
                    release: None,
                });
            }
            if detail.last_status.is_terminal() {
                let reason = detail
                    .stopped_reason
                    .clone()
                    .or_else(|| detail.containers.first().and_then(|c| c.reason.clone()))
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(SessionError::TaskStoppedWithoutExit { task_arn, reason });
            }
        }
    }

    async fn running_task(
        &self,
        target: &DeployTarget,
        cluster: &str,
    ) -> Result<TaskDetail, SessionError> {
        let tasks = self.backends.tasks.as_ref();
        let no_task = || SessionError::NoRunningTask {
            service: target.service.clone(),
            cluster: cluster.to_string(),
            region: target.region.clone(),
        };

        let arns = tasks
            .list_tasks(&target.region, cluster, &target.service, DesiredStatus::Running)
            .await?;
        let first = arns.into_iter().next().ok_or_else(no_task)?;
        tasks
            .describe_tasks(&target.region, cluster, std::slice::from_ref(&first))
            .await?
            .into_iter()
            .find(|t| t.task_arn == first)
            .ok_or_else(no_task)
    }

    /// Describe by ARN when known, by the triple's family otherwise.
    async fn definition(
        &self,
        region: &str,
        reference: &str,
        target: &DeployTarget,
    ) -> Result<TaskDefinition, SessionError> {
        let reference = if reference.is_empty() {
            self.config.task_family(&target.service, &target.environment)
        } else {
            reference.to_string()
        };
        self.backends
            .tasks
            .describe_task_definition(region, &reference)
            .await?
            .ok_or_else(|| SessionError::MissingTaskDefinition {
                reference,
                region: region.to_string(),
            })
    }

    fn container<'d>(
        &self,
        definition: &'d TaskDefinition,
        service: &str,
    ) -> Result<&'d ContainerDefinition, SessionError> {
        definition
            .container(service)
            .ok_or_else(|| SessionError::MissingContainer {
                family: definition.family.clone(),
                container: service.to_string(),
            })
    }

    async fn node(
        &self,
        target: &DeployTarget,
        cluster: &str,
        task: &TaskDetail,
    ) -> Result<ComputeNode, SessionError> {
        let instance = task
            .container_instance_arn
            .as_deref()
            .ok_or_else(|| SessionError::Unplaced(task.task_arn.clone()))?;
        Ok(self
            .backends
            .compute
            .resolve_node(&target.region, cluster, instance)
            .await?)
    }
}
