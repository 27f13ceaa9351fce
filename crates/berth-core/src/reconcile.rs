//! Task/service reconciliation.
//!
//! For one `(service, region, environment)` triple: describe the current task
//! definition, rewrite the service container (image, resources, managed
//! environment), register it as a new revision and point the service at it.

use thiserror::Error;
use tracing::{debug, info};

use berth_cloud::{CloudError, ServiceUpdate, TaskRegistry};
use berth_model::{ArtifactTag, DeployTarget, ProjectConfig, RunningService, TaskDefinition, TaskEnv};

pub const ENV_AWS_REGION: &str = "AWS_REGION";
pub const ENV_GIT_SHA: &str = "GIT_SHA";
pub const ENV_RACK_ENV: &str = "RACK_ENV";
pub const ENV_CONFIG_BUCKET: &str = "S3_CONFIG_BUCKET";
pub const ENV_CONFIG_ENVIRONMENT: &str = "S3_CONFIG_ENVIRONMENT";
pub const ENV_CONFIG_REVISION: &str = "S3_CONFIG_REVISION";

/// Keys owned by the deployment; every other container variable is left untouched.
pub const MANAGED_KEYS: &[&str] = &[
    ENV_AWS_REGION,
    ENV_GIT_SHA,
    ENV_RACK_ENV,
    ENV_CONFIG_BUCKET,
    ENV_CONFIG_ENVIRONMENT,
    ENV_CONFIG_REVISION,
];

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("task definition '{family}' not found in {region}")]
    MissingTaskDefinition { family: String, region: String },
    #[error("service '{service}' not found or inactive in cluster '{cluster}' ({region})")]
    MissingService {
        cluster: String,
        service: String,
        region: String,
    },
    #[error("task definition '{family}' has no container '{container}'")]
    MissingContainer { family: String, container: String },
    #[error(transparent)]
    Cloud(CloudError),
}

impl ReconcileError {
    /// What the operator should do about it.
    pub fn remediation(&self) -> &'static str {
        match self {
            ReconcileError::MissingTaskDefinition { .. } => {
                "run the environment bootstrap to create the task definition"
            }
            ReconcileError::MissingService { .. } => {
                "run the environment bootstrap to create the service"
            }
            ReconcileError::MissingContainer { .. } => {
                "name the container after the service or keep a single container"
            }
            ReconcileError::Cloud(_) => "check credentials and retry",
        }
    }
}

/// Successful reconciliation of one triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub target: DeployTarget,
    pub task_definition_arn: String,
    pub revision: Option<u64>,
}

/// Managed environment for a deployment of `target` at `tag`.
///
/// `S3_CONFIG_REVISION` is carried over from `current`, defaulting to `0`.
pub fn deployment_env(
    config: &ProjectConfig,
    target: &DeployTarget,
    tag: &ArtifactTag,
    current: &TaskEnv,
) -> TaskEnv {
    let revision = current.get(ENV_CONFIG_REVISION).unwrap_or("0").to_string();
    [
        (ENV_AWS_REGION, target.region.clone()),
        (ENV_GIT_SHA, tag.to_string()),
        (ENV_RACK_ENV, target.environment.clone()),
        (ENV_CONFIG_BUCKET, config.config_s3_bucket.clone()),
        (ENV_CONFIG_ENVIRONMENT, target.environment.clone()),
        (ENV_CONFIG_REVISION, revision),
    ]
    .into_iter()
    .collect()
}

/// Replace the managed keys of `env` with `managed`, keeping every other entry in place.
pub fn apply_managed(env: &mut TaskEnv, managed: &TaskEnv) {
    for (key, value) in managed.effective() {
        env.set(key, value);
    }
}

pub struct Reconciler<'a> {
    config: &'a ProjectConfig,
    tasks: &'a dyn TaskRegistry,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ProjectConfig, tasks: &'a dyn TaskRegistry) -> Self {
        Self { config, tasks }
    }

    /// Deploy `tag` to one triple.
    pub async fn reconcile(
        &self,
        target: &DeployTarget,
        tag: &ArtifactTag,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let resources = self
            .config
            .service(&target.service)
            .map(|s| s.resources)
            .unwrap_or_default();
        let image = format!("{}:{}", target.repository_url, tag);

        self.rewrite(target, |def, family| {
            let container = def.container_mut(&target.service).ok_or_else(|| {
                ReconcileError::MissingContainer {
                    family: family.to_string(),
                    container: target.service.clone(),
                }
            })?;
            container.image = image.clone();
            container.cpu = Some(resources.cpu_units);
            container.memory = Some(resources.memory_units);
            let managed = deployment_env(self.config, target, tag, &container.environment);
            apply_managed(&mut container.environment, &managed);
            Ok(())
        })
        .await
    }

    /// Point one triple at config `revision` without changing its image.
    pub async fn apply_config_revision(
        &self,
        target: &DeployTarget,
        revision: u64,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.rewrite(target, |def, family| {
            let container = def.container_mut(&target.service).ok_or_else(|| {
                ReconcileError::MissingContainer {
                    family: family.to_string(),
                    container: target.service.clone(),
                }
            })?;
            container
                .environment
                .set(ENV_CONFIG_REVISION, revision.to_string());
            Ok(())
        })
        .await
    }

    /// Set the desired task count of one triple's service.
    pub async fn scale(
        &self,
        target: &DeployTarget,
        count: u32,
    ) -> Result<RunningService, ReconcileError> {
        let family = self.config.task_family(&target.service, &target.environment);
        self.current(target, &family).await?;

        let cluster = self.config.cluster_name(&target.environment);
        let svc = self
            .update(target, &cluster, &ServiceUpdate::desired_count(count))
            .await?;
        info!(target: "berth.core.reconcile", %target, count, "scaled");
        Ok(svc)
    }

    async fn current(
        &self,
        target: &DeployTarget,
        family: &str,
    ) -> Result<TaskDefinition, ReconcileError> {
        self.tasks
            .describe_task_definition(&target.region, family)
            .await
            .map_err(ReconcileError::Cloud)?
            .ok_or_else(|| ReconcileError::MissingTaskDefinition {
                family: family.to_string(),
                region: target.region.clone(),
            })
    }

    async fn update(
        &self,
        target: &DeployTarget,
        cluster: &str,
        update: &ServiceUpdate,
    ) -> Result<RunningService, ReconcileError> {
        self.tasks
            .update_service(&target.region, cluster, &target.service, update)
            .await
            .map_err(|e| match e {
                CloudError::ServiceNotFound { cluster, service } => ReconcileError::MissingService {
                    cluster,
                    service,
                    region: target.region.clone(),
                },
                other => ReconcileError::Cloud(other),
            })
    }

    /// Describe, mutate, register and point the service at the new revision.
    async fn rewrite<F>(
        &self,
        target: &DeployTarget,
        mutate: F,
    ) -> Result<ReconcileOutcome, ReconcileError>
    where
        F: FnOnce(&mut TaskDefinition, &str) -> Result<(), ReconcileError>,
    {
        let family = self.config.task_family(&target.service, &target.environment);
        let current = self.current(target, &family).await?;
        debug!(target: "berth.core.reconcile", %family, revision = ?current.revision, "current definition");

        let mut next = current.registration();
        mutate(&mut next, &family)?;

        let registered = self
            .tasks
            .register_task_definition(&target.region, &next)
            .await
            .map_err(ReconcileError::Cloud)?;
        let arn = registered.task_definition_arn.clone().ok_or_else(|| {
            ReconcileError::Cloud(CloudError::decode(
                "register-task-definition",
                format!("no ARN returned for '{family}'"),
            ))
        })?;

        let cluster = self.config.cluster_name(&target.environment);
        self.update(target, &cluster, &ServiceUpdate::task_definition(arn.clone()))
            .await?;

        info!(target: "berth.core.reconcile", %target, revision = ?registered.revision, "service updated");
        Ok(ReconcileOutcome {
            target: target.clone(),
            task_definition_arn: arn,
            revision: registered.revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{REGION, sample_config, seed_triple, task_definition};
    use berth_cloud::memory::MemoryCloud;
    use berth_model::EnvironmentFilter;

    fn staging(cfg: &ProjectConfig) -> DeployTarget {
        cfg.targets(&EnvironmentFilter::only(["staging"]))
            .into_iter()
            .next()
            .unwrap()
    }

    fn tag(commit: &str) -> ArtifactTag {
        ArtifactTag::from_commit(commit).unwrap()
    }

    #[tokio::test]
    async fn rewrites_image_resources_and_managed_env() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        seed_triple(&cloud, &cfg, "web", "staging");

        let outcome = Reconciler::new(&cfg, &cloud)
            .reconcile(&staging(&cfg), &tag("abc123"))
            .await
            .unwrap();
        assert_eq!(outcome.revision, Some(2));

        let revs = cloud.revisions(REGION, "acme_web_staging");
        let container = revs[1].container("web").unwrap();
        assert_eq!(container.image, format!("{}:abc123", crate::testing::REPO));
        assert_eq!(container.cpu, Some(512));
        assert_eq!(container.memory, Some(1024));

        let env = &container.environment;
        assert_eq!(env.get(ENV_GIT_SHA), Some("abc123"));
        assert_eq!(env.get(ENV_RACK_ENV), Some("staging"));
        assert_eq!(env.get(ENV_CONFIG_BUCKET), Some("acme-config"));
        // existing revision and unrelated keys survive
        assert_eq!(env.get(ENV_CONFIG_REVISION), Some("5"));
        assert_eq!(env.get("DATABASE_URL"), Some("postgres://db/acme"));
        assert_eq!(env.iter().filter(|kv| kv.key() == ENV_GIT_SHA).count(), 1);

        let svc = cloud.service(REGION, "acme_staging", "web").unwrap();
        assert_eq!(svc.task_definition, outcome.task_definition_arn);
    }

    #[tokio::test]
    async fn registration_without_arn_leaves_service_untouched() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        seed_triple(&cloud, &cfg, "web", "staging");
        cloud.with_registrations_without_arn();

        let err = Reconciler::new(&cfg, &cloud)
            .reconcile(&staging(&cfg), &tag("abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Cloud(CloudError::Decode { .. })));
        assert_eq!(cloud.count("update_service"), 0);
    }

    #[tokio::test]
    async fn preserves_unmodelled_container_fields() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        seed_triple(&cloud, &cfg, "web", "staging");

        Reconciler::new(&cfg, &cloud)
            .reconcile(&staging(&cfg), &tag("abc123"))
            .await
            .unwrap();

        let revs = cloud.revisions(REGION, "acme_web_staging");
        let container = revs[1].container("web").unwrap();
        assert_eq!(
            container.extra["logConfiguration"]["logDriver"],
            serde_json::json!("awslogs")
        );
        assert_eq!(revs[1].extra["taskRoleArn"], revs[0].extra["taskRoleArn"]);
    }

    #[tokio::test]
    async fn reconciling_twice_yields_equivalent_newer_revisions() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        seed_triple(&cloud, &cfg, "web", "staging");
        let reconciler = Reconciler::new(&cfg, &cloud);

        let first = reconciler.reconcile(&staging(&cfg), &tag("abc123")).await.unwrap();
        let second = reconciler.reconcile(&staging(&cfg), &tag("abc123")).await.unwrap();
        assert!(second.revision > first.revision);

        let revs = cloud.revisions(REGION, "acme_web_staging");
        assert_eq!(revs[1].registration(), revs[2].registration());

        let svc = cloud.service(REGION, "acme_staging", "web").unwrap();
        assert_eq!(svc.task_definition, second.task_definition_arn);
    }

    #[tokio::test]
    async fn missing_definition_is_reported_with_remediation() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();

        let err = Reconciler::new(&cfg, &cloud)
            .reconcile(&staging(&cfg), &tag("abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingTaskDefinition { ref family, .. } if family == "acme_web_staging"));
        assert!(err.remediation().contains("bootstrap"));
        assert_eq!(cloud.count("register_task_definition"), 0);
    }

    #[tokio::test]
    async fn missing_service_after_registration() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        cloud.with_task_definition(REGION, task_definition("acme_web_staging", "web"));

        let err = Reconciler::new(&cfg, &cloud)
            .reconcile(&staging(&cfg), &tag("abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingService { ref cluster, .. } if cluster == "acme_staging"));
    }

    #[tokio::test]
    async fn ambiguous_container_is_rejected() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        let mut def = task_definition("acme_web_staging", "app");
        let mut sidecar = def.container_definitions[0].clone();
        sidecar.name = "proxy".into();
        def.container_definitions.push(sidecar);
        cloud.with_task_definition(REGION, def);

        let err = Reconciler::new(&cfg, &cloud)
            .reconcile(&staging(&cfg), &tag("abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingContainer { .. }));
    }

    #[tokio::test]
    async fn config_revision_only_touches_revision() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        seed_triple(&cloud, &cfg, "web", "staging");

        Reconciler::new(&cfg, &cloud)
            .apply_config_revision(&staging(&cfg), 9)
            .await
            .unwrap();

        let revs = cloud.revisions(REGION, "acme_web_staging");
        let before = revs[0].container("web").unwrap();
        let after = revs[1].container("web").unwrap();
        assert_eq!(after.environment.get(ENV_CONFIG_REVISION), Some("9"));
        assert_eq!(after.image, before.image);
        assert_eq!(after.environment.len(), before.environment.len());
    }

    #[tokio::test]
    async fn scale_sets_desired_count() {
        let cfg = sample_config();
        let cloud = MemoryCloud::new();
        seed_triple(&cloud, &cfg, "web", "staging");

        let svc = Reconciler::new(&cfg, &cloud)
            .scale(&staging(&cfg), 4)
            .await
            .unwrap();
        assert_eq!(svc.desired_count, 4);
        assert_eq!(cloud.count("register_task_definition"), 0);
    }

    #[test]
    fn managed_keys_replace_in_place() {
        let mut env: TaskEnv = [("A", "1"), (ENV_GIT_SHA, "old"), ("B", "2")]
            .into_iter()
            .collect();
        let managed: TaskEnv = [(ENV_GIT_SHA, "new"), (ENV_RACK_ENV, "staging")]
            .into_iter()
            .collect();
        apply_managed(&mut env, &managed);

        let keys: Vec<&str> = env.iter().map(|kv| kv.key()).collect();
        assert_eq!(keys, ["A", ENV_GIT_SHA, "B", ENV_RACK_ENV]);
        assert_eq!(env.get(ENV_GIT_SHA), Some("new"));
    }
}
