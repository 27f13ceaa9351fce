//! Build coordination.
//!
//! Services that share a [`BuildKey`] are built by one `docker build`, tagged
//! locally once per environment they serve. Tag commands then map each local
//! image to `{repository}:{commit}`.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use berth_cloud::{CloudError, ConfigStore};
use berth_exec::{CommandRunner, CommandSpec, ExecError};
use berth_model::{ArtifactTag, BuildKey, EnvironmentFilter, ProjectConfig};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("config revision lookup for '{environment}' failed: {source}")]
    Revision {
        environment: String,
        #[source]
        source: CloudError,
    },
    #[error(transparent)]
    Command(#[from] ExecError),
}

/// Config-store revision per environment.
pub type Revisions = BTreeMap<String, u64>;

/// Query the current revision once per environment, from the first region that serves it.
pub async fn resolve_revisions(
    config: &ProjectConfig,
    filter: &EnvironmentFilter,
    store: &dyn ConfigStore,
) -> Result<Revisions, BuildError> {
    let mut out = Revisions::new();
    for target in config.targets(filter) {
        if out.contains_key(&target.environment) {
            continue;
        }
        let revision = store
            .current_revision(&target.region, &target.environment)
            .await
            .map_err(|source| BuildError::Revision {
                environment: target.environment.clone(),
                source,
            })?;
        debug!(target: "berth.core.build", environment = %target.environment, revision, "config revision");
        out.insert(target.environment, revision);
    }
    Ok(out)
}

/// Build argument carrying the config revision of `environment`.
pub fn revision_arg(environment: &str) -> String {
    let env: String = environment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("S3_CONFIG_REVISION_{env}")
}

/// One deduplicated image build.
#[derive(Debug, Clone)]
pub struct PlannedBuild {
    pub key: BuildKey,
    /// Environments served, in first-seen order.
    pub environments: Vec<String>,
    /// Local tags applied by the build, one per distinct image and environment.
    pub local_images: Vec<String>,
    pub command: CommandSpec,
}

#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub builds: Vec<PlannedBuild>,
    pub tags: Vec<CommandSpec>,
}

impl BuildPlan {
    pub fn build_commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.builds.iter().map(|b| &b.command)
    }
}

struct Group {
    key: BuildKey,
    environments: Vec<String>,
    local_images: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Plan every build and tag command for the targets passing `filter`.
pub fn plan_builds(
    config: &ProjectConfig,
    filter: &EnvironmentFilter,
    tag: &ArtifactTag,
    revisions: &Revisions,
) -> BuildPlan {
    let mut groups: Vec<Group> = Vec::new();
    let mut tag_pairs: Vec<(String, String)> = Vec::new();

    for target in config.targets(filter) {
        let Some(service) = config.service(&target.service) else {
            continue;
        };
        let key = config.build_key(service);
        let local = config.local_image(service, &target.environment);

        let group = match groups.iter().position(|g| g.key == key) {
            Some(i) => &mut groups[i],
            None => {
                groups.push(Group {
                    key,
                    environments: Vec::new(),
                    local_images: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        push_unique(&mut group.environments, &target.environment);
        push_unique(&mut group.local_images, &local);

        let pair = (local, format!("{}:{}", target.repository_url, tag));
        if !tag_pairs.contains(&pair) {
            tag_pairs.push(pair);
        }
    }

    let builds = groups
        .into_iter()
        .map(|group| {
            let mut cmd = CommandSpec::new("docker")
                .arg("build")
                .arg("-f")
                .arg(group.key.dockerfile.to_string_lossy());
            for local in &group.local_images {
                cmd = cmd.arg("-t").arg(local);
            }
            cmd = cmd
                .arg("--build-arg")
                .arg(format!("S3_CONFIG_BUCKET={}", config.config_s3_bucket));
            for env in &group.environments {
                let revision = revisions.get(env).copied().unwrap_or(0);
                cmd = cmd
                    .arg("--build-arg")
                    .arg(format!("{}={revision}", revision_arg(env)));
            }
            cmd = cmd.arg(group.key.context.to_string_lossy());
            debug!(target: "berth.core.build", images = group.local_images.len(), "planned build");
            PlannedBuild {
                key: group.key,
                environments: group.environments,
                local_images: group.local_images,
                command: cmd,
            }
        })
        .collect();

    let tags = tag_pairs
        .into_iter()
        .map(|(local, remote)| CommandSpec::new("docker").args(["tag".to_string(), local, remote]))
        .collect();

    BuildPlan { builds, tags }
}

/// Run commands in order with the operator's stdio, stopping at the first failure.
pub async fn run_all<'a>(
    runner: &dyn CommandRunner,
    commands: impl IntoIterator<Item = &'a CommandSpec>,
) -> Result<usize, ExecError> {
    let mut ran = 0;
    for cmd in commands {
        info!(target: "berth.core.build", command = %cmd, "run");
        runner.status(cmd).await?;
        ran += 1;
    }
    Ok(ran)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_config, shared_build_config};
    use berth_cloud::memory::MemoryCloud;
    use berth_exec::testing::ScriptedRunner;

    fn tag() -> ArtifactTag {
        ArtifactTag::from_commit("abc123").unwrap()
    }

    fn line(spec: &CommandSpec) -> String {
        std::iter::once(spec.program.as_str())
            .chain(spec.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn one_service_two_environments_is_one_build_two_tags() {
        let cfg = sample_config();
        let revisions = Revisions::from([("staging".to_string(), 4), ("production".to_string(), 2)]);
        let plan = plan_builds(&cfg, &EnvironmentFilter::all(), &tag(), &revisions);

        assert_eq!(plan.builds.len(), 1);
        assert_eq!(
            line(&plan.builds[0].command),
            "docker build -f Dockerfile.production -t acme_web_staging -t acme_web_production \
             --build-arg S3_CONFIG_BUCKET=acme-config \
             --build-arg S3_CONFIG_REVISION_STAGING=4 \
             --build-arg S3_CONFIG_REVISION_PRODUCTION=2 ."
        );

        let tags: Vec<String> = plan.tags.iter().map(line).collect();
        assert_eq!(
            tags,
            [
                "docker tag acme_web_staging 123.dkr.ecr.us-west-2.amazonaws.com/acme/web:abc123",
                "docker tag acme_web_production 123.dkr.ecr.us-west-2.amazonaws.com/acme/web:abc123",
            ]
        );
    }

    #[test]
    fn services_sharing_a_context_build_once() {
        let cfg = shared_build_config();
        let plan = plan_builds(&cfg, &EnvironmentFilter::all(), &tag(), &Revisions::new());

        assert_eq!(cfg.services.len(), 3);
        assert_eq!(plan.builds.len(), 1);
        assert_eq!(plan.builds[0].environments, ["production", "staging"]);
        // api, web and worker share one local image per environment and one repository
        assert_eq!(plan.tags.len(), 2);
    }

    #[test]
    fn default_context_is_shared_across_differently_named_images() {
        let cfg = ProjectConfig::parse(
            r#"
project_name: acme
config_s3_bucket: acme-config
services:
  web:
    regions:
      us-west-2:
        repository_url: 123.dkr.ecr.us-west-2.amazonaws.com/acme/web
        environments: [staging]
  worker:
    regions:
      us-west-2:
        repository_url: 123.dkr.ecr.us-west-2.amazonaws.com/acme/worker
        environments: [staging]
"#,
        )
        .unwrap();
        let plan = plan_builds(&cfg, &EnvironmentFilter::all(), &tag(), &Revisions::new());

        assert_eq!(plan.builds.len(), 1);
        assert_eq!(plan.builds[0].local_images, ["acme_web_staging", "acme_worker_staging"]);
        assert_eq!(
            line(&plan.builds[0].command),
            "docker build -f Dockerfile.production -t acme_web_staging -t acme_worker_staging \
             --build-arg S3_CONFIG_BUCKET=acme-config \
             --build-arg S3_CONFIG_REVISION_STAGING=0 ."
        );

        let tags: Vec<String> = plan.tags.iter().map(line).collect();
        assert_eq!(
            tags,
            [
                "docker tag acme_web_staging 123.dkr.ecr.us-west-2.amazonaws.com/acme/web:abc123",
                "docker tag acme_worker_staging 123.dkr.ecr.us-west-2.amazonaws.com/acme/worker:abc123",
            ]
        );
    }

    #[test]
    fn filter_narrows_builds_and_tags() {
        let cfg = sample_config();
        let plan = plan_builds(
            &cfg,
            &EnvironmentFilter::only(["staging"]),
            &tag(),
            &Revisions::new(),
        );
        assert_eq!(plan.builds[0].environments, ["staging"]);
        assert_eq!(plan.tags.len(), 1);
        assert!(line(&plan.builds[0].command).contains("S3_CONFIG_REVISION_STAGING=0"));
    }

    #[test]
    fn revision_arg_is_upper_snake() {
        assert_eq!(revision_arg("staging"), "S3_CONFIG_REVISION_STAGING");
        assert_eq!(revision_arg("qa-east"), "S3_CONFIG_REVISION_QA_EAST");
    }

    #[tokio::test]
    async fn revisions_are_queried_once_per_environment() {
        let cfg = shared_build_config();
        let cloud = MemoryCloud::new();
        cloud.with_revision("us-west-2", "staging", 7);

        let revisions = resolve_revisions(&cfg, &EnvironmentFilter::all(), &cloud)
            .await
            .unwrap();
        assert_eq!(revisions.get("staging"), Some(&7));
        assert_eq!(revisions.get("production"), Some(&0));
        assert_eq!(cloud.count("current_revision"), 2);
    }

    #[tokio::test]
    async fn run_all_stops_at_first_failure() {
        let runner = ScriptedRunner::new();
        runner.fail(&["docker", "tag", "b"], 1, "no such image");
        let cmds = [
            CommandSpec::new("docker").args(["tag", "a", "r:1"]),
            CommandSpec::new("docker").args(["tag", "b", "r:1"]),
            CommandSpec::new("docker").args(["tag", "c", "r:1"]),
        ];
        let err = run_all(&runner, cmds.iter()).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(runner.calls().len(), 2);
    }
}
