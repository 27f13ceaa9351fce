//! Deployment pipeline.
//!
//! `CleanCheck -> Build -> Tag -> Push -> ReconcileAll -> Done`. Any failure
//! before `ReconcileAll` moves the run to `Aborted`. Reconciliation fans out over
//! every matching triple; a failing triple is recorded and its siblings continue.

use std::fmt;

use thiserror::Error;
use tracing::{error, info, warn};

use berth_cloud::CloudError;
use berth_exec::ExecError;
use berth_model::{
    ArtifactTag, DeployTarget, EnvironmentFilter, ProjectConfig, RunningService, TagError,
};

use crate::build::{BuildError, plan_builds, resolve_revisions, run_all};
use crate::context::Backends;
use crate::publish::{PublishError, Publisher};
use crate::reconcile::{ReconcileError, ReconcileOutcome, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CleanCheck,
    Build,
    Tag,
    Push,
    ReconcileAll,
    Done,
    Aborted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CleanCheck => "clean-check",
            Stage::Build => "build",
            Stage::Tag => "tag",
            Stage::Push => "push",
            Stage::ReconcileAll => "reconcile",
            Stage::Done => "done",
            Stage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("working tree has uncommitted changes")]
    DirtyWorkingTree,
    #[error("source control query failed: {0}")]
    Source(#[source] CloudError),
    #[error("invalid commit id: {0}")]
    InvalidCommit(#[from] TagError),
    #[error("build failed: {0}")]
    Build(#[from] BuildError),
    #[error("tagging failed: {0}")]
    Tag(#[source] ExecError),
    #[error(transparent)]
    Push(#[from] PublishError),
    #[error("config store publish failed: {0}")]
    ConfigPublish(#[source] CloudError),
}

impl PipelineError {
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            PipelineError::DirtyWorkingTree => Some("commit or stash your changes first"),
            PipelineError::Push(PublishError::Credentials { .. }) => {
                Some("check the registry credentials for the region")
            }
            _ => None,
        }
    }
}

/// Result for one `(service, region, environment)` triple.
#[derive(Debug)]
pub struct TripleOutcome<T> {
    pub target: DeployTarget,
    pub result: Result<T, ReconcileError>,
}

impl<T> TripleOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

fn count_failed<T>(outcomes: &[TripleOutcome<T>]) -> usize {
    outcomes.iter().filter(|o| !o.is_ok()).count()
}

fn record<T>(target: DeployTarget, result: Result<T, ReconcileError>) -> TripleOutcome<T> {
    if let Err(e) = &result {
        error!(target: "berth.core.pipeline", %target, error = %e, remediation = e.remediation(), "triple failed");
    }
    TripleOutcome { target, result }
}

/// Terminal state of a deployment run.
#[derive(Debug)]
pub struct DeployReport {
    /// `Done` or `Aborted`.
    pub stage: Stage,
    /// Stage that was running when the pipeline aborted.
    pub failed_stage: Option<Stage>,
    pub tag: Option<ArtifactTag>,
    pub outcomes: Vec<TripleOutcome<ReconcileOutcome>>,
    pub error: Option<PipelineError>,
}

impl DeployReport {
    fn new() -> Self {
        Self {
            stage: Stage::CleanCheck,
            failed_stage: None,
            tag: None,
            outcomes: Vec::new(),
            error: None,
        }
    }

    pub fn failed_triples(&self) -> usize {
        count_failed(&self.outcomes)
    }

    pub fn succeeded(&self) -> bool {
        self.stage == Stage::Done && self.failed_triples() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() { 0 } else { 1 }
    }
}

/// Outcome of publishing configuration and rolling its revision out.
#[derive(Debug)]
pub struct ConfigRollout {
    /// Revision reported by the config store; `None` when nothing changed.
    pub revision: Option<u64>,
    /// Raw output of the config-store CLI.
    pub output: String,
    pub outcomes: Vec<TripleOutcome<ReconcileOutcome>>,
}

impl ConfigRollout {
    pub fn exit_code(&self) -> i32 {
        if count_failed(&self.outcomes) == 0 { 0 } else { 1 }
    }
}

pub struct Pipeline<'a> {
    config: &'a ProjectConfig,
    backends: &'a Backends,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ProjectConfig, backends: &'a Backends) -> Self {
        Self { config, backends }
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(self.config, self.backends.tasks.as_ref())
    }

    /// Build, push and roll out the current commit to every triple passing `filter`.
    pub async fn deploy(&self, filter: &EnvironmentFilter) -> DeployReport {
        let mut report = DeployReport::new();
        match self.run_stages(filter, &mut report).await {
            Ok(()) => {
                report.stage = Stage::Done;
                info!(
                    target: "berth.core.pipeline",
                    triples = report.outcomes.len(),
                    failed = report.failed_triples(),
                    "deploy finished"
                );
            }
            Err(e) => {
                error!(target: "berth.core.pipeline", stage = %report.stage, error = %e, "deploy aborted");
                report.failed_stage = Some(report.stage);
                report.stage = Stage::Aborted;
                report.error = Some(e);
            }
        }
        report
    }

    async fn run_stages(
        &self,
        filter: &EnvironmentFilter,
        report: &mut DeployReport,
    ) -> Result<(), PipelineError> {
        let b = self.backends;

        enter(report, Stage::CleanCheck);
        if !b.source.is_clean().await.map_err(PipelineError::Source)? {
            return Err(PipelineError::DirtyWorkingTree);
        }
        let commit = b.source.head_commit().await.map_err(PipelineError::Source)?;
        let tag = ArtifactTag::from_commit(&commit)?;
        report.tag = Some(tag.clone());

        enter(report, Stage::Build);
        let revisions = resolve_revisions(self.config, filter, b.config_store.as_ref()).await?;
        let plan = plan_builds(self.config, filter, &tag, &revisions);
        let mut publisher = Publisher::new(b.artifacts.as_ref(), b.runner.as_ref());
        publisher
            .warm_cache(self.config, filter, b.source.as_ref())
            .await;
        run_all(b.runner.as_ref(), plan.build_commands())
            .await
            .map_err(BuildError::from)?;

        enter(report, Stage::Tag);
        run_all(b.runner.as_ref(), plan.tags.iter())
            .await
            .map_err(PipelineError::Tag)?;

        enter(report, Stage::Push);
        publisher.publish(self.config, filter, &tag).await?;

        enter(report, Stage::ReconcileAll);
        let reconciler = self.reconciler();
        for target in self.config.targets(filter) {
            let result = reconciler.reconcile(&target, &tag).await;
            report.outcomes.push(record(target, result));
        }
        Ok(())
    }

    /// Publish configuration with `args`, then point every triple at the new revision.
    ///
    /// When the config store reports no new revision nothing is registered.
    pub async fn publish_config(&self, args: &[String]) -> Result<ConfigRollout, PipelineError> {
        let published = self
            .backends
            .config_store
            .publish(args)
            .await
            .map_err(PipelineError::ConfigPublish)?;

        let mut rollout = ConfigRollout {
            revision: published.revision,
            output: published.output,
            outcomes: Vec::new(),
        };
        let Some(revision) = rollout.revision else {
            info!(target: "berth.core.pipeline", "no config updates");
            return Ok(rollout);
        };

        info!(target: "berth.core.pipeline", revision, "rolling out config revision");
        let reconciler = self.reconciler();
        for target in self.config.targets(&EnvironmentFilter::all()) {
            let result = reconciler.apply_config_revision(&target, revision).await;
            rollout.outcomes.push(record(target, result));
        }
        Ok(rollout)
    }

    /// Set the desired count of `service` in `environment`, in every region or just `region`.
    pub async fn scale(
        &self,
        environment: &str,
        service: &str,
        count: u32,
        region: Option<&str>,
    ) -> Vec<TripleOutcome<RunningService>> {
        let reconciler = self.reconciler();
        let mut out = Vec::new();
        for target in self.config.targets_for(service, environment, region) {
            let result = reconciler.scale(&target, count).await;
            out.push(record(target, result));
        }
        if out.is_empty() {
            warn!(target: "berth.core.pipeline", %service, %environment, ?region, "no matching deployment");
        }
        out
    }
}

fn enter(report: &mut DeployReport, stage: Stage) {
    info!(target: "berth.core.pipeline", %stage, "stage");
    report.stage = stage;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{REGION, REPO, backends, sample_config, seed_triple, task_definition};
    use berth_cloud::memory::MemoryCloud;
    use berth_exec::testing::ScriptedRunner;

    struct Fixture {
        config: ProjectConfig,
        cloud: Arc<MemoryCloud>,
        runner: Arc<ScriptedRunner>,
        backends: Backends,
    }

    fn fixture() -> Fixture {
        let config = sample_config();
        let cloud = Arc::new(MemoryCloud::new());
        let runner = Arc::new(ScriptedRunner::new());
        let backends = backends(&cloud, &runner);
        Fixture {
            config,
            cloud,
            runner,
            backends,
        }
    }

    #[tokio::test]
    async fn missing_production_definition_fails_one_triple_only() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::all())
            .await;

        assert_eq!(report.stage, Stage::Done);
        assert_eq!(report.tag.as_ref().map(|t| t.as_str()), Some("abc123"));
        assert_eq!(fx.runner.count(&["docker", "build"]), 1);
        assert_eq!(fx.runner.count(&["docker", "tag"]), 2);
        assert_eq!(fx.runner.count(&["docker", "push"]), 1);

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failed_triples(), 1);
        let staging = &report.outcomes[0];
        assert_eq!(staging.target.environment, "staging");
        assert!(staging.is_ok());
        let production = &report.outcomes[1];
        assert!(matches!(
            production.result,
            Err(ReconcileError::MissingTaskDefinition { ref family, .. }) if family == "acme_web_production"
        ));
        assert_eq!(report.exit_code(), 1);

        let svc = fx.cloud.service(REGION, "acme_staging", "web").unwrap();
        assert!(svc.task_definition.ends_with("acme_web_staging:2"));
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");
        seed_triple(&fx.cloud, &fx.config, "web", "production");

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::all())
            .await;
        assert!(report.succeeded());
        assert_eq!(report.exit_code(), 0);

        let docker: Vec<String> = fx
            .runner
            .lines()
            .into_iter()
            .filter_map(|l| l.split(' ').nth(1).map(str::to_string))
            .collect();
        assert_eq!(docker, ["login", "build", "tag", "tag", "push"]);
        assert_eq!(fx.cloud.count("register_task_definition"), 2);
    }

    #[tokio::test]
    async fn dirty_tree_aborts_without_side_effects() {
        let fx = fixture();
        fx.cloud.with_dirty_tree();

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::all())
            .await;

        assert_eq!(report.stage, Stage::Aborted);
        assert_eq!(report.failed_stage, Some(Stage::CleanCheck));
        assert!(matches!(report.error, Some(PipelineError::DirtyWorkingTree)));
        assert!(report.error.as_ref().unwrap().remediation().is_some());
        assert!(fx.runner.calls().is_empty());
        assert_eq!(fx.cloud.operations(), ["is_clean"]);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn unusable_head_commit_aborts_before_building() {
        let fx = fixture();
        fx.cloud.with_head("not-a-commit");

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::all())
            .await;

        assert_eq!(report.stage, Stage::Aborted);
        assert!(matches!(report.error, Some(PipelineError::InvalidCommit(_))));
        assert!(report.tag.is_none());
        assert!(fx.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn build_failure_aborts_before_tagging() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");
        fx.runner.fail(&["docker", "build"], 1, "no space left on device");

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::all())
            .await;

        assert_eq!(report.failed_stage, Some(Stage::Build));
        assert!(matches!(report.error, Some(PipelineError::Build(_))));
        assert_eq!(fx.runner.count(&["docker", "tag"]), 0);
        assert_eq!(fx.cloud.count("register_task_definition"), 0);
    }

    #[tokio::test]
    async fn warm_up_login_failure_does_not_stop_the_build() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");
        seed_triple(&fx.cloud, &fx.config, "web", "production");
        fx.cloud.fail_once("login");

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::all())
            .await;

        assert!(report.succeeded());
        assert_eq!(report.failed_stage, None);
        assert_eq!(fx.runner.count(&["docker", "build"]), 1);
        assert_eq!(fx.runner.count(&["docker", "login"]), 1);
        assert_eq!(fx.runner.count(&["docker", "push"]), 1);
        assert_eq!(fx.cloud.count("login"), 2);
    }

    #[tokio::test]
    async fn push_failure_aborts_before_reconcile() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");
        fx.runner.fail(&["docker", "push"], 1, "denied");

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::all())
            .await;

        assert_eq!(report.failed_stage, Some(Stage::Push));
        assert!(report.outcomes.is_empty());
        assert_eq!(fx.cloud.count("describe_task_definition"), 0);
    }

    #[tokio::test]
    async fn filter_limits_rollout() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");

        let report = Pipeline::new(&fx.config, &fx.backends)
            .deploy(&EnvironmentFilter::only(["staging"]))
            .await;
        assert!(report.succeeded());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(fx.runner.count(&["docker", "tag"]), 1);
    }

    #[tokio::test]
    async fn config_rollout_applies_new_revision() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");
        fx.cloud
            .with_task_definition(REGION, task_definition("acme_web_production", "web"))
            .with_service(REGION, "acme_production", "web", "acme_web_production")
            .with_publish_output("Uploaded staging\nNew version: v12\n");

        let rollout = Pipeline::new(&fx.config, &fx.backends)
            .publish_config(&["push".to_string(), "staging".to_string()])
            .await
            .unwrap();
        assert_eq!(rollout.revision, Some(12));
        assert_eq!(rollout.outcomes.len(), 2);
        assert_eq!(rollout.exit_code(), 0);

        let revs = fx.cloud.revisions(REGION, "acme_web_staging");
        let env = &revs[1].container("web").unwrap().environment;
        assert_eq!(env.get("S3_CONFIG_REVISION"), Some("12"));
        assert!(revs[1].container("web").unwrap().image.starts_with(REPO));
    }

    #[tokio::test]
    async fn config_without_new_revision_is_a_noop() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");
        fx.cloud.with_publish_output("Nothing to upload\n");

        let rollout = Pipeline::new(&fx.config, &fx.backends)
            .publish_config(&["push".to_string()])
            .await
            .unwrap();
        assert_eq!(rollout.revision, None);
        assert!(rollout.outcomes.is_empty());
        assert_eq!(fx.cloud.count("register_task_definition"), 0);
    }

    #[tokio::test]
    async fn scale_reports_per_region_outcomes() {
        let fx = fixture();
        seed_triple(&fx.cloud, &fx.config, "web", "staging");

        let pipeline = Pipeline::new(&fx.config, &fx.backends);
        let out = pipeline.scale("staging", "web", 3, None).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].result.as_ref().unwrap().desired_count, 3);

        let out = pipeline.scale("production", "web", 3, Some(REGION)).await;
        assert!(matches!(out[0].result, Err(ReconcileError::MissingTaskDefinition { .. })));

        assert!(pipeline.scale("staging", "web", 3, Some("eu-west-1")).await.is_empty());
    }
}
