use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use berth_cloud::{ArtifactRegistry, CloudError, SourceControl};
use berth_exec::{CommandRunner, CommandSpec, ExecError};
use berth_model::{ArtifactTag, EnvironmentFilter, ProjectConfig};

/// Commits searched for a previously pushed image to seed the build cache.
pub const CACHE_LOOKBACK: usize = 1000;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("registry login for {repository} failed: {source}")]
    Credentials {
        repository: String,
        #[source]
        source: CloudError,
    },
    #[error("docker login to {endpoint} failed: {source}")]
    Login {
        endpoint: String,
        #[source]
        source: ExecError,
    },
    #[error("push of {image} failed: {source}")]
    Push {
        image: String,
        #[source]
        source: ExecError,
    },
}

/// `(region, repository_url)` for every repository the filtered targets use; first region seen wins.
pub fn unique_repositories(
    config: &ProjectConfig,
    filter: &EnvironmentFilter,
) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    config
        .targets(filter)
        .into_iter()
        .filter(|t| seen.insert(t.repository_url.clone()))
        .map(|t| (t.region, t.repository_url))
        .collect()
}

/// Authenticates against each repository at most once and pushes tagged images.
pub struct Publisher<'a> {
    artifacts: &'a dyn ArtifactRegistry,
    runner: &'a dyn CommandRunner,
    logged_in: HashSet<String>,
}

impl<'a> Publisher<'a> {
    pub fn new(artifacts: &'a dyn ArtifactRegistry, runner: &'a dyn CommandRunner) -> Self {
        Self {
            artifacts,
            runner,
            logged_in: HashSet::new(),
        }
    }

    /// Log docker in to the registry of `repository_url` unless already done in this run.
    pub async fn login(&mut self, region: &str, repository_url: &str) -> Result<(), PublishError> {
        if self.logged_in.contains(repository_url) {
            return Ok(());
        }
        let login = self
            .artifacts
            .login(region, repository_url)
            .await
            .map_err(|source| PublishError::Credentials {
                repository: repository_url.to_string(),
                source,
            })?;

        let cmd = CommandSpec::new("docker")
            .args([
                "login",
                "--username",
                login.username.as_str(),
                "--password-stdin",
                login.endpoint.as_str(),
            ])
            .stdin(login.password.as_str());
        self.runner
            .output(&cmd)
            .await
            .map_err(|source| PublishError::Login {
                endpoint: login.endpoint.clone(),
                source,
            })?;

        info!(target: "berth.core.publish", endpoint = %login.endpoint, %region, "registry login");
        self.logged_in.insert(repository_url.to_string());
        Ok(())
    }

    /// Pull the newest image among the last [`CACHE_LOOKBACK`] commits so the build reuses its layers.
    ///
    /// Returns the pulled references. Login, lookup and pull failures only cost
    /// cache hits and are logged; [`Publisher::publish`] retries the login.
    pub async fn warm_cache(
        &mut self,
        config: &ProjectConfig,
        filter: &EnvironmentFilter,
        source: &dyn SourceControl,
    ) -> Vec<String> {
        let repositories = unique_repositories(config, filter);
        if repositories.is_empty() {
            return Vec::new();
        }
        let commits = match source.recent_commits(CACHE_LOOKBACK).await {
            Ok(commits) => commits,
            Err(e) => {
                warn!(target: "berth.core.publish", error = %e, "commit history unavailable; skipping cache warm-up");
                return Vec::new();
            }
        };

        let mut pulled = Vec::new();
        for (region, repository) in repositories {
            if let Err(e) = self.login(&region, &repository).await {
                warn!(target: "berth.core.publish", %repository, error = %e, "registry login failed; skipping cache warm-up");
                continue;
            }

            let tags: HashSet<String> = match self.artifacts.list_tags(&region, &repository).await {
                Ok(tags) => tags.into_iter().collect(),
                Err(e) => {
                    warn!(target: "berth.core.publish", %repository, error = %e, "listing tags failed");
                    continue;
                }
            };
            let Some(previous) = commits.iter().find(|c| tags.contains(c.as_str())) else {
                debug!(target: "berth.core.publish", %repository, "no previous image");
                continue;
            };

            let image = format!("{repository}:{previous}");
            let cmd = CommandSpec::new("docker").args(["pull", image.as_str()]);
            match self.runner.status(&cmd).await {
                Ok(_) => pulled.push(image),
                Err(e) => warn!(target: "berth.core.publish", %image, error = %e, "cache pull failed"),
            }
        }
        pulled
    }

    /// Push `{repository}:{tag}` for every unique repository; stops at the first failure.
    pub async fn publish(
        &mut self,
        config: &ProjectConfig,
        filter: &EnvironmentFilter,
        tag: &ArtifactTag,
    ) -> Result<Vec<String>, PublishError> {
        let mut pushed = Vec::new();
        for (region, repository) in unique_repositories(config, filter) {
            self.login(&region, &repository).await?;

            let image = format!("{repository}:{tag}");
            info!(target: "berth.core.publish", %image, "push");
            let cmd = CommandSpec::new("docker").args(["push", image.as_str()]);
            self.runner
                .status(&cmd)
                .await
                .map_err(|source| PublishError::Push {
                    image: image.clone(),
                    source,
                })?;
            pushed.push(image);
        }
        Ok(pushed)
    }
}
