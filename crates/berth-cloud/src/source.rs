use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use berth_exec::{CommandRunner, CommandSpec};

use crate::CloudResult;

/// Working tree the artifacts are built from.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Full id of the checked-out commit.
    async fn head_commit(&self) -> CloudResult<String>;

    /// `true` when there are no uncommitted changes (untracked files included).
    async fn is_clean(&self) -> CloudResult<bool>;

    /// Ids of the last `limit` commits, newest first.
    async fn recent_commits(&self, limit: usize) -> CloudResult<Vec<String>>;
}

/// [`SourceControl`] over the `git` CLI.
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(runner: Arc<dyn CommandRunner>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> CloudResult<String> {
        let spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .cwd(&self.workdir);
        trace!(target: "berth.cloud.git", command = %spec, "git");
        let out = self.runner.output(&spec).await?;
        Ok(out.stdout)
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn head_commit(&self) -> CloudResult<String> {
        Ok(self.git(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    async fn is_clean(&self) -> CloudResult<bool> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(status.trim().is_empty())
    }

    async fn recent_commits(&self, limit: usize) -> CloudResult<Vec<String>> {
        let limit = format!("-{limit}");
        let log = self.git(&["log", &limit, "--format=%H"]).await?;
        Ok(log
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
