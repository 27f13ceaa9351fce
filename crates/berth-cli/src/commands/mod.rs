pub mod config;
pub mod deploy;
pub mod exec;
pub mod scale;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use berth_cloud::{
    AwsCli, CredentialChain, CredentialProvider, GitCli, HttpEcho, S3ConfigStore,
};
use berth_core::{Backends, TripleOutcome};
use berth_exec::{CommandRunner, ProcRunner};
use berth_model::ProjectConfig;

/// Loaded configuration plus the production backends.
pub struct Runtime {
    pub config: ProjectConfig,
    pub backends: Backends,
}

pub fn load_config(path: &Path) -> anyhow::Result<ProjectConfig> {
    ProjectConfig::load(path).with_context(|| format!("loading project from {}", path.display()))
}

impl Runtime {
    /// Load the project and resolve credentials once.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let config = load_config(path)?;
        let credentials = CredentialChain::standard()
            .resolve()
            .await?
            .ok_or_else(|| anyhow!("no AWS credentials available"))?;

        let runner: Arc<dyn CommandRunner> = Arc::new(ProcRunner::new());
        let aws = AwsCli::new(runner.clone()).with_credentials(&credentials);
        let workdir = project_dir(path);

        let backends = Backends {
            tasks: Arc::new(aws.clone()),
            compute: Arc::new(aws.clone()),
            network: Arc::new(aws.clone()),
            artifacts: Arc::new(aws.clone()),
            config_store: Arc::new(S3ConfigStore::new(
                aws,
                config.config_s3_bucket.clone(),
                config.config_store.command.clone(),
            )),
            source: Arc::new(GitCli::new(runner.clone(), workdir)),
            address: Arc::new(HttpEcho::new()),
            runner,
        };
        Ok(Self { config, backends })
    }
}

fn project_dir(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Token fired by the first Ctrl-C.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let fire = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cleaning up");
            fire.cancel();
        }
    });
    token
}

/// Print every triple outcome; returns the number of failures.
pub fn print_outcomes<T>(outcomes: &[TripleOutcome<T>], ok: impl Fn(&T) -> String) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(v) => println!("ok    {}  {}", outcome.target, ok(v)),
            Err(e) => {
                failed += 1;
                eprintln!("FAIL  {}  {e}", outcome.target);
                eprintln!("      {}", e.remediation());
            }
        }
    }
    failed
}
