use std::path::Path;

use anyhow::Context;
use tracing::warn;

use berth_core::{SessionError, SessionManager, ShortcutRegistry, session_target};

use super::{Runtime, interrupt_token, load_config};

/// Service and environment a session targets.
pub struct Target {
    environment: String,
    service: String,
    region: Option<String>,
}

impl Target {
    pub fn new(environment: String, service: String, region: Option<String>) -> Self {
        Self {
            environment,
            service,
            region,
        }
    }
}

/// Remote exit codes propagate; session errors carry their own.
fn finish(res: Result<i32, SessionError>) -> anyhow::Result<i32> {
    match res {
        Ok(code) => Ok(code),
        Err(e @ (SessionError::TaskExitedNonZero { .. } | SessionError::Cancelled)) => {
            eprintln!("berth: {e}");
            Ok(e.exit_code())
        }
        Err(e) => {
            if let SessionError::Grant(_) = &e {
                eprintln!("      check the access settings in the project configuration");
            }
            Err(e.into())
        }
    }
}

pub async fn interactive(path: &Path, target: Target, command: Vec<String>) -> anyhow::Result<i32> {
    let rt = Runtime::load(path).await?;
    let cancel = interrupt_token();

    let res = async {
        let triple = session_target(
            &rt.config,
            &target.service,
            &target.environment,
            target.region.as_deref(),
        )?;
        let outcome = SessionManager::new(&rt.config, &rt.backends)
            .run_interactive(&triple, &command, &cancel)
            .await?;
        if let Some(release) = &outcome.release {
            for failure in &release.failed {
                warn!(%failure, "access cleanup incomplete");
            }
        }
        Ok::<_, SessionError>(outcome.exit_code)
    }
    .await;
    finish(res)
}

pub async fn task(path: &Path, target: Target, command: Vec<String>) -> anyhow::Result<i32> {
    let rt = Runtime::load(path).await?;
    let cancel = interrupt_token();

    let res = async {
        let triple = session_target(
            &rt.config,
            &target.service,
            &target.environment,
            target.region.as_deref(),
        )?;
        let outcome = SessionManager::new(&rt.config, &rt.backends)
            .run_detached(&triple, &command, &cancel)
            .await?;
        Ok::<_, SessionError>(outcome.exit_code)
    }
    .await;
    finish(res)
}

pub async fn shortcut(
    path: &Path,
    name: &str,
    target: Target,
    args: Vec<String>,
) -> anyhow::Result<i32> {
    let config = load_config(path)?;
    let command = ShortcutRegistry::from_config(&config)?
        .expand(name, &args)
        .with_context(|| "run `berth shortcuts` to list the configured names")?;
    interactive(path, target, command).await
}

pub fn list_shortcuts(path: &Path) -> anyhow::Result<i32> {
    let config = load_config(path)?;
    let registry = ShortcutRegistry::from_config(&config)?;
    if registry.is_empty() {
        println!("no shortcuts configured");
    }
    for (name, command) in registry.iter() {
        println!("{name:<16} {command}");
    }
    Ok(0)
}
