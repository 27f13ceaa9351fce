use std::path::Path;

use anyhow::bail;

use berth_core::Pipeline;

use super::{Runtime, print_outcomes};

pub async fn run(
    path: &Path,
    environment: &str,
    service: &str,
    count: u32,
    region: Option<String>,
) -> anyhow::Result<i32> {
    let rt = Runtime::load(path).await?;
    let outcomes = Pipeline::new(&rt.config, &rt.backends)
        .scale(environment, service, count, region.as_deref())
        .await;
    if outcomes.is_empty() {
        bail!("service '{service}' is not deployed to {environment}");
    }

    let failed = print_outcomes(&outcomes, |svc| format!("desired count {}", svc.desired_count));
    Ok(if failed == 0 { 0 } else { 1 })
}
