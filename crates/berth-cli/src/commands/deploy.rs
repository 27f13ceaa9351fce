use std::path::Path;

use berth_core::{Pipeline, Stage};
use berth_model::EnvironmentFilter;

use super::{Runtime, print_outcomes};

pub async fn run(path: &Path, environments: Vec<String>) -> anyhow::Result<i32> {
    let rt = Runtime::load(path).await?;
    let filter = EnvironmentFilter::only(environments);

    let report = Pipeline::new(&rt.config, &rt.backends).deploy(&filter).await;

    if let Some(tag) = &report.tag {
        println!("commit {tag}");
    }
    print_outcomes(&report.outcomes, |o| match o.revision {
        Some(rev) => format!("revision {rev}"),
        None => o.task_definition_arn.clone(),
    });

    if let (Stage::Aborted, Some(err)) = (report.stage, &report.error) {
        let stage = report.failed_stage.unwrap_or(Stage::Aborted);
        eprintln!("deploy aborted during {stage}: {err}");
        if let Some(fix) = err.remediation() {
            eprintln!("      {fix}");
        }
    }
    Ok(report.exit_code())
}
