use std::path::Path;

use berth_core::Pipeline;

use super::{Runtime, print_outcomes};

pub async fn run(path: &Path, args: Vec<String>) -> anyhow::Result<i32> {
    let rt = Runtime::load(path).await?;
    let rollout = Pipeline::new(&rt.config, &rt.backends)
        .publish_config(&args)
        .await?;

    print!("{}", rollout.output);
    match rollout.revision {
        None => println!("No config updates."),
        Some(revision) => {
            print_outcomes(&rollout.outcomes, |_| format!("config revision {revision}"));
        }
    }
    Ok(rollout.exit_code())
}
