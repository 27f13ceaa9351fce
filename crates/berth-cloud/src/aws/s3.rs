use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use berth_exec::ShellCommand;

use super::{AwsCli, at};
use crate::CloudResult;
use crate::config_store::{ConfigPublish, ConfigStore, latest_revision, parse_published_revision};

/// Config revisions stored as objects under `{environment}/` in a bucket,
/// published through an external CLI.
pub struct S3ConfigStore {
    aws: AwsCli,
    bucket: String,
    command: String,
}

impl S3ConfigStore {
    pub fn new(aws: AwsCli, bucket: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            aws,
            bucket: bucket.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl ConfigStore for S3ConfigStore {
    async fn current_revision(&self, region: &str, environment: &str) -> CloudResult<u64> {
        let op = "list-objects-v2";
        let prefix = format!("{environment}/");
        let resp = self
            .aws
            .call(
                region,
                "s3api",
                op,
                ["--bucket", self.bucket.as_str(), "--prefix", prefix.as_str()],
            )
            .await?;
        let objects: Option<Vec<Value>> = at(&resp, "/Contents", op)?;
        let objects = objects.unwrap_or_default();
        let keys = objects
            .iter()
            .filter_map(|o| o.get("Key").and_then(Value::as_str));
        Ok(latest_revision(&prefix, keys))
    }

    async fn publish(&self, args: &[String]) -> CloudResult<ConfigPublish> {
        let mut cmd = ShellCommand::new(self.command.as_str())
            .with_args(args)
            .env("S3_CONFIG_BUCKET", self.bucket.as_str());
        cmd.env.extend(self.aws.env().iter().cloned());

        let out = self.aws.runner().output(&cmd.into_spec()).await?;
        let revision = parse_published_revision(&out.stdout);
        info!(target: "berth.cloud.config", revision = ?revision, "config store command finished");
        Ok(ConfigPublish {
            output: out.stdout,
            revision,
        })
    }
}
