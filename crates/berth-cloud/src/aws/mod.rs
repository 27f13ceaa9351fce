//! Production collaborators backed by the `aws` CLI.
//!
//! Every call runs `aws --region <r> --output json <service> <operation> ...`
//! through a [`CommandRunner`] with the resolved credentials in its environment.
//! Structured payloads are passed as JSON arguments and responses are decoded
//! with `serde_json`.

mod ec2;
mod ecr;
mod ecs;
mod s3;

pub use s3::S3ConfigStore;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use berth_exec::{CommandRunner, CommandSpec};

use crate::credentials::Credentials;
use crate::{CloudError, CloudResult};

/// Handle to the `aws` CLI; cheap to clone.
#[derive(Clone)]
pub struct AwsCli {
    runner: Arc<dyn CommandRunner>,
    env: Vec<(String, String)>,
}

impl AwsCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            env: Vec::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        self.env = credentials.to_env();
        self
    }

    /// Credential environment passed to every subprocess.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    fn spec(&self, region: &str, output: &str, service: &str, operation: &str) -> CommandSpec {
        CommandSpec::new("aws")
            .args(["--region", region, "--output", output, service, operation])
            .envs(self.env.iter().cloned())
            .allow_failure()
    }

    /// Run one operation and decode its JSON response; an empty response decodes as `null`.
    async fn call<I, S>(
        &self,
        region: &str,
        service: &str,
        operation: &str,
        args: I,
    ) -> CloudResult<Value>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let stdout = self.call_text(region, "json", service, operation, args).await?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout).map_err(|e| CloudError::decode(operation, e))
    }

    async fn call_text<I, S>(
        &self,
        region: &str,
        output: &str,
        service: &str,
        operation: &str,
        args: I,
    ) -> CloudResult<String>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let spec = self.spec(region, output, service, operation).args(args);
        trace!(target: "berth.cloud.aws", command = %spec, "call");

        let out = self.runner.output(&spec).await?;
        if !out.success() {
            let message = out.stderr.trim().to_string();
            debug!(target: "berth.cloud.aws", %service, %operation, %message, "rejected");
            return Err(CloudError::Rejected {
                operation: format!("{service} {operation}"),
                message,
            });
        }
        Ok(out.stdout)
    }
}

/// Error code reported by the CLI (`An error occurred (Code) when calling ...`).
fn error_code(err: &CloudError) -> Option<&str> {
    let CloudError::Rejected { message, .. } = err else {
        return None;
    };
    let start = message.find("An error occurred (")? + "An error occurred (".len();
    let end = message[start..].find(')')? + start;
    Some(&message[start..end])
}

fn has_code(err: &CloudError, codes: &[&str]) -> bool {
    error_code(err).is_some_and(|code| codes.contains(&code))
}

/// Decode the value at a JSON pointer; a missing value decodes from `null`.
fn at<T: DeserializeOwned>(value: &Value, pointer: &str, operation: &str) -> CloudResult<T> {
    let field = value.pointer(pointer).cloned().unwrap_or(Value::Null);
    serde_json::from_value(field).map_err(|e| CloudError::decode(operation, format!("{pointer}: {e}")))
}

fn string_at(value: &Value, pointer: &str, operation: &str) -> CloudResult<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CloudError::decode(operation, format!("{pointer} missing")))
}
