use async_trait::async_trait;
use serde_json::Value;

use super::{AwsCli, at};
use crate::CloudResult;
use crate::artifact::{ArtifactRegistry, RegistryLogin, registry_endpoint, repository_name};

/// Fixed user name of token-based registry logins.
const TOKEN_USER: &str = "AWS";

#[async_trait]
impl ArtifactRegistry for AwsCli {
    async fn login(&self, region: &str, repository_url: &str) -> CloudResult<RegistryLogin> {
        let password = self
            .call_text(region, "text", "ecr", "get-login-password", Vec::<String>::new())
            .await?;
        Ok(RegistryLogin {
            endpoint: registry_endpoint(repository_url).to_string(),
            username: TOKEN_USER.to_string(),
            password: password.trim().to_string(),
        })
    }

    async fn list_tags(&self, region: &str, repository_url: &str) -> CloudResult<Vec<String>> {
        let op = "list-images";
        let resp = self
            .call(
                region,
                "ecr",
                op,
                [
                    "--repository-name",
                    repository_name(repository_url),
                    "--filter",
                    "tagStatus=TAGGED",
                ],
            )
            .await?;
        let ids: Vec<Value> = at(&resp, "/imageIds", op)?;
        Ok(ids
            .iter()
            .filter_map(|id| id.get("imageTag").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}
