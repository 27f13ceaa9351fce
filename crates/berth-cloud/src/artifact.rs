use std::fmt;

use async_trait::async_trait;

use crate::CloudResult;

/// Short-lived registry login; the password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryLogin")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Host part of a repository URL (`123.dkr.ecr.us-west-2.amazonaws.com/acme/app` -> the host).
pub fn registry_endpoint(repository_url: &str) -> &str {
    repository_url.split('/').next().unwrap_or(repository_url)
}

/// Repository name without the registry host (`acme/app`).
pub fn repository_name(repository_url: &str) -> &str {
    repository_url
        .split_once('/')
        .map(|(_, name)| name)
        .unwrap_or(repository_url)
}

/// Container image registry.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Fresh credentials for the registry hosting `repository_url` in `region`.
    async fn login(&self, region: &str, repository_url: &str) -> CloudResult<RegistryLogin>;

    /// Every tag currently present in the repository.
    async fn list_tags(&self, region: &str, repository_url: &str) -> CloudResult<Vec<String>>;
}
