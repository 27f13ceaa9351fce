//! Cloud credential resolution.
//!
//! Credentials are resolved once at startup by a [`CredentialChain`]
//! (environment, then shared profile, then an interactive prompt) and handed to
//! the CLI backends as subprocess environment.

use std::collections::HashMap;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use async_trait::async_trait;
use dialoguer::{Input, Password};
use tracing::debug;

use crate::{CloudError, CloudResult};

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const ENV_PROFILE: &str = "AWS_PROFILE";

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Static {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    /// Named profile from the shared config files; the CLI resolves the keys.
    Profile(String),
}

impl Credentials {
    /// Environment variables that make the `aws` CLI use these credentials.
    pub fn to_env(&self) -> Vec<(String, String)> {
        match self {
            Credentials::Static {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                let mut env = vec![
                    (ENV_ACCESS_KEY_ID.to_string(), access_key_id.clone()),
                    (ENV_SECRET_ACCESS_KEY.to_string(), secret_access_key.clone()),
                ];
                if let Some(token) = session_token {
                    env.push((ENV_SESSION_TOKEN.to_string(), token.clone()));
                }
                env
            }
            Credentials::Profile(name) => vec![(ENV_PROFILE.to_string(), name.clone())],
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            Credentials::Profile(name) => f.debug_tuple("Profile").field(name).finish(),
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` passes resolution on to the next provider.
    async fn resolve(&self) -> CloudResult<Option<Credentials>>;
}

/// Static keys from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
#[derive(Default)]
pub struct EnvProvider {
    vars: Option<HashMap<String, String>>,
}

impl EnvProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `vars` instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self { vars: Some(vars) }
    }

    fn var(&self, key: &str) -> Option<String> {
        let value = match &self.vars {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

#[async_trait]
impl CredentialProvider for EnvProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn resolve(&self) -> CloudResult<Option<Credentials>> {
        let (Some(access_key_id), Some(secret_access_key)) =
            (self.var(ENV_ACCESS_KEY_ID), self.var(ENV_SECRET_ACCESS_KEY))
        else {
            return Ok(None);
        };
        Ok(Some(Credentials::Static {
            access_key_id,
            secret_access_key,
            session_token: self.var(ENV_SESSION_TOKEN),
        }))
    }
}

/// Named profile declared in `~/.aws/credentials` or `~/.aws/config`.
pub struct ProfileProvider {
    profile: String,
    home: Option<PathBuf>,
}

impl ProfileProvider {
    /// Profile from `AWS_PROFILE`, else `default`.
    pub fn from_env() -> Self {
        let profile = std::env::var(ENV_PROFILE)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "default".to_string());
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from);
        Self { profile, home }
    }

    pub fn new(profile: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            profile: profile.into(),
            home: Some(home.into()),
        }
    }

    async fn declared_in(&self, file: &str, headers: &[String]) -> bool {
        let Some(home) = &self.home else {
            return false;
        };
        let Ok(content) = tokio::fs::read_to_string(home.join(".aws").join(file)).await else {
            return false;
        };
        content
            .lines()
            .map(str::trim)
            .any(|line| headers.iter().any(|h| h == line))
    }
}

#[async_trait]
impl CredentialProvider for ProfileProvider {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn resolve(&self) -> CloudResult<Option<Credentials>> {
        let plain = format!("[{}]", self.profile);
        let prefixed = format!("[profile {}]", self.profile);

        let found = self.declared_in("credentials", &[plain.clone()]).await
            || self.declared_in("config", &[plain, prefixed]).await;
        Ok(found.then(|| Credentials::Profile(self.profile.clone())))
    }
}

/// Asks for keys on the terminal; skipped when stdin is not a terminal.
///
/// The secret key is read without echo.
#[derive(Default)]
pub struct PromptProvider;

impl PromptProvider {
    fn ask() -> CloudResult<Option<Credentials>> {
        let access_key_id: String = Input::new()
            .with_prompt("AWS Access Key ID")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| CloudError::Credentials(e.to_string()))?;
        let Some(access_key_id) = answered(access_key_id) else {
            return Ok(None);
        };

        let secret_access_key = Password::new()
            .with_prompt("AWS Secret Access Key")
            .allow_empty_password(true)
            .interact()
            .map_err(|e| CloudError::Credentials(e.to_string()))?;
        let Some(secret_access_key) = answered(secret_access_key) else {
            return Ok(None);
        };

        Ok(Some(Credentials::Static {
            access_key_id,
            secret_access_key,
            session_token: None,
        }))
    }
}

fn answered(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[async_trait]
impl CredentialProvider for PromptProvider {
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn resolve(&self) -> CloudResult<Option<Credentials>> {
        if !std::io::stdin().is_terminal() {
            return Ok(None);
        }
        tokio::task::spawn_blocking(Self::ask)
            .await
            .map_err(|e| CloudError::Credentials(e.to_string()))?
    }
}

/// First provider that yields credentials wins.
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Environment, then shared profile, then prompt.
    pub fn standard() -> Self {
        Self::new()
            .with(EnvProvider::new())
            .with(ProfileProvider::from_env())
            .with(PromptProvider)
    }

    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl Default for CredentialChain {
    fn default() -> Self {
        Self::standard()
    }
}

#[async_trait]
impl CredentialProvider for CredentialChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn resolve(&self) -> CloudResult<Option<Credentials>> {
        for provider in &self.providers {
            if let Some(creds) = provider.resolve().await? {
                debug!(target: "berth.cloud.credentials", provider = provider.name(), "credentials resolved");
                return Ok(Some(creds));
            }
        }
        Err(CloudError::Credentials(
            "no credentials in the environment, shared profile or prompt".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn env_provider_needs_both_keys() {
        let partial = EnvProvider::from_vars(vars(&[(ENV_ACCESS_KEY_ID, "AKIA")]));
        assert!(partial.resolve().await.unwrap().is_none());

        let full = EnvProvider::from_vars(vars(&[
            (ENV_ACCESS_KEY_ID, "AKIA"),
            (ENV_SECRET_ACCESS_KEY, "secret"),
        ]));
        let creds = full.resolve().await.unwrap().unwrap();
        assert_eq!(creds.to_env().len(), 2);
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[tokio::test]
    async fn chain_takes_first_hit() {
        let chain = CredentialChain::new()
            .with(EnvProvider::from_vars(HashMap::new()))
            .with(EnvProvider::from_vars(vars(&[
                (ENV_ACCESS_KEY_ID, "second"),
                (ENV_SECRET_ACCESS_KEY, "s"),
            ])));
        let creds = chain.resolve().await.unwrap().unwrap();
        assert!(matches!(creds, Credentials::Static { ref access_key_id, .. } if access_key_id == "second"));
    }

    #[tokio::test]
    async fn empty_chain_is_an_error() {
        let chain = CredentialChain::new().with(EnvProvider::from_vars(HashMap::new()));
        assert!(matches!(
            chain.resolve().await,
            Err(CloudError::Credentials(_))
        ));
    }

    #[tokio::test]
    async fn profile_without_files_is_skipped() {
        let provider = ProfileProvider::new("ops", "/nonexistent/berth-home");
        assert!(provider.resolve().await.unwrap().is_none());
    }

    #[test]
    fn blank_prompt_answers_are_skipped() {
        assert_eq!(answered("  AKIA\n".into()).as_deref(), Some("AKIA"));
        assert_eq!(answered(" \n".into()), None);
    }

    #[test]
    fn profile_credentials_export_profile_name() {
        let env = Credentials::Profile("ops".into()).to_env();
        assert_eq!(env, vec![(ENV_PROFILE.to_string(), "ops".to_string())]);
    }
}
