use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::{BuildKey, DeployTarget, EnvironmentFilter};

/// File looked up when a directory is given to [`ProjectConfig::load`].
pub const CONFIG_FILE_NAME: &str = ".berth.yml";
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile.production";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parsed project description: services, their regions and environments.
///
/// Loaded once at startup and passed by reference to every component.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub project_name: String,
    pub config_s3_bucket: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile_path: PathBuf,
    pub services: BTreeMap<String, ServiceSpec>,
    /// Named exec shortcuts: `name -> command prefix`.
    #[serde(default)]
    pub exec: BTreeMap<String, String>,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub config_store: ConfigStoreConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    /// Filled from the map key on load.
    #[serde(skip)]
    pub name: String,
    /// Local image name; defaults to the service name.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub build: Option<BuildOverride>,
    pub regions: BTreeMap<String, RegionTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Resources {
    #[serde(default = "default_units")]
    pub cpu_units: u32,
    #[serde(default = "default_units")]
    pub memory_units: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu_units: default_units(),
            memory_units: default_units(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildOverride {
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
    #[serde(default)]
    pub context: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionTarget {
    /// Filled from the map key on load.
    #[serde(skip)]
    pub region: String,
    pub repository_url: String,
    pub environments: Vec<String>,
}

/// How an exec session reaches the node hosting a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStrategy {
    /// Add a named rule to the access group already attached to the cluster nodes.
    #[default]
    InPlaceIngress,
    /// Allocate a public address and a dedicated security group for the session.
    EphemeralAddress,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub strategy: AccessStrategy,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Access group name for [`AccessStrategy::InPlaceIngress`]; defaults to `team-access-{cluster}`.
    #[serde(default)]
    pub security_group: Option<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            strategy: AccessStrategy::default(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            private_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            security_group: None,
        }
    }
}

impl AccessConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigStoreConfig {
    /// Command line of the config-store CLI; arguments are appended.
    #[serde(default = "default_config_store_command")]
    pub command: String,
}

impl Default for ConfigStoreConfig {
    fn default() -> Self {
        Self {
            command: default_config_store_command(),
        }
    }
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from(DEFAULT_DOCKERFILE)
}

fn default_units() -> u32 {
    256
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_ssh_user() -> String {
    "ec2-user".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_config_store_command() -> String {
    "bundle exec config".to_string()
}

impl ProjectConfig {
    /// Load from a file, or from [`CONFIG_FILE_NAME`] inside a directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        if !file.exists() {
            return Err(ConfigError::NotFound(file));
        }

        let content = std::fs::read_to_string(&file).map_err(|source| ConfigError::Read {
            path: file.clone(),
            source,
        })?;
        Self::from_yaml(&content, &file)
    }

    /// Parse an in-memory document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Self::from_yaml(content, Path::new("<inline>"))
    }

    fn from_yaml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut cfg: ProjectConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn normalize(&mut self) {
        for (name, service) in self.services.iter_mut() {
            service.name = name.clone();
            if service.image.trim().is_empty() {
                service.image = name.clone();
            }
            for (region, target) in service.regions.iter_mut() {
                target.region = region.clone();
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::Invalid("project_name is empty".into()));
        }
        if self.compose_project_name().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "project_name '{}' has no alphanumeric characters",
                self.project_name
            )));
        }
        if self.services.is_empty() {
            return Err(ConfigError::Invalid("no services declared".into()));
        }
        for service in self.services.values() {
            if service.regions.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "service '{}' declares no regions",
                    service.name
                )));
            }
            if service.resources.cpu_units == 0 || service.resources.memory_units == 0 {
                return Err(ConfigError::Invalid(format!(
                    "service '{}' has zero cpu or memory units",
                    service.name
                )));
            }
            for target in service.regions.values() {
                if target.repository_url.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "service '{}' region '{}' has no repository_url",
                        service.name, target.region
                    )));
                }
                if target.environments.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "service '{}' region '{}' declares no environments",
                        service.name, target.region
                    )));
                }
                if let Some(bad) = target.environments.iter().find(|e| e.trim().is_empty()) {
                    return Err(ConfigError::Invalid(format!(
                        "service '{}' region '{}' has an empty environment name '{bad}'",
                        service.name, target.region
                    )));
                }
            }
        }
        Ok(())
    }

    /// Project name with every non-alphanumeric character removed (local image prefix).
    pub fn compose_project_name(&self) -> String {
        self.project_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect()
    }

    /// Cluster hosting every service of `environment`.
    pub fn cluster_name(&self, environment: &str) -> String {
        format!("{}_{}", self.project_name, environment)
    }

    /// Deterministic task definition family for a triple.
    pub fn task_family(&self, service: &str, environment: &str) -> String {
        format!("{}_{}_{}", self.project_name, service, environment)
    }

    /// Local image name a build produces for one environment.
    pub fn local_image(&self, service: &ServiceSpec, environment: &str) -> String {
        format!(
            "{}_{}_{}",
            self.compose_project_name(),
            service.image,
            environment
        )
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    pub fn build_key(&self, service: &ServiceSpec) -> BuildKey {
        let over = service.build.as_ref();
        BuildKey {
            dockerfile: over
                .and_then(|b| b.dockerfile.clone())
                .unwrap_or_else(|| self.dockerfile_path.clone()),
            context: over
                .and_then(|b| b.context.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// Every `(service, region, environment)` triple passing `filter`, in declaration order.
    pub fn targets(&self, filter: &EnvironmentFilter) -> Vec<DeployTarget> {
        let mut out = Vec::new();
        for service in self.services.values() {
            for target in service.regions.values() {
                for environment in &target.environments {
                    if !filter.matches(environment) {
                        continue;
                    }
                    out.push(DeployTarget {
                        service: service.name.clone(),
                        region: target.region.clone(),
                        environment: environment.clone(),
                        repository_url: target.repository_url.clone(),
                    });
                }
            }
        }
        out
    }

    /// Triples for one service/environment, optionally narrowed to a region.
    pub fn targets_for(
        &self,
        service: &str,
        environment: &str,
        region: Option<&str>,
    ) -> Vec<DeployTarget> {
        self.targets(&EnvironmentFilter::only([environment]))
            .into_iter()
            .filter(|t| t.service == service)
            .filter(|t| region.is_none_or(|r| r == t.region))
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
project_name: acme-shop
config_s3_bucket: acme-config
services:
  web:
    image: app
    command: bundle exec puma
    ports: [3000]
    resources:
      cpu_units: 512
      memory_units: 1024
    regions:
      us-west-2:
        repository_url: 123.dkr.ecr.us-west-2.amazonaws.com/acme/app
        environments: [staging, production]
  worker:
    image: app
    regions:
      us-west-2:
        repository_url: 123.dkr.ecr.us-west-2.amazonaws.com/acme/app
        environments: [production]
exec:
  console: bin/rails console
access:
  strategy: ephemeral_address
  ssh_user: ubuntu
"#;

    #[test]
    fn parses_and_normalizes_tree() {
        let cfg = ProjectConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.dockerfile_path, PathBuf::from(DEFAULT_DOCKERFILE));
        assert_eq!(cfg.services.len(), 2);

        let web = cfg.service("web").unwrap();
        assert_eq!(web.name, "web");
        assert_eq!(web.resources.cpu_units, 512);
        assert_eq!(web.regions["us-west-2"].region, "us-west-2");

        let worker = cfg.service("worker").unwrap();
        assert_eq!(worker.resources, Resources::default());

        assert_eq!(cfg.access.strategy, AccessStrategy::EphemeralAddress);
        assert_eq!(cfg.access.ssh_user, "ubuntu");
        assert_eq!(cfg.access.ssh_port, 22);
        assert_eq!(cfg.exec["console"], "bin/rails console");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn names_follow_project_conventions() {
        let cfg = ProjectConfig::parse(SAMPLE).unwrap();
        let web = cfg.service("web").unwrap();

        assert_eq!(cfg.compose_project_name(), "acmeshop");
        assert_eq!(cfg.cluster_name("staging"), "acme-shop_staging");
        assert_eq!(cfg.task_family("web", "staging"), "acme-shop_web_staging");
        assert_eq!(cfg.local_image(web, "staging"), "acmeshop_app_staging");
    }

    #[test]
    fn targets_fan_out_with_filter() {
        let cfg = ProjectConfig::parse(SAMPLE).unwrap();

        let all = cfg.targets(&EnvironmentFilter::all());
        assert_eq!(all.len(), 3);

        let prod = cfg.targets(&EnvironmentFilter::only(["production"]));
        let names: Vec<_> = prod.iter().map(|t| t.service.as_str()).collect();
        assert_eq!(names, vec!["web", "worker"]);

        assert_eq!(cfg.targets_for("web", "staging", Some("eu-west-1")).len(), 0);
        assert_eq!(cfg.targets_for("web", "staging", None).len(), 1);
    }

    #[test]
    fn services_sharing_image_share_build_key() {
        let cfg = ProjectConfig::parse(SAMPLE).unwrap();
        let web = cfg.build_key(cfg.service("web").unwrap());
        let worker = cfg.build_key(cfg.service("worker").unwrap());
        assert_eq!(web, worker);
    }

    #[test]
    fn build_key_ignores_service_and_image_names() {
        let cfg = ProjectConfig::parse(
            r#"
project_name: acme
config_s3_bucket: acme-config
services:
  web:
    regions:
      us-west-2:
        repository_url: 1.dkr.ecr.us-west-2.amazonaws.com/acme/web
        environments: [staging]
  worker:
    regions:
      us-west-2:
        repository_url: 1.dkr.ecr.us-west-2.amazonaws.com/acme/worker
        environments: [staging]
"#,
        )
        .unwrap();
        let web = cfg.service("web").unwrap();
        let worker = cfg.service("worker").unwrap();
        assert_ne!(web.image, worker.image);
        assert_eq!(cfg.build_key(web), cfg.build_key(worker));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = ProjectConfig::load("/definitely/not/here/.berth.yml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let err = ProjectConfig::parse("project_name: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn region_without_environments_is_invalid() {
        let doc = r#"
project_name: acme
config_s3_bucket: b
services:
  web:
    regions:
      us-west-2:
        repository_url: repo
        environments: []
"#;
        let err = ProjectConfig::parse(doc).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("no environments")));
    }

    #[test]
    fn image_defaults_to_service_name() {
        let doc = r#"
project_name: acme
config_s3_bucket: b
services:
  web:
    regions:
      us-west-2:
        repository_url: repo
        environments: [staging]
"#;
        let cfg = ProjectConfig::parse(doc).unwrap();
        assert_eq!(cfg.service("web").unwrap().image, "web");
    }
}
