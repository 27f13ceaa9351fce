//! Domain model shared by every berth crate.
//!
//! Holds the parsed project configuration tree, the deployment fan-out keys and
//! the remote scheduler descriptors exchanged with the cloud backends.

mod config;
pub use config::{
    AccessConfig, AccessStrategy, BuildOverride, CONFIG_FILE_NAME, ConfigError,
    ConfigStoreConfig, DEFAULT_DOCKERFILE, ProjectConfig, RegionTarget, Resources, ServiceSpec,
};

pub mod domain;
pub use domain::{
    ArtifactTag, BuildKey, DeployTarget, EnvironmentFilter, KeyValue, TagError, TaskEnv,
};

pub mod task;
pub use task::{
    ContainerDefinition, ContainerOverride, ContainerState, DesiredStatus, RunningService,
    TaskDefinition, TaskDetail, TaskLifecycle,
};
