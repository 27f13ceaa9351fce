use std::sync::Arc;

use berth_cloud::{
    ArtifactRegistry, ComputeRegistry, ConfigStore, NetworkFabric, PublicAddress, SourceControl,
    TaskRegistry,
};
use berth_exec::CommandRunner;

/// Collaborators the engine talks to, resolved once at startup.
#[derive(Clone)]
pub struct Backends {
    pub tasks: Arc<dyn TaskRegistry>,
    pub compute: Arc<dyn ComputeRegistry>,
    pub network: Arc<dyn NetworkFabric>,
    pub artifacts: Arc<dyn ArtifactRegistry>,
    pub config_store: Arc<dyn ConfigStore>,
    pub source: Arc<dyn SourceControl>,
    pub address: Arc<dyn PublicAddress>,
    /// Runs docker and ssh.
    pub runner: Arc<dyn CommandRunner>,
}
