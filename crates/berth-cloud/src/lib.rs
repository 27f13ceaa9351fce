//! External collaborators of the deployment engine.
//!
//! Each concern is a trait (`TaskRegistry`, `ComputeRegistry`, `NetworkFabric`,
//! `ArtifactRegistry`, `ConfigStore`, `SourceControl`, `PublicAddress`,
//! `CredentialProvider`). Production implementations live in [`aws`],
//! [`source`] and [`address`]; [`memory`] simulates all of them for tests.

mod error;
pub use error::{CloudError, CloudResult};

pub mod address;
pub mod artifact;
pub mod aws;
pub mod config_store;
pub mod credentials;
pub mod network;
pub mod scheduler;
pub mod source;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use address::{HttpEcho, PublicAddress, StaticAddress};
pub use artifact::{ArtifactRegistry, RegistryLogin};
pub use aws::{AwsCli, S3ConfigStore};
pub use config_store::{ConfigPublish, ConfigStore};
pub use credentials::{CredentialChain, CredentialProvider, Credentials};
pub use network::{AddressAllocation, IngressRule, NetworkFabric};
pub use scheduler::{ComputeNode, ComputeRegistry, ServiceUpdate, TaskRegistry};
pub use source::{GitCli, SourceControl};
