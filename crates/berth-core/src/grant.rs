//! Temporary network access to a worker node.
//!
//! A [`NetworkAccessGrant`] journals every resource it acquires. Release walks
//! the journal backwards, attempting each step once; failures are logged and
//! do not stop the remaining steps.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use berth_cloud::{CloudError, ComputeNode, IngressRule, NetworkFabric, PublicAddress};
use berth_model::{AccessConfig, AccessStrategy};

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("node {0} has no public address")]
    NoPublicAddress(String),
    #[error("access security group '{name}' not found in {vpc_id}")]
    MissingAccessGroup { name: String, vpc_id: String },
    #[error("operator address lookup failed: {0}")]
    OperatorAddress(#[source] CloudError),
    #[error("{step} failed: {source}")]
    Acquire {
        step: &'static str,
        #[source]
        source: CloudError,
    },
}

/// One resource held by a grant, with what is needed to give it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    Address { allocation_id: String },
    Association { association_id: String },
    SecurityGroup { group_id: String },
    IngressRule { group_id: String, rule: IngressRule },
    Membership { instance_id: String, original: Vec<String> },
}

impl Acquired {
    fn step(&self) -> &'static str {
        match self {
            Acquired::Address { .. } => "release address",
            Acquired::Association { .. } => "disassociate address",
            Acquired::SecurityGroup { .. } => "delete security group",
            Acquired::IngressRule { .. } => "revoke ingress",
            Acquired::Membership { .. } => "restore node groups",
        }
    }
}

/// Reachability of one node for one session.
pub struct NetworkAccessGrant {
    name: String,
    region: String,
    address: Option<String>,
    journal: Vec<Acquired>,
    released: bool,
}

impl NetworkAccessGrant {
    fn new(name: String, region: &str) -> Self {
        Self {
            name,
            region: region.to_string(),
            address: None,
            journal: Vec::new(),
            released: false,
        }
    }

    /// Unique name; also the description of the ingress rule it adds.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address to connect to.
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or_default()
    }

    /// Held resources in acquisition order.
    pub fn acquired(&self) -> &[Acquired] {
        &self.journal
    }
}

impl fmt::Debug for NetworkAccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkAccessGrant")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("address", &self.address)
            .field("held", &self.journal.len())
            .finish()
    }
}

impl Drop for NetworkAccessGrant {
    fn drop(&mut self) {
        if !self.released && !self.journal.is_empty() {
            warn!(
                target: "berth.core.grant",
                grant = %self.name,
                held = ?self.journal,
                "grant dropped without release; resources must be removed by hand"
            );
        }
    }
}

/// Outcome of [`GrantManager::release`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub attempted: usize,
    /// Steps that failed, as `"<step>: <error>"`.
    pub failed: Vec<String>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// `berth-{cluster}-{8 hex chars}`.
pub fn grant_name(cluster: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("berth-{cluster}-{}", &id[..8])
}

/// Access group name for the in-place strategy.
pub fn access_group_name(access: &AccessConfig, cluster: &str) -> String {
    access
        .security_group
        .clone()
        .unwrap_or_else(|| format!("team-access-{cluster}"))
}

fn operator_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

pub struct GrantManager<'a> {
    network: &'a dyn NetworkFabric,
    address: &'a dyn PublicAddress,
    access: &'a AccessConfig,
}

impl<'a> GrantManager<'a> {
    pub fn new(
        network: &'a dyn NetworkFabric,
        address: &'a dyn PublicAddress,
        access: &'a AccessConfig,
    ) -> Self {
        Self {
            network,
            address,
            access,
        }
    }

    /// Make `node` reachable over SSH from the operator's address.
    ///
    /// On failure everything acquired so far is released before the error is returned.
    pub async fn acquire(
        &self,
        region: &str,
        cluster: &str,
        node: &ComputeNode,
    ) -> Result<NetworkAccessGrant, GrantError> {
        let operator_ip = self
            .address
            .operator_ip()
            .await
            .map_err(GrantError::OperatorAddress)?;
        let mut grant = NetworkAccessGrant::new(grant_name(cluster), region);
        let rule = IngressRule::ssh_from(operator_ip, self.access.ssh_port, grant.name.clone());

        info!(
            target: "berth.core.grant",
            grant = %grant.name,
            strategy = ?self.access.strategy,
            instance = %node.instance_id,
            %operator_ip,
            "acquiring access"
        );

        let res = match self.access.strategy {
            AccessStrategy::InPlaceIngress => self.in_place(&mut grant, cluster, node, rule).await,
            AccessStrategy::EphemeralAddress => self.ephemeral(&mut grant, node, rule).await,
        };

        match res {
            Ok(()) => Ok(grant),
            Err(e) => {
                warn!(target: "berth.core.grant", grant = %grant.name, error = %e, "acquisition failed; releasing");
                self.release(grant).await;
                Err(e)
            }
        }
    }

    async fn in_place(
        &self,
        grant: &mut NetworkAccessGrant,
        cluster: &str,
        node: &ComputeNode,
        rule: IngressRule,
    ) -> Result<(), GrantError> {
        let address = node
            .public_ip
            .clone()
            .ok_or_else(|| GrantError::NoPublicAddress(node.instance_id.clone()))?;

        let name = access_group_name(self.access, cluster);
        let group_id = self
            .network
            .find_security_group(&grant.region, &node.vpc_id, &name)
            .await
            .map_err(|source| GrantError::Acquire {
                step: "find access group",
                source,
            })?
            .ok_or_else(|| GrantError::MissingAccessGroup {
                name: name.clone(),
                vpc_id: node.vpc_id.clone(),
            })?;

        match self
            .network
            .authorize_ingress(&grant.region, &group_id, &rule)
            .await
        {
            Ok(()) => grant.journal.push(Acquired::IngressRule { group_id, rule }),
            Err(CloudError::DuplicateRule(_)) => {
                info!(target: "berth.core.grant", group = %group_id, "ingress already open; leaving it in place");
            }
            Err(source) => {
                return Err(GrantError::Acquire {
                    step: "authorize ingress",
                    source,
                });
            }
        }

        grant.address = Some(address);
        Ok(())
    }

    async fn ephemeral(
        &self,
        grant: &mut NetworkAccessGrant,
        node: &ComputeNode,
        rule: IngressRule,
    ) -> Result<(), GrantError> {
        let region = grant.region.clone();
        let original = node.security_groups.clone();
        let step = |step: &'static str| move |source| GrantError::Acquire { step, source };

        let allocation = self
            .network
            .allocate_address(&region)
            .await
            .map_err(step("allocate address"))?;
        grant.journal.push(Acquired::Address {
            allocation_id: allocation.allocation_id.clone(),
        });

        let association_id = self
            .network
            .associate_address(&region, &allocation.allocation_id, &node.instance_id)
            .await
            .map_err(step("associate address"))?;
        grant.journal.push(Acquired::Association { association_id });

        let description = format!("berth exec session {} from {}", grant.name, operator_host());
        let group_id = self
            .network
            .create_security_group(&region, &node.vpc_id, &grant.name, &description)
            .await
            .map_err(step("create security group"))?;
        grant.journal.push(Acquired::SecurityGroup {
            group_id: group_id.clone(),
        });

        self.network
            .authorize_ingress(&region, &group_id, &rule)
            .await
            .map_err(step("authorize ingress"))?;
        grant.journal.push(Acquired::IngressRule {
            group_id: group_id.clone(),
            rule,
        });

        let mut groups = original.clone();
        groups.push(group_id);
        self.network
            .set_node_groups(&region, &node.instance_id, &groups)
            .await
            .map_err(step("attach security group"))?;
        grant.journal.push(Acquired::Membership {
            instance_id: node.instance_id.clone(),
            original,
        });

        grant.address = Some(allocation.public_ip);
        Ok(())
    }

    /// Give back every held resource, newest first. Never fails; see [`ReleaseReport`].
    pub async fn release(&self, mut grant: NetworkAccessGrant) -> ReleaseReport {
        let held = std::mem::take(&mut grant.journal);
        grant.released = true;

        let mut report = ReleaseReport::default();
        for item in held.into_iter().rev() {
            report.attempted += 1;
            let res = self.undo(&grant.region, &item).await;
            match res {
                Ok(()) => debug!(target: "berth.core.grant", step = item.step(), "released"),
                Err(e) => {
                    warn!(target: "berth.core.grant", grant = %grant.name, step = item.step(), error = %e, "release step failed");
                    report.failed.push(format!("{}: {e}", item.step()));
                }
            }
        }
        info!(target: "berth.core.grant", grant = %grant.name, attempted = report.attempted, failed = report.failed.len(), "access released");
        report
    }

    async fn undo(&self, region: &str, item: &Acquired) -> Result<(), CloudError> {
        match item {
            Acquired::Membership {
                instance_id,
                original,
            } => self.network.set_node_groups(region, instance_id, original).await,
            Acquired::IngressRule { group_id, rule } => {
                self.network.revoke_ingress(region, group_id, rule).await
            }
            Acquired::SecurityGroup { group_id } => {
                self.network.delete_security_group(region, group_id).await
            }
            Acquired::Association { association_id } => {
                self.network.disassociate_address(region, association_id).await
            }
            Acquired::Address { allocation_id } => {
                self.network.release_address(region, allocation_id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NODE_ARN, node};
    use berth_cloud::memory::MemoryCloud;

    const CLUSTER: &str = "acme_staging";
    const REGION: &str = "us-west-2";

    fn access(strategy: AccessStrategy) -> AccessConfig {
        AccessConfig {
            strategy,
            ..AccessConfig::default()
        }
    }

    fn network_ops(cloud: &MemoryCloud) -> Vec<String> {
        cloud
            .operations()
            .into_iter()
            .filter(|o| o != "operator_ip" && o != "resolve_node")
            .collect()
    }

    #[test]
    fn grant_names_are_unique_and_scoped() {
        let a = grant_name(CLUSTER);
        let b = grant_name(CLUSTER);
        assert_ne!(a, b);
        assert!(a.starts_with("berth-acme_staging-"));
        assert_eq!(a.len(), "berth-acme_staging-".len() + 8);
    }

    #[tokio::test]
    async fn in_place_adds_and_revokes_named_rule() {
        let cloud = MemoryCloud::new();
        let sg = cloud.with_security_group("vpc-1", "team-access-acme_staging");
        cloud.with_node(NODE_ARN, node());
        let cfg = access(AccessStrategy::InPlaceIngress);
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let grant = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap();
        assert_eq!(grant.address(), "54.1.2.3");
        let rules = cloud.group_rules(&sg);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].cidr, "203.0.113.7/32");
        assert_eq!(rules[0].description, grant.name());

        let report = mgr.release(grant).await;
        assert!(report.is_clean());
        assert!(cloud.group_rules(&sg).is_empty());
    }

    #[tokio::test]
    async fn ipv6_operator_gets_single_host_rule() {
        let cloud = MemoryCloud::new();
        let sg = cloud.with_security_group("vpc-1", "team-access-acme_staging");
        cloud
            .with_node(NODE_ARN, node())
            .with_operator_ip("2001:db8::7".parse().unwrap());
        let cfg = access(AccessStrategy::InPlaceIngress);
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let grant = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap();
        let rules = cloud.group_rules(&sg);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].cidr, "2001:db8::7/128");

        assert!(mgr.release(grant).await.is_clean());
        assert!(cloud.group_rules(&sg).is_empty());
    }

    #[tokio::test]
    async fn in_place_leaves_preexisting_rule() {
        let cloud = MemoryCloud::new();
        let sg = cloud.with_security_group("vpc-1", "team-access-acme_staging");
        cloud.with_rule(
            &sg,
            IngressRule::ssh_from("203.0.113.7".parse().unwrap(), 22, "office"),
        );
        let cfg = access(AccessStrategy::InPlaceIngress);
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let grant = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap();
        assert!(grant.acquired().is_empty());
        let report = mgr.release(grant).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(cloud.group_rules(&sg).len(), 1);
        assert_eq!(cloud.count("revoke_ingress"), 0);
    }

    #[tokio::test]
    async fn in_place_requires_access_group_and_public_address() {
        let cloud = MemoryCloud::new();
        let cfg = access(AccessStrategy::InPlaceIngress);
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let err = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap_err();
        assert!(matches!(err, GrantError::MissingAccessGroup { ref name, .. } if name == "team-access-acme_staging"));

        let mut private = node();
        private.public_ip = None;
        let err = mgr.acquire(REGION, CLUSTER, &private).await.unwrap_err();
        assert!(matches!(err, GrantError::NoPublicAddress(_)));
    }

    #[tokio::test]
    async fn configured_access_group_name_wins() {
        let cloud = MemoryCloud::new();
        let sg = cloud.with_security_group("vpc-1", "ops-bastion");
        let cfg = AccessConfig {
            security_group: Some("ops-bastion".into()),
            ..AccessConfig::default()
        };
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let grant = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap();
        assert_eq!(cloud.group_rules(&sg).len(), 1);
        mgr.release(grant).await;
    }

    #[tokio::test]
    async fn ephemeral_acquires_then_releases_in_reverse() {
        let cloud = MemoryCloud::new();
        cloud.with_node(NODE_ARN, node());
        let cfg = access(AccessStrategy::EphemeralAddress);
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let grant = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap();
        assert!(grant.address().starts_with("198.51.100."));
        assert_eq!(cloud.node(NODE_ARN).unwrap().security_groups.len(), 2);

        let report = mgr.release(grant).await;
        assert!(report.is_clean(), "{:?}", report.failed);
        assert_eq!(
            network_ops(&cloud),
            [
                "allocate_address",
                "associate_address",
                "create_security_group",
                "authorize_ingress",
                "set_node_groups",
                "set_node_groups",
                "revoke_ingress",
                "delete_security_group",
                "disassociate_address",
                "release_address",
            ]
        );
        assert_eq!(cloud.node(NODE_ARN).unwrap().security_groups, ["sg-ecs"]);
        assert_eq!(cloud.group_count(), 0);
        assert_eq!(cloud.address_count(), 0);
        assert_eq!(cloud.association_count(), 0);
    }

    #[tokio::test]
    async fn release_failures_do_not_stop_later_steps() {
        let cloud = MemoryCloud::new();
        cloud.with_node(NODE_ARN, node()).fail("revoke_ingress");
        let cfg = access(AccessStrategy::EphemeralAddress);
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let grant = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap();
        let report = mgr.release(grant).await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].starts_with("revoke ingress"));
        for op in [
            "revoke_ingress",
            "delete_security_group",
            "disassociate_address",
            "release_address",
        ] {
            assert_eq!(cloud.count(op), 1, "{op} attempted once");
        }
        assert_eq!(cloud.count("set_node_groups"), 2);
    }

    #[tokio::test]
    async fn partial_acquisition_is_unwound() {
        let cloud = MemoryCloud::new();
        cloud.with_node(NODE_ARN, node()).fail("create_security_group");
        let cfg = access(AccessStrategy::EphemeralAddress);
        let mgr = GrantManager::new(&cloud, &cloud, &cfg);

        let err = mgr.acquire(REGION, CLUSTER, &node()).await.unwrap_err();
        assert!(matches!(err, GrantError::Acquire { step: "create security group", .. }));
        assert_eq!(
            network_ops(&cloud),
            [
                "allocate_address",
                "associate_address",
                "create_security_group",
                "disassociate_address",
                "release_address",
            ]
        );
        assert_eq!(cloud.address_count(), 0);
    }
}
