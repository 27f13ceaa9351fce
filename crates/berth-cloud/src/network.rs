use std::net::IpAddr;

use async_trait::async_trait;

use crate::CloudResult;

/// Single inbound rule: one protocol, one port, one CIDR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IngressRule {
    pub protocol: String,
    pub port: u16,
    pub cidr: String,
    pub description: String,
}

impl IngressRule {
    /// SSH from exactly one address.
    pub fn ssh_from(ip: IpAddr, port: u16, description: impl Into<String>) -> Self {
        let prefix = if ip.is_ipv4() { 32 } else { 128 };
        Self {
            protocol: "tcp".to_string(),
            port,
            cidr: format!("{ip}/{prefix}"),
            description: description.into(),
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.cidr.contains(':')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAllocation {
    pub allocation_id: String,
    pub public_ip: String,
}

/// Security groups, ingress rules and public addresses of the compute fabric.
#[async_trait]
pub trait NetworkFabric: Send + Sync {
    /// Id of the group called `name` in `vpc_id`, if any.
    async fn find_security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
    ) -> CloudResult<Option<String>>;

    async fn create_security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> CloudResult<String>;

    async fn delete_security_group(&self, region: &str, group_id: &str) -> CloudResult<()>;

    /// Fails with [`CloudError::DuplicateRule`](crate::CloudError::DuplicateRule)
    /// when an identical rule is already present.
    async fn authorize_ingress(
        &self,
        region: &str,
        group_id: &str,
        rule: &IngressRule,
    ) -> CloudResult<()>;

    async fn revoke_ingress(&self, region: &str, group_id: &str, rule: &IngressRule)
    -> CloudResult<()>;

    async fn allocate_address(&self, region: &str) -> CloudResult<AddressAllocation>;

    async fn release_address(&self, region: &str, allocation_id: &str) -> CloudResult<()>;

    /// Returns the association id.
    async fn associate_address(
        &self,
        region: &str,
        allocation_id: &str,
        instance_id: &str,
    ) -> CloudResult<String>;

    async fn disassociate_address(&self, region: &str, association_id: &str) -> CloudResult<()>;

    /// Replace the node's security group membership with `group_ids`.
    async fn set_node_groups(
        &self,
        region: &str,
        instance_id: &str,
        group_ids: &[String],
    ) -> CloudResult<()>;
}
