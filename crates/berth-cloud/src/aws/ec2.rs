use async_trait::async_trait;
use serde_json::json;

use super::{AwsCli, at, has_code, string_at};
use crate::network::{AddressAllocation, IngressRule, NetworkFabric};
use crate::{CloudError, CloudResult};

fn ip_permissions(rule: &IngressRule) -> String {
    let mut perm = json!({
        "IpProtocol": rule.protocol,
        "FromPort": rule.port,
        "ToPort": rule.port,
    });
    if rule.is_ipv6() {
        perm["Ipv6Ranges"] = json!([{ "CidrIpv6": rule.cidr, "Description": rule.description }]);
    } else {
        perm["IpRanges"] = json!([{ "CidrIp": rule.cidr, "Description": rule.description }]);
    }
    json!([perm]).to_string()
}

#[async_trait]
impl NetworkFabric for AwsCli {
    async fn find_security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
    ) -> CloudResult<Option<String>> {
        let op = "describe-security-groups";
        let resp = self
            .call(
                region,
                "ec2",
                op,
                [
                    "--filters".to_string(),
                    format!("Name=vpc-id,Values={vpc_id}"),
                    format!("Name=group-name,Values={name}"),
                ],
            )
            .await?;
        at(&resp, "/SecurityGroups/0/GroupId", op)
    }

    async fn create_security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> CloudResult<String> {
        let op = "create-security-group";
        let resp = self
            .call(
                region,
                "ec2",
                op,
                [
                    "--group-name",
                    name,
                    "--description",
                    description,
                    "--vpc-id",
                    vpc_id,
                ],
            )
            .await?;
        string_at(&resp, "/GroupId", op)
    }

    async fn delete_security_group(&self, region: &str, group_id: &str) -> CloudResult<()> {
        self.call(region, "ec2", "delete-security-group", ["--group-id", group_id])
            .await?;
        Ok(())
    }

    async fn authorize_ingress(
        &self,
        region: &str,
        group_id: &str,
        rule: &IngressRule,
    ) -> CloudResult<()> {
        let perms = ip_permissions(rule);
        match self
            .call(
                region,
                "ec2",
                "authorize-security-group-ingress",
                ["--group-id", group_id, "--ip-permissions", perms.as_str()],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if has_code(&err, &["InvalidPermission.Duplicate"]) => {
                Err(CloudError::DuplicateRule(group_id.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn revoke_ingress(
        &self,
        region: &str,
        group_id: &str,
        rule: &IngressRule,
    ) -> CloudResult<()> {
        let perms = ip_permissions(rule);
        self.call(
            region,
            "ec2",
            "revoke-security-group-ingress",
            ["--group-id", group_id, "--ip-permissions", perms.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn allocate_address(&self, region: &str) -> CloudResult<AddressAllocation> {
        let op = "allocate-address";
        let resp = self.call(region, "ec2", op, ["--domain", "vpc"]).await?;
        Ok(AddressAllocation {
            allocation_id: string_at(&resp, "/AllocationId", op)?,
            public_ip: string_at(&resp, "/PublicIp", op)?,
        })
    }

    async fn release_address(&self, region: &str, allocation_id: &str) -> CloudResult<()> {
        self.call(
            region,
            "ec2",
            "release-address",
            ["--allocation-id", allocation_id],
        )
        .await?;
        Ok(())
    }

    async fn associate_address(
        &self,
        region: &str,
        allocation_id: &str,
        instance_id: &str,
    ) -> CloudResult<String> {
        let op = "associate-address";
        let resp = self
            .call(
                region,
                "ec2",
                op,
                ["--allocation-id", allocation_id, "--instance-id", instance_id],
            )
            .await?;
        string_at(&resp, "/AssociationId", op)
    }

    async fn disassociate_address(&self, region: &str, association_id: &str) -> CloudResult<()> {
        self.call(
            region,
            "ec2",
            "disassociate-address",
            ["--association-id", association_id],
        )
        .await?;
        Ok(())
    }

    async fn set_node_groups(
        &self,
        region: &str,
        instance_id: &str,
        group_ids: &[String],
    ) -> CloudResult<()> {
        let mut args = vec![
            "--instance-id".to_string(),
            instance_id.to_string(),
            "--groups".to_string(),
        ];
        args.extend(group_ids.iter().cloned());
        self.call(region, "ec2", "modify-instance-attribute", args)
            .await?;
        Ok(())
    }
}
