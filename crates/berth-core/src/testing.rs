//! Fixtures shared by the engine tests.

use std::sync::Arc;

use serde_json::json;

use berth_cloud::ComputeNode;
use berth_cloud::memory::MemoryCloud;
use berth_exec::testing::ScriptedRunner;
use berth_model::{ProjectConfig, TaskDefinition};

use crate::Backends;

pub const REGION: &str = "us-west-2";
pub const REPO: &str = "123.dkr.ecr.us-west-2.amazonaws.com/acme/web";
pub const NODE_ARN: &str =
    "arn:aws:ecs:us-west-2:000000000000:container-instance/acme_staging/0f1e2d3c";

/// `web` in us-west-2, serving staging and production.
pub fn sample_config() -> ProjectConfig {
    ProjectConfig::parse(&format!(
        r#"
project_name: acme
config_s3_bucket: acme-config
services:
  web:
    command: bundle exec puma
    resources:
      cpu_units: 512
      memory_units: 1024
    regions:
      us-west-2:
        repository_url: {REPO}
        environments: [staging, production]
exec:
  console: bin/rails console
  migrate: bin/rails db:migrate
"#
    ))
    .unwrap()
}

/// Three services built from one image and one context.
pub fn shared_build_config() -> ProjectConfig {
    ProjectConfig::parse(&format!(
        r#"
project_name: acme
config_s3_bucket: acme-config
services:
  api:
    image: app
    regions:
      us-west-2:
        repository_url: {REPO}
        environments: [production, staging]
  web:
    image: app
    regions:
      us-west-2:
        repository_url: {REPO}
        environments: [staging, production]
  worker:
    image: app
    regions:
      us-west-2:
        repository_url: {REPO}
        environments: [production]
"#
    ))
    .unwrap()
}

/// `web` pushed to one repository per region.
pub fn multi_region_config() -> ProjectConfig {
    ProjectConfig::parse(&format!(
        r#"
project_name: acme
config_s3_bucket: acme-config
services:
  web:
    regions:
      eu-west-1:
        repository_url: 456.dkr.ecr.eu-west-1.amazonaws.com/acme/web
        environments: [production]
      us-west-2:
        repository_url: {REPO}
        environments: [staging]
"#
    ))
    .unwrap()
}

/// Single-container definition as the scheduler would describe it.
pub fn task_definition(family: &str, container: &str) -> TaskDefinition {
    serde_json::from_value(json!({
        "family": family,
        "taskRoleArn": "arn:aws:iam::123:role/acme-ecs-task",
        "containerDefinitions": [{
            "name": container,
            "image": format!("{REPO}:0000000"),
            "cpu": 256,
            "memory": 256,
            "essential": true,
            "environment": [
                {"name": "RACK_ENV", "value": "staging"},
                {"name": "S3_CONFIG_REVISION", "value": "5"},
                {"name": "DATABASE_URL", "value": "postgres://db/acme"}
            ],
            "logConfiguration": {
                "logDriver": "awslogs",
                "options": {"awslogs-group": "acme"}
            }
        }]
    }))
    .unwrap()
}

/// Definition and active service for one service/environment in [`REGION`].
pub fn seed_triple(cloud: &MemoryCloud, config: &ProjectConfig, service: &str, environment: &str) {
    let family = config.task_family(service, environment);
    cloud
        .with_task_definition(REGION, task_definition(&family, service))
        .with_service(REGION, &config.cluster_name(environment), service, &family);
}

pub fn node() -> ComputeNode {
    ComputeNode {
        instance_id: "i-0abc".into(),
        vpc_id: "vpc-1".into(),
        public_ip: Some("54.1.2.3".into()),
        private_ip: Some("10.0.1.5".into()),
        security_groups: vec!["sg-ecs".into()],
    }
}

pub fn backends(cloud: &Arc<MemoryCloud>, runner: &Arc<ScriptedRunner>) -> Backends {
    Backends {
        tasks: cloud.clone(),
        compute: cloud.clone(),
        network: cloud.clone(),
        artifacts: cloud.clone(),
        config_store: cloud.clone(),
        source: cloud.clone(),
        address: cloud.clone(),
        runner: runner.clone(),
    }
}
