//! In-memory cloud.
//!
//! [`MemoryCloud`] implements every collaborator trait over plain maps so the
//! engine can be exercised without a network. Each call is appended to a
//! journal (`"<operation> <args>"`) before any injected fault is applied, so
//! tests can assert on attempts as well as on resulting state.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use berth_model::{
    ContainerOverride, ContainerState, DesiredStatus, RunningService, TaskDefinition, TaskDetail,
    TaskLifecycle,
};

use crate::artifact::{ArtifactRegistry, RegistryLogin, registry_endpoint};
use crate::config_store::{ConfigPublish, ConfigStore, parse_published_revision};
use crate::network::{AddressAllocation, IngressRule, NetworkFabric};
use crate::scheduler::{ComputeNode, ComputeRegistry, ServiceUpdate, TaskRegistry};
use crate::source::SourceControl;
use crate::address::PublicAddress;
use crate::{CloudError, CloudResult};

const ACCOUNT: &str = "000000000000";

struct Fault {
    operation: String,
    remaining: Option<usize>,
}

struct SimTask {
    region: String,
    cluster: String,
    service: Option<String>,
    detail: TaskDetail,
    /// `describe_tasks` calls left before a started task stops.
    polls_left: u32,
    exit_code: Option<i32>,
}

struct SimGroup {
    name: String,
    vpc_id: String,
    rules: Vec<IngressRule>,
}

struct State {
    definitions: BTreeMap<(String, String), Vec<TaskDefinition>>,
    services: BTreeMap<(String, String, String), RunningService>,
    tasks: Vec<SimTask>,
    nodes: BTreeMap<String, ComputeNode>,
    groups: BTreeMap<String, SimGroup>,
    addresses: BTreeMap<String, AddressAllocation>,
    associations: BTreeMap<String, (String, String)>,
    tags: BTreeMap<String, Vec<String>>,
    revisions: BTreeMap<(String, String), u64>,
    publish_output: String,
    head: String,
    clean: bool,
    commits: Vec<String>,
    operator_ip: IpAddr,
    detached_exit: Option<i32>,
    detached_polls: u32,
    registrations_without_arn: bool,
    journal: Vec<String>,
    faults: Vec<Fault>,
    seq: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            definitions: BTreeMap::new(),
            services: BTreeMap::new(),
            tasks: Vec::new(),
            nodes: BTreeMap::new(),
            groups: BTreeMap::new(),
            addresses: BTreeMap::new(),
            associations: BTreeMap::new(),
            tags: BTreeMap::new(),
            revisions: BTreeMap::new(),
            publish_output: String::new(),
            head: "abc123".to_string(),
            clean: true,
            commits: Vec::new(),
            operator_ip: IpAddr::from([203, 0, 113, 7]),
            detached_exit: Some(0),
            detached_polls: 1,
            registrations_without_arn: false,
            journal: Vec::new(),
            faults: Vec::new(),
            seq: 0,
        }
    }
}

impl State {
    fn next(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Journal the call, then apply any fault registered for `operation`.
    fn enter(&mut self, operation: &str, detail: String) -> CloudResult<()> {
        self.journal.push(if detail.is_empty() {
            operation.to_string()
        } else {
            format!("{operation} {detail}")
        });
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.operation == operation && f.remaining != Some(0));
        match fault {
            Some(f) => {
                if let Some(n) = f.remaining.as_mut() {
                    *n -= 1;
                }
                Err(CloudError::Rejected {
                    operation: operation.to_string(),
                    message: "injected fault".to_string(),
                })
            }
            None => Ok(()),
        }
    }

    fn rejected(operation: &str, message: impl Into<String>) -> CloudError {
        CloudError::Rejected {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    fn group_in_use(&self, group_id: &str) -> bool {
        self.nodes
            .values()
            .any(|n| n.security_groups.iter().any(|g| g == group_id))
    }
}

/// Simulated cloud implementing every collaborator trait.
#[derive(Default)]
pub struct MemoryCloud {
    state: Mutex<State>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // seeding

    /// Store `definition` as the next revision of its family.
    pub fn with_task_definition(&self, region: &str, definition: TaskDefinition) -> &Self {
        let mut st = self.state();
        store_revision(&mut st, region, definition);
        drop(st);
        self
    }

    /// Active service bound to the latest revision of `family`.
    pub fn with_service(&self, region: &str, cluster: &str, service: &str, family: &str) -> &Self {
        let mut st = self.state();
        let arn = st
            .definitions
            .get(&(region.to_string(), family.to_string()))
            .and_then(|revs| revs.last())
            .and_then(|d| d.task_definition_arn.clone())
            .unwrap_or_default();
        st.services.insert(
            (region.to_string(), cluster.to_string(), service.to_string()),
            RunningService {
                service_name: service.to_string(),
                status: "ACTIVE".to_string(),
                task_definition: arn,
                desired_count: 1,
                running_count: 1,
            },
        );
        drop(st);
        self
    }

    pub fn with_node(&self, container_instance_arn: &str, node: ComputeNode) -> &Self {
        self.state()
            .nodes
            .insert(container_instance_arn.to_string(), node);
        self
    }

    /// Running task of `service` on the node registered as `container_instance_arn`.
    pub fn with_running_task(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
        family: &str,
        container_instance_arn: &str,
    ) -> &Self {
        let mut st = self.state();
        let n = st.next();
        let definition_arn = st
            .definitions
            .get(&(region.to_string(), family.to_string()))
            .and_then(|revs| revs.last())
            .and_then(|d| d.task_definition_arn.clone())
            .unwrap_or_default();
        st.tasks.push(SimTask {
            region: region.to_string(),
            cluster: cluster.to_string(),
            service: Some(service.to_string()),
            detail: TaskDetail {
                task_arn: format!("arn:aws:ecs:{region}:{ACCOUNT}:task/{cluster}/{n}"),
                task_definition_arn: definition_arn,
                container_instance_arn: Some(container_instance_arn.to_string()),
                last_status: TaskLifecycle::Running,
                containers: Vec::new(),
                stopped_reason: None,
            },
            polls_left: u32::MAX,
            exit_code: None,
        });
        drop(st);
        self
    }

    /// Pre-existing security group; returns its id.
    pub fn with_security_group(&self, vpc_id: &str, name: &str) -> String {
        let mut st = self.state();
        let id = format!("sg-{:08x}", st.next());
        st.groups.insert(
            id.clone(),
            SimGroup {
                name: name.to_string(),
                vpc_id: vpc_id.to_string(),
                rules: Vec::new(),
            },
        );
        id
    }

    pub fn with_rule(&self, group_id: &str, rule: IngressRule) -> &Self {
        if let Some(group) = self.state().groups.get_mut(group_id) {
            group.rules.push(rule);
        }
        self
    }

    pub fn with_tags<I, S>(&self, repository_url: &str, tags: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().tags.insert(
            repository_url.to_string(),
            tags.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_revision(&self, region: &str, environment: &str, revision: u64) -> &Self {
        self.state()
            .revisions
            .insert((region.to_string(), environment.to_string()), revision);
        self
    }

    pub fn with_publish_output(&self, output: &str) -> &Self {
        self.state().publish_output = output.to_string();
        self
    }

    pub fn with_head(&self, commit: &str) -> &Self {
        self.state().head = commit.to_string();
        self
    }

    pub fn with_dirty_tree(&self) -> &Self {
        self.state().clean = false;
        self
    }

    /// Commit history, newest first.
    pub fn with_commits<I, S>(&self, commits: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().commits = commits.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_operator_ip(&self, ip: IpAddr) -> &Self {
        self.state().operator_ip = ip;
        self
    }

    /// Registration responses omit the new definition's ARN.
    pub fn with_registrations_without_arn(&self) -> &Self {
        self.state().registrations_without_arn = true;
        self
    }

    /// Outcome of tasks started by `run_task`: stop after `polls` describes with `exit_code`.
    pub fn with_detached_outcome(&self, exit_code: Option<i32>, polls: u32) -> &Self {
        let mut st = self.state();
        st.detached_exit = exit_code;
        st.detached_polls = polls;
        drop(st);
        self
    }

    /// Every later call of `operation` fails.
    pub fn fail(&self, operation: &str) -> &Self {
        self.state().faults.push(Fault {
            operation: operation.to_string(),
            remaining: None,
        });
        self
    }

    /// The next call of `operation` fails.
    pub fn fail_once(&self, operation: &str) -> &Self {
        self.state().faults.push(Fault {
            operation: operation.to_string(),
            remaining: Some(1),
        });
        self
    }

    // inspection

    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    /// Operation names of the journal, in call order.
    pub fn operations(&self) -> Vec<String> {
        self.journal()
            .iter()
            .map(|e| e.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.operations().iter().filter(|o| *o == operation).count()
    }

    pub fn revisions(&self, region: &str, family: &str) -> Vec<TaskDefinition> {
        self.state()
            .definitions
            .get(&(region.to_string(), family.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn service(&self, region: &str, cluster: &str, service: &str) -> Option<RunningService> {
        self.state()
            .services
            .get(&(region.to_string(), cluster.to_string(), service.to_string()))
            .cloned()
    }

    pub fn group_rules(&self, group_id: &str) -> Vec<IngressRule> {
        self.state()
            .groups
            .get(group_id)
            .map(|g| g.rules.clone())
            .unwrap_or_default()
    }

    pub fn group_count(&self) -> usize {
        self.state().groups.len()
    }

    pub fn address_count(&self) -> usize {
        self.state().addresses.len()
    }

    pub fn association_count(&self) -> usize {
        self.state().associations.len()
    }

    pub fn node(&self, container_instance_arn: &str) -> Option<ComputeNode> {
        self.state().nodes.get(container_instance_arn).cloned()
    }
}

fn store_revision(st: &mut State, region: &str, definition: TaskDefinition) -> TaskDefinition {
    let key = (region.to_string(), definition.family.clone());
    let revs = st.definitions.entry(key).or_default();
    let revision = revs.len() as u64 + 1;

    let mut stored = definition.registration();
    stored.revision = Some(revision);
    stored.status = Some("ACTIVE".to_string());
    stored.task_definition_arn = Some(format!(
        "arn:aws:ecs:{region}:{ACCOUNT}:task-definition/{}:{revision}",
        stored.family
    ));
    revs.push(stored.clone());
    stored
}

/// `(family, revision)` of a `...:task-definition/{family}:{revision}` ARN.
fn parse_definition_arn(reference: &str) -> Option<(&str, u64)> {
    let (_, tail) = reference.rsplit_once("task-definition/")?;
    let (family, revision) = tail.rsplit_once(':')?;
    Some((family, revision.parse().ok()?))
}

fn status_matches(status: DesiredStatus, lifecycle: TaskLifecycle) -> bool {
    match status {
        DesiredStatus::Running => lifecycle == TaskLifecycle::Running,
        DesiredStatus::Pending => matches!(
            lifecycle,
            TaskLifecycle::Provisioning | TaskLifecycle::Pending | TaskLifecycle::Activating
        ),
        DesiredStatus::Stopped => lifecycle.is_terminal(),
    }
}

#[async_trait]
impl TaskRegistry for MemoryCloud {
    async fn describe_task_definition(
        &self,
        region: &str,
        family: &str,
    ) -> CloudResult<Option<TaskDefinition>> {
        let mut st = self.state();
        st.enter("describe_task_definition", format!("{region} {family}"))?;
        let found = match parse_definition_arn(family) {
            Some((name, revision)) => st
                .definitions
                .get(&(region.to_string(), name.to_string()))
                .and_then(|revs| revs.iter().find(|d| d.revision == Some(revision))),
            None => st
                .definitions
                .get(&(region.to_string(), family.to_string()))
                .and_then(|revs| revs.last()),
        };
        Ok(found.cloned())
    }

    async fn register_task_definition(
        &self,
        region: &str,
        definition: &TaskDefinition,
    ) -> CloudResult<TaskDefinition> {
        let mut st = self.state();
        st.enter(
            "register_task_definition",
            format!("{region} {}", definition.family),
        )?;
        let mut registered = store_revision(&mut st, region, definition.clone());
        if st.registrations_without_arn {
            registered.task_definition_arn = None;
        }
        Ok(registered)
    }

    async fn describe_service(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
    ) -> CloudResult<Option<RunningService>> {
        let mut st = self.state();
        st.enter("describe_service", format!("{region} {cluster} {service}"))?;
        Ok(st
            .services
            .get(&(region.to_string(), cluster.to_string(), service.to_string()))
            .cloned())
    }

    async fn update_service(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
        update: &ServiceUpdate,
    ) -> CloudResult<RunningService> {
        let mut st = self.state();
        st.enter("update_service", format!("{region} {cluster} {service}"))?;
        let key = (region.to_string(), cluster.to_string(), service.to_string());
        match st.services.get_mut(&key) {
            Some(svc) if svc.is_active() => {
                if let Some(arn) = &update.task_definition {
                    svc.task_definition = arn.clone();
                }
                if let Some(count) = update.desired_count {
                    svc.desired_count = count;
                }
                Ok(svc.clone())
            }
            _ => Err(CloudError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            }),
        }
    }

    async fn list_tasks(
        &self,
        region: &str,
        cluster: &str,
        service: &str,
        status: DesiredStatus,
    ) -> CloudResult<Vec<String>> {
        let mut st = self.state();
        st.enter(
            "list_tasks",
            format!("{region} {cluster} {service} {}", status.as_str()),
        )?;
        Ok(st
            .tasks
            .iter()
            .filter(|t| t.region == region && t.cluster == cluster)
            .filter(|t| t.service.as_deref() == Some(service))
            .filter(|t| status_matches(status, t.detail.last_status))
            .map(|t| t.detail.task_arn.clone())
            .collect())
    }

    async fn describe_tasks(
        &self,
        region: &str,
        cluster: &str,
        task_arns: &[String],
    ) -> CloudResult<Vec<TaskDetail>> {
        let mut st = self.state();
        st.enter("describe_tasks", format!("{region} {cluster} {}", task_arns.join(",")))?;

        let mut out = Vec::new();
        for task in st.tasks.iter_mut() {
            if task.region != region || task.cluster != cluster {
                continue;
            }
            if !task_arns.contains(&task.detail.task_arn) {
                continue;
            }
            if !task.detail.last_status.is_terminal() && task.polls_left != u32::MAX {
                if task.polls_left == 0 {
                    task.detail.last_status = TaskLifecycle::Stopped;
                    for c in task.detail.containers.iter_mut() {
                        c.exit_code = task.exit_code;
                    }
                    if task.exit_code.is_none() {
                        task.detail.stopped_reason = Some("Essential container in task exited".into());
                    }
                } else {
                    task.polls_left -= 1;
                    task.detail.last_status = TaskLifecycle::Running;
                }
            }
            out.push(task.detail.clone());
        }
        Ok(out)
    }

    async fn run_task(
        &self,
        region: &str,
        cluster: &str,
        family: &str,
        overrides: &[ContainerOverride],
    ) -> CloudResult<TaskDetail> {
        let mut st = self.state();
        let commands: Vec<String> = overrides.iter().map(|o| o.command.join(" ")).collect();
        st.enter(
            "run_task",
            format!("{region} {cluster} {family} {}", commands.join(";")),
        )?;

        let definition = st
            .definitions
            .get(&(region.to_string(), family.to_string()))
            .and_then(|revs| revs.last())
            .cloned()
            .ok_or_else(|| State::rejected("run_task", format!("task definition {family} not found")))?;

        let n = st.next();
        let detail = TaskDetail {
            task_arn: format!("arn:aws:ecs:{region}:{ACCOUNT}:task/{cluster}/{n}"),
            task_definition_arn: definition.task_definition_arn.clone().unwrap_or_default(),
            container_instance_arn: None,
            last_status: TaskLifecycle::Pending,
            containers: definition
                .container_definitions
                .iter()
                .take(1)
                .map(|c| ContainerState {
                    name: c.name.clone(),
                    exit_code: None,
                    reason: None,
                })
                .collect(),
            stopped_reason: None,
        };
        let polls_left = st.detached_polls;
        let exit_code = st.detached_exit;
        st.tasks.push(SimTask {
            region: region.to_string(),
            cluster: cluster.to_string(),
            service: None,
            detail: detail.clone(),
            polls_left,
            exit_code,
        });
        Ok(detail)
    }
}

#[async_trait]
impl ComputeRegistry for MemoryCloud {
    async fn resolve_node(
        &self,
        region: &str,
        cluster: &str,
        container_instance_arn: &str,
    ) -> CloudResult<ComputeNode> {
        let mut st = self.state();
        st.enter(
            "resolve_node",
            format!("{region} {cluster} {container_instance_arn}"),
        )?;
        st.nodes
            .get(container_instance_arn)
            .cloned()
            .ok_or_else(|| CloudError::NodeNotFound(container_instance_arn.to_string()))
    }
}

#[async_trait]
impl NetworkFabric for MemoryCloud {
    async fn find_security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
    ) -> CloudResult<Option<String>> {
        let mut st = self.state();
        st.enter("find_security_group", format!("{region} {vpc_id} {name}"))?;
        Ok(st
            .groups
            .iter()
            .find(|(_, g)| g.vpc_id == vpc_id && g.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn create_security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
        _description: &str,
    ) -> CloudResult<String> {
        let mut st = self.state();
        st.enter("create_security_group", format!("{region} {vpc_id} {name}"))?;
        if st
            .groups
            .values()
            .any(|g| g.vpc_id == vpc_id && g.name == name)
        {
            return Err(State::rejected(
                "create_security_group",
                format!("group {name} already exists"),
            ));
        }
        let id = format!("sg-{:08x}", st.next());
        st.groups.insert(
            id.clone(),
            SimGroup {
                name: name.to_string(),
                vpc_id: vpc_id.to_string(),
                rules: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn delete_security_group(&self, region: &str, group_id: &str) -> CloudResult<()> {
        let mut st = self.state();
        st.enter("delete_security_group", format!("{region} {group_id}"))?;
        if st.group_in_use(group_id) {
            return Err(State::rejected(
                "delete_security_group",
                format!("{group_id} has a dependent object"),
            ));
        }
        st.groups
            .remove(group_id)
            .map(|_| ())
            .ok_or_else(|| State::rejected("delete_security_group", format!("{group_id} not found")))
    }

    async fn authorize_ingress(
        &self,
        region: &str,
        group_id: &str,
        rule: &IngressRule,
    ) -> CloudResult<()> {
        let mut st = self.state();
        st.enter("authorize_ingress", format!("{region} {group_id} {}", rule.cidr))?;
        let group = st
            .groups
            .get_mut(group_id)
            .ok_or_else(|| State::rejected("authorize_ingress", format!("{group_id} not found")))?;
        if group
            .rules
            .iter()
            .any(|r| r.protocol == rule.protocol && r.port == rule.port && r.cidr == rule.cidr)
        {
            return Err(CloudError::DuplicateRule(group_id.to_string()));
        }
        group.rules.push(rule.clone());
        Ok(())
    }

    async fn revoke_ingress(
        &self,
        region: &str,
        group_id: &str,
        rule: &IngressRule,
    ) -> CloudResult<()> {
        let mut st = self.state();
        st.enter("revoke_ingress", format!("{region} {group_id} {}", rule.cidr))?;
        let group = st
            .groups
            .get_mut(group_id)
            .ok_or_else(|| State::rejected("revoke_ingress", format!("{group_id} not found")))?;
        let before = group.rules.len();
        group
            .rules
            .retain(|r| !(r.protocol == rule.protocol && r.port == rule.port && r.cidr == rule.cidr));
        if group.rules.len() == before {
            return Err(State::rejected("revoke_ingress", "rule not found"));
        }
        Ok(())
    }

    async fn allocate_address(&self, region: &str) -> CloudResult<AddressAllocation> {
        let mut st = self.state();
        st.enter("allocate_address", region.to_string())?;
        let n = st.next();
        let allocation = AddressAllocation {
            allocation_id: format!("eipalloc-{n:08x}"),
            public_ip: format!("198.51.100.{}", n % 250 + 1),
        };
        st.addresses
            .insert(allocation.allocation_id.clone(), allocation.clone());
        Ok(allocation)
    }

    async fn release_address(&self, region: &str, allocation_id: &str) -> CloudResult<()> {
        let mut st = self.state();
        st.enter("release_address", format!("{region} {allocation_id}"))?;
        if st.associations.values().any(|(a, _)| a == allocation_id) {
            return Err(State::rejected(
                "release_address",
                format!("{allocation_id} is still associated"),
            ));
        }
        st.addresses
            .remove(allocation_id)
            .map(|_| ())
            .ok_or_else(|| State::rejected("release_address", format!("{allocation_id} not found")))
    }

    async fn associate_address(
        &self,
        region: &str,
        allocation_id: &str,
        instance_id: &str,
    ) -> CloudResult<String> {
        let mut st = self.state();
        st.enter(
            "associate_address",
            format!("{region} {allocation_id} {instance_id}"),
        )?;
        if !st.addresses.contains_key(allocation_id) {
            return Err(State::rejected(
                "associate_address",
                format!("{allocation_id} not found"),
            ));
        }
        let id = format!("eipassoc-{:08x}", st.next());
        st.associations.insert(
            id.clone(),
            (allocation_id.to_string(), instance_id.to_string()),
        );
        Ok(id)
    }

    async fn disassociate_address(&self, region: &str, association_id: &str) -> CloudResult<()> {
        let mut st = self.state();
        st.enter("disassociate_address", format!("{region} {association_id}"))?;
        st.associations
            .remove(association_id)
            .map(|_| ())
            .ok_or_else(|| {
                State::rejected("disassociate_address", format!("{association_id} not found"))
            })
    }

    async fn set_node_groups(
        &self,
        region: &str,
        instance_id: &str,
        group_ids: &[String],
    ) -> CloudResult<()> {
        let mut st = self.state();
        st.enter(
            "set_node_groups",
            format!("{region} {instance_id} {}", group_ids.join(",")),
        )?;
        let node = st
            .nodes
            .values_mut()
            .find(|n| n.instance_id == instance_id)
            .ok_or_else(|| CloudError::NodeNotFound(instance_id.to_string()))?;
        node.security_groups = group_ids.to_vec();
        Ok(())
    }
}

#[async_trait]
impl ArtifactRegistry for MemoryCloud {
    async fn login(&self, region: &str, repository_url: &str) -> CloudResult<RegistryLogin> {
        let endpoint = registry_endpoint(repository_url).to_string();
        let mut st = self.state();
        st.enter("login", format!("{region} {endpoint}"))?;
        Ok(RegistryLogin {
            endpoint,
            username: "AWS".to_string(),
            password: format!("token-{region}"),
        })
    }

    async fn list_tags(&self, region: &str, repository_url: &str) -> CloudResult<Vec<String>> {
        let mut st = self.state();
        st.enter("list_tags", format!("{region} {repository_url}"))?;
        Ok(st.tags.get(repository_url).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ConfigStore for MemoryCloud {
    async fn current_revision(&self, region: &str, environment: &str) -> CloudResult<u64> {
        let mut st = self.state();
        st.enter("current_revision", format!("{region} {environment}"))?;
        Ok(st
            .revisions
            .get(&(region.to_string(), environment.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn publish(&self, args: &[String]) -> CloudResult<ConfigPublish> {
        let mut st = self.state();
        st.enter("publish", args.join(" "))?;
        let output = st.publish_output.clone();
        Ok(ConfigPublish {
            revision: parse_published_revision(&output),
            output,
        })
    }
}

#[async_trait]
impl SourceControl for MemoryCloud {
    async fn head_commit(&self) -> CloudResult<String> {
        let mut st = self.state();
        st.enter("head_commit", String::new())?;
        Ok(st.head.clone())
    }

    async fn is_clean(&self) -> CloudResult<bool> {
        let mut st = self.state();
        st.enter("is_clean", String::new())?;
        Ok(st.clean)
    }

    async fn recent_commits(&self, limit: usize) -> CloudResult<Vec<String>> {
        let mut st = self.state();
        st.enter("recent_commits", limit.to_string())?;
        Ok(st.commits.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl PublicAddress for MemoryCloud {
    async fn operator_ip(&self) -> CloudResult<IpAddr> {
        let mut st = self.state();
        st.enter("operator_ip", String::new())?;
        Ok(st.operator_ip)
    }
}
