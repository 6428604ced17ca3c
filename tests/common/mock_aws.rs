//! In-process stand-in for EKS, EC2 Auto Scaling and EC2
//!
//! One [`MockAws`] holds the whole simulated account. Cloud resources become
//! ready as soon as they are created unless a test asks otherwise, and every
//! call is counted by name so tests can assert what was (not) invoked.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cluster_lifecycle::cloudprovider::aws::api::{
    AsgInstance, AsgLifecycleState, AutoScalingApi, AutoScalingGroup, AwsClientFactory,
    CreateEksClusterInput, CreateEksNodegroupInput, Ec2Api, Ec2Instance, EksApi, EksCluster,
    EksClusterStatus, EksNodegroup, EksNodegroupStatus, InstanceState,
};
use cluster_lifecycle::cloudprovider::{CloudError, ScriptJobStatus, ScriptRunner};
use cluster_lifecycle::models::{Cluster, CommonOption};

#[derive(Debug, Default)]
struct World {
    clusters: BTreeMap<String, EksCluster>,
    nodegroups: BTreeMap<(String, String), EksNodegroup>,
    groups: BTreeMap<String, AutoScalingGroup>,
    instances: BTreeMap<String, Ec2Instance>,
    next_instance: usize,
    calls: HashMap<String, usize>,
    /// Status a newly created nodegroup reports
    nodegroup_status_on_create: Option<EksNodegroupStatus>,
    /// New instances beyond this many stay `Pending` after a scale out
    ready_limit: Option<usize>,
    /// Calls that fail every time with the given error
    failing: HashMap<String, CloudError>,
    /// Calls that fail once with the given error
    failing_once: HashMap<String, CloudError>,
}

#[derive(Debug, Default)]
pub struct MockAws {
    world: Mutex<World>,
}

impl MockAws {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, name: &str) -> usize {
        self.world.lock().calls.get(name).copied().unwrap_or(0)
    }

    pub fn total_mutating_calls(&self) -> usize {
        let world = self.world.lock();
        [
            "create_cluster",
            "delete_cluster",
            "create_nodegroup",
            "delete_nodegroup",
            "update_group_capacity",
            "terminate_instance_in_group",
        ]
        .iter()
        .map(|name| world.calls.get(*name).copied().unwrap_or(0))
        .sum()
    }

    pub fn fail_always(&self, call: &str, error: CloudError) {
        self.world.lock().failing.insert(call.to_string(), error);
    }

    pub fn fail_once(&self, call: &str, error: CloudError) {
        self.world.lock().failing_once.insert(call.to_string(), error);
    }

    pub fn clear_failures(&self) {
        let mut world = self.world.lock();
        world.failing.clear();
        world.failing_once.clear();
    }

    pub fn set_nodegroup_status_on_create(&self, status: EksNodegroupStatus) {
        self.world.lock().nodegroup_status_on_create = Some(status);
    }

    pub fn set_nodegroup_status(&self, cluster: &str, nodegroup: &str, status: EksNodegroupStatus) {
        let mut world = self.world.lock();
        if let Some(ng) = world
            .nodegroups
            .get_mut(&(cluster.to_string(), nodegroup.to_string()))
        {
            ng.status = status;
        }
    }

    pub fn limit_ready_instances(&self, limit: usize) {
        self.world.lock().ready_limit = Some(limit);
    }

    /// Seed an existing EKS cluster
    pub fn add_cluster(&self, name: &str) {
        self.world.lock().clusters.insert(
            name.to_string(),
            EksCluster {
                name: name.to_string(),
                arn: format!("arn:aws:eks:us-east-1:000000000000:cluster/{name}"),
                status: EksClusterStatus::Active,
                endpoint: format!("https://{name}.eks.local"),
                version: "1.29".to_string(),
            },
        );
    }

    /// Seed an active nodegroup with `size` in-service instances
    pub fn add_nodegroup(&self, cluster: &str, nodegroup: &str, size: usize) -> String {
        let mut world = self.world.lock();
        let asg_name = format!("asg-{nodegroup}");
        let mut group = AutoScalingGroup {
            name: asg_name.clone(),
            min_size: 0,
            max_size: 10,
            desired_capacity: size as u32,
            instances: Vec::new(),
        };
        for _ in 0..size {
            let id = world.launch_instance(InstanceState::Running);
            group.instances.push(AsgInstance {
                instance_id: id,
                lifecycle_state: AsgLifecycleState::InService,
            });
        }
        world.groups.insert(asg_name.clone(), group);
        world.nodegroups.insert(
            (cluster.to_string(), nodegroup.to_string()),
            EksNodegroup {
                name: nodegroup.to_string(),
                cluster_name: cluster.to_string(),
                status: EksNodegroupStatus::Active,
                asg_names: vec![asg_name.clone()],
            },
        );
        asg_name
    }

    pub fn group(&self, name: &str) -> Option<AutoScalingGroup> {
        self.world.lock().groups.get(name).cloned()
    }

    pub fn instance(&self, id: &str) -> Option<Ec2Instance> {
        self.world.lock().instances.get(id).cloned()
    }

    pub fn has_cluster(&self, name: &str) -> bool {
        self.world.lock().clusters.contains_key(name)
    }

    pub fn nodegroup_names(&self, cluster: &str) -> Vec<String> {
        self.world
            .lock()
            .nodegroups
            .keys()
            .filter(|(c, _)| c == cluster)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Count the call and return an injected failure, if any
    fn enter(&self, call: &str) -> Result<parking_lot::MutexGuard<'_, World>, CloudError> {
        let mut world = self.world.lock();
        *world.calls.entry(call.to_string()).or_insert(0) += 1;
        if let Some(err) = world.failing_once.remove(call) {
            return Err(err);
        }
        if let Some(err) = world.failing.get(call) {
            return Err(err.clone());
        }
        Ok(world)
    }
}

impl World {
    fn launch_instance(&mut self, state: InstanceState) -> String {
        self.next_instance += 1;
        let id = format!("i-{:05}", self.next_instance);
        self.instances.insert(
            id.clone(),
            Ec2Instance {
                instance_id: id.clone(),
                state,
                private_ip: format!("10.0.0.{}", self.next_instance),
            },
        );
        id
    }
}

#[async_trait]
impl EksApi for MockAws {
    async fn create_cluster(&self, input: &CreateEksClusterInput) -> Result<EksCluster, CloudError> {
        let mut world = self.enter("create_cluster")?;
        let cluster = EksCluster {
            name: input.name.clone(),
            arn: format!("arn:aws:eks:us-east-1:000000000000:cluster/{}", input.name),
            status: EksClusterStatus::Active,
            endpoint: format!("https://{}.eks.local", input.name),
            version: if input.version.is_empty() {
                "1.29".to_string()
            } else {
                input.version.clone()
            },
        };
        world.clusters.insert(input.name.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn describe_cluster(&self, name: &str) -> Result<EksCluster, CloudError> {
        let world = self.enter("describe_cluster")?;
        world
            .clusters
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("cluster {name}")))
    }

    async fn delete_cluster(&self, name: &str) -> Result<(), CloudError> {
        let mut world = self.enter("delete_cluster")?;
        world
            .clusters
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CloudError::not_found(format!("cluster {name}")))
    }

    async fn create_nodegroup(
        &self,
        input: &CreateEksNodegroupInput,
    ) -> Result<EksNodegroup, CloudError> {
        let mut world = self.enter("create_nodegroup")?;
        let status = world
            .nodegroup_status_on_create
            .unwrap_or(EksNodegroupStatus::Active);
        let asg_name = format!("asg-{}", input.nodegroup_name);
        let mut group = AutoScalingGroup {
            name: asg_name.clone(),
            min_size: input.min_size,
            max_size: input.max_size,
            desired_capacity: input.desired_size,
            instances: Vec::new(),
        };
        for _ in 0..input.desired_size {
            let id = world.launch_instance(InstanceState::Running);
            group.instances.push(AsgInstance {
                instance_id: id,
                lifecycle_state: AsgLifecycleState::InService,
            });
        }
        world.groups.insert(asg_name.clone(), group);

        let nodegroup = EksNodegroup {
            name: input.nodegroup_name.clone(),
            cluster_name: input.cluster_name.clone(),
            status,
            asg_names: vec![asg_name],
        };
        world.nodegroups.insert(
            (input.cluster_name.clone(), input.nodegroup_name.clone()),
            nodegroup.clone(),
        );
        Ok(nodegroup)
    }

    async fn describe_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<EksNodegroup, CloudError> {
        let world = self.enter("describe_nodegroup")?;
        world
            .nodegroups
            .get(&(cluster_name.to_string(), nodegroup_name.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("nodegroup {nodegroup_name}")))
    }

    async fn delete_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<(), CloudError> {
        let mut world = self.enter("delete_nodegroup")?;
        let removed = world
            .nodegroups
            .remove(&(cluster_name.to_string(), nodegroup_name.to_string()))
            .ok_or_else(|| CloudError::not_found(format!("nodegroup {nodegroup_name}")))?;
        for asg in removed.asg_names {
            world.groups.remove(&asg);
        }
        Ok(())
    }

    async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>, CloudError> {
        let world = self.enter("list_nodegroups")?;
        if !world.clusters.contains_key(cluster_name) {
            return Err(CloudError::not_found(format!("cluster {cluster_name}")));
        }
        Ok(world
            .nodegroups
            .keys()
            .filter(|(c, _)| c == cluster_name)
            .map(|(_, n)| n.clone())
            .collect())
    }
}

#[async_trait]
impl AutoScalingApi for MockAws {
    async fn describe_group(&self, name: &str) -> Result<AutoScalingGroup, CloudError> {
        let world = self.enter("describe_group")?;
        world
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("auto scaling group {name}")))
    }

    async fn update_group_capacity(
        &self,
        name: &str,
        min_size: u32,
        max_size: u32,
        desired: u32,
    ) -> Result<(), CloudError> {
        let mut world = self.enter("update_group_capacity")?;
        let ready_limit = world.ready_limit;
        let Some(current) = world.groups.get(name).map(|g| g.instances.len()) else {
            return Err(CloudError::not_found(format!("auto scaling group {name}")));
        };

        let mut launched = Vec::new();
        for added in 0..(desired as usize).saturating_sub(current) {
            let ready = ready_limit.map_or(true, |limit| added < limit);
            let (ec2_state, asg_state) = if ready {
                (InstanceState::Running, AsgLifecycleState::InService)
            } else {
                (InstanceState::Pending, AsgLifecycleState::Pending)
            };
            let id = world.launch_instance(ec2_state);
            launched.push(AsgInstance {
                instance_id: id,
                lifecycle_state: asg_state,
            });
        }

        if let Some(group) = world.groups.get_mut(name) {
            group.min_size = min_size;
            group.max_size = max_size;
            group.desired_capacity = desired;
            group.instances.extend(launched);
        }
        Ok(())
    }

    async fn terminate_instance_in_group(
        &self,
        instance_id: &str,
        decrement_desired: bool,
    ) -> Result<(), CloudError> {
        let mut world = self.enter("terminate_instance_in_group")?;
        let Some(instance) = world.instances.get_mut(instance_id) else {
            return Err(CloudError::not_found(format!("instance {instance_id}")));
        };
        instance.state = InstanceState::Terminated;
        for group in world.groups.values_mut() {
            let before = group.instances.len();
            group.instances.retain(|i| i.instance_id != instance_id);
            if decrement_desired && group.instances.len() < before {
                group.desired_capacity = group.desired_capacity.saturating_sub(1);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Ec2Api for MockAws {
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<Ec2Instance>, CloudError> {
        let world = self.enter("describe_instances")?;
        Ok(instance_ids
            .iter()
            .filter_map(|id| world.instances.get(id).cloned())
            .collect())
    }
}

/// Hands out the same [`MockAws`] for every credential
#[derive(Debug)]
pub struct MockAwsFactory {
    pub aws: Arc<MockAws>,
    /// Every option clients were requested for
    pub requested: Mutex<Vec<CommonOption>>,
}

impl MockAwsFactory {
    pub fn new(aws: Arc<MockAws>) -> Arc<Self> {
        Arc::new(Self {
            aws,
            requested: Mutex::new(Vec::new()),
        })
    }
}

impl AwsClientFactory for MockAwsFactory {
    fn eks(&self, option: &CommonOption) -> Result<Arc<dyn EksApi>, CloudError> {
        self.requested.lock().push(option.clone());
        Ok(self.aws.clone())
    }

    fn autoscaling(&self, option: &CommonOption) -> Result<Arc<dyn AutoScalingApi>, CloudError> {
        self.requested.lock().push(option.clone());
        Ok(self.aws.clone())
    }

    fn ec2(&self, option: &CommonOption) -> Result<Arc<dyn Ec2Api>, CloudError> {
        self.requested.lock().push(option.clone());
        Ok(self.aws.clone())
    }
}

/// Script backend whose jobs finish with queued results, `Succeeded` by default
#[derive(Debug, Default)]
pub struct MockScripts {
    started: Mutex<Vec<(String, Vec<String>)>>,
    outcomes: Mutex<Vec<ScriptJobStatus>>,
    jobs: Mutex<HashMap<String, ScriptJobStatus>>,
}

impl MockScripts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the final status of the next started job
    pub fn push_outcome(&self, status: ScriptJobStatus) {
        self.outcomes.lock().push(status);
    }

    /// Script and targets of every job started so far
    pub fn started(&self) -> Vec<(String, Vec<String>)> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl ScriptRunner for MockScripts {
    async fn run_script(
        &self,
        _option: &CommonOption,
        _cluster: &Cluster,
        script: &str,
        target_ips: &[String],
    ) -> Result<String, CloudError> {
        let mut started = self.started.lock();
        started.push((script.to_string(), target_ips.to_vec()));
        let job_id = format!("job-{}", started.len());

        let mut outcomes = self.outcomes.lock();
        let status = if outcomes.is_empty() {
            ScriptJobStatus::Succeeded
        } else {
            outcomes.remove(0)
        };
        self.jobs.lock().insert(job_id.clone(), status);
        Ok(job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<ScriptJobStatus, CloudError> {
        self.jobs
            .lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| CloudError::not_found(format!("script job {job_id}")))
    }
}
