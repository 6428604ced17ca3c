//! # Models
//!
//! Persisted records: the orchestration [`Task`] with its [`Step`]s, the
//! typed [`Params`] maps they carry, and the cluster/nodegroup/cloud records
//! step functions act on.

pub mod cluster;
pub mod params;
pub mod task;

pub use cluster::{
    AutoScalingSettings, Cloud, CloudAccount, Cluster, ClusterNetwork, CommonOption, Credential,
    LaunchTemplate, NodeGroup, ResourceStatus,
};
pub use params::{join_list, split_list, ParamError, ParamKey, Params};
pub use task::{Step, Task, TaskFilter, SYSTEM_API};
