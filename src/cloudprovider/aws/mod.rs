//! # AWS Provider
//!
//! EKS clusters, managed nodegroups and the auto scaling groups behind them.
//! SDK access sits behind the traits in [`api`] so the step functions can
//! run against any client implementation.

pub mod api;
pub mod manager;
pub mod steps;
pub mod tasks;

pub use api::{AutoScalingApi, AwsClientFactory, Ec2Api, EksApi};
pub use manager::AwsTaskManager;
pub use steps::{AwsStep, AwsStepDeps, AwsStepFunc};

/// Provider key used in task types, step methods and `Cloud::provider`
pub const PROVIDER: &str = "aws";
