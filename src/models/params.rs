//! # Typed Task Parameters
//!
//! `common_params` and per-step `params` are persisted as flat string maps so
//! that any step can hand data to any later step without a schema per task
//! type. All code in this crate goes through [`ParamKey`] instead of raw
//! strings; the string names below are the stable wire format and must not
//! change while tasks built with them are still in flight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator for list-valued parameters (instance ids, node IPs)
const LIST_SEPARATOR: char = ',';

/// Well-known parameter keys shared between builders and step functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    ClusterId,
    NodeGroupId,
    CloudId,
    ProjectId,
    Operator,
    JobType,
    TaskName,
    /// Name of the cluster on the cloud side (EKS cluster name)
    CloudClusterName,
    /// Name of the nodegroup on the cloud side (EKS nodegroup name)
    CloudNodeGroupName,
    AsgName,
    DesiredNodes,
    /// Number of nodes an update-desired-nodes task is adding
    ScaleOutNodes,
    InstanceIds,
    /// Group members present before a scale out started
    BaselineInstanceIds,
    SuccessNodeIds,
    FailedNodeIds,
    NodeIps,
    PostInitScript,
    ScriptJobId,
    /// Set when a step deliberately left the cloud resource untouched
    SkipCloudOperation,
}

impl ParamKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterId => "clusterID",
            Self::NodeGroupId => "nodeGroupID",
            Self::CloudId => "cloudID",
            Self::ProjectId => "projectID",
            Self::Operator => "operator",
            Self::JobType => "jobType",
            Self::TaskName => "taskName",
            Self::CloudClusterName => "cloudClusterName",
            Self::CloudNodeGroupName => "cloudNodeGroupName",
            Self::AsgName => "asgName",
            Self::DesiredNodes => "desiredNodes",
            Self::ScaleOutNodes => "scaleOutNodes",
            Self::InstanceIds => "instanceIDs",
            Self::BaselineInstanceIds => "baselineInstanceIDs",
            Self::SuccessNodeIds => "successNodeIDs",
            Self::FailedNodeIds => "failedNodeIDs",
            Self::NodeIps => "nodeIPs",
            Self::PostInitScript => "postInitScript",
            Self::ScriptJobId => "scriptJobID",
            Self::SkipCloudOperation => "skipCloudOperation",
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing required parameter {key}")]
    Missing { key: &'static str },

    #[error("invalid value {value:?} for parameter {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Split a list-valued parameter, dropping empty entries
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn join_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

pub(crate) fn parse_value<T>(key: ParamKey, raw: &str) -> Result<T, ParamError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ParamError::Invalid {
        key: key.as_str(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Flat string map with typed accessors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ParamKey) -> Option<&str> {
        self.0
            .get(key.as_str())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Get a value that must be present and non-empty
    pub fn require(&self, key: ParamKey) -> Result<&str, ParamError> {
        self.get(key)
            .ok_or(ParamError::Missing { key: key.as_str() })
    }

    pub fn get_parsed<T>(&self, key: ParamKey) -> Result<Option<T>, ParamError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key).map(|raw| parse_value(key, raw)).transpose()
    }

    pub fn require_parsed<T>(&self, key: ParamKey) -> Result<T, ParamError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get_parsed(key)?
            .ok_or(ParamError::Missing { key: key.as_str() })
    }

    /// Comma separated list value; missing key yields an empty list
    pub fn get_list(&self, key: ParamKey) -> Vec<String> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    pub fn insert(&mut self, key: ParamKey, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.as_str().to_string(), value.into())
    }

    pub fn insert_list<S: AsRef<str>>(&mut self, key: ParamKey, values: &[S]) {
        self.insert(key, join_list(values));
    }

    pub fn remove(&mut self, key: ParamKey) -> Option<String> {
        self.0.remove(key.as_str())
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.get(key).is_some()
    }

    /// Overlay every entry of `other` onto this map
    pub fn merge(&mut self, other: &Params) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Raw access for keys outside the well-known namespace
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert_raw(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.as_ref().to_string(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_missing_and_empty() {
        let mut params = Params::new();
        assert_eq!(
            params.require(ParamKey::ClusterId),
            Err(ParamError::Missing { key: "clusterID" })
        );

        params.insert(ParamKey::ClusterId, "");
        assert!(params.require(ParamKey::ClusterId).is_err());

        params.insert(ParamKey::ClusterId, "BCS-K8S-40001");
        assert_eq!(params.require(ParamKey::ClusterId).unwrap(), "BCS-K8S-40001");
    }

    #[test]
    fn test_list_values() {
        let mut params = Params::new();
        assert!(params.get_list(ParamKey::SuccessNodeIds).is_empty());

        params.insert_list(ParamKey::SuccessNodeIds, &["i-1", "i-2"]);
        assert_eq!(params.get_raw("successNodeIDs"), Some("i-1,i-2"));
        assert_eq!(params.get_list(ParamKey::SuccessNodeIds), vec!["i-1", "i-2"]);
    }

    #[test]
    fn test_parsed_values() {
        let mut params = Params::new();
        params.insert(ParamKey::DesiredNodes, "5");
        assert_eq!(params.require_parsed::<u32>(ParamKey::DesiredNodes).unwrap(), 5);

        params.insert(ParamKey::DesiredNodes, "five");
        assert!(matches!(
            params.get_parsed::<u32>(ParamKey::DesiredNodes),
            Err(ParamError::Invalid { key: "desiredNodes", .. })
        ));
    }

    #[test]
    fn test_merge_overwrites() {
        let mut base: Params = [("operator", "alice"), ("jobType", "add-node")]
            .into_iter()
            .collect();
        let mut overlay = Params::new();
        overlay.insert(ParamKey::Operator, "bob");

        base.merge(&overlay);
        assert_eq!(base.get(ParamKey::Operator), Some("bob"));
        assert_eq!(base.get(ParamKey::JobType), Some("add-node"));
    }
}
