//! # Cloud Providers
//!
//! Provider-neutral error type and collaborator traits, plus one module per
//! supported provider. The engine never talks to a cloud SDK directly; each
//! provider defines the client contracts its step functions consume.

pub mod aws;
pub mod script;

use std::fmt;
use thiserror::Error;

pub use script::{ScriptJobStatus, ScriptRunner};

/// Classification a provider wrapper attaches to every failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudErrorKind {
    /// Rate limited; safe to retry after a delay
    Throttling,
    /// Resource is mid-transition; safe to retry after a delay
    ResourceInUse,
    NotFound,
    InvalidRequest,
    Other,
}

impl fmt::Display for CloudErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Throttling => "throttling",
            Self::ResourceInUse => "resource_in_use",
            Self::NotFound => "not_found",
            Self::InvalidRequest => "invalid_request",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub message: String,
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn throttling(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::Throttling, message)
    }

    pub fn resource_in_use(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::ResourceInUse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::InvalidRequest, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::Other, message)
    }

    /// Transient per the provider wrapper; retried locally by steps
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::Throttling | CloudErrorKind::ResourceInUse
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == CloudErrorKind::NotFound
    }
}
