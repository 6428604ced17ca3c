//! Failures while locating, merging or checking `lifecycle.yaml`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No base `lifecycle.yaml` in any candidate directory
    #[error("no lifecycle configuration found (looked in {searched_paths:?})")]
    ConfigFileNotFound { searched_paths: Vec<PathBuf> },

    #[error("cannot build '{environment}' configuration: {error}")]
    LoadError { environment: String, error: String },

    /// Merged settings parsed but a value is out of range
    #[error("{field} = {value} rejected: {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn config_file_not_found(searched_paths: Vec<PathBuf>) -> Self {
        Self::ConfigFileNotFound { searched_paths }
    }

    pub fn load_error(environment: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::LoadError {
            environment: environment.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_names_the_field() {
        let err = ConfigurationError::invalid_value("worker.max_concurrent_tasks", 0, "must be positive");
        assert_eq!(
            err.to_string(),
            "worker.max_concurrent_tasks = 0 rejected: must be positive"
        );
    }
}
