//! # Step Registry
//!
//! Maps the persisted `step_method` string of a step to the function that
//! executes it. Providers expose typed step identities; strings only appear
//! at the persistence boundary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::error::StepError;
use crate::context::OpContext;

/// Typed identity of a step kind within a provider
pub trait StepIdentity: Copy + fmt::Debug + Send + Sync + 'static {
    /// Registry key persisted as `step_method`; unique across providers
    fn method(&self) -> &'static str;

    /// Name of the step inside a task
    fn step_name(&self) -> &'static str;

    /// Execution budget for long cloud operations
    fn default_timeout_secs(&self) -> Option<u64> {
        None
    }
}

/// What the executor hands a step function
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub task_id: String,
    pub step_name: String,
    pub ctx: OpContext,
}

/// One executable step kind
#[async_trait]
pub trait StepFunc: Send + Sync {
    async fn execute(&self, invocation: StepInvocation) -> Result<(), StepError>;
}

/// Adapter turning an async closure into a [`StepFunc`]
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F, Fut> StepFunc for FnStep<F>
where
    F: Fn(StepInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    async fn execute(&self, invocation: StepInvocation) -> Result<(), StepError> {
        (self.0)(invocation).await
    }
}

/// Step functions a provider contributes, keyed by method
pub type StepTable = Vec<(&'static str, Arc<dyn StepFunc>)>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("step method {0} registered twice")]
    DuplicateStepMethod(String),

    #[error("task manager for provider {0} registered twice")]
    DuplicateProvider(String),
}

#[derive(Default, Clone)]
pub struct StepRegistry {
    funcs: HashMap<String, Arc<dyn StepFunc>>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.funcs.keys().collect();
        methods.sort();
        f.debug_struct("StepRegistry").field("methods", &methods).finish()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        method: impl Into<String>,
        func: Arc<dyn StepFunc>,
    ) -> Result<(), RegistryError> {
        let method = method.into();
        if self.funcs.contains_key(&method) {
            return Err(RegistryError::DuplicateStepMethod(method));
        }
        self.funcs.insert(method, func);
        Ok(())
    }

    /// Register every entry of a provider's table
    pub fn merge(&mut self, provider: &str, table: StepTable) -> Result<(), RegistryError> {
        let count = table.len();
        for (method, func) in table {
            self.register(method, func)?;
        }
        info!(provider = %provider, steps = count, "📚 REGISTRY: provider steps registered");
        Ok(())
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn StepFunc>> {
        self.funcs.get(method).cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.funcs.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}
