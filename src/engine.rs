//! # Lifecycle Engine
//!
//! Process-level composition of the engine. The bootstrap hands the engine
//! its stores and every provider explicitly; the engine builds the state
//! controller, merges each provider's step table into one registry and
//! starts the worker pool.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use cluster_lifecycle::config::LifecycleConfig;
//! # use cluster_lifecycle::store::InMemoryStore;
//! # use cluster_lifecycle::cloudprovider::aws::AwsClientFactory;
//! # async fn example(clients: Arc<dyn AwsClientFactory>) -> cluster_lifecycle::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let engine = cluster_lifecycle::LifecycleEngine::builder(
//!     LifecycleConfig::default(),
//!     store.clone(),
//!     store,
//! )
//! .with_aws(clients, None)
//! .start()?;
//! engine.recover_unfinished().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::cloudprovider::aws::{AwsClientFactory, AwsStepDeps, AwsTaskManager};
use crate::cloudprovider::ScriptRunner;
use crate::config::{ConfigManager, LifecycleConfig, PollingConfig};
use crate::error::{LifecycleError, Result};
use crate::events::EventPublisher;
use crate::models::{Task, TaskFilter};
use crate::resolver::DependencyResolver;
use crate::state_machine::TaskStatus;
use crate::store::{ClusterStore, TaskStore};
use crate::task::{
    ExecutorError, StepExecutor, StepRegistry, TaskBuildError, TaskManager, TaskManagerRegistry,
    TaskStateController, TaskWorkerPool,
};

/// What a provider needs from the engine to build its step functions
#[derive(Clone)]
pub struct ProviderContext {
    pub controller: TaskStateController,
    pub cluster_store: Arc<dyn ClusterStore>,
    pub resolver: DependencyResolver,
    pub polling: PollingConfig,
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("controller", &self.controller)
            .field("polling", &self.polling)
            .finish_non_exhaustive()
    }
}

type ProviderFactory = Box<dyn FnOnce(&ProviderContext) -> Arc<dyn TaskManager> + Send>;

pub struct LifecycleEngineBuilder {
    config: LifecycleConfig,
    task_store: Arc<dyn TaskStore>,
    cluster_store: Arc<dyn ClusterStore>,
    providers: Vec<ProviderFactory>,
}

impl std::fmt::Debug for LifecycleEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngineBuilder")
            .field("config", &self.config)
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}

impl LifecycleEngineBuilder {
    /// Register the AWS provider backed by `clients`
    pub fn with_aws(
        self,
        clients: Arc<dyn AwsClientFactory>,
        scripts: Option<Arc<dyn ScriptRunner>>,
    ) -> Self {
        self.with_provider(move |ctx| {
            let deps = AwsStepDeps {
                controller: ctx.controller.clone(),
                store: ctx.cluster_store.clone(),
                resolver: ctx.resolver.clone(),
                clients,
                scripts,
                polling: ctx.polling.clone(),
            };
            Arc::new(AwsTaskManager::new(Arc::new(deps)))
        })
    }

    /// Register any provider; the factory runs once the controller exists
    pub fn with_provider<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&ProviderContext) -> Arc<dyn TaskManager> + Send + 'static,
    {
        self.providers.push(Box::new(factory));
        self
    }

    /// Compose the engine and start its worker pool
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Result<LifecycleEngine> {
        self.config.validate()?;
        info!("🚀 ENGINE: starting");

        let publisher = EventPublisher::new(self.config.events.channel_capacity);
        let controller = TaskStateController::new(
            self.task_store.clone(),
            publisher.clone(),
            self.config.state.clone(),
        );
        let ctx = ProviderContext {
            controller: controller.clone(),
            cluster_store: self.cluster_store.clone(),
            resolver: DependencyResolver::new(self.cluster_store),
            polling: self.config.polling.clone(),
        };

        let mut managers = TaskManagerRegistry::new();
        for factory in self.providers {
            managers.register(factory(&ctx))?;
        }
        let registry = match managers.build_step_registry() {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                error!(error = %e, "Step registry is inconsistent, refusing to start");
                return Err(e.into());
            }
        };

        let executor = StepExecutor::new(
            registry.clone(),
            controller.clone(),
            self.config.worker.default_step_timeout(),
        );
        let pool = TaskWorkerPool::start(executor, controller.clone(), &self.config.worker);

        info!(
            providers = ?managers.providers(),
            step_methods = registry.len(),
            "✅ ENGINE: started"
        );
        Ok(LifecycleEngine {
            config: self.config,
            task_store: self.task_store,
            controller,
            managers,
            registry,
            pool,
            publisher,
        })
    }
}

pub struct LifecycleEngine {
    config: LifecycleConfig,
    task_store: Arc<dyn TaskStore>,
    controller: TaskStateController,
    managers: TaskManagerRegistry,
    registry: Arc<StepRegistry>,
    pool: TaskWorkerPool,
    publisher: EventPublisher,
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("managers", &self.managers)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl LifecycleEngine {
    pub fn builder(
        config: LifecycleConfig,
        task_store: Arc<dyn TaskStore>,
        cluster_store: Arc<dyn ClusterStore>,
    ) -> LifecycleEngineBuilder {
        LifecycleEngineBuilder {
            config,
            task_store,
            cluster_store,
            providers: Vec::new(),
        }
    }

    /// Builder seeded from a loaded [`ConfigManager`]
    pub fn builder_from_config(
        manager: &ConfigManager,
        task_store: Arc<dyn TaskStore>,
        cluster_store: Arc<dyn ClusterStore>,
    ) -> LifecycleEngineBuilder {
        Self::builder(manager.config().clone(), task_store, cluster_store)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn controller(&self) -> &TaskStateController {
        &self.controller
    }

    pub fn task_manager(&self, provider: &str) -> Result<Arc<dyn TaskManager>> {
        self.managers
            .get(provider)
            .ok_or_else(|| LifecycleError::UnknownProvider(provider.to_string()))
    }

    /// Persist a built task in `INIT` and queue it
    #[instrument(skip(self, task), fields(task_id = %task.task_id, task_type = %task.task_type))]
    pub async fn submit(&self, task: Task) -> Result<String> {
        if task.step_sequence.is_empty() {
            return Err(TaskBuildError::EmptyStepSequence {
                task_type: task.task_type,
            }
            .into());
        }
        for step in task.ordered_steps() {
            if !self.registry.contains(&step.step_method) {
                error!(step_method = %step.step_method, "Task references an unregistered step");
                return Err(ExecutorError::UnregisteredStep {
                    method: step.step_method.clone(),
                    step_name: step.name.clone(),
                }
                .into());
            }
        }

        self.task_store.create_task(&task).await?;
        self.pool.enqueue(task.task_id.clone()).await?;
        info!(cluster_id = %task.cluster_id, steps = task.step_sequence.len(), "Task submitted");
        Ok(task.task_id)
    }

    /// Build a task through a provider's manager and submit it
    pub async fn submit_with<F>(&self, provider: &str, build: F) -> Result<String>
    where
        F: FnOnce(&dyn TaskManager) -> std::result::Result<Task, TaskBuildError>,
    {
        let manager = self.task_manager(provider)?;
        let task = build(manager.as_ref())?;
        self.submit(task).await
    }

    /// Operator retry: re-arm the failed step and run the task again
    pub async fn retry_task(&self, task_id: &str) -> Result<Task> {
        let task = self.controller.retry_task(task_id).await?;
        self.pool.enqueue(task_id).await?;
        Ok(task)
    }

    /// Ask the task to stop at the next safe point
    pub async fn force_terminate(&self, task_id: &str) -> Result<Task> {
        Ok(self.controller.force_terminate(task_id).await?)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        Ok(self.controller.load(task_id).await?)
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.task_store.list_tasks(filter).await?)
    }

    /// Queue every task left `INIT` or `RUNNING` by a previous process
    ///
    /// Returns how many tasks were queued.
    pub async fn recover_unfinished(&self) -> Result<usize> {
        let mut queued = 0;
        for status in [TaskStatus::Init, TaskStatus::Running] {
            let filter = TaskFilter::default().with_status(status);
            for task in self.task_store.list_tasks(&filter).await? {
                self.pool.enqueue(task.task_id).await?;
                queued += 1;
            }
        }
        info!(queued, "Unfinished tasks re-queued");
        Ok(queued)
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.pool.is_running(task_id)
    }

    /// Stop the worker pool; unfinished tasks resume on the next start
    pub async fn shutdown(&self) -> bool {
        let drained = self.pool.shutdown(self.config.worker.shutdown_timeout()).await;
        if !drained {
            warn!("Engine stopped with runs still active");
        }
        info!("🛑 ENGINE: stopped");
        drained
    }
}
