//! # Worker Lifecycle Manager
//!
//! Routes provision and terminate calls to the backend registered under the
//! worker's backend name.
//!
//! The registry is populated at startup and read on every call afterwards.
//! Registering a name twice is a programming error and panics; an unknown name
//! at call time fails only that call with a configuration error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::backend::{ProvisioningBackend, WorkerLifecycle};
use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, PhaseResult};
use crate::models::{Worker, WorkerTemplate};

#[derive(Default)]
pub struct WorkerLifecycleManager {
    backends: RwLock<HashMap<String, Arc<dyn ProvisioningBackend>>>,
}

impl std::fmt::Debug for WorkerLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLifecycleManager")
            .field("backends", &self.backend_names())
            .finish()
    }
}

impl WorkerLifecycleManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register)
    #[must_use]
    pub fn with_backend(self, name: impl Into<String>, backend: Arc<dyn ProvisioningBackend>) -> Self {
        self.register(name, backend);
        self
    }

    /// Register a backend
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered.
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn ProvisioningBackend>) {
        let name = name.into();
        let mut backends = self.backends.write();
        if backends.contains_key(&name) {
            panic!("provisioning backend already registered: {name}");
        }
        debug!(backend = %name, "Registered provisioning backend");
        backends.insert(name, backend);
    }

    /// Registered names, sorted
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_backend(&self, name: &str) -> bool {
        self.backends.read().contains_key(name)
    }

    fn backend(&self, name: &str) -> Option<Arc<dyn ProvisioningBackend>> {
        self.backends.read().get(name).cloned()
    }
}

#[async_trait]
impl WorkerLifecycle for WorkerLifecycleManager {
    async fn provision(
        &self,
        ctx: &ExecutionContext,
        template: &WorkerTemplate,
    ) -> PhaseResult<Worker> {
        let worker = Worker::new(template.clone());
        let Some(backend) = self.backend(&template.backend) else {
            warn!(backend = %template.backend, worker_id = %worker.id, "Unknown provisioning backend");
            return Err(worker.reject(OrchestratorError::unknown_backend(&template.backend)));
        };

        let fallback = worker.clone();
        let budget = ctx.remaining();
        match ctx.run(backend.provision(ctx, worker)).await {
            Ok(result) => result,
            Err(interrupted) => Err(fallback.reject(OrchestratorError::interrupted(
                interrupted,
                format!("provision worker on {}", template.backend),
                budget,
            ))),
        }
    }

    async fn terminate(&self, ctx: &ExecutionContext, worker: Worker) -> PhaseResult<Worker> {
        let Some(backend) = self.backend(worker.backend()) else {
            warn!(backend = %worker.backend(), worker_id = %worker.id, "Unknown provisioning backend");
            let error = OrchestratorError::unknown_backend(worker.backend());
            return Err(worker.reject(error));
        };

        let fallback = worker.clone();
        let budget = ctx.remaining();
        match ctx.run(backend.terminate(ctx, worker)).await {
            Ok(result) => result,
            Err(interrupted) => {
                let operation = format!("terminate worker on {}", fallback.backend());
                Err(fallback.reject(OrchestratorError::interrupted(
                    interrupted,
                    operation,
                    budget,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::node::NodeId;
    use crate::provisioning::LocalBackend;
    use crate::state_machine::WorkerState;

    fn manager() -> WorkerLifecycleManager {
        WorkerLifecycleManager::new().with_backend("local", Arc::new(LocalBackend::new(NodeId::new())))
    }

    #[tokio::test]
    async fn test_unknown_backend_is_configuration_error() {
        let failure = manager()
            .provision(&ExecutionContext::background(), &WorkerTemplate::new("gpu-cluster"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Configuration);
        assert_eq!(failure.entity.state, WorkerState::Error);
        assert!(failure.error.to_string().contains("gpu-cluster"));
    }

    #[tokio::test]
    async fn test_unknown_backend_leaves_registry_untouched() {
        let manager = manager();
        let _ = manager
            .provision(&ExecutionContext::background(), &WorkerTemplate::new("gpu-cluster"))
            .await;
        assert_eq!(manager.backend_names(), vec!["local".to_string()]);
    }

    #[tokio::test]
    async fn test_routes_to_registered_backend() {
        let manager = manager();
        let ctx = ExecutionContext::background();
        let worker = manager
            .provision(&ctx, &WorkerTemplate::new("local"))
            .await
            .unwrap();
        assert_eq!(worker.state, WorkerState::Provisioned);

        let worker = manager.terminate(&ctx, worker).await.unwrap();
        assert_eq!(worker.state, WorkerState::Terminated);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration_panics() {
        let node = NodeId::new();
        let _ = WorkerLifecycleManager::new()
            .with_backend("local", Arc::new(LocalBackend::new(node)))
            .with_backend("local", Arc::new(LocalBackend::new(node)));
    }
}
