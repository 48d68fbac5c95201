//! Pluggable backends and the registry the orchestrator selects them from.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use resilience::Result;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{ExecutionRequest, ExecutionResult};

pub mod command;
pub mod http;

pub use command::CommandExecutor;
pub use http::HttpExecutor;

/// A named backend that carries out one kind of execution request.
///
/// Implementations interpret `request.payload` themselves and must stop
/// promptly once `cancel` fires.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Executor '{0}' is already registered")]
    Duplicate(String),
}

/// Executors keyed by lower-cased name.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) -> std::result::Result<(), RegistryError> {
        let key = executor.name().to_lowercase();
        if self.executors.contains_key(&key) {
            return Err(RegistryError::Duplicate(executor.name().to_string()));
        }
        self.executors.insert(key, executor);
        Ok(())
    }

    pub fn with<E: Executor + 'static>(mut self, executor: E) -> std::result::Result<Self, RegistryError> {
        self.register(Arc::new(executor))?;
        Ok(self)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .executors
            .values()
            .map(|e| e.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
