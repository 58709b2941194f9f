//! # Task Registry
//!
//! Process-singleton map from task name to implementation. Registration
//! happens once at startup; the map is read-only afterwards. Registering
//! the same name twice is an error, not a replacement.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use enrich_shared::error::{EnrichError, EnrichResult};

use crate::task::EnrichmentTask;

/// Name → task implementation map with single-registration invariant
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<dyn EnrichmentTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task implementation.
    ///
    /// Fails when a task with the same name is already registered.
    pub fn register(&self, task: Arc<dyn EnrichmentTask>) -> EnrichResult<()> {
        let mut tasks = self.tasks.write().expect("registry lock poisoned");
        let name = task.name().to_string();
        if tasks.contains_key(&name) {
            return Err(EnrichError::validation(format!(
                "task {name} is already registered"
            )));
        }
        tasks.insert(name, task);
        Ok(())
    }

    /// Get a task implementation by name
    pub fn get(&self, task_name: &str) -> EnrichResult<Arc<dyn EnrichmentTask>> {
        self.tasks
            .read()
            .expect("registry lock poisoned")
            .get(task_name)
            .cloned()
            .ok_or_else(|| EnrichError::not_found(format!("task {task_name} not found")))
    }

    /// Snapshot of registered task names
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Remove a task implementation
    pub fn unregister(&self, task_name: &str) -> EnrichResult<()> {
        let mut tasks = self.tasks.write().expect("registry lock poisoned");
        if tasks.remove(task_name).is_none() {
            return Err(EnrichError::not_found(format!(
                "task {task_name} not found"
            )));
        }
        Ok(())
    }
}
