//! Executor registry: one executor per executable stage.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::Stage;
use crate::ports::StageExecutor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("an executor for {0} is already registered")]
    Duplicate(Stage),

    #[error("{0} is not an executable stage")]
    NotExecutable(Stage),
}

#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) -> Result<(), RegistryError> {
        let stage = executor.stage();
        if !stage.is_executable() {
            return Err(RegistryError::NotExecutable(stage));
        }
        if self.executors.contains_key(&stage) {
            return Err(RegistryError::Duplicate(stage));
        }
        self.executors.insert(stage, executor);
        Ok(())
    }

    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn StageExecutor>> {
        self.executors.get(&stage)
    }

    /// Executable stages without an executor, in pipeline order.
    pub fn missing(&self) -> Vec<Stage> {
        Stage::EXECUTABLE
            .into_iter()
            .filter(|s| !self.executors.contains_key(s))
            .collect()
    }
}
