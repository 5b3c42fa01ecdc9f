//! Process-wide catalogue of task handlers for one model type.
//!
//! The registry is populated at declaration time by the model's `tasks()`
//! method and is read-only afterwards; there is no global mutable state.

use std::fmt;

use crate::core::error::{ModelError, SchedulerError};
use crate::core::model::{InferenceModel, Payload};

/// Identifies one named operation on one model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    /// Name of the model declaring the task.
    pub model_name: String,
    /// Name of the task.
    pub task_name: String,
}

impl TaskKey {
    /// Build a key from its parts.
    pub fn new(model_name: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            task_name: task_name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.model_name, self.task_name)
    }
}

/// A task handler: ordered list of inputs in, equal-length ordered list of
/// outputs out, or a domain failure.
pub type TaskHandler<M> = fn(&M, Vec<Payload>) -> Result<Vec<Payload>, ModelError>;

/// Ordered mapping of task names to handlers for model `M`.
pub struct TaskRegistry<M> {
    entries: Vec<(String, TaskHandler<M>)>,
}

impl<M: InferenceModel> TaskRegistry<M> {
    /// Build the registry by invoking the model's task declarations.
    ///
    /// # Errors
    ///
    /// Propagates [`SchedulerError::DuplicateTask`] from the declarations.
    pub fn for_model() -> Result<Self, SchedulerError> {
        let mut registry = Self {
            entries: Vec::new(),
        };
        M::tasks(&mut registry)?;
        Ok(registry)
    }

    /// Register a handler under `task_name`.
    ///
    /// # Errors
    ///
    /// Fails with [`SchedulerError::DuplicateTask`] when the name is taken.
    pub fn register(
        &mut self,
        task_name: impl Into<String>,
        handler: TaskHandler<M>,
    ) -> Result<(), SchedulerError> {
        let task_name = task_name.into();
        if self.entries.iter().any(|(name, _)| *name == task_name) {
            return Err(SchedulerError::DuplicateTask(TaskKey::new(
                M::MODEL_NAME,
                task_name,
            )));
        }
        self.entries.push((task_name, handler));
        Ok(())
    }

    /// Look up the handler registered under `task_name`.
    #[must_use]
    pub fn lookup(&self, task_name: &str) -> Option<TaskHandler<M>> {
        self.entries
            .iter()
            .find(|(name, _)| name == task_name)
            .map(|(_, handler)| *handler)
    }

    /// Task names in registration order.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the model declared no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ModelContext;

    struct Toy;

    fn first(_: &Toy, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
        Ok(items)
    }

    fn second(_: &Toy, items: Vec<Payload>) -> Result<Vec<Payload>, ModelError> {
        Ok(items)
    }

    impl InferenceModel for Toy {
        const MODEL_NAME: &'static str = "toy";

        fn create(_ctx: &ModelContext) -> Result<Self, ModelError> {
            Ok(Self)
        }

        fn tasks(registry: &mut TaskRegistry<Self>) -> Result<(), SchedulerError> {
            registry.register("first", first)?;
            registry.register("second", second)?;
            Ok(())
        }
    }

    #[test]
    fn registers_in_declaration_order() {
        let registry = TaskRegistry::<Toy>::for_model().unwrap();
        assert_eq!(registry.task_names(), vec!["first", "second"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup("first").is_some());
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = TaskRegistry::<Toy>::for_model().unwrap();
        let err = registry.register("first", second).unwrap_err();
        match err {
            SchedulerError::DuplicateTask(key) => {
                assert_eq!(key.to_string(), "toy::first");
            }
            other => panic!("expected duplicate task, got {other:?}"),
        }
    }

    #[test]
    fn task_key_display() {
        let key = TaskKey::new("embedder", "embed");
        assert_eq!(key.to_string(), "embedder::embed");
    }
}
