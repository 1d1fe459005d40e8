//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! - handler の登録
//! - 起動時検証（期待する job type が全部登録されているか）
//! - `App::worker()` で Worker を作る

use std::sync::Arc;

use crate::config::FolioConfig;
use crate::generation::{ChapterOrchestrator, ChapterTask, SectionGenerator, SectionTask};
use crate::ports::{BookStore, JobStore, LanguageModel};
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

use super::worker_loop::{Worker, WorkerSettings};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register::<SectionTask, _>(generator)?
///     .expect_tasks(&[SectionTask::TYPE, ChapterTask::TYPE])
///     .build()?;
/// ```
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// Register the section generator and the chapter orchestrator, and
    /// expect both.
    pub fn with_book_generation(
        self,
        jobs: Arc<dyn JobStore>,
        books: Arc<dyn BookStore>,
        model: Arc<dyn LanguageModel>,
        config: &FolioConfig,
    ) -> Result<Self, RegistryError> {
        let generator = SectionGenerator::new(model, config.model.timeout())
            .with_max_tokens(config.model.max_tokens);
        let orchestrator = ChapterOrchestrator::new(jobs, books, config.worker.yield_delay());
        Ok(self
            .register::<SectionTask, _>(generator)?
            .register::<ChapterTask, _>(orchestrator)?
            .expect_tasks(&[SectionTask::TYPE, ChapterTask::TYPE]))
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        let expected = self.expected_tasks.get_or_insert_with(Vec::new);
        for &task_type in task_types {
            if !expected.iter().any(|t| t == task_type) {
                expected.push(task_type.to_string());
            }
        }
        self
    }

    /// Fails if an expected task type has no handler.
    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        tracing::debug!(task_types = ?self.registry.registered_types(), "app built");
        Ok(App {
            registry: Arc::new(self.registry),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    pub registry: Arc<TypedRegistry>,
}

impl App {
    pub fn worker(&self, jobs: Arc<dyn JobStore>, settings: WorkerSettings) -> Worker {
        Worker::new(jobs, Arc::clone(&self.registry), settings)
    }
}
