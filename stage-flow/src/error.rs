use thiserror::Error;

/// Errors surfaced by pipeline construction and execution.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A task failed. The task id identifies which stage of the pipeline
    /// aborted the run; the source carries the domain error.
    #[error("task {task_id} failed")]
    TaskFailed {
        task_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A task tried to write a state section that an earlier task already
    /// wrote. Sections are insert-only.
    #[error("state section already present: {0}")]
    SectionConflict(String),

    #[error("context error: {0}")]
    ContextError(String),
}

impl FlowError {
    /// Wrap a domain error as a failure of the given task.
    pub fn task_failed(task_id: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        FlowError::TaskFailed {
            task_id: task_id.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
