use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned by pipeline construction and execution.
///
/// Every execution error leaves the [`crate::Collection`] it was raised for unchanged.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// [`crate::execution::ExecutionOptions`] contain an unusable value.
    #[error("invalid execution options: {message}")]
    InvalidOptions { message: String },

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    /// A chunk task panicked outside any record's operation chain, e.g. inside an observer
    /// callback running on a worker thread.
    #[error("worker panicked in chunk starting at row {start_row}: {message}")]
    WorkerPanicked { start_row: usize, message: String },

    /// A record's operation chain panicked under
    /// [`crate::execution::RecordFailurePolicy::AbortBatch`].
    #[error("record '{name}' failed: {message}")]
    RecordFailed { name: String, message: String },

    /// A declarative step named a command that does not exist.
    #[error("unknown pipeline command '{command}' (expected query, map, filter or reduce)")]
    UnknownCommand { command: String },

    /// A declarative step paired a command with the wrong kind of callable.
    #[error("command '{command}' expects a {expected}")]
    CommandMismatch {
        command: String,
        expected: &'static str,
    },
}
