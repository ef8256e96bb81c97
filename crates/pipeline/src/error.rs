//! Error taxonomy for the pipeline engine.
//!
//! `StageError` is what a user closure reports on failure. `TaskError` is
//! the single error type surfaced from [`crate::Pipeline::results`] and
//! friends. `PipelineError` is the broader taxonomy that also covers
//! programming errors (writing to a closed channel, asking `execute()` for
//! the wrong cardinality, cancellation).

use thiserror::Error;

/// An error reported by a user-supplied stage closure.
///
/// Carries enough information to populate a [`crate::Marker::Err`]: a short
/// `kind` (analogous to an exception class name), a human-readable
/// `message`, and an optional `trace` for additional context.
#[derive(Debug, Clone, Error)]
#[error("{kind}({message})")]
pub struct StageError {
    pub kind: String,
    pub message: String,
    pub trace: Option<String>,
}

impl StageError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// The error surfaced from the consumer side of a pipeline once draining
/// completes. Only the first observed error across all workers is kept;
/// later errors are discarded once drain accounting is satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The task \"{worker_id}\" raised {kind}({message})")]
pub struct TaskError {
    pub worker_id: String,
    pub kind: String,
    pub message: String,
}

impl TaskError {
    pub fn from_stage_error(worker_id: impl Into<String>, err: &StageError) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind: err.kind.clone(),
            message: err.message.clone(),
        }
    }
}

/// The full error taxonomy recognised internally by the engine.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A worker's failure, surfaced after the pipeline drains.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// A `put` was attempted on a channel that has already been closed.
    /// This is a programming error, not something a well-formed pipeline
    /// should ever trigger.
    #[error("put() on a closed channel")]
    ClosedWrite,

    /// `execute()` was called on a pipeline whose output was not exactly
    /// one item.
    #[error("execute() expected exactly one item, got {0}")]
    WrongCardinality(usize),

    /// The pipeline was cancelled before it drained naturally.
    #[error("pipeline was cancelled")]
    Cancelled,

    /// Reserved for invalid stage configuration. Worker counts and queue
    /// capacities are validated at the type level in this crate (see
    /// `Stage::workers`/`Stage::queue_capacity`), so this variant is not
    /// currently constructed, but is kept for API stability.
    #[error("invalid stage configuration: {0}")]
    ConfigInvalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_message_has_expected_format() {
        let err = StageError::new("TypeMismatch", "expected int, got str");
        let task_err = TaskError::from_stage_error("add_one-0", &err);
        assert_eq!(
            task_err.to_string(),
            "The task \"add_one-0\" raised TypeMismatch(expected int, got str)"
        );
    }

    #[test]
    fn pipeline_error_wraps_task_error() {
        let err = StageError::new("ValueError", "boom");
        let task_err = TaskError::from_stage_error("stage-1", &err);
        let pipeline_err: PipelineError = task_err.into();
        match pipeline_err {
            PipelineError::Task(t) => assert_eq!(t.worker_id, "stage-1"),
            other => panic!("expected Task variant, got {other:?}"),
        }
    }
}
