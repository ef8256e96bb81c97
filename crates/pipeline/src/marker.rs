//! The sentinel protocol: markers that let M downstream consumers learn
//! when N upstream workers have finished.

use crate::error::StageError;

/// A sentinel carried alongside user items on a stage's output channel.
///
/// Exactly one marker is emitted per worker: `End` on normal exhaustion,
/// `Err` when the worker's closure (or its input sequence) failed.
#[derive(Debug, Clone)]
pub enum Marker {
    /// One worker finished normally.
    End { worker_id: String },
    /// One worker failed. A worker never emits both `End` and `Err`.
    Err {
        worker_id: String,
        kind: String,
        message: String,
        trace: Option<String>,
    },
}

impl Marker {
    pub fn end(worker_id: impl Into<String>) -> Self {
        Marker::End {
            worker_id: worker_id.into(),
        }
    }

    pub fn error(worker_id: impl Into<String>, err: &StageError) -> Self {
        Marker::Err {
            worker_id: worker_id.into(),
            kind: err.kind.clone(),
            message: err.message.clone(),
            trace: err.trace.clone(),
        }
    }

    pub fn worker_id(&self) -> &str {
        match self {
            Marker::End { worker_id } => worker_id,
            Marker::Err { worker_id, .. } => worker_id,
        }
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Marker::Err { .. })
    }
}

/// What travels over a stage's channel: either a user item or a sentinel.
pub(crate) enum Signal<T> {
    Item(T),
    Marker(Marker),
}
