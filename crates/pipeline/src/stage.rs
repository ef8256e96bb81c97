//! A `Stage` is an inert description of one link of a pipeline: a name,
//! a closure, a worker count, and an output queue capacity. Nothing runs
//! until a [`crate::Pipeline`] drives it.

use std::sync::Arc;

use crate::config::{Capacity, DEFAULT_CAPACITY, DEFAULT_WORKERS};
use crate::error::StageError;
use crate::sequence::InputSequence;
use crate::worker::{ProducerFn, TransformFn};

/// One link of a pipeline, not yet attached to any channel or thread.
pub enum Stage<In, Out> {
    /// The first stage of a pipeline: no input, only generates items.
    Producer {
        name: String,
        produce: Arc<ProducerFn<Out>>,
        workers: usize,
        queue_capacity: Capacity,
        _marker: std::marker::PhantomData<In>,
    },
    /// Any non-first stage: consumes the previous stage's shared output.
    Transform {
        name: String,
        transform: Arc<TransformFn<In, Out>>,
        workers: usize,
        queue_capacity: Capacity,
    },
}

impl<In, Out> Stage<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Build a producer stage from a closure that, given nothing, returns
    /// an iterator of items (or failures).
    pub fn producer<F, I>(name: impl Into<String>, produce: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = Result<Out, StageError>> + Send + 'static,
    {
        let produce: ProducerFn<Out> = Box::new(move || Box::new(produce()));
        Stage::Producer {
            name: name.into(),
            produce: Arc::new(produce),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_CAPACITY,
            _marker: std::marker::PhantomData,
        }
    }

    /// Build a transform stage from a closure that, given this worker's
    /// view of the previous stage's output, returns an iterator of items
    /// (or failures).
    pub fn transform<F, I>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(InputSequence<In>) -> I + Send + Sync + 'static,
        I: Iterator<Item = Result<Out, StageError>> + Send + 'static,
    {
        let transform: TransformFn<In, Out> = Box::new(move |seq| Box::new(transform(seq)));
        Stage::Transform {
            name: name.into(),
            transform: Arc::new(transform),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Run `workers` parallel copies of this stage's closure. Each copy
    /// shares the stage's input (if any) and writes to the stage's shared
    /// output channel.
    pub fn workers(mut self, workers: usize) -> Self {
        assert!(workers >= 1, "a stage needs at least one worker");
        match &mut self {
            Stage::Producer { workers: w, .. } => *w = workers,
            Stage::Transform { workers: w, .. } => *w = workers,
        }
        self
    }

    /// Set the output channel's capacity. Defaults to unbounded.
    pub fn queue_capacity(mut self, capacity: impl Into<Capacity>) -> Self {
        let capacity = capacity.into();
        match &mut self {
            Stage::Producer {
                queue_capacity, ..
            } => *queue_capacity = capacity,
            Stage::Transform {
                queue_capacity, ..
            } => *queue_capacity = capacity,
        }
        self
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Stage::Producer { name, .. } => name,
            Stage::Transform { name, .. } => name,
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        match self {
            Stage::Producer { workers, .. } => *workers,
            Stage::Transform { workers, .. } => *workers,
        }
    }

    pub(crate) fn capacity(&self) -> Capacity {
        match self {
            Stage::Producer { queue_capacity, .. } => *queue_capacity,
            Stage::Transform { queue_capacity, .. } => *queue_capacity,
        }
    }
}
