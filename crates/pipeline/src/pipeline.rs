//! The pipeline builder: a linear chain of [`crate::Stage`]s, connected
//! lazily. Nothing runs until [`Pipeline::results`] (or one of its
//! convenience wrappers) is called.
//!
//! `Pipeline<T>` changes type as stages are appended (`Pipeline<T>` →
//! `.pipe(stage)` → `Pipeline<Out>`), one `FnOnce` thunk per stage, each
//! capturing the previous stage's thunk. Calling `results()` unwinds that
//! chain of thunks from the producer forward, spawning every worker thread
//! as it goes. This keeps heterogeneous per-stage item types checked by the
//! compiler via monomorphization, with no `Box<dyn Any>` type erasure and
//! no threads running before the caller asks for output, the same way
//! `Iterator` adaptors change `Item` type one `.map()`/`.filter()` at a
//! time without erasing it.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cancellation::CancellationToken;
use crate::channel::{channel, ChannelReceiver};
use crate::error::{PipelineError, TaskError};
use crate::marker::Marker;
use crate::sequence::{InputAccounting, InputSequence};
use crate::stage::Stage;
use crate::worker::{spawn_monitor, spawn_producer, spawn_transform};

/// What driving one stage's thunk produces: the channel the *next* stage
/// reads from, the marker accounting shared by that stage's workers, and
/// every stage's monitor thread spawned so far (this stage's plus all
/// before it). Joining these is enough to know every worker of every
/// stage has finished, without holding onto the (possibly numerous)
/// individual worker handles themselves.
struct PipelineRun<T> {
    receiver: ChannelReceiver<T>,
    accounting: Arc<InputAccounting>,
    handles: Vec<JoinHandle<()>>,
}

/// A not-yet-running chain of stages producing items of type `T`.
pub struct Pipeline<T> {
    thunk: Box<dyn FnOnce(CancellationToken) -> PipelineRun<T> + Send>,
    cancellation: CancellationToken,
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    /// Start a pipeline from its first (producer) stage.
    pub fn from_producer(stage: Stage<(), T>) -> Self {
        let cancellation = CancellationToken::new();
        let thunk: Box<dyn FnOnce(CancellationToken) -> PipelineRun<T> + Send> =
            Box::new(move |cancellation| {
                let Stage::Producer {
                    name,
                    produce,
                    workers,
                    queue_capacity,
                    ..
                } = stage
                else {
                    panic!("Pipeline::from_producer requires a producer stage");
                };

                let (tx, rx) = channel(queue_capacity);
                let mut worker_handles = Vec::with_capacity(workers);
                for index in 0..workers {
                    let worker_id = format!("{name}-{index}");
                    worker_handles.push(spawn_producer(
                        worker_id,
                        produce.clone(),
                        tx.clone(),
                        cancellation.clone(),
                    ));
                }
                let monitor = spawn_monitor(format!("{name}-monitor"), worker_handles, tx);

                PipelineRun {
                    receiver: rx,
                    accounting: InputAccounting::new(workers),
                    handles: vec![monitor],
                }
            });
        Self {
            thunk,
            cancellation,
        }
    }

    /// Append a transform stage, consuming `self` and returning a pipeline
    /// over the new stage's output type.
    pub fn pipe<Out>(self, stage: Stage<T, Out>) -> Pipeline<Out>
    where
        Out: Send + 'static,
    {
        let prev_thunk = self.thunk;
        let cancellation = self.cancellation;
        let thunk: Box<dyn FnOnce(CancellationToken) -> PipelineRun<Out> + Send> =
            Box::new(move |cancellation| {
                let PipelineRun {
                    receiver,
                    accounting,
                    mut handles,
                } = prev_thunk(cancellation.clone());

                let Stage::Transform {
                    name,
                    transform,
                    workers,
                    queue_capacity,
                } = stage
                else {
                    panic!("Pipeline::pipe requires a transform stage");
                };

                let (tx, rx) = channel(queue_capacity);
                let mut worker_handles = Vec::with_capacity(workers);
                for index in 0..workers {
                    let worker_id = format!("{name}-{index}");
                    worker_handles.push(spawn_transform(
                        worker_id,
                        transform.clone(),
                        receiver.clone(),
                        accounting.clone(),
                        tx.clone(),
                        cancellation.clone(),
                    ));
                }
                let monitor = spawn_monitor(format!("{name}-monitor"), worker_handles, tx);
                handles.push(monitor);

                PipelineRun {
                    receiver: rx,
                    accounting: InputAccounting::new(workers),
                    handles,
                }
            });
        Pipeline {
            thunk,
            cancellation,
        }
    }

    /// A clone of this pipeline's cancellation token, usable to cancel a
    /// run from another thread after `results()`/`execute()` has consumed
    /// `self`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Request cancellation of every worker across every stage. Every
    /// `put`/`get` polls for this in short slices, so a worker blocked on a
    /// full or empty channel notices within one poll interval rather than
    /// only between items. Each stage's monitor thread still closes that
    /// stage's channel once its workers actually stop, so a cancelled run
    /// still disconnects cleanly stage by stage instead of leaving
    /// channels open with nothing left to write to them.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Drive the pipeline, spawning every stage's worker threads, and
    /// return an iterator over its results.
    pub fn results(self) -> ResultsIter<T> {
        let run = (self.thunk)(self.cancellation.clone());
        ResultsIter {
            sequence: InputSequence::new(run.receiver, run.accounting, self.cancellation.clone()),
            handles: run.handles,
            cancellation: self.cancellation,
            error_surfaced: false,
            joined: false,
        }
    }

    /// Drive the pipeline to completion, collecting every item. Returns
    /// the first worker failure observed, if any, instead of a partial
    /// result.
    pub fn collect_results(self) -> Result<Vec<T>, TaskError> {
        let mut out = Vec::new();
        for item in self.results() {
            out.push(item?);
        }
        Ok(out)
    }

    /// Drive the pipeline expecting exactly one output item (a pipeline
    /// used as a single aggregate computation rather than a stream).
    pub fn execute(self) -> Result<T, PipelineError> {
        let mut items = self.collect_results()?;
        match items.len() {
            1 => Ok(items.pop().expect("length checked above")),
            n => Err(PipelineError::WrongCardinality(n)),
        }
    }
}

/// The lazily-pulled output of a driven pipeline.
///
/// Yields `Ok(item)` for every item the final stage produces. If any
/// worker across any stage failed, the first such failure is yielded once,
/// as a final `Err`, after which the iterator is exhausted.
pub struct ResultsIter<T> {
    sequence: InputSequence<T>,
    handles: Vec<JoinHandle<()>>,
    cancellation: CancellationToken,
    error_surfaced: bool,
    joined: bool,
}

impl<T> ResultsIter<T> {
    /// Request cancellation of the pipeline driving this iterator. See
    /// [`Pipeline::cancel`] for how promptly this is observed.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    fn join(&mut self) {
        if self.joined {
            return;
        }
        self.joined = true;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<T> Iterator for ResultsIter<T> {
    type Item = Result<T, TaskError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.sequence.next() {
            return Some(Ok(item));
        }

        if !self.error_surfaced {
            self.error_surfaced = true;
            if let Some(Marker::Err {
                worker_id,
                kind,
                message,
                ..
            }) = self.sequence.upstream_error()
            {
                self.sequence.drain_remaining();
                self.join();
                return Some(Err(TaskError {
                    worker_id,
                    kind,
                    message,
                }));
            }
        }

        self.join();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Capacity;
    use crate::error::StageError;

    fn numbers(n: i32) -> Stage<(), i32> {
        Stage::producer("numbers", move || (0..n).map(Ok))
    }

    #[test]
    fn single_stage_pipeline_yields_every_item() {
        crate::test_utils::init_tracing();
        let mut results: Vec<i32> = Pipeline::from_producer(numbers(5))
            .results()
            .map(Result::unwrap)
            .collect();
        results.sort();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn two_stage_pipeline_applies_transform() {
        let doubled =
            Stage::transform("double", |seq: InputSequence<i32>| seq.map(|n| Ok(n * 2)));
        let mut results: Vec<i32> = Pipeline::from_producer(numbers(4))
            .pipe(doubled)
            .results()
            .map(Result::unwrap)
            .collect();
        results.sort();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }

    #[test]
    fn parallel_workers_do_not_drop_or_duplicate_items() {
        let stage: Stage<(), i32> = Stage::producer("numbers", || (0..100).map(Ok));
        let passthrough =
            Stage::transform("identity", |seq: InputSequence<i32>| seq.map(Ok)).workers(4);
        let mut results: Vec<i32> = Pipeline::from_producer(stage)
            .pipe(passthrough)
            .results()
            .map(Result::unwrap)
            .collect();
        results.sort();
        assert_eq!(results, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn a_failing_worker_surfaces_a_task_error_and_ends_the_stream() {
        let failing: Stage<(), i32> = Stage::producer("numbers", || {
            vec![Ok(1), Err(StageError::new("ValueError", "bad number"))].into_iter()
        });
        let results: Vec<Result<i32, TaskError>> =
            Pipeline::from_producer(failing).results().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok(1));
        match &results[1] {
            Err(err) => assert_eq!(err.kind, "ValueError"),
            Ok(_) => panic!("expected a TaskError"),
        }
    }

    #[test]
    fn execute_requires_exactly_one_item() {
        let pipeline = Pipeline::from_producer(numbers(3));
        match pipeline.execute() {
            Err(PipelineError::WrongCardinality(3)) => {}
            other => panic!("expected WrongCardinality(3), got {other:?}"),
        }

        let single: Stage<(), i32> = Stage::producer("one", || std::iter::once(Ok(42)));
        assert_eq!(Pipeline::from_producer(single).execute().unwrap(), 42);
    }

    #[test]
    fn collect_results_stops_at_the_first_failure() {
        let failing: Stage<(), i32> = Stage::producer("numbers", || {
            vec![Ok(1), Ok(2), Err(StageError::new("ValueError", "boom"))].into_iter()
        });
        match Pipeline::from_producer(failing).collect_results() {
            Err(err) => assert_eq!(err.kind, "ValueError"),
            Ok(items) => panic!("expected an error, got {items:?}"),
        }
    }

    #[test]
    fn bounded_queue_capacity_still_delivers_every_item() {
        let stage: Stage<(), i32> = Stage::producer("numbers", || (0..50).map(Ok))
            .queue_capacity(Capacity::Bounded(1));
        let mut results: Vec<i32> = Pipeline::from_producer(stage)
            .results()
            .map(Result::unwrap)
            .collect();
        results.sort();
        assert_eq!(results, (0..50).collect::<Vec<_>>());
    }

    // The scenarios below mirror `spec.md` §8's S1-S6 end-to-end examples.

    #[test]
    fn s1_single_worker_stage_preserves_input_order() {
        let stage: Stage<(), i32> = Stage::producer("numbers", || vec![1, 2, 3, 4].into_iter().map(Ok));
        let add_ten = Stage::transform("add_n", |seq: InputSequence<i32>| seq.map(|n| Ok(n + 10)));
        let results: Vec<i32> = Pipeline::from_producer(stage)
            .pipe(add_ten)
            .results()
            .map(Result::unwrap)
            .collect();
        assert_eq!(results, vec![11, 12, 13, 14]);
    }

    #[test]
    fn s2_four_workers_preserve_the_multiset_with_arbitrary_interleaving() {
        let stage: Stage<(), i32> = Stage::producer("numbers", || (0..100).map(Ok));
        let add_seven = Stage::transform("add_n", |seq: InputSequence<i32>| seq.map(|n| Ok(n + 7)))
            .workers(4);
        let mut results: Vec<i32> = Pipeline::from_producer(stage)
            .pipe(add_seven)
            .results()
            .map(Result::unwrap)
            .collect();
        results.sort();
        assert_eq!(results, (7..107).collect::<Vec<_>>());
    }

    #[test]
    fn s3_two_stage_strip_then_uppercase() {
        let stage: Stage<(), String> = Stage::producer("words", || {
            vec![" a ".to_string(), " b ".to_string(), " c ".to_string()].into_iter().map(Ok)
        });
        let strip = Stage::transform("strip", |seq: InputSequence<String>| {
            seq.map(|s| Ok(s.trim().to_string()))
        })
        .workers(2);
        let upper = Stage::transform("uppercase", |seq: InputSequence<String>| {
            seq.map(|s| Ok(s.to_uppercase()))
        })
        .workers(2);
        let mut results: Vec<String> = Pipeline::from_producer(stage)
            .pipe(strip)
            .pipe(upper)
            .results()
            .map(Result::unwrap)
            .collect();
        results.sort();
        assert_eq!(results, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[test]
    fn s4_most_common_aggregation_yields_exactly_one_item() {
        let stage: Stage<(), String> = Stage::producer("words", || {
            vec!["x", "y", "x", "z", "x", "y"]
                .into_iter()
                .map(|s| Ok(s.to_string()))
        });
        let most_common = Stage::transform("most_common", |seq: InputSequence<String>| {
            let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
            for word in seq {
                *counts.entry(word).or_insert(0) += 1;
            }
            let winner = counts
                .into_iter()
                .max_by_key(|(_, count)| *count)
                .expect("non-empty input");
            std::iter::once(Ok(winner))
        });
        let result = Pipeline::from_producer(stage).pipe(most_common).execute().unwrap();
        assert_eq!(result, ("x".to_string(), 3));
    }

    #[test]
    fn s5_error_names_the_failing_worker_and_its_kind() {
        let stage: Stage<(), i32> = Stage::producer("numbers", || vec![2, 3, -1, 7].into_iter().map(Ok));
        let add_one = Stage::transform("add_one", |seq: InputSequence<i32>| {
            seq.map(|n| {
                if n < 0 {
                    Err(StageError::new("TypeMismatch", "expected a non-negative int"))
                } else {
                    Ok(n + 1)
                }
            })
        })
        .workers(2);
        let err = Pipeline::from_producer(stage)
            .pipe(add_one)
            .collect_results()
            .expect_err("expected a TaskError");
        assert!(err.worker_id.starts_with("add_one-"));
        assert_eq!(err.kind, "TypeMismatch");
    }

    #[test]
    fn s6_bounded_capacity_keeps_the_channel_within_its_configured_bound() {
        let stage: Stage<(), i32> = Stage::producer("numbers", || (0..200).map(Ok))
            .queue_capacity(Capacity::Bounded(5));
        let pipeline = Pipeline::from_producer(stage);
        let mut results = pipeline.results();

        // Drain slowly, checking the underlying channel's buffered length
        // never exceeds the configured capacity (plus items already
        // claimed by in-flight `get`s, which `len()` does not count).
        let mut seen = 0;
        while let Some(item) = results.next() {
            item.unwrap();
            seen += 1;
            assert!(results.sequence.buffered_len() <= 5);
            std::thread::yield_now();
        }
        assert_eq!(seen, 200);
    }
}
