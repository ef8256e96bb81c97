//! Builder sugar that binds a name, worker count, and queue capacity
//! ahead of the user function itself, so call sites read as "configure
//! once, apply to any matching function" rather than repeating
//! `.workers(..).queue_capacity(..)` at every call site.

use crate::config::Capacity;
use crate::error::StageError;
use crate::sequence::InputSequence;
use crate::stage::Stage;

/// Bind a name/worker-count/capacity ahead of an iterator-producing
/// transform closure. The returned factory can be called with any closure
/// matching [`Stage::transform`]'s contract to produce a concrete `Stage`.
pub fn stage_fn<In, Out>(
    name: impl Into<String>,
    workers: usize,
    capacity: impl Into<Capacity>,
) -> impl Fn(
    Box<dyn Fn(InputSequence<In>) -> Box<dyn Iterator<Item = Result<Out, StageError>> + Send>
        + Send
        + Sync>,
) -> Stage<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let name = name.into();
    let capacity = capacity.into();
    move |transform| {
        Stage::transform(name.clone(), move |seq| transform(seq))
            .workers(workers)
            .queue_capacity(capacity)
    }
}

/// Bind a name/worker-count/capacity ahead of a one-item-in,
/// one-item-out mapping closure. The engine handles turning it into the
/// iterator-based [`Stage::transform`] contract; the user never touches
/// `InputSequence` directly.
pub fn map_stage<In, Out, F>(
    name: impl Into<String>,
    workers: usize,
    capacity: impl Into<Capacity>,
) -> impl Fn(F) -> Stage<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Result<Out, StageError> + Send + Sync + Clone + 'static,
{
    let name = name.into();
    let capacity = capacity.into();
    move |f: F| {
        let f = f.clone();
        Stage::transform(name.clone(), move |seq| {
            let f = f.clone();
            seq.map(move |item| f(item))
        })
        .workers(workers)
        .queue_capacity(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;

    #[test]
    fn map_stage_adapts_a_one_to_one_closure_into_a_transform_stage() {
        let add_one = map_stage::<i32, i32, _>("add_one", 2, Capacity::Unbounded);
        let stage = add_one(|n: i32| Ok(n + 1));

        let producer: Stage<(), i32> = Stage::producer("numbers", || (0..5).map(Ok));
        let mut results: Vec<i32> = Pipeline::from_producer(producer)
            .pipe(stage)
            .results()
            .map(Result::unwrap)
            .collect();
        results.sort();
        assert_eq!(results, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn stage_fn_binds_worker_count_and_capacity_ahead_of_the_closure() {
        let identity = stage_fn::<i32, i32>("identity", 3, 8);
        let stage = identity(Box::new(|seq: InputSequence<i32>| Box::new(seq.map(Ok))));
        assert_eq!(stage.worker_count(), 3);
        assert_eq!(stage.capacity(), Capacity::Bounded(8));
    }
}
