//! Worker threads: the unit that actually runs user closures.
//!
//! A producer worker has no input; a transform worker pulls from an
//! [`InputSequence`] built over the previous stage's shared output channel.
//! Either way, a worker emits exactly one [`Marker`] as the last thing it
//! does, so stage-wide accounting (see `sequence.rs`) always terminates.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::channel::{ChannelReceiver, ChannelSender, Pulled};
use crate::error::{PipelineError, StageError};
use crate::marker::Marker;
use crate::sequence::{InputAccounting, InputSequence};

/// A producer closure: called once per worker, returns an iterator of
/// items (or failures) to push onto the stage's output channel.
pub type ProducerFn<Out> =
    Box<dyn Fn() -> Box<dyn Iterator<Item = Result<Out, StageError>> + Send> + Send + Sync>;

/// A transform closure: called once per worker with that worker's view of
/// the shared input, returns an iterator of items (or failures) to push
/// onto the stage's output channel.
pub type TransformFn<In, Out> = Box<
    dyn Fn(InputSequence<In>) -> Box<dyn Iterator<Item = Result<Out, StageError>> + Send>
        + Send
        + Sync,
>;

/// Guarantees a worker emits exactly one marker even if its closure
/// panics instead of returning normally: armed on construction, disarmed
/// once the caller has put its own (normal) marker, it puts a synthetic
/// `Err` marker on drop otherwise, so an unwinding panic can never strand
/// a sibling worker waiting on marker accounting.
struct MarkerGuard<'a, Out> {
    worker_id: &'a str,
    tx: &'a ChannelSender<Out>,
    disarmed: bool,
}

impl<'a, Out> MarkerGuard<'a, Out> {
    fn new(worker_id: &'a str, tx: &'a ChannelSender<Out>) -> Self {
        Self {
            worker_id,
            tx,
            disarmed: false,
        }
    }

    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl<'a, Out> Drop for MarkerGuard<'a, Out> {
    fn drop(&mut self) {
        if !self.disarmed {
            let err = StageError::new("WorkerPanic", "worker thread panicked before completing");
            let _ = self.tx.put_marker(Marker::error(self.worker_id, &err));
        }
    }
}

/// Push every item of `iter` onto `tx`, stopping early on the first
/// `Err(StageError)` or on cancellation. Returns the marker this worker
/// should emit.
fn drive<Out>(
    worker_id: &str,
    iter: Box<dyn Iterator<Item = Result<Out, StageError>> + Send>,
    tx: &ChannelSender<Out>,
    cancellation: &CancellationToken,
) -> Marker {
    for result in iter {
        if cancellation.is_cancelled() {
            debug!(worker_id, "cancelled mid-run");
            return Marker::end(worker_id);
        }
        match result {
            Ok(item) => match tx.put(item, cancellation) {
                Ok(()) => {}
                Err(PipelineError::Cancelled) => {
                    debug!(worker_id, "cancelled while blocked on output channel");
                    return Marker::end(worker_id);
                }
                Err(_) => {
                    // Downstream is gone; nothing left to do but stop.
                    warn!(worker_id, "output channel closed, stopping early");
                    return Marker::end(worker_id);
                }
            },
            Err(err) => {
                warn!(worker_id, kind = %err.kind, message = %err.message, "stage closure failed");
                return Marker::error(worker_id, &err);
            }
        }
    }
    Marker::end(worker_id)
}

/// Drain `receiver` for leftover signals after a worker has already stopped
/// handing items to user code (early error, early break, or cancellation),
/// so the predecessor stage is never left blocked writing to a full
/// channel. Stops as soon as `accounting` is satisfied, the channel
/// disconnects, or cancellation is observed.
pub(crate) fn drain_channel<T>(
    receiver: &ChannelReceiver<T>,
    accounting: &Arc<InputAccounting>,
    cancellation: &CancellationToken,
) {
    while !accounting.fully_accounted() {
        match receiver.get(cancellation) {
            Pulled::Item(_) => continue,
            Pulled::Marker(marker) => {
                accounting.record_marker(marker);
            }
            Pulled::Disconnected | Pulled::Cancelled => return,
        }
    }
}

/// Spawn a stage's monitor thread: joins every worker of that stage, then
/// closes its output channel exactly once, so downstream consumers see a
/// clean disconnect and the channel's resources are released once nothing
/// will ever be written to it again.
pub(crate) fn spawn_monitor<Out>(
    name: String,
    worker_handles: Vec<JoinHandle<()>>,
    tx: ChannelSender<Out>,
) -> JoinHandle<()>
where
    Out: Send + 'static,
{
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            for handle in worker_handles {
                let _ = handle.join();
            }
            tx.close();
        })
        .expect("failed to spawn stage monitor thread")
}

/// Spawn one producer worker thread.
pub(crate) fn spawn_producer<Out>(
    worker_id: String,
    produce: Arc<ProducerFn<Out>>,
    tx: ChannelSender<Out>,
    cancellation: CancellationToken,
) -> JoinHandle<()>
where
    Out: Send + 'static,
{
    std::thread::Builder::new()
        .name(worker_id.clone())
        .spawn(move || {
            debug!(worker_id, "producer worker starting");
            let mut guard = MarkerGuard::new(&worker_id, &tx);
            let iter = produce();
            let marker = drive(&worker_id, iter, &tx, &cancellation);
            guard.disarm();
            let _ = tx.put_marker(marker);
            debug!(worker_id, "producer worker finished");
        })
        .expect("failed to spawn producer worker thread")
}

/// Spawn one transform worker thread.
///
/// `input` is the receiver half this worker reads from, shared with every
/// other worker of the same stage; `accounting` is the stage-wide marker
/// counter shared across those same workers.
pub(crate) fn spawn_transform<In, Out>(
    worker_id: String,
    transform: Arc<TransformFn<In, Out>>,
    input: ChannelReceiver<In>,
    accounting: Arc<InputAccounting>,
    tx: ChannelSender<Out>,
    cancellation: CancellationToken,
) -> JoinHandle<()>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    std::thread::Builder::new()
        .name(worker_id.clone())
        .spawn(move || {
            debug!(worker_id, "transform worker starting");
            let mut guard = MarkerGuard::new(&worker_id, &tx);
            // A separate clone purely for post-hoc draining: the sequence
            // handed to user code is consumed (and possibly abandoned
            // mid-iteration) by that closure, so upstream drainage after
            // an early stop needs its own handle onto the same channel.
            let drain_receiver = input.clone();
            let sequence = InputSequence::new(input, accounting.clone(), cancellation.clone());

            let iter = transform(sequence);
            let marker = drive(&worker_id, iter, &tx, &cancellation);

            drain_channel(&drain_receiver, &accounting, &cancellation);

            // If an upstream error ended this worker's input early, surface
            // it instead of masking it with a clean `End` this worker would
            // otherwise emit once its own (exhausted) closure returns.
            let marker = match accounting.first_error() {
                Some(upstream_err) if !marker.is_err() => upstream_err,
                _ => marker,
            };
            guard.disarm();
            let _ = tx.put_marker(marker);
            debug!(worker_id, "transform worker finished");
        })
        .expect("failed to spawn transform worker thread")
}
