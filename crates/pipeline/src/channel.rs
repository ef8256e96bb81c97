//! Thread/process-safe bounded FIFO connecting one stage's workers to the
//! next stage's workers.
//!
//! Backed by `crossbeam_channel`, which (unlike `tokio::sync::mpsc`) is a
//! true multi-producer/multi-consumer channel: its `Receiver` is `Clone`,
//! which is exactly what's needed when several workers of one stage share
//! a single input channel. `tokio::sync::mpsc::Receiver` cannot be shared
//! this way, which rules it out as the core channel even though it's
//! otherwise a fine fit for the teacher crate's single-consumer-per-stage
//! design (see DESIGN.md).
//!
//! The sending and receiving halves are split, mirroring
//! `crossbeam_channel::bounded`/`tokio::sync::mpsc::channel` themselves.
//! Keeping them separate is what lets a `Receiver` clone held by a
//! consumer worker observe a real disconnect once every `Sender` clone
//! held by producer workers has been dropped, rather than artificially
//! staying "open" because a reader also happened to be holding onto a
//! sender handle.
//!
//! `put`/`get` both poll in short timed slices rather than blocking via a
//! single `send`/`recv` call, so a worker stuck on a full or empty channel
//! still notices a cancelled [`CancellationToken`] promptly instead of
//! only between items.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError};

use crate::cancellation::CancellationToken;
use crate::config::Capacity;
use crate::error::PipelineError;
use crate::marker::{Marker, Signal};

/// How often a blocked `put`/`get` re-checks cancellation. Short enough
/// that `Pipeline::cancel()` is observed promptly, long enough not to spin.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What a `get()` call observes.
pub(crate) enum Pulled<T> {
    Item(T),
    Marker(Marker),
    /// The channel is closed and fully drained: no sender clone remains.
    Disconnected,
    /// Cancellation was observed while waiting for a signal.
    Cancelled,
}

/// The writable half of a stage's output channel. Cloned once per worker
/// of that stage, plus one extra clone retained by the stage's monitor
/// thread for the final `close()`.
pub(crate) struct ChannelSender<T> {
    tx: crossbeam_channel::Sender<Signal<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> ChannelSender<T> {
    /// Enqueue a user item, blocking while the channel is full. Returns
    /// `PipelineError::Cancelled` if `cancellation` fires before the item
    /// can be enqueued.
    pub(crate) fn put(&self, item: T, cancellation: &CancellationToken) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::ClosedWrite);
        }
        let mut signal = Signal::Item(item);
        loop {
            if cancellation.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match self.tx.send_timeout(signal, CANCEL_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => signal = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(PipelineError::ClosedWrite),
            }
        }
    }

    /// Enqueue a marker. A worker emits exactly one of these, as the very
    /// last thing it does, so this does not re-check `closed` or
    /// cancellation: a worker's own terminating marker must always be
    /// deliverable even if `close()` or `cancel()` raced ahead of it.
    pub(crate) fn put_marker(&self, marker: Marker) -> Result<(), PipelineError> {
        self.tx
            .send(Signal::Marker(marker))
            .map_err(|_| PipelineError::ClosedWrite)
    }

    /// Mark the channel closed for further `put()`s. Idempotent.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The readable half of a stage's output channel. Cloned once per worker
/// of the *next* stage.
pub(crate) struct ChannelReceiver<T> {
    rx: crossbeam_channel::Receiver<Signal<T>>,
}

impl<T> Clone for ChannelReceiver<T> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T> ChannelReceiver<T> {
    /// Dequeue the oldest signal, blocking while empty and not
    /// disconnected. Returns `Pulled::Cancelled` if `cancellation` fires
    /// before a signal arrives.
    pub(crate) fn get(&self, cancellation: &CancellationToken) -> Pulled<T> {
        loop {
            if cancellation.is_cancelled() {
                return Pulled::Cancelled;
            }
            match self.rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(Signal::Item(item)) => return Pulled::Item(item),
                Ok(Signal::Marker(marker)) => return Pulled::Marker(marker),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Pulled::Disconnected,
            }
        }
    }

    /// Number of signals currently buffered. Instrumentation only, used
    /// by tests to observe backpressure, never by the engine's own
    /// control flow.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}

/// Construct a fresh channel at the given capacity.
pub(crate) fn channel<T>(capacity: Capacity) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = match capacity.as_usize() {
        Some(n) => crossbeam_channel::bounded(n),
        None => crossbeam_channel::unbounded(),
    };
    (
        ChannelSender {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        ChannelReceiver { rx },
    )
}
