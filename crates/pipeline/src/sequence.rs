//! The input lazy sequence a transformer stage's worker sees, backed by a
//! shared marker counter rather than "first marker wins": with several
//! producer-side workers feeding one stage, the first marker any single
//! consumer sees only accounts for one upstream worker, not all of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::cancellation::CancellationToken;
use crate::channel::{ChannelReceiver, Pulled};
use crate::marker::Marker;

/// Shared state for one stage instance's worth of `InputSequence`s: one
/// `Arc` clone per worker of the current stage, all pointing at the same
/// counter and error cell.
pub(crate) struct InputAccounting {
    markers_seen: AtomicUsize,
    predecessor_workers: usize,
    first_error: Mutex<Option<Marker>>,
}

impl InputAccounting {
    pub(crate) fn new(predecessor_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            markers_seen: AtomicUsize::new(0),
            predecessor_workers,
            first_error: Mutex::new(None),
        })
    }

    fn record_marker(&self, marker: Marker) -> usize {
        if marker.is_err() {
            let mut guard = self.first_error.lock().unwrap();
            if guard.is_none() {
                *guard = Some(marker);
            }
        }
        self.markers_seen.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn fully_accounted(&self) -> bool {
        self.markers_seen.load(Ordering::Acquire) >= self.predecessor_workers
    }

    /// The first upstream error observed by *any* worker of this stage, if
    /// one has occurred.
    pub(crate) fn first_error(&self) -> Option<Marker> {
        self.first_error.lock().unwrap().clone()
    }
}

/// A finite, non-restartable view over a stage's shared input channel.
///
/// Each `next()` pulls one raw signal. Plain items are yielded. Markers
/// increment the stage-wide [`InputAccounting`] counter: absorbed silently
/// while the predecessor still has other workers in flight, or ending this
/// worker's iteration once every predecessor worker is accounted for. An
/// `Err` marker ends this worker's iteration immediately (the drain
/// signal), regardless of how many predecessor workers remain outstanding;
/// the worker is expected to call [`InputSequence::drain_remaining`]
/// afterwards to finish the accounting without handing anything more to
/// user code. Cancellation ends iteration the same way, and is observed
/// promptly even while a pull is blocked: `ChannelReceiver::get` itself
/// polls in short slices rather than blocking on a single `recv` call, so
/// a cancelled token unblocks a pending `next()` without waiting for the
/// next item to arrive.
pub struct InputSequence<T> {
    receiver: ChannelReceiver<T>,
    accounting: Arc<InputAccounting>,
    cancellation: CancellationToken,
    ended: bool,
}

impl<T> InputSequence<T> {
    pub(crate) fn new(
        receiver: ChannelReceiver<T>,
        accounting: Arc<InputAccounting>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            accounting,
            cancellation,
            ended: false,
        }
    }

    /// Whether an upstream error has been observed (by this worker or a
    /// sibling worker of the same stage) since this sequence was created.
    pub fn upstream_error(&self) -> Option<Marker> {
        self.accounting.first_error()
    }

    /// Whether cancellation has been requested since this sequence was
    /// created.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Number of signals currently buffered on the underlying channel.
    /// Test instrumentation only, for observing backpressure directly.
    #[cfg(test)]
    pub(crate) fn buffered_len(&self) -> usize {
        self.receiver.len()
    }

    /// Keep discarding signals until this worker's share of upstream
    /// accounting is satisfied, so the predecessor is never stranded on a
    /// full output channel. Safe to call even if accounting is already
    /// complete. Bails out early on cancellation, leaving accounting
    /// incomplete, which is acceptable since a cancelled run abandons
    /// completeness.
    pub(crate) fn drain_remaining(&mut self) {
        while !self.accounting.fully_accounted() {
            match self.receiver.get(&self.cancellation) {
                Pulled::Item(_) => continue,
                Pulled::Marker(marker) => {
                    self.accounting.record_marker(marker);
                }
                Pulled::Disconnected | Pulled::Cancelled => return,
            }
        }
    }
}

impl<T> Iterator for InputSequence<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.ended {
            return None;
        }
        loop {
            match self.receiver.get(&self.cancellation) {
                Pulled::Item(item) => return Some(item),
                Pulled::Marker(marker) => {
                    let is_err = marker.is_err();
                    let count = self.accounting.record_marker(marker);
                    if is_err {
                        self.ended = true;
                        return None;
                    }
                    if count >= self.accounting.predecessor_workers {
                        self.ended = true;
                        return None;
                    }
                    // Absorbed one of several predecessor workers' clean
                    // End markers; other predecessor workers may still be
                    // producing items, so keep pulling.
                }
                Pulled::Disconnected | Pulled::Cancelled => {
                    self.ended = true;
                    return None;
                }
            }
        }
    }
}
