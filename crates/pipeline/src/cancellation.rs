//! Re-exports [`tokio_util::sync::CancellationToken`] as the pipeline's
//! cancellation primitive.
//!
//! `tokio_util`'s token works standalone: `is_cancelled()`/`cancel()` need
//! no async runtime, which is why it is used here even though the engine
//! itself spawns plain OS threads rather than Tokio tasks. Worker bodies are
//! blocking by nature (arbitrary user closures), so plain threads avoid
//! tying up an async executor's worker pool the way `spawn_blocking` would.

pub use tokio_util::sync::CancellationToken;
