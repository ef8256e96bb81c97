//! Test-only helpers shared across this crate's inline test modules.

/// Initialize tracing for tests with appropriate settings.
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
