//! Process-wide tracing setup for StockForge binaries and test harnesses.

/// Initialize JSON tracing for the process.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize human-readable tracing routed through the test harness's
/// captured output.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, formatters).
pub mod tracing;
