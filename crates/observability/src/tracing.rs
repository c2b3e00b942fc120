//! Subscriber installation.
//!
//! Both entry points honour `RUST_LOG` and fall back to `info`, so engine
//! signals (drift repairs, cycle rejections, lock timeouts) are visible by
//! default.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// JSON logs with timestamps; intended for services feeding a log collector.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Compact logs written through `libtest`'s capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .compact()
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn repeated_initialisation_is_harmless() {
        super::init_for_tests();
        super::init_for_tests();
        super::init();
        ::tracing::info!("still logging");
    }
}
