//! Logging utilities
//!
//! The crate logs through the `log` facade; binaries pick the backend.

pub use log::{debug, error, info, trace, warn};

/// Initialize `env_logger`, honoring `RUST_LOG` and falling back to `default_filter`
pub fn init(default_filter: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(default_filter)
        .parse_default_env()
        .try_init();
}

/// Initialize logging for tests (ignores repeated initialization)
pub fn init_for_tests() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}
