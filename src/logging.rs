//! Logger setup for the binary and for tests that want log output.

use env_logger::{Builder, Env};

/// Initialise `env_logger`. `RUST_LOG` wins over `default_level`.
/// Safe to call more than once.
pub fn init(default_level: &str) {
    let env = Env::default().default_filter_or(default_level);
    if let Err(err) = Builder::from_env(env).format_timestamp_millis().try_init() {
        log::debug!("Logger already initialised: {err}");
    }
}
