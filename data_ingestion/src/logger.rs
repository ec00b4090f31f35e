use env_logger::{Builder, Env};

/// Installs the process-wide logger. `RUST_LOG` wins over `default_level`.
/// Calling it again is a no-op.
pub fn init_logger(default_level: &str) {
    let env = Env::default().default_filter_or(default_level);
    let _ = Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(false)
        .try_init();
}
