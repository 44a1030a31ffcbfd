//! 遥测模块：为应用程序安装 tracing 订阅者（库本身从不自动安装）。
//!
//! # Telemetry Module
//!
//! The library only emits `tracing` events. Installing a subscriber is the
//! application's call; [`init_tracing`] is the one the CLI uses.
//!
//! Filter directives come from `PROMPT_KERNEL_LOG`, then `RUST_LOG`, then
//! [`DEFAULT_FILTER`].

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PROMPT_KERNEL_LOG";
pub const DEFAULT_FILTER: &str = "info";

/// Filter from the environment, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install a stderr fmt subscriber. Returns `false` if one was already set.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_refused() {
        let _ = init_tracing();
        assert!(!init_tracing());
    }
}
