//! Logging setup
//!
//! All modules log through `tracing`. Binaries call [`init`] once at startup;
//! `RUST_LOG` takes precedence over the level passed in.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Returns false if one was already set.
pub fn init(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("series_relay={}", default_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init("debug");
        assert!(!init("info"));
    }
}
