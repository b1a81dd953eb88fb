//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; binaries and tests decide where
//! they go. `init_tracing` installs the usual fmt subscriber.

use tracing_subscriber::EnvFilter;

/// Map a `-v` count to an env-filter directive
pub fn filter_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `verbosity` when set. Returns `false` if a global
/// subscriber was already installed.
pub fn init_tracing(verbosity: u8) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for_verbosity(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_thread_ids(verbosity >= 3)
        .with_line_number(verbosity >= 3)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(filter_for_verbosity(0), "info");
        assert_eq!(filter_for_verbosity(1), "debug");
        assert_eq!(filter_for_verbosity(2), "trace");
        assert_eq!(filter_for_verbosity(9), "trace");
    }

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing(0);
        assert!(!init_tracing(1));
    }
}
