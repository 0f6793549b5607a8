//! Portway Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` always wins over the
//! built-in filters.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,portway=info";
const VERBOSE_FILTER: &str = "debug,portway=debug";

/// Filter directives used when `RUST_LOG` is unset
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    }
}

/// Install the fmt subscriber. Call once, early in `main`.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for verbose in [false, true] {
            let directives = default_directives(verbose);
            assert!(EnvFilter::try_new(directives).is_ok(), "{}", directives);
        }
        assert_ne!(default_directives(true), default_directives(false));
    }
}
