//! Tracing initialisation for StatBot binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the supplied `level`. With `json` set,
/// log lines are emitted as newline-delimited JSON. Safe to call more than
/// once; only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
