//! Tracing setup shared by the pilot nodes.
//!
//! Dora installs its own global subscriber, so the pilot registers a
//! thread-local one instead and keeps the guard alive for the whole run.

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable
pub const DEFAULT_LOG_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the pilot's thread-local subscriber.
///
/// Compact lines without target, file or line metadata. Only tasks polled
/// on the calling thread log through it, which is why the driver runs a
/// current-thread runtime.
///
/// ```no_run
/// use lane_pilot_lib::init_tracing;
///
/// fn main() {
///     let _guard = init_tracing();
///     // node code
/// }
/// ```
pub fn init_tracing() -> DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .compact()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}
