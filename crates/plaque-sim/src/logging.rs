//! Subscriber setup. Library crates only emit events; this binary decides
//! where they go.

use plaque_types::{PlaqueError, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
///
/// # Errors
/// `Internal` if a subscriber is already installed.
pub fn init(json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| PlaqueError::Internal(format!("logging init: {e}")))
}
