//! Shared tracing/logging initialization.
//!
//! The relay binary and the integration harnesses share one subscriber
//! layout: an env-filter plus either human-readable or JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for a binary crate.
///
/// The core library logs at the same level as the binary; `tower_http` and
/// `axum` internals stay at `warn` unless `RUST_LOG` says otherwise.
pub fn default_filter(crate_target: &str, level: &str) -> String {
    format!("{crate_target}={level},voxrelay_core={level},tower_http=warn,axum=warn")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- directive used when `RUST_LOG` is not set
///   (see [`default_filter`]).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Calling this twice is harmless: the second install attempt is ignored.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
}
