//! Tracing initialization for front-ends and manual testing.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the caller's choice. `init` builds the usual stack: stderr output filtered
//! by the `LOG` env var, plus a non-blocking file layer when debug logging is
//! on.

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

const LOG_FILE: &str = "consoled-client.log";

/// Keeps the non-blocking file writer alive; drop it last.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(verbose: bool, debug: bool) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level(verbose, debug).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(Box::new(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true),
    ));

    if debug {
        let appender = tracing_appender::rolling::never(".", LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(writer)
                .with_target(true),
        ));
    }

    layers.push(Box::new(filter));
    Registry::default().with(layers).init();

    TelemetryGuard { _guards: guards }
}

fn default_level(verbose: bool, debug: bool) -> tracing::metadata::LevelFilter {
    if debug {
        tracing::metadata::LevelFilter::DEBUG
    } else if verbose {
        tracing::metadata::LevelFilter::INFO
    } else {
        tracing::metadata::LevelFilter::WARN
    }
}
