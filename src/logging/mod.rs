//! Structured logging for the alignment engine
//!
//! `tracing` subscriber setup, per-thread correlation ids and the spans used
//! by the aligner.

pub mod config;
pub mod spans;

use anyhow::Result;
use std::cell::Cell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub use config::LoggingConfig;
pub use spans::AlignmentSpan;

thread_local! {
    static CORRELATION_ID: Cell<Option<Uuid>> = const { Cell::new(None) };
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` overrides the configured levels. When file logging is enabled
/// the returned guard must be kept alive for buffered lines to be flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    let mut layers = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(config.include_file_location)
            .with_writer(std::io::stderr);
        layers.push(console_layer.boxed());
    }

    let mut guard = None;
    if let Some(ref log_dir) = config.log_directory {
        let file_appender = tracing_appender::rolling::daily(log_dir, &config.file_prefix);
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_timer(ChronoUtc::rfc_3339())
            .json();
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::info!(?config, "Logging initialized");
    Ok(guard)
}

/// Tag subsequent spans on this thread with `id`.
pub fn set_correlation_id(id: Uuid) {
    CORRELATION_ID.with(|cell| cell.set(Some(id)));
}

pub fn get_correlation_id() -> Option<Uuid> {
    CORRELATION_ID.with(Cell::get)
}

/// Fresh random id, installed for the current thread.
pub fn new_correlation_id() -> Uuid {
    let id = Uuid::new_v4();
    set_correlation_id(id);
    id
}

pub fn clear_correlation_id() {
    CORRELATION_ID.with(|cell| cell.set(None));
}
