pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod import;

pub use config::{ConfigError, ImageType, Language, LoaderConfig, SourcePaths};
pub use db::Database;
pub use error::{ErrorSink, LoaderError, LoaderResult};
pub use export::{Exporter, ExportSummary, SymbolicIds};
pub use import::{FixtureLoader, IdRegistry, PopulateReport};

/// Env var holding the tracing filter.
pub const LOG_ENV: &str = "SEEDLOADER_LOG";
const DEFAULT_LOG_FILTER: &str = "seedloader=info";

/// JSON logs on stderr, filtered by `SEEDLOADER_LOG`. Safe to call twice.
pub fn init_logging() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .json()
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .try_init();
}
