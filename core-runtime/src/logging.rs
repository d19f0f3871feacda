//! # Logging & Tracing Infrastructure
//!
//! Installs the global `tracing` subscriber for the sync engine:
//! - `EnvFilter` with workspace crates at the configured level and `sqlx` at warn
//! - Pretty, JSON or compact output on stdout
//! - An optional host [`LoggerSink`] receiving a copy of every event
//!
//! ## Run context
//!
//! Job runs execute inside spans carrying `job` and `run_id` fields. Events
//! forwarded to the sink are tagged with the innermost such span, so a host
//! can group everything a single run logged.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LoggingConfig};
//!
//! // MEDIAHUB_LOG=debug MEDIAHUB_LOG_FORMAT=json
//! let config = LoggingConfig::from_env()?.with_logger_sink(host_sink);
//! init_logging(config)?;
//! ```

use crate::error::{Error, Result};

use bridge_traits::logging::{LogEntry, LogLevel, LoggerSink};

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{span, Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, Layered, SubscriberExt},
    registry::{LookupSpan, Registry},
    util::SubscriberInitExt,
    Layer,
};

/// Level or full filter directives, e.g. `debug` or `core_sync=trace,sqlx=info`
pub const LOG_ENV_VAR: &str = "MEDIAHUB_LOG";

/// `pretty`, `json` or `compact`
pub const LOG_FORMAT_ENV_VAR: &str = "MEDIAHUB_LOG_FORMAT";

const WORKSPACE_CRATES: &[&str] = &[
    "mediahub_workspace",
    "bridge_traits",
    "core_runtime",
    "core_library",
    "core_jobs",
    "core_sync",
    "core_service",
];

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line with colors, for development
    Pretty,
    /// One JSON object per event
    Json,
    /// Single line per event
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for the workspace crates when no custom filter is set
    pub level: LogLevel,
    /// Full `EnvFilter` directives; replaces the per-crate defaults
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span enter/exit (every job run is a span)
    pub enable_spans: bool,
    pub display_target: bool,
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"))
            .field("enable_spans", &self.enable_spans)
            .field("display_target", &self.display_target)
            .finish()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: false,
            display_target: true,
        }
    }
}

impl LoggingConfig {
    /// Read [`LOG_ENV_VAR`] and [`LOG_FORMAT_ENV_VAR`]; unset variables keep
    /// the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_values(
            std::env::var(LOG_ENV_VAR).ok().as_deref(),
            std::env::var(LOG_FORMAT_ENV_VAR).ok().as_deref(),
        )
    }

    /// A bare level sets [`LoggingConfig::level`]; anything else is taken as
    /// filter directives.
    pub fn from_values(filter: Option<&str>, format: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = filter.map(str::trim).filter(|v| !v.is_empty()) {
            match LogLevel::parse(value) {
                Some(level) => config.level = level,
                None => config.filter = Some(value.to_string()),
            }
        }

        if let Some(value) = format.map(str::trim).filter(|v| !v.is_empty()) {
            config.format = LogFormat::parse(value).ok_or_else(|| {
                Error::Config(format!(
                    "{} must be pretty, json or compact, got {:?}",
                    LOG_FORMAT_ENV_VAR, value
                ))
            })?;
        }

        Ok(config)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

// ============================================================================
// Initialization
// ============================================================================

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// Install the global subscriber. Only the first call in a process succeeds.
///
/// # Errors
///
/// [`Error::Config`] when the filter directives do not parse or a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(config.display_target)
            .with_span_events(span_events)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(config.display_target)
            .with_span_events(span_events)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(config.display_target)
            .with_span_events(span_events)
            .with_writer(io::stdout)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(LoggerSinkLayer::new(config.logger_sink.clone()))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

/// Custom directives win; `sqlx=warn` is appended unless they mention sqlx.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) if custom.contains("sqlx") => custom.clone(),
        Some(custom) => format!("{},sqlx=warn", custom),
        None => WORKSPACE_CRATES
            .iter()
            .map(|krate| format!("{}={}", krate, config.level))
            .chain(std::iter::once("sqlx=warn".to_string()))
            .collect::<Vec<_>>()
            .join(","),
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid log filter {:?}: {}", directives, e)))
}

// ============================================================================
// Sink forwarding
// ============================================================================

/// `job`/`run_id` recorded on a span, stored in its extensions
#[derive(Debug, Clone, Default)]
struct RunFields {
    job_name: Option<String>,
    run_id: Option<String>,
}

impl Visit for RunFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }
}

impl RunFields {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "job" => self.job_name = Some(value),
            "run_id" => self.run_id = Some(value),
            _ => {}
        }
    }
}

struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if self.sink.is_none() {
            return;
        }
        let mut fields = RunFields::default();
        attrs.record(&mut fields);
        if fields.job_name.is_none() && fields.run_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let level = to_log_level(*metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut entry = LogEntry::new(
            level,
            metadata.target(),
            visitor.message.unwrap_or_else(|| metadata.name().to_string()),
        );
        entry.fields = visitor.fields;

        // innermost span that belongs to a job run
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(run) = span.extensions().get::<RunFields>() {
                    entry.job_name = run.job_name.clone();
                    entry.run_id = run.run_id.clone();
                    break;
                }
            }
        }

        forward(Arc::clone(sink), entry);
    }
}

/// Never blocks a runtime worker: inside tokio the sink call is spawned.
fn forward(sink: Arc<dyn LoggerSink>, entry: LogEntry) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(err) = sink.log(entry).await {
                eprintln!("LoggerSink error: {}", err);
            }
        });
        return;
    }

    if let Err(err) = futures::executor::block_on(sink.log(entry)) {
        eprintln!("LoggerSink error: {}", err);
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    fields: BTreeMap<String, String>,
}

impl EventVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}

fn to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as SinkResult;
    use std::sync::Mutex;

    struct CollectingSink {
        entries: Mutex<Vec<LogEntry>>,
        min_level: LogLevel,
    }

    impl CollectingSink {
        fn new(min_level: LogLevel) -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(Vec::new()),
                min_level,
            })
        }
    }

    #[async_trait]
    impl LoggerSink for CollectingSink {
        async fn log(&self, entry: LogEntry) -> SinkResult<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            self.min_level
        }
    }

    fn install(sink: &Arc<CollectingSink>) -> tracing::subscriber::DefaultGuard {
        let trait_sink: Arc<dyn LoggerSink> = sink.clone();
        let subscriber = tracing_subscriber::registry().with(LoggerSinkLayer::new(Some(trait_sink)));
        tracing::subscriber::set_default(subscriber)
    }

    #[test]
    fn test_from_values() {
        let config = LoggingConfig::from_values(Some("debug"), Some("JSON")).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.filter.is_none());

        let config = LoggingConfig::from_values(Some("core_sync=trace"), None).unwrap();
        assert_eq!(config.filter.as_deref(), Some("core_sync=trace"));
        assert_eq!(config.format, LogFormat::default());

        assert!(LoggingConfig::from_values(None, Some("xml")).is_err());
    }

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        let config = LoggingConfig::default().with_level(LogLevel::Debug);
        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("core_jobs=debug"));
        assert!(filter.contains("core_sync=debug"));
        assert!(filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_custom_filter_keeps_sqlx_quiet() {
        let config = LoggingConfig::default().with_filter("core_jobs=trace");
        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("core_jobs=trace"));
        assert!(filter.contains("sqlx=warn"));

        let config = LoggingConfig::default().with_filter("sqlx=debug");
        let filter = build_filter(&config).unwrap().to_string();
        assert!(!filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_sink_receives_message_and_fields() {
        let sink = CollectingSink::new(LogLevel::Trace);
        let _guard = install(&sink);

        tracing::info!(target: "core_sync::catalog_job", client_id = "plex-home", created = 3, "Client reconciled");

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, "core_sync::catalog_job");
        assert_eq!(entries[0].message, "Client reconciled");
        assert_eq!(entries[0].field("client_id"), Some("plex-home"));
        assert_eq!(entries[0].field("created"), Some("3"));
        assert!(entries[0].run_id.is_none());
    }

    #[test]
    fn test_sink_entries_are_tagged_with_the_run() {
        let sink = CollectingSink::new(LogLevel::Trace);
        let _guard = install(&sink);

        let run = tracing::info_span!("execute", job = "playlist_sync", run_id = "r-42");
        run.in_scope(|| {
            let user = tracing::info_span!("sync_user", user_id = "alice");
            user.in_scope(|| tracing::warn!("List sync failed for user"));
        });

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job_name.as_deref(), Some("playlist_sync"));
        assert_eq!(entries[0].run_id.as_deref(), Some("r-42"));
    }

    #[test]
    fn test_sink_min_level_filters_events() {
        let sink = CollectingSink::new(LogLevel::Warn);
        let _guard = install(&sink);

        tracing::info!("dropped");
        tracing::warn!("kept");

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "kept");
    }
}
