//! Structured logging for modload
//!
//! Every pipeline and cache event carries the same structured fields so that a
//! log aggregator can follow a unit through resolve, convert and execute.
//!
//! # Log Format Conventions
//!
//! - `operation`: what is being done ("load", "convert", "get", ...)
//! - `status`: outcome ("hit", "miss", "stale", "error", ...)
//! - `location`: canonical location of the unit
//! - `elapsed_ms`: duration of an execution
//!
//! Output written by scripts through `console.*` is forwarded under the
//! [`SCRIPT_TARGET`] target so it can be filtered separately
//! (`RUST_LOG=modload::script=off`).
//!
//! # Examples
//!
//! ```rust
//! use modload::logging::{operations, status};
//! use tracing::debug;
//!
//! debug!(
//!     operation = operations::GET,
//!     status = status::HIT,
//!     location = "/work/config.js",
//!     "cache hit"
//! );
//! ```

use std::fmt as std_fmt;
use std::io::{self, IsTerminal};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{prelude::*, EnvFilter, Layer};

/// Target used for `console.*` output of executed units
pub const SCRIPT_TARGET: &str = "modload::script";

/// One line per event: timestamp, level, `(modload)` tag, then the fields
struct UnitFormatter {
    ansi: bool,
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[34m",
        Level::TRACE => "\x1b[35m",
    }
}

impl<S, N> FormatEvent<S, N> for UnitFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");

        if self.ansi {
            write!(
                writer,
                "\x1b[2m{}\x1b[0m {}{:5}\x1b[0m (modload) ",
                timestamp,
                level_color(meta.level()),
                meta.level()
            )?;
        } else {
            write!(writer, "{} {:5} (modload) ", timestamp, meta.level())?;
        }

        // Unit output is tagged so it stands apart from loader events
        if meta.target() == SCRIPT_TARGET {
            writer.write_str("[script] ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored when stderr is a terminal
    Pretty,
    /// Same line layout without escape codes
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Read `MODLOAD_LOG_FORMAT`, falling back to compact output on CI
    pub fn from_env() -> Self {
        Self::parse(
            std::env::var("MODLOAD_LOG_FORMAT").ok().as_deref(),
            std::env::var_os("CI").is_some(),
        )
    }

    fn parse(value: Option<&str>, ci: bool) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            Some("compact") => Self::Compact,
            Some("pretty") => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer().with_writer(io::stderr);
    match format {
        LogFormat::Json => layer
            .json()
            .with_file(false)
            .with_line_number(false)
            .with_current_span(false)
            .boxed(),
        LogFormat::Pretty => layer
            .event_format(UnitFormatter {
                ansi: io::stderr().is_terminal(),
            })
            .boxed(),
        LogFormat::Compact => layer.event_format(UnitFormatter { ansi: false }).boxed(),
    }
}

/// Install the process-wide tracing subscriber, writing to stderr
///
/// `default_level` applies when `RUST_LOG` is unset. A subscriber that is
/// already installed (tests, embedding applications) is left in place.
///
/// # Environment Variables
///
/// - `RUST_LOG`: filter directives (e.g. "debug", "modload::cache=trace")
/// - `MODLOAD_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: when set, compact is the default format
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(output_layer(LogFormat::from_env()))
        .try_init();

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const LOAD: &str = "load";
    pub const LOAD_ASYNC: &str = "load_async";
    pub const CONVERT: &str = "convert";
    pub const EXECUTE: &str = "execute";
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const EVICT: &str = "evict";
    pub const INVALIDATE: &str = "invalidate";
}

/// Status values for consistent logging
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const STALE: &str = "stale";
    pub const STORED: &str = "stored";
    pub const REJECTED: &str = "rejected";
    pub const SHARED: &str = "shared";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}
