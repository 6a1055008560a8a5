//! Log output for the client and server
// (c) 2024 Ross Younger

use std::{
    fs::File,
    io::Write,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use indicatif::MultiProgress;
use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{
        MakeWriter,
        format::Writer,
        time::{ChronoLocal, ChronoUtc, FormatTime},
    },
    prelude::*,
};

use crate::cli::LoggingOptions;

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Events from this crate are logged at the requested level unless `RUST_LOG` says otherwise
const OWN_TARGET: &str = "trickle";

/// Environment variable that controls what gets logged to the console
const CONSOLE_ENV_VAR: &str = "RUST_LOG";
/// Environment variable that controls what gets logged to file
const FILE_ENV_VAR: &str = "RUST_LOG_FILE_DETAIL";

/// Computes the trace level for a given set of logging options
pub(crate) fn trace_level(args: &LoggingOptions) -> &'static str {
    if args.debug {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    }
}

/// Selects the format of time stamps in output messages
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    clap::ValueEnum,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    /// Local time, as "year-month-day HH:MM:SS"
    #[default]
    Local,
    /// UTC time, as "year-month-day HH:MM:SS"
    Utc,
    /// Local time with offset, as described in [RFC 3339](https://datatracker.ietf.org/doc/html/rfc3339).
    ///
    /// Example: `2010-03-14T18:32:03+01:00`
    Rfc3339,
}

/// The timer behind a [`TimeFormat`]
enum Timer {
    Local(ChronoLocal),
    Utc(ChronoUtc),
}

impl From<TimeFormat> for Timer {
    fn from(format: TimeFormat) -> Self {
        match format {
            TimeFormat::Local => Self::Local(ChronoLocal::new("%Y-%m-%d %H:%M:%SL".into())),
            TimeFormat::Utc => Self::Utc(ChronoUtc::new("%Y-%m-%d %H:%M:%SZ".into())),
            TimeFormat::Rfc3339 => Self::Local(ChronoLocal::rfc_3339()),
        }
    }
}

impl FormatTime for Timer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        match self {
            Self::Local(t) => t.format_time(w),
            Self::Utc(t) => t.format_time(w),
        }
    }
}

/// The span every server session runs in.
///
/// Each line logged by the session carries its id and the peer's address.
pub(crate) fn session_span(id: u64, peer: SocketAddr) -> Span {
    tracing::info_span!("session", id, %peer)
}

struct LogFilter {
    filter: EnvFilter,
    /// Set when the user chose the filter, in which case events from other crates may appear
    from_env: bool,
}

/// Uses the filter in `env_var` if set; otherwise logs only this crate, at `level`
fn filter_for(level: &str, env_var: &str) -> anyhow::Result<LogFilter> {
    if std::env::var_os(env_var).is_some() {
        let filter = EnvFilter::try_from_env(env_var)
            .with_context(|| format!("{env_var} (set in environment) was not understood"))?;
        return Ok(LogFilter {
            filter,
            from_env: true,
        });
    }
    Ok(LogFilter {
        filter: EnvFilter::try_new(format!("{OWN_TARGET}={level}"))?,
        from_env: false,
    })
}

fn make_layer<W>(
    writer: W,
    filter: LogFilter,
    time_format: TimeFormat,
    ansi: bool,
) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .compact()
        .with_target(filter.from_env)
        .with_ansi(ansi)
        .with_timer(Timer::from(time_format))
        .with_writer(writer)
        .with_filter(filter.filter)
        .boxed()
}

/// Where console log output goes
#[derive(Debug)]
pub(crate) enum LogSink {
    /// Directly to stderr
    Stderr,
    /// Through a progress display, so log lines do not tear up its bars
    Progress(MultiProgress),
}

/// Sets up logging to the console and, optionally, to a file.
///
/// By default only this crate's events are logged, at the given level.
/// `RUST_LOG` overrides that for the console; `RUST_LOG_FILE_DETAIL` does the same for the file.
///
/// If this fails, nothing has been set up; the caller must report the error itself.
/// Only the first call in a process has any effect.
pub(crate) fn setup(
    level: &str,
    sink: LogSink,
    log_file: Option<&String>,
    time_format: TimeFormat,
    ansi_colours: bool,
) -> anyhow::Result<()> {
    if TRACING_INITIALIZED.swap(true, Ordering::Relaxed) {
        tracing::warn!("logging was already set up");
        return Ok(());
    }
    let layers = layers(level, sink, log_file, time_format, ansi_colours)?;
    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

fn layers(
    level: &str,
    sink: LogSink,
    log_file: Option<&String>,
    time_format: TimeFormat,
    ansi_colours: bool,
) -> anyhow::Result<Vec<Box<dyn Layer<Registry> + Send + Sync>>> {
    let console = filter_for(level, CONSOLE_ENV_VAR)?;
    let mut layers = vec![match sink {
        LogSink::Stderr => make_layer(std::io::stderr, console, time_format, ansi_colours),
        LogSink::Progress(mp) => {
            make_layer(ProgressWriter::wrap(mp), console, time_format, ansi_colours)
        }
    }];

    if let Some(filename) = log_file {
        let file = File::create(filename)
            .with_context(|| format!("failed to open log file {filename}"))?;
        let filter = if std::env::var_os(FILE_ENV_VAR).is_some() {
            filter_for(level, FILE_ENV_VAR)?
        } else {
            filter_for(level, CONSOLE_ENV_VAR)?
        };
        layers.push(make_layer(Arc::new(file), filter, time_format, false));
    }
    Ok(layers)
}

/// Returns whether logging has been set up
pub(crate) fn is_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::Relaxed)
}

/// Routes log lines through a [`MultiProgress`]
struct ProgressWriter(MultiProgress);

impl ProgressWriter {
    fn wrap(display: MultiProgress) -> Mutex<Self> {
        Mutex::new(Self(display))
    }
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf);
        let msg = if console::colors_enabled_stderr() {
            msg
        } else {
            console::strip_ansi_codes(&msg).into_owned().into()
        };
        let msg = msg.trim_end();
        // a hidden display swallows println
        if self.0.is_hidden() {
            eprintln!("{msg}");
        } else {
            self.0.println(msg)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
