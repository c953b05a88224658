//! Logging setup (C10.2): installs a `tracing` subscriber for the CLI binary.
//! Every other module only ever calls `tracing::{debug,info,warn,error}!` —
//! this is the one place a subscriber gets installed, matching the `tracing`
//! + `tracing-subscriber` + `tracing-appender` trio already in the dependency
//! table.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Where log output goes: stderr for interactive use, or a rolling file for
/// long exploration runs left going unattended.
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    File { directory: String, file_name_prefix: String },
}

/// Installs the global subscriber. Returns a `WorkerGuard` that must be kept
/// alive for the duration of the process — dropping it flushes and stops the
/// non-blocking writer, so the caller (`main`) holds onto it until exit.
///
/// `json` selects the `tracing-subscriber` JSON layer over the default human
/// `fmt` layer, matching `[logging].format` (`"human"` | `"json"`).
pub fn init(target: LogTarget, default_directive: &str, json: bool) -> WorkerGuard {
    let filter = EnvFilter::try_from_env("EXPLORER_LOG").unwrap_or_else(|_| EnvFilter::new(default_directive));

    match target {
        LogTarget::Stderr => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_target(true);
            if json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            guard
        }
        LogTarget::File { directory, file_name_prefix } => {
            let appender = tracing_appender::rolling::daily(directory, file_name_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).with_target(true);
            if json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            guard
        }
    }
}
