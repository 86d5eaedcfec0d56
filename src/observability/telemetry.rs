//! Logging setup.
//!
//! Writes level-tagged lines to both `logs/umbrasol.log` (non-blocking,
//! daily-rotated, via `tracing-appender`) and stderr, filtered by `RUST_LOG`.

use std::path::Path;
use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Guard returned by `init_tracing`; drop it only at process exit so the
/// non-blocking file appender keeps flushing.
pub struct TelemetryGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init_tracing(log_dir: &Path) -> anyhow::Result<TelemetryGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "umbrasol.log");
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let mut result = Ok(());
    INIT.call_once(|| {
        result = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer)
            .try_init()
            .map_err(anyhow::Error::from);
    });
    result?;

    Ok(TelemetryGuard {
        _file_guard: file_guard,
    })
}

/// Escapes control characters in user-controlled text before it reaches a log
/// line, so request text or tool output can't forge extra log lines.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
