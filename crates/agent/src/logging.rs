// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing setup: console output plus a daily-rolling file under the
//! storage root's `logs/` directory.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Keep alive for the process lifetime; dropping it flushes the file
/// writer.
pub struct LogGuard {
    _file: WorkerGuard,
}

/// Initialize logging. `debug` raises the console level; the file layer
/// always records debug and up. `RUST_LOG` overrides the console filter.
pub fn init(logs_dir: &Path, debug: bool) -> std::io::Result<LogGuard> {
    std::fs::create_dir_all(logs_dir)?;
    let appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("log")
        .filename_suffix("log")
        .build(logs_dir)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    let console_layer =
        fmt::layer().with_target(false).with_writer(std::io::stderr).with_filter(console_filter);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("debug"));

    // try_init: a second call (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(console_layer).with(file_layer).try_init();

    Ok(LogGuard { _file: guard })
}
