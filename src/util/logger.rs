// Copyright (c) 2020-2021 MobileCoin Inc.

//! Application logger construction.

use slog::{o, Drain, Logger};

/// Builds the process-wide logger: terminal output behind an async drain.
/// The returned guard must stay alive for the duration of the process.
pub fn create_app_logger() -> (Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    let logger = Logger::root(drain.fuse(), o!("app" => "mass-payments"));
    (logger, guard)
}
