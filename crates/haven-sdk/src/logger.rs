// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::Layer;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Logger(#[from] TryInitError),
}

fn targets_filter() -> Targets {
    let trace: bool = env::var("HAVEN_TRACE") == Ok(String::from("true"));
    Targets::new()
        .with_default(Level::WARN)
        .with_target(
            "haven_core",
            if trace { Level::TRACE } else { Level::DEBUG },
        )
        .with_target(
            "haven_electrum",
            if trace { Level::TRACE } else { Level::DEBUG },
        )
        .with_target("haven_sdk", if trace { Level::TRACE } else { Level::DEBUG })
        .with_target("rustls", Level::INFO)
}

/// Initialize tracing with stdout output and, when a directory is given, a
/// daily-rolled log file.
pub fn init<P>(log_dir: Option<P>, stdout: bool) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    let targets_filter = targets_filter();
    let stdout_log = stdout.then(|| fmt::layer().with_ansi(true).with_file(false));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir.as_ref())?;
            let file_appender = tracing_appender::rolling::daily(dir.as_ref(), "haven.log");
            let file_log = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_file(false);
            tracing_subscriber::registry()
                .with(file_log.and_then(stdout_log).with_filter(targets_filter))
                .try_init()?;
        }
        None => {
            tracing_subscriber::registry()
                .with(stdout_log.with_filter(targets_filter))
                .try_init()?;
        }
    }

    Ok(())
}
