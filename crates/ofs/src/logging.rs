// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! Logging configuration for consumers of the library.
//!
//! The library itself only emits `tracing` events; nothing here is
//! required to use it. Binaries call [`configure_logging`] once at
//! startup to get filtered, timestamped output on stderr and, when
//! asked, a plain-text copy in a log file.

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;

use crate::{Error, Result};

const OFS_LOG: &str = "OFS_LOG";
const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Install the global subscriber.
///
/// `verbosity` follows the usual `-v` counting; the `OFS_LOG` and
/// `RUST_LOG` environment variables override it.
pub fn configure_logging(verbosity: usize, log_file: Option<&Path>) -> Result<()> {
    let mut config = match verbosity {
        0 => std::env::var(OFS_LOG).unwrap_or_else(|_| "ofs=info,warn".to_string()),
        1 => "ofs=debug,info".to_string(),
        2 => "ofs=trace,debug".to_string(),
        _ => "trace".to_string(),
    };
    if let Ok(overrides) = std::env::var("RUST_LOG") {
        config.push(',');
        config.push_str(&overrides);
    }
    let env_filter = EnvFilter::from(config);
    let registry = tracing_subscriber::Registry::default().with(env_filter);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(ChronoLocal::new(TIME_FORMAT.into()))
        .with_target(false);

    let result = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| Error::WriteError(path.to_owned(), err))?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_timer(ChronoLocal::new(TIME_FORMAT.into()))
                .with_target(false);
            tracing::subscriber::set_global_default(registry.with(stderr_layer).with(file_layer))
        }
        None => tracing::subscriber::set_global_default(registry.with(stderr_layer)),
    };
    result.map_err(|err| Error::String(format!("failed to install global logger: {err}")))
}
