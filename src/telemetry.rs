/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/telemetry.rs
*
* Sets up `tracing` for the operator process: an `EnvFilter` driven by
* `RUST_LOG` (default `info`) and either JSON or human-readable output.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::config::LogFormat;
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
};

/// Installs the global subscriber. Call once, from `main`.
pub fn init(format: LogFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
}
