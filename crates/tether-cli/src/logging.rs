// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Tracing setup. Standard output belongs to the workload, so every log line
//! goes to standard error.

use tether_config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` wins over the configured level.
pub fn filter(config: &LoggingConfig) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| config.level.clone().into())
}

pub fn init(config: &LoggingConfig) {
	let registry = tracing_subscriber::registry().with(filter(config));
	if config.json {
		registry
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		registry
			.with(fmt::layer().with_writer(std::io::stderr))
			.init();
	}
}
