// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for tether sessions.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, session file, environment)
//! - Cross-field validation performed before any cluster call is made
//! - Consistent environment variable naming (`TETHER_*`)
//! - A redacting [`SecretString`] for tokens, passwords and private keys
//!
//! # Usage
//!
//! ```ignore
//! use tether_config::load_config_with_file;
//!
//! let config = load_config_with_file("session.toml")?;
//! println!("submitting to {} in {}", config.connection.host, config.pod.metadata.namespace);
//! ```

pub mod env;
pub mod error;
pub mod layer;
pub mod secret;
pub mod sections;
pub mod sources;

pub use env::load_secret_env;
pub use error::ConfigError;
pub use layer::ConfigLayer;
pub use secret::SecretString;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, FileFormat, FileSource, Precedence};

use serde::Serialize;
use tracing::{debug, info};

/// Fully resolved, validated session configuration. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
	pub connection: ConnectionConfig,
	#[serde(rename = "podTemplate")]
	pub pod: PodTemplate,
	pub timeouts: Timeouts,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`TETHER_*`)
/// 2. The given config file (TOML, or JSON when the extension is `.json`)
/// 3. Built-in defaults
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<Config, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(FileSource::new(config_path)),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

/// Load configuration from an in-memory document without consulting the
/// environment.
pub fn load_config_from_str(content: &str, format: FileFormat) -> Result<Config, ConfigError> {
	let mut merged = DefaultsSource.load()?;
	merged.merge(sources::parse_layer(
		content,
		format,
		std::path::Path::new("<inline>"),
	)?);
	resolve(merged)
}

/// Merge the given sources in precedence order and resolve the result.
pub fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<Config, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	resolve(merged)
}

/// Apply defaults and validate a merged layer.
pub fn resolve(layer: ConfigLayer) -> Result<Config, ConfigError> {
	let connection = layer.connection.unwrap_or_default().resolve()?;
	let pod = layer.pod.unwrap_or_default().resolve()?;
	let timeouts = layer.timeouts.unwrap_or_default().resolve()?;
	let logging = layer.logging.unwrap_or_default().finalize();

	info!(
		host = %connection.host,
		auth = connection.credentials.kind(),
		qps = connection.qps,
		burst = connection.burst,
		namespace = %pod.metadata.namespace,
		startup_timeout_secs = timeouts.startup.as_secs(),
		"configuration loaded"
	);

	Ok(Config {
		connection,
		pod,
		timeouts,
		logging,
	})
}
