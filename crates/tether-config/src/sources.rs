// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, a TOML or JSON file, and the environment.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::env::{env_bool, env_f64, env_u32, env_u64, env_var, load_secret_env};
use crate::error::ConfigError;
use crate::layer::ConfigLayer;
use crate::sections::{
	ConnectionConfigLayer, LoggingConfigLayer, PodConfigLayer, PodMetadataLayer,
	TimeoutsConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ConfigLayer::default())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
	Toml,
	Json,
}

impl FileFormat {
	fn for_path(path: &std::path::Path) -> Self {
		match path.extension().and_then(|e| e.to_str()) {
			Some(ext) if ext.eq_ignore_ascii_case("json") => FileFormat::Json,
			_ => FileFormat::Toml,
		}
	}
}

/// Session document on disk. Unlike a system-wide config file this one was
/// named explicitly, so a missing file is an error.
pub struct FileSource {
	path: PathBuf,
}

impl FileSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		"config-file"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer = parse_layer(&content, FileFormat::for_path(&self.path), &self.path)?;
		trace!("parsed config layer from file");
		Ok(layer)
	}
}

pub(crate) fn parse_layer(
	content: &str,
	format: FileFormat,
	path: &std::path::Path,
) -> Result<ConfigLayer, ConfigError> {
	match format {
		FileFormat::Toml => toml::from_str(content).map_err(|e| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source: e,
		}),
		FileFormat::Json => serde_json::from_str(content).map_err(|e| ConfigError::JsonParse {
			path: path.to_path_buf(),
			source: e,
		}),
	}
}

/// Environment variable source.
///
/// Convention: TETHER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ConfigLayer {
			connection: Some(load_connection_from_env()?),
			pod: Some(load_pod_from_env()),
			timeouts: Some(load_timeouts_from_env()?),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn load_connection_from_env() -> Result<ConnectionConfigLayer, ConfigError> {
	Ok(ConnectionConfigLayer {
		host: env_var("TETHER_CONNECTION_HOST"),
		path: env_var("TETHER_CONNECTION_PATH"),
		server_name: env_var("TETHER_CONNECTION_SERVER_NAME"),
		username: env_var("TETHER_CONNECTION_USERNAME"),
		password: load_secret_env("TETHER_CONNECTION_PASSWORD")?,
		cacert: None,
		cert: None,
		key: None,
		bearer_token: load_secret_env("TETHER_CONNECTION_BEARER_TOKEN")?,
		qps: env_f64("TETHER_CONNECTION_QPS")?,
		burst: env_u32("TETHER_CONNECTION_BURST")?,
		insecure: env_bool("TETHER_CONNECTION_INSECURE"),
	})
}

fn load_pod_from_env() -> PodConfigLayer {
	PodConfigLayer {
		metadata: Some(PodMetadataLayer {
			namespace: env_var("TETHER_POD_NAMESPACE"),
			..Default::default()
		}),
		spec: None,
	}
}

fn load_timeouts_from_env() -> Result<TimeoutsConfigLayer, ConfigError> {
	Ok(TimeoutsConfigLayer {
		http_secs: env_u64("TETHER_TIMEOUT_HTTP_SECS")?,
		startup_secs: env_u64("TETHER_TIMEOUT_STARTUP_SECS")?,
		delete_grace_secs: env_u64("TETHER_TIMEOUT_DELETE_GRACE_SECS")?,
	})
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("TETHER_LOG_LEVEL"),
		json: env_bool("TETHER_LOG_JSON"),
	}
}
