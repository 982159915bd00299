// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Timeouts section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_HTTP_SECS: u64 = 15;
pub const DEFAULT_STARTUP_SECS: u64 = 300;
pub const DEFAULT_DELETE_GRACE_SECS: u64 = 5;
/// Upper bound on every timeout: one day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutsConfigLayer {
	pub http_secs: Option<u64>,
	pub startup_secs: Option<u64>,
	pub delete_grace_secs: Option<u64>,
}

impl TimeoutsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.http_secs.is_some() {
			self.http_secs = other.http_secs;
		}
		if other.startup_secs.is_some() {
			self.startup_secs = other.startup_secs;
		}
		if other.delete_grace_secs.is_some() {
			self.delete_grace_secs = other.delete_grace_secs;
		}
	}

	pub fn resolve(self) -> Result<Timeouts, ConfigError> {
		let positive = |key: &str, value: Option<u64>, default: u64| match value.unwrap_or(default) {
			0 => Err(ConfigError::InvalidValue {
				key: key.to_string(),
				message: "must be greater than zero".to_string(),
			}),
			secs if secs > MAX_TIMEOUT_SECS => Err(ConfigError::InvalidValue {
				key: key.to_string(),
				message: format!("must be at most {MAX_TIMEOUT_SECS} seconds, got {secs}"),
			}),
			secs => Ok(Duration::from_secs(secs)),
		};

		Ok(Timeouts {
			http: positive("timeouts.httpSecs", self.http_secs, DEFAULT_HTTP_SECS)?,
			startup: positive("timeouts.startupSecs", self.startup_secs, DEFAULT_STARTUP_SECS)?,
			delete_grace: positive(
				"timeouts.deleteGraceSecs",
				self.delete_grace_secs,
				DEFAULT_DELETE_GRACE_SECS,
			)?,
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeouts {
	/// Bound on each unary control-plane call.
	pub http: Duration,
	/// Time allowed between submission and the main container running.
	pub startup: Duration,
	/// Grace period passed to the delete call, and the longest we wait on it.
	pub delete_grace: Duration,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self {
			http: Duration::from_secs(DEFAULT_HTTP_SECS),
			startup: Duration::from_secs(DEFAULT_STARTUP_SECS),
			delete_grace: Duration::from_secs(DEFAULT_DELETE_GRACE_SECS),
		}
	}
}
