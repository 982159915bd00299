// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	ConnectionConfigLayer, LoggingConfigLayer, PodConfigLayer, TimeoutsConfigLayer,
};

/// Top-level configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
	#[serde(default)]
	pub connection: Option<ConnectionConfigLayer>,
	#[serde(default, alias = "podTemplate")]
	pub pod: Option<PodConfigLayer>,
	#[serde(default)]
	pub timeouts: Option<TimeoutsConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ConfigLayer) {
		merge_option(
			&mut self.connection,
			other.connection,
			ConnectionConfigLayer::merge,
		);
		merge_option(&mut self.pod, other.pod, PodConfigLayer::merge);
		merge_option(&mut self.timeouts, other.timeouts, TimeoutsConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}
