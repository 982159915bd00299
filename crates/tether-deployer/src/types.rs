// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session-level value types.

use std::fmt;

use serde::Serialize;

use crate::phase::{ContainerSnapshot, Phase};

/// Identifies one session; stamped on the Pod as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(uuid7::Uuid);

impl SessionId {
	/// Create a new session ID with UUID7.
	pub fn new() -> Self {
		Self(uuid7::uuid7())
	}
}

impl Default for SessionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Where the workload's standard error goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StderrMode {
	/// Forwarded line by line to the log.
	#[default]
	Log,
	/// Left on the channel for the caller; see [`crate::DuplexChannel::take_stderr`].
	Separate,
}

/// What to run in the main container. Unset fields keep the template's values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
	pub image: Option<String>,
	pub command: Option<Vec<String>>,
	pub args: Option<Vec<String>>,
	pub stderr: StderrMode,
}

impl Workload {
	pub fn command<I, S>(command: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			command: Some(command.into_iter().map(Into::into).collect()),
			..Default::default()
		}
	}
}

/// Last known state of a Pod, attached to terminal errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
	pub pod: String,
	pub namespace: String,
	pub last_phase: Phase,
	pub containers: Vec<ContainerSnapshot>,
	pub reason: Option<String>,
}

impl fmt::Display for Diagnostics {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "pod {}/{} last seen {}", self.namespace, self.pod, self.last_phase)?;
		if let Some(reason) = &self.reason {
			write!(f, " ({reason})")?;
		}
		if !self.containers.is_empty() {
			f.write_str("; containers: ")?;
			for (i, container) in self.containers.iter().enumerate() {
				if i > 0 {
					f.write_str(", ")?;
				}
				write!(f, "{container}")?;
			}
		}
		Ok(())
	}
}

/// Successful end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
	pub pod: String,
	pub namespace: String,
	/// `Succeeded`, or `Running` when the workload finished its I/O but its
	/// final status could no longer be observed.
	pub phase: Phase,
	pub exit_code: Option<i32>,
}
