// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Deployment phases and the mapping from observed Pod status to a phase.

use std::fmt;

use serde::Serialize;
use tether_k8s::{ContainerStatus, Pod};

/// Locally tracked lifecycle phase of a submitted Pod.
///
/// Phases only move forward. `Created` through `Running` are ordered; the
/// remaining phases are terminal, except that `Deleted` can follow any phase
/// once the Pod has been deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
	Created,
	Pending,
	Starting,
	Running,
	Succeeded,
	Failed,
	TimedOut,
	Cancelled,
	Deleted,
}

impl Phase {
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			Phase::Succeeded | Phase::Failed | Phase::TimedOut | Phase::Cancelled | Phase::Deleted
		)
	}

	/// Submitted but the main container has not been seen running yet.
	pub fn is_before_running(self) -> bool {
		self.rank() < Phase::Running.rank()
	}

	fn rank(self) -> u8 {
		match self {
			Phase::Created => 0,
			Phase::Pending => 1,
			Phase::Starting => 2,
			Phase::Running => 3,
			_ => 4,
		}
	}

	/// Whether the state machine allows moving from `self` to `next`.
	pub fn can_advance_to(self, next: Phase) -> bool {
		if next == Phase::Deleted {
			return self != Phase::Deleted;
		}
		if self.is_terminal() {
			return false;
		}
		match next {
			Phase::TimedOut => self.rank() < Phase::Running.rank(),
			Phase::Succeeded | Phase::Failed | Phase::Cancelled => true,
			_ => next.rank() > self.rank(),
		}
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Condensed view of one container status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSnapshot {
	pub name: String,
	pub init: bool,
	pub state: ContainerStateSnapshot,
	pub restart_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContainerStateSnapshot {
	Waiting {
		reason: Option<String>,
		message: Option<String>,
	},
	Running,
	Terminated {
		exit_code: i32,
		reason: Option<String>,
	},
	Unknown,
}

impl ContainerSnapshot {
	fn from_status(status: &ContainerStatus, init: bool) -> Self {
		let state = match &status.state {
			Some(state) => {
				if let Some(terminated) = &state.terminated {
					ContainerStateSnapshot::Terminated {
						exit_code: terminated.exit_code,
						reason: terminated.reason.clone(),
					}
				} else if state.running.is_some() {
					ContainerStateSnapshot::Running
				} else if let Some(waiting) = &state.waiting {
					ContainerStateSnapshot::Waiting {
						reason: waiting.reason.clone(),
						message: waiting.message.clone(),
					}
				} else {
					ContainerStateSnapshot::Unknown
				}
			}
			None => ContainerStateSnapshot::Unknown,
		};
		Self {
			name: status.name.clone(),
			init,
			state,
			restart_count: status.restart_count,
		}
	}

	fn has_started(&self) -> bool {
		matches!(
			self.state,
			ContainerStateSnapshot::Running | ContainerStateSnapshot::Terminated { .. }
		)
	}

	fn exit_code(&self) -> Option<i32> {
		match self.state {
			ContainerStateSnapshot::Terminated { exit_code, .. } => Some(exit_code),
			_ => None,
		}
	}
}

impl fmt::Display for ContainerSnapshot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.init {
			write!(f, "init:")?;
		}
		write!(f, "{} ", self.name)?;
		match &self.state {
			ContainerStateSnapshot::Waiting { reason, message } => {
				write!(f, "waiting")?;
				match (reason, message) {
					(Some(r), Some(m)) => write!(f, " ({r}: {m})"),
					(Some(r), None) => write!(f, " ({r})"),
					(None, Some(m)) => write!(f, " ({m})"),
					(None, None) => Ok(()),
				}
			}
			ContainerStateSnapshot::Running => write!(f, "running"),
			ContainerStateSnapshot::Terminated { exit_code, reason } => {
				write!(f, "terminated with exit code {exit_code}")?;
				match reason {
					Some(r) => write!(f, " ({r})"),
					None => Ok(()),
				}
			}
			ContainerStateSnapshot::Unknown => write!(f, "unknown"),
		}
	}
}

/// What one Pod object says about the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
	pub phase: Phase,
	pub containers: Vec<ContainerSnapshot>,
	pub exit_code: Option<i32>,
	pub reason: Option<String>,
	pub resource_version: Option<String>,
}

/// Map a Pod object to the phase it implies for `main_container`.
///
/// Rules, first match wins:
/// - pod phase `Failed`, or any container terminated non-zero: `Failed`
/// - pod phase `Succeeded`, or the main container terminated with 0: `Succeeded`
/// - main container running: `Running`
/// - any container started: `Starting`
/// - otherwise `Pending`
pub fn observe(pod: &Pod, main_container: &str) -> Observation {
	let status = pod.status.as_ref();
	let pod_phase = status.and_then(|s| s.phase.as_deref());

	let mut containers: Vec<ContainerSnapshot> = Vec::new();
	if let Some(status) = status {
		containers.extend(
			status
				.init_container_statuses
				.iter()
				.flatten()
				.map(|s| ContainerSnapshot::from_status(s, true)),
		);
		containers.extend(
			status
				.container_statuses
				.iter()
				.flatten()
				.map(|s| ContainerSnapshot::from_status(s, false)),
		);
	}

	let main = containers
		.iter()
		.find(|c| !c.init && c.name == main_container);
	let main_exit = main.and_then(ContainerSnapshot::exit_code);
	let failed_exit = containers
		.iter()
		.filter_map(ContainerSnapshot::exit_code)
		.find(|code| *code != 0);

	let reason = status.and_then(|s| match (&s.reason, &s.message) {
		(Some(r), Some(m)) => Some(format!("{r}: {m}")),
		(Some(r), None) => Some(r.clone()),
		(None, Some(m)) => Some(m.clone()),
		(None, None) => None,
	});

	let (phase, exit_code) = if pod_phase == Some("Failed") || failed_exit.is_some() {
		(Phase::Failed, main_exit.filter(|c| *c != 0).or(failed_exit))
	} else if pod_phase == Some("Succeeded") || main_exit == Some(0) {
		(Phase::Succeeded, main_exit.or(Some(0)))
	} else if main.is_some_and(|c| c.state == ContainerStateSnapshot::Running) {
		(Phase::Running, None)
	} else if containers.iter().any(ContainerSnapshot::has_started) {
		(Phase::Starting, None)
	} else {
		(Phase::Pending, None)
	};

	Observation {
		phase,
		containers,
		exit_code,
		reason,
		resource_version: pod.metadata.resource_version.clone(),
	}
}
