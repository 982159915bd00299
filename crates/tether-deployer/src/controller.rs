// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Pod lifecycle controller: submit, watch and delete one Pod per session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tether_config::{PodName, PodTemplate, Timeouts};
use tether_k8s::{ClientHandle, K8sClient, RetryConfig};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{DeleteError, SubmitError, SubmitErrorKind};
use crate::phase::{ContainerSnapshot, Observation, Phase};
use crate::pod::build_pod;
use crate::types::{Diagnostics, SessionId, Workload};
use crate::watch::PhaseWatcher;

/// Consecutive watch failures tolerated before the watch gives up.
pub const WATCH_FAILURE_BUDGET: u32 = 5;

/// Stand-in deadline for a startup timeout too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
	let now = Instant::now();
	now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// One accepted phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
	pub from: Phase,
	pub to: Phase,
	pub at: DateTime<Utc>,
}

/// Latest known state of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentState {
	pub phase: Phase,
	pub containers: Vec<ContainerSnapshot>,
	pub exit_code: Option<i32>,
	pub reason: Option<String>,
	pub resource_version: Option<String>,
}

struct DeploymentInner {
	name: String,
	namespace: String,
	main_container: String,
	session_id: SessionId,
	created_at: DateTime<Utc>,
	deadline: Instant,
	startup_timeout: Duration,
	state: watch::Sender<DeploymentState>,
}

/// Handle to a submitted Pod. Clones share the same state; only the
/// controller and its watcher change it.
#[derive(Clone)]
pub struct Deployment {
	inner: Arc<DeploymentInner>,
}

impl std::fmt::Debug for Deployment {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Deployment")
			.field("name", &self.inner.name)
			.field("namespace", &self.inner.namespace)
			.field("phase", &self.phase())
			.finish_non_exhaustive()
	}
}

impl Deployment {
	/// Pod name as assigned by the API server.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn namespace(&self) -> &str {
		&self.inner.namespace
	}

	/// Container the session attaches to.
	pub fn main_container(&self) -> &str {
		&self.inner.main_container
	}

	/// Value of the session label on the Pod.
	pub fn session_id(&self) -> SessionId {
		self.inner.session_id
	}

	/// Creation time reported by the API server, or submission time when the
	/// server omitted it.
	pub fn created_at(&self) -> DateTime<Utc> {
		self.inner.created_at
	}

	/// Instant by which the main container must be running.
	pub fn deadline(&self) -> Instant {
		self.inner.deadline
	}

	pub fn startup_timeout(&self) -> Duration {
		self.inner.startup_timeout
	}

	/// Current phase. Never torn: reads see a whole update or none of it.
	pub fn phase(&self) -> Phase {
		self.inner.state.borrow().phase
	}

	/// Copy of the full state at one point in time.
	pub fn snapshot(&self) -> DeploymentState {
		self.inner.state.borrow().clone()
	}

	/// Receiver notified on every state change.
	pub fn subscribe(&self) -> watch::Receiver<DeploymentState> {
		self.inner.state.subscribe()
	}

	/// Last known state of the Pod, for error reports.
	pub fn diagnostics(&self) -> Diagnostics {
		let state = self.inner.state.borrow();
		Diagnostics {
			pod: self.inner.name.clone(),
			namespace: self.inner.namespace.clone(),
			last_phase: state.phase,
			containers: state.containers.clone(),
			reason: state.reason.clone(),
		}
	}

	/// Move to `next` if the state machine allows it.
	pub(crate) fn transition(&self, next: Phase, reason: Option<String>) -> Option<PhaseTransition> {
		let mut accepted = None;
		self.inner.state.send_if_modified(|state| {
			if !state.phase.can_advance_to(next) {
				return false;
			}
			accepted = Some(PhaseTransition {
				from: state.phase,
				to: next,
				at: Utc::now(),
			});
			state.phase = next;
			if reason.is_some() {
				state.reason = reason;
			}
			true
		});
		if let Some(t) = &accepted {
			debug!(pod = %self.inner.name, from = %t.from, to = %t.to, "phase transition");
		}
		accepted
	}

	/// Fold an observation into the state. Container details are always
	/// refreshed; the phase only moves forward.
	pub(crate) fn record(&self, observation: Observation) -> Option<PhaseTransition> {
		let mut accepted = None;
		self.inner.state.send_if_modified(|state| {
			let before = state.clone();
			if !state.phase.is_terminal() {
				state.containers = observation.containers;
				if observation.exit_code.is_some() {
					state.exit_code = observation.exit_code;
				}
				if observation.reason.is_some() {
					state.reason = observation.reason;
				}
			}
			if observation.resource_version.is_some() {
				state.resource_version = observation.resource_version;
			}
			if state.phase.can_advance_to(observation.phase) {
				accepted = Some(PhaseTransition {
					from: state.phase,
					to: observation.phase,
					at: Utc::now(),
				});
				state.phase = observation.phase;
			}
			*state != before
		});
		if let Some(t) = &accepted {
			debug!(pod = %self.inner.name, from = %t.from, to = %t.to, "phase transition");
		}
		accepted
	}

	pub(crate) fn resource_version(&self) -> Option<String> {
		self.inner.state.borrow().resource_version.clone()
	}

	pub(crate) fn set_resource_version(&self, resource_version: Option<String>) {
		self.inner.state.send_if_modified(|state| {
			if state.resource_version == resource_version {
				return false;
			}
			state.resource_version = resource_version;
			true
		});
	}
}

/// Outcome of a successful delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
	Deleted,
	/// The Pod no longer existed.
	AlreadyGone,
}

/// Submits, watches and deletes Pods through a shared client handle.
#[derive(Clone)]
pub struct PodController {
	client: Arc<dyn K8sClient>,
	timeouts: Timeouts,
	watch_retry: RetryConfig,
}

impl PodController {
	pub fn new(handle: &ClientHandle, timeouts: Timeouts) -> Self {
		Self::with_client(handle.client(), timeouts)
	}

	pub fn with_client(client: Arc<dyn K8sClient>, timeouts: Timeouts) -> Self {
		Self {
			client,
			timeouts,
			watch_retry: RetryConfig {
				max_attempts: WATCH_FAILURE_BUDGET,
				..RetryConfig::default()
			},
		}
	}

	/// Backoff and failure budget used when the watch has to be re-established.
	pub fn with_watch_retry(mut self, retry: RetryConfig) -> Self {
		self.watch_retry = retry;
		self
	}

	/// Throttled client every call of this controller goes through.
	pub fn client(&self) -> &Arc<dyn K8sClient> {
		&self.client
	}

	pub fn timeouts(&self) -> &Timeouts {
		&self.timeouts
	}

	/// Create the Pod described by `template` with `workload` applied to its
	/// main container. A conflict on a server-generated name is retried once.
	#[instrument(skip(self, template, workload), fields(namespace = %template.metadata.namespace))]
	pub async fn submit(
		&self,
		template: &PodTemplate,
		workload: &Workload,
	) -> Result<Deployment, SubmitError> {
		let session_id = SessionId::new();
		let (pod, main_container) =
			build_pod(template, workload, &session_id).ok_or_else(|| SubmitError {
				kind: SubmitErrorKind::Invalid,
				message: "pod template has no container to attach to".to_string(),
			})?;
		let namespace = template.metadata.namespace.as_str();
		let generated = matches!(template.metadata.name, PodName::Generated(_));

		let mut attempt = 0;
		let created = loop {
			attempt += 1;
			match self.client.create_pod(namespace, pod.clone()).await {
				Ok(created) => break created,
				Err(e) => {
					let err = SubmitError::from_k8s(&e);
					if err.kind == SubmitErrorKind::Conflict && generated && attempt == 1 {
						warn!(error = %e, "generated pod name collided, retrying once");
						continue;
					}
					return Err(err);
				}
			}
		};

		let name = created.metadata.name.clone().ok_or_else(|| SubmitError {
			kind: SubmitErrorKind::Invalid,
			message: "API server returned a pod without a name".to_string(),
		})?;
		let created_at = created
			.metadata
			.creation_timestamp
			.as_ref()
			.map(|t| t.0)
			.unwrap_or_else(Utc::now);

		let (state, _) = watch::channel(DeploymentState {
			phase: Phase::Created,
			containers: Vec::new(),
			exit_code: None,
			reason: None,
			resource_version: created.metadata.resource_version.clone(),
		});
		let deployment = Deployment {
			inner: Arc::new(DeploymentInner {
				name,
				namespace: namespace.to_string(),
				main_container,
				session_id,
				created_at,
				deadline: deadline_after(self.timeouts.startup),
				startup_timeout: self.timeouts.startup,
				state,
			}),
		};
		deployment.transition(Phase::Pending, None);

		info!(
			pod = %deployment.name(),
			session_id = %session_id,
			container = %deployment.main_container(),
			"pod submitted"
		);
		Ok(deployment)
	}

	/// Start observing `deployment`. The watcher ends once the deployment
	/// reaches a terminal phase, or when `cancel` fires.
	pub fn watch(&self, deployment: &Deployment, cancel: CancellationToken) -> PhaseWatcher {
		PhaseWatcher::new(
			self.client.clone(),
			deployment.clone(),
			cancel,
			self.watch_retry.clone(),
		)
	}

	/// Mark the deployment cancelled if it is not already terminal.
	pub fn cancel(&self, deployment: &Deployment) -> Option<PhaseTransition> {
		deployment.transition(Phase::Cancelled, Some("cancelled".to_string()))
	}

	/// Delete the Pod. Idempotent: a Pod that is already gone is not an error.
	/// Never waits longer than the delete grace period.
	#[instrument(skip(self, deployment), fields(pod = %deployment.name()))]
	pub async fn delete(&self, deployment: &Deployment) -> Result<DeleteResult, DeleteError> {
		let grace = self.timeouts.delete_grace;
		let grace_secs = u32::try_from(grace.as_secs()).unwrap_or(u32::MAX);
		let call = self
			.client
			.delete_pod(deployment.name(), deployment.namespace(), grace_secs);

		let result = match tokio::time::timeout(grace, call).await {
			Ok(Ok(())) => Ok(DeleteResult::Deleted),
			Ok(Err(e)) if e.is_not_found() => Ok(DeleteResult::AlreadyGone),
			Ok(Err(e)) => Err(DeleteError {
				pod: deployment.name().to_string(),
				message: e.to_string(),
			}),
			Err(_) => Err(DeleteError {
				pod: deployment.name().to_string(),
				message: format!("no answer within {grace:?}"),
			}),
		};

		deployment.transition(Phase::Deleted, None);
		match &result {
			Ok(DeleteResult::Deleted) => info!("pod deleted"),
			Ok(DeleteResult::AlreadyGone) => debug!("pod already gone"),
			Err(e) => warn!(error = %e, "pod deletion failed"),
		}
		result
	}
}
