// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Phase watcher: follows one Pod until its deployment reaches a terminal
//! phase, re-establishing the watch as needed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tether_k8s::{backoff_delay, K8sClient, K8sError, Pod, PodEvent, PodEventStream, RetryConfig};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{Deployment, PhaseTransition};
use crate::error::{WatchError, WatchErrorKind};
use crate::phase::{observe, Phase};

const POD_DELETED: &str = "pod deleted";

/// A stream open at least this long ended normally, whatever it delivered.
const HEALTHY_STREAM: Duration = Duration::from_secs(30);

enum Wake {
	Cancelled,
	Deadline,
	Step(Result<(), WatchError>),
}

/// Yields the phase transitions of one deployment in order.
///
/// The startup deadline is enforced only while the deployment is below
/// `Running`. A graceful end of the watch stream is re-subscribed without
/// counting against the failure budget when the stream moved the phase or
/// stayed open for a while; a stream that closes right away with no phase
/// change counts like an error. After `max_attempts` consecutive failures the
/// watcher yields a [`WatchError`] and stops.
pub struct PhaseWatcher {
	client: Arc<dyn K8sClient>,
	deployment: Deployment,
	cancel: CancellationToken,
	retry: RetryConfig,
	events: Option<PodEventStream>,
	events_seen: bool,
	stream_opened: Option<Instant>,
	stream_advanced: bool,
	pending: VecDeque<PhaseTransition>,
	failures: u32,
	done: bool,
}

impl PhaseWatcher {
	pub(crate) fn new(
		client: Arc<dyn K8sClient>,
		deployment: Deployment,
		cancel: CancellationToken,
		retry: RetryConfig,
	) -> Self {
		Self {
			client,
			deployment,
			cancel,
			retry,
			events: None,
			events_seen: false,
			stream_opened: None,
			stream_advanced: false,
			pending: VecDeque::new(),
			failures: 0,
			done: false,
		}
	}

	/// The deployment this watcher updates.
	pub fn deployment(&self) -> &Deployment {
		&self.deployment
	}

	/// The next accepted transition, a terminal watch failure, or `None` once
	/// the deployment is terminal.
	pub async fn next_transition(&mut self) -> Option<Result<PhaseTransition, WatchError>> {
		loop {
			if let Some(t) = self.pending.pop_front() {
				return Some(Ok(t));
			}
			if self.done || self.deployment.phase().is_terminal() {
				return None;
			}

			let cancel = self.cancel.clone();
			let deadline = self
				.deployment
				.phase()
				.is_before_running()
				.then(|| self.deployment.deadline());

			let wake = tokio::select! {
				biased;
				_ = cancel.cancelled() => Wake::Cancelled,
				_ = async {
					match deadline {
						Some(at) => sleep_until(at).await,
						None => std::future::pending().await,
					}
				} => Wake::Deadline,
				step = self.step() => Wake::Step(step),
			};

			match wake {
				Wake::Cancelled => {
					if let Some(t) = self
						.deployment
						.transition(Phase::Cancelled, Some("cancelled".to_string()))
					{
						info!(pod = %self.deployment.name(), from = %t.from, "watch cancelled");
						self.pending.push_back(t);
					}
				}
				Wake::Deadline => {
					let timeout = self.deployment.startup_timeout();
					if let Some(t) = self.deployment.transition(
						Phase::TimedOut,
						Some(format!("main container not running after {timeout:?}")),
					) {
						warn!(pod = %self.deployment.name(), from = %t.from, "startup deadline exceeded");
						self.pending.push_back(t);
					}
				}
				Wake::Step(Ok(())) => {}
				Wake::Step(Err(e)) => {
					self.done = true;
					return Some(Err(e));
				}
			}
		}
	}

	/// Drive the watcher as a stream of transitions.
	pub fn into_stream(self) -> impl Stream<Item = Result<PhaseTransition, WatchError>> + Send {
		futures::stream::unfold(self, |mut watcher| async move {
			watcher
				.next_transition()
				.await
				.map(|item| (item, watcher))
		})
	}

	async fn step(&mut self) -> Result<(), WatchError> {
		let Some(events) = self.events.as_mut() else {
			return self.establish().await;
		};

		match events.next().await {
			Some(Ok(PodEvent::Applied(pod))) => {
				self.events_seen = true;
				self.apply(&pod);
			}
			Some(Ok(PodEvent::Deleted(pod))) => {
				self.events_seen = true;
				self.apply(&pod);
				self.pod_gone();
			}
			Some(Ok(PodEvent::Bookmark(resource_version))) => {
				self.events_seen = true;
				self.deployment.set_resource_version(Some(resource_version));
			}
			Some(Ok(PodEvent::Expired)) => {
				debug!(pod = %self.deployment.name(), "watch resource version expired");
				self.deployment.set_resource_version(None);
				return self.stream_ended("watch resource version expired");
			}
			Some(Err(e)) => {
				if self.stream_was_healthy() {
					self.failures = 0;
				}
				self.events = None;
				return self.failed(&e);
			}
			None if !self.events_seen => {
				return self.stream_ended("watch closed without delivering events");
			}
			None => {
				debug!(pod = %self.deployment.name(), "watch stream ended, resubscribing");
				return self.stream_ended("watch closed without a phase change");
			}
		}
		Ok(())
	}

	fn stream_was_healthy(&self) -> bool {
		self.stream_advanced
			|| self
				.stream_opened
				.is_some_and(|opened| opened.elapsed() >= HEALTHY_STREAM)
	}

	/// Drop the current stream. Ending quickly without moving the phase counts
	/// against the failure budget.
	fn stream_ended(&mut self, message: &str) -> Result<(), WatchError> {
		let healthy = self.stream_was_healthy();
		self.events = None;
		if healthy {
			self.failures = 0;
			return Ok(());
		}
		self.failed(&K8sError::StreamError {
			message: message.to_string(),
		})
	}

	/// Open a new watch, reading the Pod first when no resource version is
	/// known.
	async fn establish(&mut self) -> Result<(), WatchError> {
		if self.failures > 0 {
			sleep(backoff_delay(&self.retry, self.failures - 1)).await;
		}

		let resource_version = match self.deployment.resource_version() {
			Some(rv) => rv,
			None => match self
				.client
				.get_pod(self.deployment.name(), self.deployment.namespace())
				.await
			{
				Ok(pod) => {
					self.apply(&pod);
					pod.metadata.resource_version.unwrap_or_default()
				}
				Err(e) if e.is_not_found() => {
					self.pod_gone();
					return Ok(());
				}
				Err(e) => return self.failed(&e),
			},
		};

		if self.deployment.phase().is_terminal() {
			return Ok(());
		}

		match self
			.client
			.watch_pod(
				self.deployment.name(),
				self.deployment.namespace(),
				&resource_version,
			)
			.await
		{
			Ok(events) => {
				debug!(pod = %self.deployment.name(), %resource_version, "watch established");
				self.events = Some(events);
				self.events_seen = false;
				self.stream_opened = Some(Instant::now());
				self.stream_advanced = false;
				Ok(())
			}
			Err(e) if e.is_not_found() => {
				self.pod_gone();
				Ok(())
			}
			Err(e) => self.failed(&e),
		}
	}

	fn apply(&mut self, pod: &Pod) {
		let observation = observe(pod, self.deployment.main_container());
		if let Some(t) = self.deployment.record(observation) {
			self.stream_advanced = true;
			self.failures = 0;
			self.pending.push_back(t);
		}
	}

	fn pod_gone(&mut self) {
		if let Some(t) = self
			.deployment
			.transition(Phase::Failed, Some(POD_DELETED.to_string()))
		{
			warn!(pod = %self.deployment.name(), from = %t.from, "pod deleted outside the session");
			self.pending.push_back(t);
		}
	}

	fn failed(&mut self, err: &K8sError) -> Result<(), WatchError> {
		self.failures += 1;
		if self.failures >= self.retry.max_attempts {
			warn!(
				pod = %self.deployment.name(),
				error = %err,
				failures = self.failures,
				"watch failure budget exhausted"
			);
			return Err(WatchError {
				kind: WatchErrorKind::Unreachable,
				pod: self.deployment.name().to_string(),
				message: err.to_string(),
			});
		}
		warn!(
			pod = %self.deployment.name(),
			error = %err,
			failures = self.failures,
			"watch interrupted, re-establishing"
		);
		Ok(())
	}
}
