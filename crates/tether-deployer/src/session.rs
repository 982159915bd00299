// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Session coordinator: connect, submit, wait for `Running`, attach, and
//! release the Pod on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tether_config::Config;
use tether_k8s::{ClientHandle, ConnectionManager};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::controller::{Deployment, PodController};
use crate::error::{AttachError, AttachErrorKind, SessionError, WatchError, WatchErrorKind};
use crate::phase::Phase;
use crate::release::{PodRelease, ReleaseGuard};
use crate::transport::{self, spawn_stderr_logger, DuplexChannel};
use crate::types::{SessionOutcome, StderrMode, Workload};
use crate::watch::PhaseWatcher;

/// A running session: one Pod, one attached channel.
///
/// The Pod is deleted exactly once, by [`Session::finish`], [`Session::close`],
/// closing the channel, cancellation, or dropping the session.
pub struct Session {
	controller: PodController,
	deployment: Deployment,
	channel: Option<DuplexChannel>,
	release: ReleaseGuard,
	supervisor: Option<JoinHandle<Result<(), WatchError>>>,
	output_finished: Arc<AtomicBool>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("deployment", &self.deployment)
			.field("channel", &self.channel)
			.finish_non_exhaustive()
	}
}

impl Session {
	/// Connect with `config`, then [`Session::start`].
	pub async fn run(
		config: &Config,
		workload: Workload,
		cancel: CancellationToken,
	) -> Result<Session, SessionError> {
		if cancel.is_cancelled() {
			return Err(SessionError::Cancelled {
				phase: Phase::Created,
			});
		}
		let manager = ConnectionManager::new(config.connection.clone(), config.timeouts);
		let handle = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				return Err(SessionError::Cancelled { phase: Phase::Created });
			}
			handle = manager.connect() => handle?,
		};
		Self::start(&handle, config, workload, cancel).await
	}

	/// Submit the Pod, wait for its main container to run and attach to it.
	///
	/// Once the Pod has been submitted, every error path deletes it before
	/// returning. Cancellation observed before submission returns without
	/// creating anything; a submission already in flight is allowed to
	/// complete so that the Pod it creates can be deleted.
	#[instrument(skip_all, fields(namespace = %config.pod.metadata.namespace))]
	pub async fn start(
		handle: &ClientHandle,
		config: &Config,
		workload: Workload,
		cancel: CancellationToken,
	) -> Result<Session, SessionError> {
		if cancel.is_cancelled() {
			return Err(SessionError::Cancelled {
				phase: Phase::Created,
			});
		}

		let controller = PodController::new(handle, config.timeouts);
		let deployment = controller.submit(&config.pod, &workload).await?;

		let channel_closed = CancellationToken::new();
		let release = ReleaseGuard::new(PodRelease::new(
			controller.clone(),
			deployment.clone(),
			channel_closed.clone(),
		));

		let mut watcher = controller.watch(&deployment, cancel.clone());
		if let Err(err) = wait_for_running(&mut watcher).await {
			release.handle().release().await.ok();
			return Err(err);
		}

		let attached = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				controller.cancel(&deployment);
				Err(SessionError::Cancelled { phase: Phase::Running })
			}
			attached = transport::attach(controller.client().as_ref(), &deployment, channel_closed.clone()) => {
				attached.map_err(SessionError::from)
			}
		};
		let mut channel = match attached {
			Ok(channel) => channel,
			Err(err) => {
				release.handle().release().await.ok();
				return Err(err);
			}
		};

		if workload.stderr == StderrMode::Log {
			if let Some(stderr) = channel.take_stderr() {
				spawn_stderr_logger(deployment.name().to_string(), stderr);
			}
		}

		let output_finished = channel.read_finished_flag();
		let supervisor = tokio::spawn(supervise(
			watcher,
			release.handle().clone(),
			channel_closed,
		));

		info!(pod = %deployment.name(), "session attached");
		Ok(Session {
			controller,
			deployment,
			channel: Some(channel),
			release,
			supervisor: Some(supervisor),
			output_finished,
		})
	}

	/// The submitted Pod and its live state.
	pub fn deployment(&self) -> &Deployment {
		&self.deployment
	}

	pub fn pod_name(&self) -> &str {
		self.deployment.name()
	}

	pub fn namespace(&self) -> &str {
		self.deployment.namespace()
	}

	/// Latest phase recorded by the background watch.
	pub fn phase(&self) -> Phase {
		self.deployment.phase()
	}

	/// The attached channel, unless it was taken with [`Session::take_channel`].
	pub fn channel(&mut self) -> Option<&mut DuplexChannel> {
		self.channel.as_mut()
	}

	/// Take ownership of the channel, e.g. to split it across tasks. The
	/// session keeps tracking whether the workload's output was drained.
	pub fn take_channel(&mut self) -> Option<DuplexChannel> {
		self.channel.take()
	}

	/// Wait for the workload to reach a terminal phase, then delete the Pod.
	///
	/// Drain the channel's output before or while calling this; a workload
	/// blocked on writing its output never finishes.
	#[instrument(skip_all, fields(pod = %self.deployment.name()))]
	pub async fn finish(mut self) -> Result<SessionOutcome, SessionError> {
		let watched = match self.supervisor.take() {
			Some(handle) => match handle.await {
				Ok(result) => result,
				Err(e) => Err(WatchError {
					kind: WatchErrorKind::Unreachable,
					pod: self.deployment.name().to_string(),
					message: format!("watch task ended abnormally: {e}"),
				}),
			},
			None => Ok(()),
		};

		let state = self.deployment.snapshot();
		let outcome = match watched {
			Err(err) if self.output_finished.load(Ordering::SeqCst) => {
				warn!(error = %err, "lost the pod watch after the workload's output ended");
				Ok(self.outcome(Phase::Running, None))
			}
			Err(err) => Err(SessionError::Watch(err)),
			Ok(()) => match state.phase {
				Phase::Succeeded => Ok(self.outcome(Phase::Succeeded, state.exit_code)),
				Phase::Failed => Err(SessionError::PodFailed {
					exit_code: state.exit_code,
					diagnostics: self.deployment.diagnostics(),
				}),
				_ => Err(SessionError::Cancelled {
					phase: Phase::Running,
				}),
			},
		};

		self.channel.take();
		self.release.handle().release().await.ok();
		outcome
	}

	/// Close the channel, stop watching and delete the Pod. Returns the last
	/// phase observed before deletion.
	#[instrument(skip_all, fields(pod = %self.deployment.name()))]
	pub async fn close(mut self) -> Phase {
		if let Some(supervisor) = self.supervisor.take() {
			supervisor.abort();
		}
		let phase = self.deployment.phase();
		if let Some(channel) = self.channel.take() {
			channel.close();
		}
		self.release.handle().release().await.ok();
		debug!(%phase, "session closed");
		phase
	}

	fn outcome(&self, phase: Phase, exit_code: Option<i32>) -> SessionOutcome {
		SessionOutcome {
			pod: self.deployment.name().to_string(),
			namespace: self.deployment.namespace().to_string(),
			phase,
			exit_code,
		}
	}

	/// The controller this session's Pod was submitted through.
	pub fn controller(&self) -> &PodController {
		&self.controller
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if let Some(supervisor) = self.supervisor.take() {
			supervisor.abort();
		}
	}
}

/// Follow the watcher until `Running`, mapping every other ending to the
/// session error it stands for.
async fn wait_for_running(watcher: &mut PhaseWatcher) -> Result<(), SessionError> {
	loop {
		match watcher.next_transition().await {
			Some(Ok(t)) => {
				debug!(from = %t.from, to = %t.to, "startup transition");
				if t.to == Phase::Running {
					return Ok(());
				}
				if t.to.is_terminal() {
					return Err(terminal_error(watcher.deployment(), t.from));
				}
			}
			Some(Err(e)) => return Err(SessionError::Watch(e)),
			None => {
				let deployment = watcher.deployment();
				return Err(terminal_error(deployment, deployment.phase()));
			}
		}
	}
}

fn terminal_error(deployment: &Deployment, from: Phase) -> SessionError {
	let state = deployment.snapshot();
	match state.phase {
		Phase::TimedOut => SessionError::PodTimedOut {
			timeout: deployment.startup_timeout(),
			diagnostics: deployment.diagnostics(),
		},
		Phase::Failed => SessionError::PodFailed {
			exit_code: state.exit_code,
			diagnostics: deployment.diagnostics(),
		},
		Phase::Succeeded => SessionError::Attach(AttachError {
			kind: AttachErrorKind::NotRunning,
			message: format!(
				"workload completed with exit code {} before it could be attached",
				state.exit_code.unwrap_or(0)
			),
		}),
		_ => SessionError::Cancelled { phase: from },
	}
}

/// Keeps watching after attach. Cancellation or a closed channel releases
/// the Pod at once; terminal phases end the watch and leave the release to
/// [`Session::finish`].
async fn supervise(
	mut watcher: PhaseWatcher,
	release: PodRelease,
	channel_closed: CancellationToken,
) -> Result<(), WatchError> {
	loop {
		let next = tokio::select! {
			biased;
			_ = channel_closed.cancelled() => {
				debug!("channel closed, releasing pod");
				release.trigger();
				return Ok(());
			}
			next = watcher.next_transition() => next,
		};
		match next {
			Some(Ok(t)) => {
				info!(pod = %watcher.deployment().name(), from = %t.from, to = %t.to, "phase transition");
				if t.to == Phase::Cancelled {
					release.trigger();
				}
				if t.to.is_terminal() {
					return Ok(());
				}
			}
			Some(Err(e)) => return Err(e),
			None => return Ok(()),
		}
	}
}
