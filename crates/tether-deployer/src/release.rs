// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Single release path for a session's Pod.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::controller::{DeleteResult, Deployment, PodController};
use crate::error::DeleteError;

pub type ReleaseOutcome = Result<DeleteResult, DeleteError>;

struct ReleaseInner {
	controller: PodController,
	deployment: Deployment,
	channel_closed: CancellationToken,
	started: AtomicBool,
	outcome: watch::Sender<Option<ReleaseOutcome>>,
}

impl ReleaseInner {
	async fn run(&self) {
		let result = self.controller.delete(&self.deployment).await;
		if let Err(e) = &result {
			warn!(pod = %self.deployment.name(), error = %e, "releasing pod failed");
		}
		self.outcome.send_replace(Some(result));
	}
}

/// Closes the channel and deletes the Pod, at most once no matter how many
/// paths ask for it. Delete failures are logged, never returned as the
/// session's error.
#[derive(Clone)]
pub struct PodRelease {
	inner: Arc<ReleaseInner>,
}

impl PodRelease {
	pub fn new(
		controller: PodController,
		deployment: Deployment,
		channel_closed: CancellationToken,
	) -> Self {
		let (outcome, _) = watch::channel(None);
		Self {
			inner: Arc::new(ReleaseInner {
				controller,
				deployment,
				channel_closed,
				started: AtomicBool::new(false),
				outcome,
			}),
		}
	}

	/// Start the release in the background if it has not started yet.
	/// Returns `true` for the call that started it.
	pub fn trigger(&self) -> bool {
		if self.inner.started.swap(true, Ordering::SeqCst) {
			return false;
		}
		self.inner.channel_closed.cancel();

		let inner = self.inner.clone();
		match Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move { inner.run().await });
			}
			Err(_) => {
				let pod = self.inner.deployment.name().to_string();
				error!(%pod, "no async runtime available to delete the pod; it may be left behind");
				self.inner.outcome.send_replace(Some(Err(DeleteError {
					pod,
					message: "no async runtime available".to_string(),
				})));
			}
		}
		true
	}

	/// Trigger the release and wait for the delete call to finish.
	pub async fn release(&self) -> ReleaseOutcome {
		self.trigger();
		let mut rx = self.inner.outcome.subscribe();
		let result = match rx.wait_for(Option::is_some).await {
			Ok(outcome) => outcome.clone(),
			Err(_) => None,
		};
		result.unwrap_or_else(|| {
			Err(DeleteError {
				pod: self.inner.deployment.name().to_string(),
				message: "release task ended without a result".to_string(),
			})
		})
	}

	pub fn is_started(&self) -> bool {
		self.inner.started.load(Ordering::SeqCst)
	}
}

/// Triggers the release when dropped, covering early returns, panics and
/// futures dropped mid-flight.
pub(crate) struct ReleaseGuard {
	release: PodRelease,
}

impl ReleaseGuard {
	pub(crate) fn new(release: PodRelease) -> Self {
		Self { release }
	}

	pub(crate) fn handle(&self) -> &PodRelease {
		&self.release
	}
}

impl Drop for ReleaseGuard {
	fn drop(&mut self) {
		self.release.trigger();
	}
}
