// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::io;
use std::time::Duration;

use tether_k8s::{ConnectionError, K8sError};
use thiserror::Error;

use crate::phase::Phase;
use crate::types::Diagnostics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitErrorKind {
	/// A Pod with the requested name already exists.
	Conflict,
	/// The API server rejected the Pod.
	Invalid,
	/// The API server could not be reached or did not answer in time.
	Unreachable,
}

#[derive(Debug, Error)]
#[error("pod submission failed ({kind:?}): {message}")]
pub struct SubmitError {
	pub kind: SubmitErrorKind,
	pub message: String,
}

impl SubmitError {
	pub(crate) fn from_k8s(err: &K8sError) -> Self {
		let kind = match err {
			K8sError::Api { code: 409, .. } => SubmitErrorKind::Conflict,
			K8sError::Api { code, .. } if *code >= 500 => SubmitErrorKind::Unreachable,
			K8sError::Api { .. } | K8sError::Auth { .. } | K8sError::Config { .. } => {
				SubmitErrorKind::Invalid
			}
			_ => SubmitErrorKind::Unreachable,
		};
		Self {
			kind,
			message: err.to_string(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
	/// The watch could not be re-established within its failure budget.
	Unreachable,
}

#[derive(Debug, Clone, Error)]
#[error("lost track of pod {pod} ({kind:?}): {message}")]
pub struct WatchError {
	pub kind: WatchErrorKind,
	pub pod: String,
	pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachErrorKind {
	/// The deployment was not in `Running` when attach was requested.
	NotRunning,
	Unreachable,
	/// The API server refused the attach request.
	Rejected,
}

#[derive(Debug, Error)]
#[error("attach failed ({kind:?}): {message}")]
pub struct AttachError {
	pub kind: AttachErrorKind,
	pub message: String,
}

impl AttachError {
	pub(crate) fn not_running(phase: Phase) -> Self {
		Self {
			kind: AttachErrorKind::NotRunning,
			message: format!("deployment is {phase}, not Running"),
		}
	}

	pub(crate) fn from_k8s(err: &K8sError) -> Self {
		let kind = if err.is_transport() {
			AttachErrorKind::Unreachable
		} else {
			AttachErrorKind::Rejected
		};
		Self {
			kind,
			message: err.to_string(),
		}
	}
}

/// The attached stream failed in a way that is not a clean end of stream.
#[derive(Debug, Clone, Error)]
#[error("attached stream broken: {message}")]
pub struct TransportBrokenError {
	pub message: String,
}

impl TransportBrokenError {
	pub(crate) fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}

	/// Recover the transport error carried inside an [`io::Error`] produced by
	/// the channel's `AsyncRead`/`AsyncWrite` halves.
	pub fn from_io(err: &io::Error) -> Option<&TransportBrokenError> {
		err.get_ref()
			.and_then(|inner| inner.downcast_ref::<TransportBrokenError>())
	}

	pub(crate) fn into_io(self, kind: io::ErrorKind) -> io::Error {
		io::Error::new(kind, self)
	}
}

impl From<io::Error> for TransportBrokenError {
	fn from(err: io::Error) -> Self {
		match TransportBrokenError::from_io(&err) {
			Some(inner) => inner.clone(),
			None => TransportBrokenError::new(err.to_string()),
		}
	}
}

#[derive(Debug, Clone, Error)]
#[error("failed to delete pod {pod}: {message}")]
pub struct DeleteError {
	pub pod: String,
	pub message: String,
}

/// Everything a session can end with other than success.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error(transparent)]
	Connection(#[from] ConnectionError),

	#[error(transparent)]
	Submit(#[from] SubmitError),

	#[error(transparent)]
	Watch(#[from] WatchError),

	#[error("pod did not start within {timeout:?}: {diagnostics}")]
	PodTimedOut {
		timeout: Duration,
		diagnostics: Diagnostics,
	},

	#[error("workload failed with exit code {}: {diagnostics}", exit_code_text(.exit_code))]
	PodFailed {
		exit_code: Option<i32>,
		diagnostics: Diagnostics,
	},

	#[error(transparent)]
	Attach(#[from] AttachError),

	#[error(transparent)]
	TransportBroken(#[from] TransportBrokenError),

	#[error("session cancelled during {phase}")]
	Cancelled { phase: Phase },
}

fn exit_code_text(code: &Option<i32>) -> String {
	code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}
