// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::fmt;
use std::pin::Pin;

use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::K8sError;

pub use k8s_openapi::api::core::v1::{
	Container, ContainerState, ContainerStatus, Pod, PodSpec, PodStatus,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// One observation from a Pod watch.
#[derive(Debug, Clone)]
pub enum PodEvent {
	/// The Pod was added or modified; carries the full object.
	Applied(Pod),
	Deleted(Pod),
	/// Progress marker carrying a newer resource version.
	Bookmark(String),
	/// The resource version the watch started from is too old (410 Gone).
	/// The watch must be re-established from a fresh read.
	Expired,
}

/// A pinned stream of Pod watch events.
pub type PodEventStream = Pin<Box<dyn Stream<Item = Result<PodEvent, K8sError>> + Send>>;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Standard streams of an attached container process. Standard error is kept
/// apart from standard output.
pub struct AttachedProcess {
	pub stdin: BoxedWriter,
	pub stdout: BoxedReader,
	pub stderr: Option<BoxedReader>,
}

impl fmt::Debug for AttachedProcess {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AttachedProcess")
			.field("stderr", &self.stderr.is_some())
			.finish_non_exhaustive()
	}
}
