// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::error::K8sError;
use crate::types::{AttachedProcess, Pod, PodEventStream};

/// The control-plane calls a session makes. Implemented by [`crate::KubeClient`]
/// against a real cluster, wrapped by [`crate::ThrottledClient`], and by
/// scripted fakes in tests.
#[async_trait]
pub trait K8sClient: Send + Sync {
	/// Cheap authenticated round trip (`GET /version`), returning the server's
	/// git version.
	async fn server_version(&self) -> Result<String, K8sError>;

	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError>;

	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError>;

	/// Watch a single Pod starting after `resource_version`.
	async fn watch_pod(
		&self,
		name: &str,
		namespace: &str,
		resource_version: &str,
	) -> Result<PodEventStream, K8sError>;

	/// Attach to the standard streams of `container`'s running process.
	async fn attach(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
	) -> Result<AttachedProcess, K8sError>;

	/// Returns [`K8sError::PodNotFound`] when the Pod is already gone.
	async fn delete_pod(
		&self,
		name: &str,
		namespace: &str,
		grace_period_seconds: u32,
	) -> Result<(), K8sError>;
}
