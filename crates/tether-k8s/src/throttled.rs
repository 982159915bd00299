// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::throttle::Throttle;
use crate::types::{AttachedProcess, Pod, PodEventStream};

/// Takes a permit from the shared [`Throttle`] before every call it forwards.
pub struct ThrottledClient {
	inner: Arc<dyn K8sClient>,
	throttle: Arc<Throttle>,
}

impl ThrottledClient {
	pub fn new(inner: Arc<dyn K8sClient>, throttle: Arc<Throttle>) -> Self {
		Self { inner, throttle }
	}
}

#[async_trait]
impl K8sClient for ThrottledClient {
	async fn server_version(&self) -> Result<String, K8sError> {
		let _permit = self.throttle.acquire().await;
		self.inner.server_version().await
	}

	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError> {
		let _permit = self.throttle.acquire().await;
		self.inner.create_pod(namespace, pod).await
	}

	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError> {
		let _permit = self.throttle.acquire().await;
		self.inner.get_pod(name, namespace).await
	}

	async fn watch_pod(
		&self,
		name: &str,
		namespace: &str,
		resource_version: &str,
	) -> Result<PodEventStream, K8sError> {
		let _permit = self.throttle.acquire().await;
		self.inner.watch_pod(name, namespace, resource_version).await
	}

	async fn attach(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
	) -> Result<AttachedProcess, K8sError> {
		let _permit = self.throttle.acquire().await;
		self.inner.attach(name, namespace, container).await
	}

	async fn delete_pod(
		&self,
		name: &str,
		namespace: &str,
		grace_period_seconds: u32,
	) -> Result<(), K8sError> {
		let _permit = self.throttle.acquire().await;
		self.inner
			.delete_pod(name, namespace, grace_period_seconds)
			.await
	}
}
