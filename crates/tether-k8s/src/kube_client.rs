// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
	api::{Api, AttachParams, DeleteParams, PostParams, WatchEvent, WatchParams},
	Client,
};
use tether_config::{ConnectionConfig, Timeouts};
use tracing::{debug, instrument};

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::kubeconfig::build_kube_config;
use crate::types::{AttachedProcess, BoxedReader, PodEvent, PodEventStream};

/// Server-side watch timeout; the apiserver caps it below 295s.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Production K8s client implementation using the kube crate.
pub struct KubeClient {
	client: Client,
	call_timeout: Duration,
}

impl KubeClient {
	pub fn new(client: Client, call_timeout: Duration) -> Self {
		Self {
			client,
			call_timeout,
		}
	}

	/// Build a client for the configured endpoint and credentials. No request
	/// is made; see [`crate::ConnectionManager::connect`] for the probe.
	pub async fn from_connection(
		connection: &ConnectionConfig,
		timeouts: &Timeouts,
	) -> Result<Self, K8sError> {
		let config = build_kube_config(connection, timeouts).await?;
		let client = Client::try_from(config)?;
		debug!(host = %connection.host, "K8s client initialized");
		Ok(Self::new(client, timeouts.http))
	}

	fn pods(&self, namespace: &str) -> Api<Pod> {
		Api::namespaced(self.client.clone(), namespace)
	}

	async fn bounded<T>(
		&self,
		operation: &'static str,
		call: impl Future<Output = kube::Result<T>>,
	) -> Result<kube::Result<T>, K8sError> {
		tokio::time::timeout(self.call_timeout, call)
			.await
			.map_err(|_| K8sError::Timeout { operation })
	}
}

fn not_found_or(err: kube::Error, name: &str) -> K8sError {
	match err {
		kube::Error::Api(ref resp) if resp.code == 404 => K8sError::PodNotFound { name: name.into() },
		other => other.into(),
	}
}

#[async_trait]
impl K8sClient for KubeClient {
	#[instrument(skip(self))]
	async fn server_version(&self) -> Result<String, K8sError> {
		let info = self
			.bounded("version probe", self.client.apiserver_version())
			.await??;
		Ok(info.git_version)
	}

	#[instrument(skip(self, pod))]
	async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<Pod, K8sError> {
		let pods = self.pods(namespace);
		let created = self
			.bounded("create pod", pods.create(&PostParams::default(), &pod))
			.await??;
		Ok(created)
	}

	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError> {
		let pods = self.pods(namespace);
		self.bounded("get pod", pods.get(name))
			.await?
			.map_err(|e| not_found_or(e, name))
	}

	#[instrument(skip(self))]
	async fn watch_pod(
		&self,
		name: &str,
		namespace: &str,
		resource_version: &str,
	) -> Result<PodEventStream, K8sError> {
		let pods = self.pods(namespace);
		let wp = WatchParams::default()
			.fields(&format!("metadata.name={name}"))
			.timeout(WATCH_TIMEOUT_SECS);

		let stream = self
			.bounded("watch pod", pods.watch(&wp, resource_version))
			.await?
			.map_err(|e| not_found_or(e, name))?;

		let events = stream.map(|event| match event {
			Ok(WatchEvent::Added(pod)) | Ok(WatchEvent::Modified(pod)) => Ok(PodEvent::Applied(pod)),
			Ok(WatchEvent::Deleted(pod)) => Ok(PodEvent::Deleted(pod)),
			Ok(WatchEvent::Bookmark(bookmark)) => {
				Ok(PodEvent::Bookmark(bookmark.metadata.resource_version))
			}
			Ok(WatchEvent::Error(resp)) if resp.code == 410 => Ok(PodEvent::Expired),
			Ok(WatchEvent::Error(resp)) => Err(K8sError::Api {
				code: resp.code,
				reason: resp.reason,
				message: resp.message,
			}),
			Err(e) => Err(K8sError::StreamError {
				message: e.to_string(),
			}),
		});
		Ok(Box::pin(events))
	}

	#[instrument(skip(self))]
	async fn attach(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
	) -> Result<AttachedProcess, K8sError> {
		let pods = self.pods(namespace);
		let ap = AttachParams {
			container: Some(container.to_string()),
			stdin: true,
			stdout: true,
			stderr: true,
			tty: false,
			..Default::default()
		};

		let mut attached = self
			.bounded("attach", pods.attach(name, &ap))
			.await?
			.map_err(|e| match e {
				kube::Error::Api(ref resp) if resp.code == 404 => {
					K8sError::PodNotFound { name: name.into() }
				}
				kube::Error::UpgradeConnection(upgrade) => K8sError::AttachError {
					message: upgrade.to_string(),
				},
				other => other.into(),
			})?;

		let stdin = attached.stdin().ok_or_else(|| K8sError::AttachError {
			message: "stdin not available".into(),
		})?;
		let stdout = attached.stdout().ok_or_else(|| K8sError::AttachError {
			message: "stdout not available".into(),
		})?;
		let stderr = attached.stderr();

		debug!(pod = name, container, "attached to container");
		Ok(AttachedProcess {
			stdin: Box::pin(stdin),
			stdout: Box::pin(stdout),
			stderr: stderr.map(|s| Box::pin(s) as BoxedReader),
		})
	}

	#[instrument(skip(self))]
	async fn delete_pod(
		&self,
		name: &str,
		namespace: &str,
		grace_period_seconds: u32,
	) -> Result<(), K8sError> {
		let pods = self.pods(namespace);
		let dp = DeleteParams {
			grace_period_seconds: Some(grace_period_seconds),
			..Default::default()
		};
		self.bounded("delete pod", pods.delete(name, &dp))
			.await?
			.map(|_| ())
			.map_err(|e| not_found_or(e, name))
	}
}
