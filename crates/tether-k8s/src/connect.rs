// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Connection manager: turns connection settings into a probed, throttled
//! client handle.

use std::fmt;
use std::sync::Arc;

use tether_config::{ConnectionConfig, Timeouts};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::K8sClient;
use crate::error::{K8sError, TransportFault};
use crate::kube_client::KubeClient;
use crate::kubeconfig::cluster_url;
use crate::retry::{retry, RetryConfig, RetryableError};
use crate::throttle::Throttle;
use crate::throttled::ThrottledClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
	Auth,
	Tls,
	Unreachable,
}

impl fmt::Display for ConnectionErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ConnectionErrorKind::Auth => "authentication",
			ConnectionErrorKind::Tls => "TLS",
			ConnectionErrorKind::Unreachable => "unreachable",
		})
	}
}

#[derive(Debug, Error)]
#[error("cannot connect to {endpoint} ({kind}): {message}")]
pub struct ConnectionError {
	pub kind: ConnectionErrorKind,
	pub endpoint: String,
	pub message: String,
	transient: bool,
}

impl ConnectionError {
	fn from_k8s(err: K8sError, endpoint: &str) -> Self {
		let (kind, transient) = match &err {
			K8sError::Api { code: 401 | 403, .. } | K8sError::Auth { .. } => {
				(ConnectionErrorKind::Auth, false)
			}
			K8sError::Config { .. } => (ConnectionErrorKind::Auth, false),
			K8sError::Transport {
				fault: TransportFault::Tls,
				..
			} => (ConnectionErrorKind::Tls, false),
			K8sError::Transport { fault, .. } => (ConnectionErrorKind::Unreachable, fault.is_transient()),
			_ => (ConnectionErrorKind::Unreachable, false),
		};
		Self {
			kind,
			endpoint: endpoint.to_string(),
			message: err.to_string(),
			transient,
		}
	}

	/// Whether the failure was a DNS failure or refused connection.
	pub fn is_transient(&self) -> bool {
		self.transient
	}
}

impl RetryableError for ConnectionError {
	fn is_retryable(&self) -> bool {
		self.transient
	}
}

/// Shared, read-mostly client for one session. Every call made through
/// [`ClientHandle::client`] first takes a permit from the session throttle.
#[derive(Clone)]
pub struct ClientHandle {
	client: Arc<dyn K8sClient>,
	throttle: Arc<Throttle>,
}

impl ClientHandle {
	pub fn new(raw: Arc<dyn K8sClient>, throttle: Arc<Throttle>) -> Self {
		let client = Arc::new(ThrottledClient::new(raw, throttle.clone()));
		Self { client, throttle }
	}

	pub fn client(&self) -> Arc<dyn K8sClient> {
		self.client.clone()
	}

	pub fn throttle(&self) -> &Arc<Throttle> {
		&self.throttle
	}
}

impl fmt::Debug for ClientHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClientHandle")
			.field("qps", &self.throttle.qps())
			.field("burst", &self.throttle.burst())
			.finish_non_exhaustive()
	}
}

pub struct ConnectionManager {
	connection: ConnectionConfig,
	timeouts: Timeouts,
	retry: RetryConfig,
}

impl ConnectionManager {
	pub fn new(connection: ConnectionConfig, timeouts: Timeouts) -> Self {
		Self {
			connection,
			timeouts,
			retry: RetryConfig::default(),
		}
	}

	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	pub fn endpoint(&self) -> String {
		cluster_url(&self.connection)
	}

	/// Build the kube client and verify the endpoint and credentials.
	pub async fn connect(&self) -> Result<ClientHandle, ConnectionError> {
		let endpoint = self.endpoint();
		let raw = KubeClient::from_connection(&self.connection, &self.timeouts)
			.await
			.map_err(|e| ConnectionError::from_k8s(e, &endpoint))?;
		self.connect_with(Arc::new(raw)).await
	}

	/// Wrap `raw` in the session throttle and probe it. DNS failures and
	/// refused connections are retried with backoff up to the retry budget;
	/// authentication and certificate failures are returned at once.
	pub async fn connect_with(
		&self,
		raw: Arc<dyn K8sClient>,
	) -> Result<ClientHandle, ConnectionError> {
		let endpoint = self.endpoint();
		let throttle = Arc::new(Throttle::new(self.connection.qps, self.connection.burst));
		let handle = ClientHandle::new(raw, throttle);

		debug!(%endpoint, auth = self.connection.credentials.kind(), "probing cluster");
		let version = retry(&self.retry, "connect", || {
			let client = handle.client();
			let endpoint = endpoint.clone();
			async move {
				client
					.server_version()
					.await
					.map_err(|e| ConnectionError::from_k8s(e, &endpoint))
			}
		})
		.await?;

		info!(%endpoint, server_version = %version, "connected to cluster");
		Ok(handle)
	}
}
