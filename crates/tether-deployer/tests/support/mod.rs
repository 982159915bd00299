// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory cluster for session tests. Pods are stored in a map, watchers get
//! every change to their Pod, and attach hands the container side of the
//! standard streams to the test.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc;
use k8s_openapi::api::core::v1::{
	ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
	PodStatus,
};
use tether_config::{load_config_from_str, Config, FileFormat};
use tether_k8s::{
	AttachedProcess, ClientHandle, ConnectionManager, ContainerStatus, K8sClient, K8sError, Pod,
	PodEvent, PodEventStream, TransportFault,
};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const SESSION: &str = r#"
[connection]
host = "cluster.local"
qps = 5
burst = 10

[[podTemplate.spec.containers]]
name = "main"
image = "busybox"
command = ["/bin/echo", "ok"]
"#;

pub fn config() -> Config {
	load_config_from_str(SESSION, FileFormat::Toml).unwrap()
}

pub fn config_with(extra: &str) -> Config {
	load_config_from_str(&format!("{SESSION}\n{extra}"), FileFormat::Toml).unwrap()
}

/// Container side of an attach session.
pub struct ContainerIo {
	/// What the session writes to the workload's standard input.
	pub stdin: DuplexStream,
	pub stdout: DuplexStream,
	pub stderr: DuplexStream,
}

#[derive(Default)]
pub struct State {
	pods: BTreeMap<String, Pod>,
	resource_version: u64,
	generated: u32,
	watchers: Vec<(String, mpsc::UnboundedSender<Result<PodEvent, K8sError>>)>,
	io: VecDeque<ContainerIo>,
	create_errors: VecDeque<K8sError>,
	watch_errors: u32,
	delete_errors: VecDeque<K8sError>,
	block_attach: bool,
	block_delete: bool,
	cancel_on_create: Option<CancellationToken>,
	pub creates: u32,
	pub deletes: u32,
	pub attaches: u32,
	pub gets: u32,
	pub watches: u32,
	pub watch_resource_versions: Vec<String>,
}

impl State {
	fn next_resource_version(&mut self) -> String {
		self.resource_version += 1;
		self.resource_version.to_string()
	}

	fn broadcast(&mut self, name: &str, event: PodEvent) {
		self.watchers.retain(|(pod, tx)| {
			if pod != name {
				return !tx.is_closed();
			}
			tx.unbounded_send(Ok(event.clone())).is_ok()
		});
	}
}

pub struct FakeCluster {
	state: Mutex<State>,
	changes: watch::Sender<u64>,
}

impl FakeCluster {
	pub fn new() -> Arc<Self> {
		let (changes, _) = watch::channel(0);
		Arc::new(Self {
			state: Mutex::new(State::default()),
			changes,
		})
	}

	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap()
	}

	fn changed(&self) {
		self.changes.send_modify(|v| *v += 1);
	}

	/// Wait until `f` returns a value for the current state.
	pub async fn wait_until<T>(&self, mut f: impl FnMut(&mut State) -> Option<T>) -> T {
		let mut rx = self.changes.subscribe();
		loop {
			let found = {
				let mut state = self.lock();
				f(&mut state)
			};
			if let Some(value) = found {
				return value;
			}
			rx.changed().await.unwrap();
		}
	}

	/// Name of the first Pod to be created.
	pub async fn wait_for_pod(&self) -> String {
		self.wait_until(|s| s.pods.keys().next().cloned()).await
	}

	/// Container side of the next attach.
	pub async fn take_io(&self) -> ContainerIo {
		self.wait_until(|s| s.io.pop_front()).await
	}

	pub async fn wait_for_attach_calls(&self, n: u32) {
		self.wait_until(|s| (s.attaches >= n).then_some(())).await
	}

	pub async fn wait_for_watches(&self, n: u32) {
		self.wait_until(|s| (s.watches >= n).then_some(())).await
	}

	pub async fn wait_for_deletes(&self, n: u32) {
		self.wait_until(|s| (s.deletes >= n).then_some(())).await
	}

	pub fn creates(&self) -> u32 {
		self.lock().creates
	}

	pub fn deletes(&self) -> u32 {
		self.lock().deletes
	}

	pub fn attaches(&self) -> u32 {
		self.lock().attaches
	}

	pub fn watches(&self) -> u32 {
		self.lock().watches
	}

	pub fn pod_count(&self) -> usize {
		self.lock().pods.len()
	}

	pub fn pod(&self, name: &str) -> Option<Pod> {
		self.lock().pods.get(name).cloned()
	}

	pub fn watch_resource_versions(&self) -> Vec<String> {
		self.lock().watch_resource_versions.clone()
	}

	pub fn push_create_error(&self, err: K8sError) {
		self.lock().create_errors.push_back(err);
	}

	pub fn fail_watches(&self, n: u32) {
		self.lock().watch_errors = n;
	}

	pub fn block_attach(&self) {
		self.lock().block_attach = true;
	}

	/// The next delete call fails with `err` and leaves the Pod in place.
	pub fn push_delete_error(&self, err: K8sError) {
		self.lock().delete_errors.push_back(err);
	}

	/// Delete calls are recorded but never answered.
	pub fn block_delete(&self) {
		self.lock().block_delete = true;
	}

	pub fn cancel_on_create(&self, token: CancellationToken) {
		self.lock().cancel_on_create = Some(token);
	}

	/// End every open watch stream gracefully.
	pub fn disconnect_watchers(&self) {
		self.lock().watchers.clear();
	}

	/// Replace the Pod's status and notify its watchers.
	pub fn set_status(&self, name: &str, phase: &str, statuses: Vec<ContainerStatus>) {
		{
			let mut state = self.lock();
			let rv = state.next_resource_version();
			let Some(pod) = state.pods.get_mut(name) else {
				return;
			};
			pod.metadata.resource_version = Some(rv);
			pod.status = Some(PodStatus {
				phase: Some(phase.to_string()),
				container_statuses: Some(statuses),
				..Default::default()
			});
			let pod = pod.clone();
			state.broadcast(name, PodEvent::Applied(pod));
		}
		self.changed();
	}

	pub fn run_main(&self, name: &str) {
		self.set_status(name, "Running", vec![running("main")]);
	}

	pub fn exit_main(&self, name: &str, exit_code: i32) {
		let phase = if exit_code == 0 { "Succeeded" } else { "Failed" };
		self.set_status(name, phase, vec![terminated("main", exit_code)]);
	}

	/// Remove the Pod as if someone else deleted it.
	pub fn remove_pod(&self, name: &str) {
		{
			let mut state = self.lock();
			if let Some(pod) = state.pods.remove(name) {
				state.broadcast(name, PodEvent::Deleted(pod));
			}
		}
		self.changed();
	}

	pub async fn handle(self: &Arc<Self>, config: &Config) -> ClientHandle {
		ConnectionManager::new(config.connection.clone(), config.timeouts)
			.connect_with(self.clone())
			.await
			.unwrap()
	}
}

fn api_error(code: u16, reason: &str, message: String) -> K8sError {
	K8sError::Api {
		code,
		reason: reason.to_string(),
		message,
	}
}

pub fn conflict() -> K8sError {
	api_error(409, "AlreadyExists", "pods already exists".to_string())
}

pub fn server_error() -> K8sError {
	api_error(500, "InternalError", "etcdserver: request timed out".to_string())
}

#[async_trait]
impl K8sClient for FakeCluster {
	async fn server_version(&self) -> Result<String, K8sError> {
		Ok("v1.32.0".to_string())
	}

	async fn create_pod(&self, namespace: &str, mut pod: Pod) -> Result<Pod, K8sError> {
		let result = {
			let mut state = self.lock();
			state.creates += 1;
			if let Some(token) = state.cancel_on_create.take() {
				token.cancel();
			}
			if let Some(err) = state.create_errors.pop_front() {
				Err(err)
			} else {
				let name = match (&pod.metadata.name, &pod.metadata.generate_name) {
					(Some(name), _) => name.clone(),
					(None, Some(prefix)) => {
						state.generated += 1;
						format!("{prefix}{:05}", state.generated)
					}
					(None, None) => {
						return Err(api_error(422, "Invalid", "name or generateName is required".into()))
					}
				};
				if state.pods.contains_key(&name) {
					Err(conflict())
				} else {
					pod.metadata.name = Some(name.clone());
					pod.metadata.namespace = Some(namespace.to_string());
					pod.metadata.resource_version = Some(state.next_resource_version());
					pod.status = Some(PodStatus {
						phase: Some("Pending".to_string()),
						..Default::default()
					});
					state.pods.insert(name, pod.clone());
					Ok(pod)
				}
			}
		};
		self.changed();
		result
	}

	async fn get_pod(&self, name: &str, _namespace: &str) -> Result<Pod, K8sError> {
		let mut state = self.lock();
		state.gets += 1;
		state
			.pods
			.get(name)
			.cloned()
			.ok_or_else(|| K8sError::PodNotFound {
				name: name.to_string(),
			})
	}

	async fn watch_pod(
		&self,
		name: &str,
		_namespace: &str,
		resource_version: &str,
	) -> Result<PodEventStream, K8sError> {
		let result = {
			let mut state = self.lock();
			state.watches += 1;
			state.watch_resource_versions.push(resource_version.to_string());
			if state.watch_errors > 0 {
				state.watch_errors -= 1;
				Err(K8sError::Transport {
					fault: TransportFault::Refused,
					message: "connection refused".to_string(),
				})
			} else {
				let (tx, rx) = mpsc::unbounded();
				let since: u64 = resource_version.parse().unwrap_or(0);
				if let Some(pod) = state.pods.get(name) {
					let current: u64 = pod
						.metadata
						.resource_version
						.as_deref()
						.and_then(|rv| rv.parse().ok())
						.unwrap_or(0);
					if current > since {
						tx.unbounded_send(Ok(PodEvent::Applied(pod.clone()))).unwrap();
					}
				}
				state.watchers.push((name.to_string(), tx));
				Ok(Box::pin(rx) as PodEventStream)
			}
		};
		self.changed();
		result
	}

	async fn attach(
		&self,
		name: &str,
		_namespace: &str,
		_container: &str,
	) -> Result<AttachedProcess, K8sError> {
		let blocked = {
			let mut state = self.lock();
			state.attaches += 1;
			state.block_attach
		};
		self.changed();
		if blocked {
			std::future::pending::<()>().await;
		}

		let mut state = self.lock();
		if !state.pods.contains_key(name) {
			return Err(K8sError::PodNotFound {
				name: name.to_string(),
			});
		}
		let (client_stdin, container_stdin) = duplex(1024);
		let (client_stdout, container_stdout) = duplex(1024);
		let (client_stderr, container_stderr) = duplex(1024);
		state.io.push_back(ContainerIo {
			stdin: container_stdin,
			stdout: container_stdout,
			stderr: container_stderr,
		});
		drop(state);
		self.changed();
		Ok(AttachedProcess {
			stdin: Box::pin(client_stdin),
			stdout: Box::pin(client_stdout),
			stderr: Some(Box::pin(client_stderr)),
		})
	}

	async fn delete_pod(
		&self,
		name: &str,
		_namespace: &str,
		_grace_period_seconds: u32,
	) -> Result<(), K8sError> {
		let blocked = {
			let mut state = self.lock();
			state.deletes += 1;
			state.block_delete
		};
		if blocked {
			self.changed();
			std::future::pending::<()>().await;
		}

		let result = {
			let mut state = self.lock();
			if let Some(err) = state.delete_errors.pop_front() {
				drop(state);
				self.changed();
				return Err(err);
			}
			match state.pods.remove(name) {
				Some(pod) => {
					state.broadcast(name, PodEvent::Deleted(pod));
					Ok(())
				}
				None => Err(K8sError::PodNotFound {
					name: name.to_string(),
				}),
			}
		};
		self.changed();
		result
	}
}

pub fn running(name: &str) -> ContainerStatus {
	ContainerStatus {
		name: name.to_string(),
		state: Some(ContainerState {
			running: Some(ContainerStateRunning::default()),
			..Default::default()
		}),
		..Default::default()
	}
}

pub fn waiting(name: &str, reason: &str) -> ContainerStatus {
	ContainerStatus {
		name: name.to_string(),
		state: Some(ContainerState {
			waiting: Some(ContainerStateWaiting {
				reason: Some(reason.to_string()),
				message: None,
			}),
			..Default::default()
		}),
		..Default::default()
	}
}

pub fn terminated(name: &str, exit_code: i32) -> ContainerStatus {
	ContainerStatus {
		name: name.to_string(),
		state: Some(ContainerState {
			terminated: Some(ContainerStateTerminated {
				exit_code,
				..Default::default()
			}),
			..Default::default()
		}),
		..Default::default()
	}
}
