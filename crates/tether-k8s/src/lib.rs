// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Kubernetes access for tether sessions.
//!
//! This crate provides:
//! - A trait-based client abstraction ([`K8sClient`]) for testability
//! - A production implementation using the kube crate, with per-call timeouts
//! - A token-bucket [`Throttle`] shared by every call a session makes
//! - The [`ConnectionManager`], which probes the endpoint with bounded retry
//!   and hands out a throttled [`ClientHandle`]

mod client;
mod connect;
mod error;
mod kube_client;
mod kubeconfig;
pub mod retry;
mod throttle;
mod throttled;
mod types;

pub use client::K8sClient;
pub use connect::{ClientHandle, ConnectionError, ConnectionErrorKind, ConnectionManager};
pub use error::{classify_transport, K8sError, K8sResult, TransportFault};
pub use kube_client::KubeClient;
pub use kubeconfig::{build_kube_config, cluster_url};
pub use retry::{backoff_delay, RetryConfig, RetryableError};
pub use throttle::{Throttle, ThrottlePermit};
pub use throttled::ThrottledClient;
pub use types::{
	AttachedProcess, BoxedReader, BoxedWriter, Container, ContainerState, ContainerStatus,
	ObjectMeta, Pod, PodEvent, PodEventStream, PodSpec, PodStatus,
};
