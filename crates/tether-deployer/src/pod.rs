// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Construction of the Pod object submitted for a session.

use tether_config::{PodName, PodTemplate};
use tether_k8s::{Container, ObjectMeta, Pod, PodSpec};

use crate::types::{SessionId, Workload};

pub const MANAGED_LABEL: &str = "tether.dev/managed";
pub const SESSION_ID_LABEL: &str = "tether.dev/session-id";
const RESTART_POLICY: &str = "Never";

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
	if items.is_empty() {
		None
	} else {
		Some(items)
	}
}

fn main_container(container: &Container, workload: &Workload) -> Container {
	let mut container = container.clone();
	if let Some(image) = &workload.image {
		container.image = Some(image.clone());
	}
	if let Some(command) = &workload.command {
		container.command = Some(command.clone());
	}
	if let Some(args) = &workload.args {
		container.args = Some(args.clone());
	}
	container.stdin = Some(true);
	container.stdin_once = Some(true);
	container.tty = Some(false);
	container
}

/// Build the Pod for one session. Returns the Pod and the name of the
/// container to attach to, or `None` when the template has no container.
pub(crate) fn build_pod(
	template: &PodTemplate,
	workload: &Workload,
	session: &SessionId,
) -> Option<(Pod, String)> {
	let spec = &template.spec;
	let main = spec.main_container()?;
	let main_name = main.name.clone();

	let mut labels = template.metadata.labels.clone();
	labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
	labels.insert(SESSION_ID_LABEL.to_string(), session.to_string());

	let (name, generate_name) = match &template.metadata.name {
		PodName::Fixed(name) => (Some(name.clone()), None),
		PodName::Generated(prefix) => (None, Some(prefix.clone())),
	};

	let mut containers: Vec<Container> = spec
		.containers
		.iter()
		.map(|c| {
			if spec.plugin_container.is_none() && c.name == main_name {
				main_container(c, workload)
			} else {
				c.clone()
			}
		})
		.collect();
	if let Some(plugin) = &spec.plugin_container {
		containers.push(main_container(plugin, workload));
	}

	let pod = Pod {
		metadata: ObjectMeta {
			name,
			generate_name,
			namespace: Some(template.metadata.namespace.clone()),
			labels: Some(labels),
			annotations: if template.metadata.annotations.is_empty() {
				None
			} else {
				Some(template.metadata.annotations.clone())
			},
			..Default::default()
		},
		spec: Some(PodSpec {
			containers,
			init_containers: non_empty(spec.init_containers.clone()),
			volumes: non_empty(spec.volumes.clone()),
			node_selector: if spec.node_selector.is_empty() {
				None
			} else {
				Some(spec.node_selector.clone())
			},
			affinity: spec.affinity.clone(),
			security_context: spec.security_context.clone(),
			image_pull_secrets: non_empty(spec.image_pull_secrets.clone()),
			restart_policy: Some(RESTART_POLICY.to_string()),
			..Default::default()
		}),
		status: None,
	};

	Some((pod, main_name))
}
