// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pod template section.
//!
//! Containers, volumes, affinity and security contexts are taken verbatim as
//! Kubernetes API objects. Validation here enforces the cross-field rules the
//! API objects cannot express on their own: one name strategy, one source per
//! volume, one reference per `envFrom` entry, unique container names.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::{
	Affinity, Container, LocalObjectReference, PodSecurityContext, Volume,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_GENERATE_NAME: &str = "tether-plugin-";
pub const DEFAULT_PLUGIN_CONTAINER_NAME: &str = "tether-plugin";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadataLayer {
	pub name: Option<String>,
	pub generate_name: Option<String>,
	pub namespace: Option<String>,
	pub labels: Option<BTreeMap<String, String>>,
	pub annotations: Option<BTreeMap<String, String>>,
}

impl PodMetadataLayer {
	pub fn merge(&mut self, other: Self) {
		// A name strategy from a later layer replaces the earlier one entirely.
		if other.name.is_some() || other.generate_name.is_some() {
			self.name = other.name;
			self.generate_name = other.generate_name;
		}
		if other.namespace.is_some() {
			self.namespace = other.namespace;
		}
		if other.labels.is_some() {
			self.labels = other.labels;
		}
		if other.annotations.is_some() {
			self.annotations = other.annotations;
		}
	}

	pub fn resolve(self) -> Result<PodMetadata, ConfigError> {
		let name = match (self.name, self.generate_name) {
			(Some(_), Some(_)) => {
				return Err(ConfigError::validation(
					"pod.metadata.name and pod.metadata.generateName are mutually exclusive",
				))
			}
			(Some(name), None) => {
				check_dns_label("pod.metadata.name", &name)?;
				PodName::Fixed(name)
			}
			(None, Some(prefix)) => {
				if prefix.is_empty() {
					return Err(ConfigError::validation(
						"pod.metadata.generateName must not be empty",
					));
				}
				PodName::Generated(prefix)
			}
			(None, None) => PodName::Generated(DEFAULT_GENERATE_NAME.to_string()),
		};

		let namespace = self
			.namespace
			.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
		check_dns_label("pod.metadata.namespace", &namespace)?;

		Ok(PodMetadata {
			name,
			namespace,
			labels: self.labels.unwrap_or_default(),
			annotations: self.annotations.unwrap_or_default(),
		})
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecLayer {
	pub volumes: Option<Vec<Volume>>,
	pub init_containers: Option<Vec<Container>>,
	pub containers: Option<Vec<Container>>,
	pub node_selector: Option<BTreeMap<String, String>>,
	pub affinity: Option<Affinity>,
	pub security_context: Option<PodSecurityContext>,
	pub plugin_container: Option<Container>,
	pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
}

impl PodSpecLayer {
	pub fn merge(&mut self, other: Self) {
		macro_rules! take {
			($($field:ident),*) => {
				$(if other.$field.is_some() {
					self.$field = other.$field;
				})*
			};
		}
		take!(
			volumes,
			init_containers,
			containers,
			node_selector,
			affinity,
			security_context,
			plugin_container,
			image_pull_secrets
		);
	}

	pub fn resolve(self) -> Result<PodSpecTemplate, ConfigError> {
		let plugin_container = self.plugin_container.map(|mut c| {
			if c.name.is_empty() {
				c.name = DEFAULT_PLUGIN_CONTAINER_NAME.to_string();
			}
			c
		});

		let spec = PodSpecTemplate {
			volumes: self.volumes.unwrap_or_default(),
			init_containers: self.init_containers.unwrap_or_default(),
			containers: self.containers.unwrap_or_default(),
			node_selector: self.node_selector.unwrap_or_default(),
			affinity: self.affinity,
			security_context: self.security_context,
			plugin_container,
			image_pull_secrets: self.image_pull_secrets.unwrap_or_default(),
		};
		spec.validate()?;
		Ok(spec)
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodConfigLayer {
	pub metadata: Option<PodMetadataLayer>,
	pub spec: Option<PodSpecLayer>,
}

impl PodConfigLayer {
	pub fn merge(&mut self, other: Self) {
		match (self.metadata.as_mut(), other.metadata) {
			(Some(m), Some(o)) => m.merge(o),
			(None, Some(o)) => self.metadata = Some(o),
			_ => {}
		}
		match (self.spec.as_mut(), other.spec) {
			(Some(s), Some(o)) => s.merge(o),
			(None, Some(o)) => self.spec = Some(o),
			_ => {}
		}
	}

	pub fn resolve(self) -> Result<PodTemplate, ConfigError> {
		Ok(PodTemplate {
			metadata: self.metadata.unwrap_or_default().resolve()?,
			spec: self.spec.unwrap_or_default().resolve()?,
		})
	}
}

/// How the Pod gets its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PodName {
	Fixed(String),
	/// Prefix for a server-generated name.
	Generated(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
	pub name: PodName,
	pub namespace: String,
	pub labels: BTreeMap<String, String>,
	pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecTemplate {
	pub volumes: Vec<Volume>,
	pub init_containers: Vec<Container>,
	pub containers: Vec<Container>,
	pub node_selector: BTreeMap<String, String>,
	pub affinity: Option<Affinity>,
	pub security_context: Option<PodSecurityContext>,
	/// Appended to `containers` and attached to when present.
	pub plugin_container: Option<Container>,
	pub image_pull_secrets: Vec<LocalObjectReference>,
}

impl PodSpecTemplate {
	/// The container whose standard streams the session attaches to.
	pub fn main_container(&self) -> Option<&Container> {
		self.plugin_container
			.as_ref()
			.or_else(|| self.containers.first())
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.main_container().is_none() {
			return Err(ConfigError::validation(
				"pod.spec must define at least one container or a pluginContainer",
			));
		}

		let mut seen = HashSet::new();
		let all = self
			.init_containers
			.iter()
			.chain(&self.containers)
			.chain(&self.plugin_container);
		for container in all {
			check_dns_label("container name", &container.name)?;
			if !seen.insert(container.name.as_str()) {
				return Err(ConfigError::validation(format!(
					"duplicate container name '{}'",
					container.name
				)));
			}
			for (i, env_from) in container.env_from.iter().flatten().enumerate() {
				match (&env_from.config_map_ref, &env_from.secret_ref) {
					(Some(_), None) | (None, Some(_)) => {}
					_ => {
						return Err(ConfigError::validation(format!(
							"container '{}' envFrom[{i}] must set exactly one of configMapRef or secretRef",
							container.name
						)))
					}
				}
			}
		}

		let mut volume_names = HashSet::new();
		for volume in &self.volumes {
			check_dns_label("volume name", &volume.name)?;
			if !volume_names.insert(volume.name.as_str()) {
				return Err(ConfigError::validation(format!(
					"duplicate volume name '{}'",
					volume.name
				)));
			}
			let sources = volume_sources(volume)?;
			if sources.len() != 1 {
				return Err(ConfigError::validation(format!(
					"volume '{}' must set exactly one source, found {}",
					volume.name,
					if sources.is_empty() {
						"none".to_string()
					} else {
						sources.join(", ")
					}
				)));
			}
		}

		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
	pub metadata: PodMetadata,
	pub spec: PodSpecTemplate,
}

/// Names of the populated source fields of a volume.
fn volume_sources(volume: &Volume) -> Result<Vec<String>, ConfigError> {
	let value = serde_json::to_value(volume)
		.map_err(|e| ConfigError::validation(format!("volume '{}': {e}", volume.name)))?;
	Ok(value
		.as_object()
		.map(|fields| {
			fields
				.iter()
				.filter(|(k, v)| k.as_str() != "name" && !v.is_null())
				.map(|(k, _)| k.clone())
				.collect()
		})
		.unwrap_or_default())
}

/// RFC 1123 label: lower-case alphanumerics and '-', at most 63 characters.
fn check_dns_label(key: &str, value: &str) -> Result<(), ConfigError> {
	let valid = !value.is_empty()
		&& value.len() <= 63
		&& value
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
		&& !value.starts_with('-')
		&& !value.ends_with('-');
	if valid {
		Ok(())
	} else {
		Err(ConfigError::InvalidValue {
			key: key.to_string(),
			message: format!("'{value}' is not a valid DNS label"),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn spec_from_toml(toml_str: &str) -> Result<PodSpecTemplate, ConfigError> {
		let layer: PodSpecLayer = toml::from_str(toml_str).unwrap();
		layer.resolve()
	}

	#[test]
	fn test_metadata_defaults_to_generated_name() {
		let metadata = PodMetadataLayer::default().resolve().unwrap();
		assert_eq!(metadata.name, PodName::Generated("tether-plugin-".to_string()));
		assert_eq!(metadata.namespace, "default");
	}

	#[test]
	fn test_name_and_generate_name_are_exclusive() {
		let layer = PodMetadataLayer {
			name: Some("a".to_string()),
			generate_name: Some("b-".to_string()),
			..Default::default()
		};
		assert!(matches!(layer.resolve(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_merge_replaces_name_strategy() {
		let mut base = PodMetadataLayer {
			generate_name: Some("x-".to_string()),
			..Default::default()
		};
		base.merge(PodMetadataLayer {
			name: Some("fixed".to_string()),
			..Default::default()
		});
		assert_eq!(base.resolve().unwrap().name, PodName::Fixed("fixed".to_string()));
	}

	#[test]
	fn test_invalid_namespace_rejected() {
		let layer = PodMetadataLayer {
			namespace: Some("Not_Valid".to_string()),
			..Default::default()
		};
		assert!(layer.resolve().is_err());
	}

	#[test]
	fn test_requires_a_container() {
		assert!(spec_from_toml("").is_err());
	}

	#[test]
	fn test_main_container_prefers_plugin_container() {
		let spec = spec_from_toml(
			r#"
[[containers]]
name = "sidecar"
image = "busybox"

[pluginContainer]
name = ""
image = "plugin:latest"
"#,
		)
		.unwrap();
		assert_eq!(spec.main_container().unwrap().name, "tether-plugin");
	}

	#[test]
	fn test_main_container_defaults_to_first_container() {
		let spec = spec_from_toml(
			r#"
[[containers]]
name = "main"
command = ["/bin/echo", "ok"]
"#,
		)
		.unwrap();
		assert_eq!(spec.main_container().unwrap().name, "main");
	}

	#[test]
	fn test_duplicate_container_names_rejected() {
		let result = spec_from_toml(
			r#"
[[initContainers]]
name = "main"

[[containers]]
name = "main"
"#,
		);
		assert!(result.is_err());
	}

	#[test]
	fn test_volume_exactly_one_source() {
		let ok = spec_from_toml(
			r#"
[[containers]]
name = "main"

[[volumes]]
name = "scratch"
emptyDir = {}
"#,
		);
		assert!(ok.is_ok(), "{ok:?}");

		let none = spec_from_toml(
			r#"
[[containers]]
name = "main"

[[volumes]]
name = "scratch"
"#,
		);
		assert!(none.is_err());

		let two = spec_from_toml(
			r#"
[[containers]]
name = "main"

[[volumes]]
name = "scratch"
emptyDir = {}
hostPath = { path = "/tmp" }
"#,
		);
		let message = two.unwrap_err().to_string();
		assert!(message.contains("emptyDir"), "{message}");
		assert!(message.contains("hostPath"), "{message}");
	}

	#[test]
	fn test_env_from_exactly_one_reference() {
		let result = spec_from_toml(
			r#"
[[containers]]
name = "main"

[[containers.envFrom]]
configMapRef = { name = "a" }
secretRef = { name = "b" }
"#,
		);
		assert!(result.is_err());

		let result = spec_from_toml(
			r#"
[[containers]]
name = "main"

[[containers.envFrom]]
secretRef = { name = "b" }
"#,
		);
		assert!(result.is_ok());
	}

	#[test]
	fn test_verbatim_affinity_and_security_context() {
		let spec = spec_from_toml(
			r#"
[[containers]]
name = "main"

[securityContext]
runAsNonRoot = true
runAsUser = 1000

[nodeSelector]
"kubernetes.io/os" = "linux"

[[imagePullSecrets]]
name = "registry"
"#,
		)
		.unwrap();
		assert_eq!(spec.security_context.unwrap().run_as_user, Some(1000));
		assert_eq!(spec.node_selector["kubernetes.io/os"], "linux");
		assert_eq!(spec.image_pull_secrets[0].name, "registry");
	}
}
