// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Builds a `kube::Config` from the session's connection settings.
//!
//! The settings are rendered as a single-context kubeconfig document and
//! loaded through kube's own kubeconfig path, so certificate data, TLS server
//! name and every credential kind are handled exactly as they would be for a
//! kubeconfig file on disk.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde_json::{json, Map, Value};
use tether_config::{ConnectionConfig, Credentials, Timeouts, TlsVerification};

use crate::error::K8sError;

const CONTEXT: &str = "tether";

/// `https://host` followed by the API path prefix. `path` names the core API
/// root (`/api` by default); anything in front of the trailing `/api` is a
/// prefix the apiserver is mounted under.
pub fn cluster_url(connection: &ConnectionConfig) -> String {
	let path = connection.path.trim_end_matches('/');
	let prefix = path.strip_suffix("/api").unwrap_or(path);
	format!("https://{}{}", connection.host, prefix)
}

pub fn kubeconfig_document(connection: &ConnectionConfig) -> Value {
	let mut cluster = Map::new();
	cluster.insert("server".into(), json!(cluster_url(connection)));
	match &connection.tls {
		TlsVerification::SystemRoots => {}
		TlsVerification::CaCertificate(pem) => {
			cluster.insert(
				"certificate-authority-data".into(),
				json!(STANDARD.encode(pem.as_bytes())),
			);
		}
		TlsVerification::Insecure => {
			cluster.insert("insecure-skip-tls-verify".into(), json!(true));
		}
	}
	if let Some(server_name) = &connection.server_name {
		cluster.insert("tls-server-name".into(), json!(server_name));
	}

	let user = match &connection.credentials {
		Credentials::Anonymous => json!({}),
		Credentials::BearerToken(token) => json!({ "token": token.expose() }),
		Credentials::ClientCertificate { cert, key } => json!({
			"client-certificate-data": STANDARD.encode(cert.as_bytes()),
			"client-key-data": STANDARD.encode(key.expose().as_bytes()),
		}),
		Credentials::Basic { username, password } => json!({
			"username": username,
			"password": password.expose(),
		}),
	};

	json!({
		"apiVersion": "v1",
		"kind": "Config",
		"clusters": [{ "name": CONTEXT, "cluster": cluster }],
		"users": [{ "name": CONTEXT, "user": user }],
		"contexts": [{ "name": CONTEXT, "context": { "cluster": CONTEXT, "user": CONTEXT } }],
		"current-context": CONTEXT,
	})
}

/// Unary calls are bounded separately by [`crate::KubeClient`]; watch and
/// attach streams are long-lived, so no read timeout is set on the transport.
pub async fn build_kube_config(
	connection: &ConnectionConfig,
	timeouts: &Timeouts,
) -> Result<kube::Config, K8sError> {
	let kubeconfig: Kubeconfig = serde_json::from_value(kubeconfig_document(connection))
		.map_err(|e| K8sError::Config {
			message: format!("invalid connection settings: {e}"),
		})?;

	let mut config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
		.await
		.map_err(|e| K8sError::Config {
			message: e.to_string(),
		})?;

	config.connect_timeout = Some(timeouts.http);
	config.write_timeout = Some(timeouts.http);
	config.read_timeout = None;
	Ok(config)
}
