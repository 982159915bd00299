// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::error::Error as StdError;

use thiserror::Error;

/// Result type alias for K8s operations.
pub type K8sResult<T> = Result<T, K8sError>;

/// What went wrong below the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
	/// Name resolution failed.
	Dns,
	/// The endpoint actively refused the connection.
	Refused,
	/// Handshake or certificate verification failed.
	Tls,
	Other,
}

impl TransportFault {
	/// DNS failures and refused connections are the only faults worth retrying
	/// during connection setup.
	pub fn is_transient(self) -> bool {
		matches!(self, TransportFault::Dns | TransportFault::Refused)
	}
}

/// Errors that can occur during K8s operations.
#[derive(Error, Debug)]
pub enum K8sError {
	#[error("K8s API error {code} ({reason}): {message}")]
	Api {
		code: u16,
		reason: String,
		message: String,
	},

	#[error("Pod not found: {name}")]
	PodNotFound { name: String },

	#[error("{operation} timed out")]
	Timeout { operation: &'static str },

	#[error("Transport error: {message}")]
	Transport {
		fault: TransportFault,
		message: String,
	},

	#[error("Authentication error: {message}")]
	Auth { message: String },

	#[error("Client configuration error: {message}")]
	Config { message: String },

	#[error("Watch stream error: {message}")]
	StreamError { message: String },

	#[error("Attach error: {message}")]
	AttachError { message: String },
}

impl K8sError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, K8sError::PodNotFound { .. })
			|| matches!(self, K8sError::Api { code: 404, .. })
	}

	pub fn code(&self) -> Option<u16> {
		match self {
			K8sError::Api { code, .. } => Some(*code),
			K8sError::PodNotFound { .. } => Some(404),
			_ => None,
		}
	}

	/// Whether the request may never have reached the API server.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			K8sError::Transport { .. } | K8sError::Timeout { .. } | K8sError::StreamError { .. }
		)
	}
}

impl From<kube::Error> for K8sError {
	fn from(err: kube::Error) -> Self {
		match err {
			kube::Error::Api(resp) => K8sError::Api {
				code: resp.code,
				reason: resp.reason,
				message: resp.message,
			},
			kube::Error::Auth(e) => K8sError::Auth {
				message: e.to_string(),
			},
			other => K8sError::Transport {
				fault: classify_transport(&other),
				message: error_chain(&other),
			},
		}
	}
}

/// Classify a transport failure by walking its source chain. The underlying
/// hyper, rustls and resolver errors are not exposed as stable types, so the
/// I/O error kind is used where present and the rendered messages otherwise.
pub fn classify_transport(err: &(dyn StdError + 'static)) -> TransportFault {
	let mut current: Option<&(dyn StdError + 'static)> = Some(err);
	let mut fault = TransportFault::Other;

	while let Some(e) = current {
		if let Some(io) = e.downcast_ref::<std::io::Error>() {
			if io.kind() == std::io::ErrorKind::ConnectionRefused {
				return TransportFault::Refused;
			}
		}

		let text = e.to_string().to_ascii_lowercase();
		if text.contains("certificate")
			|| text.contains("tls")
			|| text.contains("handshake")
			|| text.contains("unknownissuer")
		{
			fault = TransportFault::Tls;
		} else if fault == TransportFault::Other
			&& (text.contains("dns error")
				|| text.contains("failed to lookup address")
				|| text.contains("name or service not known")
				|| text.contains("no such host"))
		{
			fault = TransportFault::Dns;
		} else if fault == TransportFault::Other && text.contains("connection refused") {
			fault = TransportFault::Refused;
		}

		current = e.source();
	}

	fault
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
	let mut message = err.to_string();
	let mut current = err.source();
	while let Some(e) = current {
		let text = e.to_string();
		if !message.contains(&text) {
			message.push_str(": ");
			message.push_str(&text);
		}
		current = e.source();
	}
	message
}

#[cfg(test)]
mod tests {
	use std::fmt;

	use super::*;

	#[derive(Debug)]
	struct Wrapped {
		message: &'static str,
		source: Option<Box<dyn StdError + 'static>>,
	}

	impl fmt::Display for Wrapped {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str(self.message)
		}
	}

	impl StdError for Wrapped {
		fn source(&self) -> Option<&(dyn StdError + 'static)> {
			self.source.as_deref()
		}
	}

	fn wrap(message: &'static str, source: impl StdError + 'static) -> Wrapped {
		Wrapped {
			message,
			source: Some(Box::new(source)),
		}
	}

	#[test]
	fn test_refused_io_error_is_transient() {
		let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
		let err = wrap("client error (Connect)", io);
		let fault = classify_transport(&err);
		assert_eq!(fault, TransportFault::Refused);
		assert!(fault.is_transient());
	}

	#[test]
	fn test_dns_failure_is_transient() {
		let inner = Wrapped {
			message: "failed to lookup address information: Name or service not known",
			source: None,
		};
		let err = wrap("dns error", inner);
		assert_eq!(classify_transport(&err), TransportFault::Dns);
	}

	#[test]
	fn test_certificate_failure_is_tls_and_fatal() {
		let inner = Wrapped {
			message: "invalid peer certificate: UnknownIssuer",
			source: None,
		};
		let err = wrap("client error (Connect)", inner);
		let fault = classify_transport(&err);
		assert_eq!(fault, TransportFault::Tls);
		assert!(!fault.is_transient());
	}

	#[test]
	fn test_unrecognised_failure_is_other() {
		let err = Wrapped {
			message: "connection reset",
			source: None,
		};
		assert_eq!(classify_transport(&err), TransportFault::Other);
	}

	#[test]
	fn test_not_found_detection() {
		assert!(K8sError::PodNotFound { name: "p".into() }.is_not_found());
		let api = K8sError::Api {
			code: 404,
			reason: "NotFound".into(),
			message: "gone".into(),
		};
		assert!(api.is_not_found());
		assert_eq!(api.code(), Some(404));
		assert!(!K8sError::Timeout { operation: "get" }.is_not_found());
	}
}
