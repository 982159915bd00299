// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Environment variable helpers.
//!
//! Credentials may be supplied either directly (`VAR`) or as a path to a file
//! holding the value (`VAR_FILE`), the layout used for mounted Kubernetes and
//! Docker secrets. The file form wins when both are set.

use std::path::PathBuf;
use std::{env, fs};

use crate::error::ConfigError;
use crate::secret::SecretString;

pub(crate) fn env_var(name: &str) -> Option<String> {
	env::var(name).ok().filter(|s| !s.is_empty())
}

pub(crate) fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

pub(crate) fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	parse_env(name, "u32")
}

pub(crate) fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	parse_env(name, "u64")
}

pub(crate) fn env_f64(name: &str) -> Result<Option<f64>, ConfigError> {
	parse_env(name, "number")
}

fn parse_env<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

/// Load a secret using the `VAR` / `VAR_FILE` convention.
///
/// A single trailing newline is stripped from file contents.
pub fn load_secret_env(var: &str) -> Result<Option<SecretString>, ConfigError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = env::var(&file_var) {
		if path_str.is_empty() {
			return Err(ConfigError::Secret(format!("secret file path in {file_var} is empty")));
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|e| {
			ConfigError::Secret(format!("failed to read secret file at {}: {e}", path.display()))
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content);
		return Ok(Some(SecretString::new(secret)));
	}

	Ok(env_var(var).map(SecretString::new))
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	// Each test owns distinct variable names; the process environment is shared
	// across the test harness threads.

	#[test]
	fn test_load_secret_env_direct_value() {
		env::set_var("TETHER_TEST_SECRET_DIRECT", "value-1");
		let secret = load_secret_env("TETHER_TEST_SECRET_DIRECT").unwrap().unwrap();
		assert_eq!(secret.expose(), "value-1");
		env::remove_var("TETHER_TEST_SECRET_DIRECT");
	}

	#[test]
	fn test_load_secret_env_file_wins_and_strips_newline() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "from-file").unwrap();

		env::set_var("TETHER_TEST_SECRET_BOTH", "from-env");
		env::set_var("TETHER_TEST_SECRET_BOTH_FILE", file.path());
		let secret = load_secret_env("TETHER_TEST_SECRET_BOTH").unwrap().unwrap();
		assert_eq!(secret.expose(), "from-file");
		env::remove_var("TETHER_TEST_SECRET_BOTH");
		env::remove_var("TETHER_TEST_SECRET_BOTH_FILE");
	}

	#[test]
	fn test_load_secret_env_missing_file_is_error() {
		env::set_var("TETHER_TEST_SECRET_MISSING_FILE", "/nonexistent/tether/secret");
		let result = load_secret_env("TETHER_TEST_SECRET_MISSING");
		assert!(matches!(result, Err(ConfigError::Secret(_))));
		env::remove_var("TETHER_TEST_SECRET_MISSING_FILE");
	}

	#[test]
	fn test_load_secret_env_unset() {
		assert!(load_secret_env("TETHER_TEST_SECRET_UNSET").unwrap().is_none());
	}

	#[test]
	fn test_env_u32_rejects_garbage() {
		env::set_var("TETHER_TEST_BAD_U32", "ten");
		let result = env_u32("TETHER_TEST_BAD_U32");
		assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
		env::remove_var("TETHER_TEST_BAD_U32");
	}
}
