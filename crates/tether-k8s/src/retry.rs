// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Bounded retry with exponential backoff.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

/// Delay before retry number `attempt` (zero-based). With jitter enabled the
/// capped delay is scaled by a random factor in `[0.5, 1.5)`.
pub fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
	let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
	let exponential_delay = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(exponent);
	let capped_delay = exponential_delay.min(cfg.max_delay.as_secs_f64());

	let final_delay = if cfg.jitter {
		capped_delay * (0.5 + fastrand::f64())
	} else {
		capped_delay
	};

	Duration::from_secs_f64(final_delay)
}

/// Run `f` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is used up. The last error is returned.
pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, operation: &str, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Display,
{
	let mut attempt = 0;

	loop {
		let err = match f().await {
			Ok(result) => return Ok(result),
			Err(err) => err,
		};
		attempt += 1;

		if !err.is_retryable() {
			return Err(err);
		}

		if attempt >= cfg.max_attempts {
			warn!(
				operation,
				error = %err,
				attempt,
				max_attempts = cfg.max_attempts,
				"retry attempts exhausted"
			);
			return Err(err);
		}

		let delay = backoff_delay(cfg, attempt - 1);
		warn!(
			operation,
			error = %err,
			attempt,
			max_attempts = cfg.max_attempts,
			delay_ms = delay.as_millis() as u64,
			"retrying after transient error"
		);

		tokio::time::sleep(delay).await;
	}
}
