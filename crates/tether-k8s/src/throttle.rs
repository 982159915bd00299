// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Token-bucket limiter shared by every control-plane call of a session.
//!
//! Callers never get turned away. Each `acquire` reserves the next token,
//! letting the bucket go into debt, and sleeps until that token would have
//! been refilled. Reservations are handed out under the lock in arrival order,
//! so concurrent callers are spaced `1 / qps` apart once the burst is spent.

use std::time::Duration;

use tether_config::MIN_QPS;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Saturation point for a single reservation's wait.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
pub struct Throttle {
	bucket: Mutex<Bucket>,
	qps: f64,
	burst: u32,
}

#[derive(Debug, Clone)]
struct Bucket {
	/// May go negative: outstanding reservations not yet covered by refill.
	tokens: f64,
	last_refill: Instant,
}

impl Bucket {
	fn full(burst: u32, now: Instant) -> Self {
		Self {
			tokens: f64::from(burst),
			last_refill: now,
		}
	}

	/// Take one token at `now` and return how long the caller must wait for it.
	fn reserve(&mut self, now: Instant, qps: f64, burst: u32) -> Duration {
		let elapsed = now.saturating_duration_since(self.last_refill);
		self.tokens = (self.tokens + elapsed.as_secs_f64() * qps).min(f64::from(burst));
		self.last_refill = now;

		self.tokens -= 1.0;
		if self.tokens >= 0.0 {
			Duration::ZERO
		} else {
			Duration::try_from_secs_f64(-self.tokens / qps)
				.map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
		}
	}
}

/// Proof that a call slot was granted.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct ThrottlePermit {
	pub waited: Duration,
}

impl Throttle {
	/// `qps` is the refill rate in tokens per second, `burst` the bucket
	/// capacity. Both come from validated configuration (`qps >= MIN_QPS`,
	/// `burst >= 1`); out-of-range values are clamped rather than rejected.
	pub fn new(qps: f64, burst: u32) -> Self {
		let qps = if qps.is_finite() { qps.max(MIN_QPS) } else { MIN_QPS };
		let burst = burst.max(1);
		Self {
			bucket: Mutex::new(Bucket::full(burst, Instant::now())),
			qps,
			burst,
		}
	}

	pub fn qps(&self) -> f64 {
		self.qps
	}

	pub fn burst(&self) -> u32 {
		self.burst
	}

	/// Wait until a call may be issued.
	pub async fn acquire(&self) -> ThrottlePermit {
		let wait = {
			let mut bucket = self.bucket.lock().await;
			bucket.reserve(Instant::now(), self.qps, self.burst)
		};

		if !wait.is_zero() {
			trace!(wait_ms = wait.as_millis() as u64, "throttling control-plane call");
			tokio::time::sleep(wait).await;
		}

		ThrottlePermit { waited: wait }
	}
}
