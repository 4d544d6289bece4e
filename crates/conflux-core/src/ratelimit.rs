// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-channel token-bucket rate limiting for outbound provider calls.
//!
//! Each adapter owns one [`RateLimiter`] configured with its platform's
//! limits; buckets are created lazily per channel id, so channels never
//! contend on each other's quota.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter with one bucket per key (channel id).
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
}

impl RateLimiter {
    /// `capacity` is the burst size, `refill_per_sec` the sustained rate.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity.max(1)),
            refill_per_sec: refill_per_sec.max(0.001),
            buckets: DashMap::new(),
        }
    }

    /// Waits until one token is available for `key`, then consumes it.
    pub async fn acquire(&self, key: &str) {
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: self.capacity,
                    last_refill: Instant::now(),
                }))
            })
            .clone();

        loop {
            let wait = {
                let mut b = bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(b.last_refill).as_secs_f64();
                b.tokens = (b.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                b.last_refill = now;

                if b.tokens >= 1.0 {
                    b.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - b.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
