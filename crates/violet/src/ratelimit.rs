use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const SWEEP_THRESHOLD: usize = 8192;

/// Fixed-window request limiter keyed by client IP. Each key gets `tokens`
/// requests per `window`; the bucket refills completely when its window
/// elapses.
pub struct RateLimiter {
	tokens: u64,
	window: Duration,
	buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

struct Bucket {
	used: u64,
	window_start: Instant,
}

impl RateLimiter {
	pub fn new(tokens: u64, window: Duration) -> RateLimiter {
		RateLimiter {
			tokens,
			window,
			buckets: Mutex::new(HashMap::new()),
		}
	}

	/// Per-minute limiter, the shape the HTTPS frontend uses.
	pub fn per_minute(tokens: u64) -> RateLimiter {
		RateLimiter::new(tokens, Duration::from_secs(60))
	}

	/// Take one token for `ip`. Returns false when the window budget is
	/// spent.
	pub fn try_acquire(&self, ip: IpAddr) -> bool {
		let now = Instant::now();
		let mut buckets = self.buckets.lock();
		if buckets.len() > SWEEP_THRESHOLD {
			let window = self.window;
			buckets.retain(|_, b| now.duration_since(b.window_start) < window);
		}
		let bucket = buckets.entry(ip).or_insert(Bucket {
			used: 0,
			window_start: now,
		});
		if now.duration_since(bucket.window_start) >= self.window {
			bucket.used = 0;
			bucket.window_start = now;
		}
		if bucket.used >= self.tokens {
			return false;
		}
		bucket.used += 1;
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ip(last: u8) -> IpAddr {
		IpAddr::from([127, 0, 0, last])
	}

	#[test]
	fn budget_is_enforced_per_window() {
		let limiter = RateLimiter::per_minute(5);
		for _ in 0..5 {
			assert!(limiter.try_acquire(ip(1)));
		}
		assert!(!limiter.try_acquire(ip(1)));
	}

	#[test]
	fn keys_are_independent() {
		let limiter = RateLimiter::per_minute(1);
		assert!(limiter.try_acquire(ip(1)));
		assert!(!limiter.try_acquire(ip(1)));
		assert!(limiter.try_acquire(ip(2)));
	}

	#[test]
	fn window_elapse_refills() {
		let limiter = RateLimiter::new(1, Duration::from_millis(20));
		assert!(limiter.try_acquire(ip(1)));
		assert!(!limiter.try_acquire(ip(1)));
		std::thread::sleep(Duration::from_millis(30));
		assert!(limiter.try_acquire(ip(1)));
	}
}
