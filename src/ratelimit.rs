use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Outcome of a rate-guard check. Advisory only: skipping the guard risks
/// nothing but the caller's own standing with the upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Throttled {
        retry_after: Duration,
        /// Set when the hourly cap, not the cooldown, tripped; callers
        /// show the long-form page with alternative services.
        exhausted: bool,
    },
}

struct ClientRecord {
    last_request: Instant,
    window_start: Instant,
    window_count: u32,
}

/// Per-client throttle for sensitive upstream hosts. Owned by the server's
/// composition root; entries are swept once the map grows past a threshold
/// so sustained distinct-IP traffic cannot grow it without bound.
pub struct RateLimiter {
    inner: Mutex<HashMap<String, ClientRecord>>,
    hourly_cap: u32,
    sweep_threshold: usize,
}

const HOUR: Duration = Duration::from_secs(3600);

impl RateLimiter {
    pub fn new(hourly_cap: u32) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            hourly_cap,
            sweep_threshold: 4096,
        }
    }

    /// Synchronous map probe; the lock is never held across an await.
    pub fn check(&self, key: &str, cooldown: Duration, now: Instant) -> Decision {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned map only means a past panic mid-update; letting
            // the request through is the advisory-correct behavior.
            Err(_) => return Decision::Proceed,
        };

        if map.len() >= self.sweep_threshold {
            map.retain(|_, record| now.duration_since(record.last_request) < HOUR);
        }

        let Some(record) = map.get_mut(key) else {
            map.insert(
                key.to_string(),
                ClientRecord {
                    last_request: now,
                    window_start: now,
                    window_count: 1,
                },
            );
            return Decision::Proceed;
        };

        if now.duration_since(record.window_start) >= HOUR {
            record.window_start = now;
            record.window_count = 0;
        }

        if record.window_count >= self.hourly_cap {
            let retry_after = HOUR.saturating_sub(now.duration_since(record.window_start));
            return Decision::Throttled {
                retry_after,
                exhausted: true,
            };
        }

        let since_last = now.duration_since(record.last_request);
        if since_last < cooldown {
            return Decision::Throttled {
                retry_after: cooldown - since_last,
                exhausted: false,
            };
        }

        record.last_request = now;
        record.window_count += 1;
        Decision::Proceed
    }
}
