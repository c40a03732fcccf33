//! Per-user agent invocation quota.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::SynthesisError;

/// Per-user tracker: (invocation count, window start time).
type UserTracker = HashMap<String, (u64, Instant)>;

/// Fixed-window counter of agent invocations per user.
pub struct QuotaLimiter {
    tracker: Mutex<UserTracker>,
    max_invocations: u64,
    window: Duration,
}

impl QuotaLimiter {
    pub fn new(max_invocations: u64, window: Duration) -> Self {
        Self {
            tracker: Mutex::new(HashMap::new()),
            max_invocations,
            window,
        }
    }

    /// Count one invocation for `user_id`, forgetting users whose window
    /// has expired.
    /// Returns `RateLimited` with the seconds left in the window once the
    /// user has exceeded the quota.
    pub async fn check(&self, user_id: &str) -> Result<(), SynthesisError> {
        let mut tracker = self.tracker.lock().await;
        let now = Instant::now();

        // Drop every user whose window has expired, including this one.
        let window = self.window;
        tracker.retain(|_, (_, start)| now.duration_since(*start) < window);

        let entry = tracker
            .entry(user_id.to_string())
            .or_insert((0, now));

        entry.0 += 1;
        if entry.0 > self.max_invocations {
            let remaining = self.window.saturating_sub(now.duration_since(entry.1));
            let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            tracing::warn!(user_id, retry_after_secs, "agent quota exceeded");
            Err(SynthesisError::RateLimited { retry_after_secs })
        } else {
            Ok(())
        }
    }
}
