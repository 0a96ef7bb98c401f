//! Per-session request limiting at ingress

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Windows {
    by_session: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

/// Sliding one-minute window per session id
///
/// Sessions with no hit inside the window are forgotten, at most once per
/// window length.
pub struct SessionRateLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<Windows>,
}

impl SessionRateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            windows: Mutex::new(Windows {
                by_session: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Count a request; `Err` carries the wait until the next slot frees
    pub async fn check(&self, session_id: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if now.duration_since(windows.last_sweep) >= self.window {
            let span = self.window;
            windows
                .by_session
                .retain(|_, hits| hits.back().map_or(false, |t| now.duration_since(*t) < span));
            windows.last_sweep = now;
        }

        let hits = windows.by_session.entry(session_id.to_string()).or_default();
        while hits
            .front()
            .map_or(false, |t| now.duration_since(*t) >= self.window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.limit {
            let oldest = hits.front().copied().unwrap_or(now);
            return Err(self.window.saturating_sub(now.duration_since(oldest)));
        }
        hits.push_back(now);
        Ok(())
    }

    /// Sessions currently holding a window
    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.by_session.len()
    }
}
