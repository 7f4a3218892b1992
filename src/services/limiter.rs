//! Admission limit for job starts: at most `max` starts within any `window`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Sliding-window limiter over job start times.
///
/// [`AdmissionLimiter::ready`] waits for capacity without consuming it, so a
/// dispatcher that finds no job to claim does not burn a slot. Call
/// [`AdmissionLimiter::record`] once a job has actually been started.
#[derive(Debug)]
pub struct AdmissionLimiter {
    max: usize,
    window: Duration,
    starts: VecDeque<Instant>,
}

impl AdmissionLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max: max.max(1) as usize,
            window,
            starts: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.starts.front() {
            if now.duration_since(oldest) >= self.window {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until another start is allowed. Zero if one is allowed now.
    pub fn time_until_available(&mut self) -> Duration {
        let now = Instant::now();
        self.evict(now);

        if self.starts.len() < self.max {
            return Duration::ZERO;
        }
        self.starts
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// Wait until a start would be admitted. Returns the time waited.
    pub async fn ready(&mut self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let wait = self.time_until_available();
            if wait.is_zero() {
                return waited;
            }
            trace!(?wait, "Admission limit reached, waiting");
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    pub fn record(&mut self) {
        let now = Instant::now();
        self.evict(now);
        self.starts.push_back(now);
    }
}
