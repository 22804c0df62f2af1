use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

/// Time source for the update loop and cache-busters.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Epoch milliseconds. Differences between two readings follow the
    /// monotonic clock.
    fn now_ms(&self) -> u64;
    async fn sleep(&self, duration: Duration);

    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms() as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// An epoch reading pinned to a tokio `Instant`.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    epoch_ms: u64,
    origin: Instant,
}

impl Anchor {
    fn at(epoch_ms: u64) -> Self {
        Self { epoch_ms, origin: Instant::now() }
    }

    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Wall clock read once at startup, advanced by tokio's monotonic clock so
/// system clock steps never move the update deadline.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    anchor: Anchor,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { anchor: Anchor::at(Utc::now().timestamp_millis().max(0) as u64) }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.anchor.now_ms()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed starting epoch on tokio's clock. Under a paused runtime
/// (`#[tokio::test(start_paused = true)]`) time only moves when every task
/// is waiting on a timer, so sleeps and slow requests resolve instantly and
/// deterministically.
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    anchor: Anchor,
}

impl VirtualClock {
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self { anchor: Anchor::at(epoch_ms) }
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.anchor.now_ms()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_virtual_clock_sleep_advances() {
        let clock = VirtualClock::starting_at(1_000);
        clock.sleep(Duration::from_secs(8)).await;
        assert_eq!(clock.now_ms(), 9_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_now_utc_matches_millis() {
        let clock = VirtualClock::starting_at(1_704_067_200_000);
        assert_eq!(clock.now_utc().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_elapsed_follows_monotonic_time() {
        let clock = SystemClock::new();
        let before = clock.now_ms();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.now_ms() - before, 30_000);
    }
}
