use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall clock time and timers for the agent. Trackers never call `Utc::now` directly,
/// so tests can run whole sessions on paused tokio time.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    fn instant(&self) -> Instant;

    async fn sleep(&self, duration: Duration);

    async fn sleep_until(&self, instant: Instant);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn sleep_until(&self, instant: Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

/// Wall clock that advances with tokio time, so it follows `start_paused` tests.
#[cfg(test)]
#[derive(Clone)]
pub struct TestClock {
    start_time: DateTime<Utc>,
    reference: Instant,
}

#[cfg(test)]
impl TestClock {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            reference: Instant::now(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for TestClock {
    fn time(&self) -> DateTime<Utc> {
        self.start_time + self.reference.elapsed()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn sleep_until(&self, instant: Instant) {
        tokio::time::sleep_until(instant).await;
    }
}
