//! Time provider abstraction for the binder's retry loop.
//!
//! Binding waits on an elapsed-time deadline rather than a recursive timer,
//! so everything time-related goes through [`TimeProvider`]. Tests run the
//! real provider under tokio's paused clock (`start_paused = true`) and never
//! touch the wall clock.

use std::time::Duration;

use async_trait::async_trait;

/// Provider trait for time operations.
///
/// `now()` returns elapsed time since provider creation, which is all the
/// binder needs: deadlines are computed as differences, never absolute
/// timestamps.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Elapsed time since this provider was created.
    fn now(&self) -> Duration;
}

/// Real time provider using tokio's time facilities.
///
/// Under a paused tokio runtime both `sleep` and `now` follow the virtual
/// clock, which makes timeout behavior deterministic in tests.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start: tokio::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new provider anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}
