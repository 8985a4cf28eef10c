use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

/// Shared cooperative-cancellation flag.
///
/// The flag only ever transitions from not-requested to requested, and
/// `request` may be called from any thread at any time. Workers check it
/// at their own checkpoints; nothing is preempted.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in one-second slices, returning early when a
    /// stop is requested. Returns true when the pause was interrupted.
    pub async fn pause(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_requested() {
                return true;
            }
            let slice = remaining.min(Duration::from_secs(1));
            sleep(slice).await;
            remaining -= slice;
        }
        self.is_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_monotonic_and_idempotent() {
        let token = StopToken::new();
        assert!(!token.is_requested());
        token.request();
        assert!(token.is_requested());
        token.request();
        assert!(token.is_requested());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = StopToken::new();
        let other = token.clone();
        other.request();
        assert!(token.is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_returns_early_on_stop() {
        let token = StopToken::new();
        token.request();
        assert!(token.pause(Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_runs_to_completion_without_stop() {
        let token = StopToken::new();
        assert!(!token.pause(Duration::from_secs(3)).await);
    }
}
