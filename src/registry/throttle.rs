//! Per-client request spacing

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cooperative throttle: each request starts at least `min_delay` after the
/// previous one from the same client instance.
///
/// This is not a shared token bucket. Two clients never wait for each other,
/// so parallel throughput comes from running several clients.
#[derive(Debug)]
pub struct RequestThrottle {
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until the next request may be sent and record it as sent.
    ///
    /// The lock is held across the sleep so concurrent callers queue up
    /// behind each other instead of all waking at once.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_request_is_not_delayed() {
        let throttle = RequestThrottle::new(Duration::from_secs(5));
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_consecutive_requests_are_spaced() {
        let throttle = RequestThrottle::new(Duration::from_millis(40));
        let start = Instant::now();
        for _ in 0..3 {
            throttle.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let throttle = Arc::new(RequestThrottle::new(Duration::from_millis(30)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move { throttle.wait().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_separate_instances_do_not_share_state() {
        let a = RequestThrottle::new(Duration::from_secs(5));
        let b = RequestThrottle::new(Duration::from_secs(5));
        let start = Instant::now();
        a.wait().await;
        b.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
