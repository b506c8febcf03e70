use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A sleep that other tasks can cut short.
///
/// [`interrupt`](Self::interrupt) wakes whoever is sleeping right now;
/// [`interrupt_all`](Self::interrupt_all) additionally makes every later
/// sleep return immediately.
#[derive(Debug, Default)]
pub struct InterruptibleSleep {
    current: Mutex<CancellationToken>,
    closed: CancellationToken,
}

impl InterruptibleSleep {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let token = match self.current.lock() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        tokio::select! {
            _ = self.closed.cancelled() => false,
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    pub fn interrupt(&self) {
        let mut current = match self.current.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.cancel();
        *current = CancellationToken::new();
    }

    pub fn interrupt_all(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn interrupt_wakes_sleeper() {
        let sleep = Arc::new(InterruptibleSleep::new());
        let s = sleep.clone();
        let start = Instant::now();
        let handle = tokio::spawn(async move { s.sleep(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        sleep.interrupt();
        assert!(!handle.await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));

        // a plain interrupt does not affect later sleeps
        assert!(sleep.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn interrupt_all_is_sticky() {
        let sleep = InterruptibleSleep::new();
        sleep.interrupt_all();
        assert!(!sleep.sleep(Duration::from_secs(30)).await);
        assert!(sleep.is_closed());
    }
}
