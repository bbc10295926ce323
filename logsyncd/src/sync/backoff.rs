use rand::Rng;
use std::time::Duration;

/// Delay before the next periodic trigger. Grows exponentially with the
/// number of consecutive failed passes and falls back to the regular poll
/// interval after a success. A `Retry-After` hint from the server raises the
/// delay to at least that long, still capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    failures: u32,
    retry_after: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter,
            failures: 0,
            retry_after: None,
        }
    }

    pub fn record_failure(&mut self, retry_after: Option<Duration>) {
        self.failures = self.failures.saturating_add(1);
        self.retry_after = retry_after;
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.retry_after = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn next_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        self.next_delay_with_rng(&mut rng)
    }

    /// `base` while healthy. After `n` failures the delay is drawn from
    /// `[exp / 2, exp]` with `exp = base * 2^n`, capped at `max`.
    pub fn next_delay_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.failures == 0 {
            return self.base;
        }
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = self.failures.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            let floor = exp / 2;
            rng.gen_range(floor..=exp)
        } else {
            exp
        };
        let hinted = self.retry_after.unwrap_or_default().min(self.max);
        Duration::from_millis(delay_ms.max(base_ms)).max(hinted)
    }
}
