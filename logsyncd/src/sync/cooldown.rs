use std::time::{Duration, Instant};

/// Quiet period after a pass during which triggers do not scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow {
    expires_at: Option<Instant>,
}

impl CooldownWindow {
    pub fn arm(&mut self, now: Instant, window: Duration) {
        self.expires_at = Some(now + window);
    }

    pub fn clear(&mut self) {
        self.expires_at = None;
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.remaining(now).is_some()
    }

    /// Time left in the window, `None` once `now >= expires_at`.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let expires_at = self.expires_at?;
        (now < expires_at).then(|| expires_at - now)
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }
}
