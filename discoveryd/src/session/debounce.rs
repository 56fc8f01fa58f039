use std::time::Duration;
use tokio::time::Instant;

/// Answers at most one trigger per window. The window starts at the last
/// trigger that was answered; ignored triggers do not extend it.
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True if a trigger at `now` should be answered. Records `now` if so.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
