use std::time::{Duration, Instant};

use crate::error::GenerationError;

/// Token usage over a rolling window.
///
/// The window is refreshed lazily: nothing happens between calls, and the
/// counter is cleared by the first [`UsageWindow::reserve`] that observes the
/// window has elapsed. A `limit` of zero disables the cap.
#[derive(Debug, Clone)]
pub struct UsageWindow {
    used_tokens: usize,
    window_start: Instant,
    window_length: Duration,
    limit: usize,
}

impl UsageWindow {
    pub fn new(window_length: Duration, limit: usize, now: Instant) -> Self {
        Self {
            used_tokens: 0,
            window_start: now,
            window_length,
            limit,
        }
    }

    pub fn used(&self) -> usize {
        self.used_tokens
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Commits `tokens` against the budget, or fails without committing.
    pub fn reserve(&mut self, now: Instant, tokens: usize) -> Result<(), GenerationError> {
        if now.saturating_duration_since(self.window_start) >= self.window_length {
            self.used_tokens = 0;
            self.window_start = now;
        }

        if self.limit > 0 && self.used_tokens.saturating_add(tokens) > self.limit {
            return Err(GenerationError::RateLimitExceeded {
                used: self.used_tokens,
                limit: self.limit,
            });
        }

        self.used_tokens = self.used_tokens.saturating_add(tokens);
        Ok(())
    }
}
