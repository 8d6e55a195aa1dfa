//! Duplicate-trigger suppression for a continuously scanning camera.
//!
//! A camera held over a badge decodes the same code many times per second.
//! [`ScanGate`] lets the first decode through and swallows repeats of the same
//! code inside the dedup window.

use std::time::Duration;

use tokio::time::Instant;

/// Default window during which a repeated code is ignored.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
struct LastProcessed {
    code: String,
    at: Instant,
}

/// Remembers the last accepted code and rejects quick repeats of it.
#[derive(Debug, Clone)]
pub struct ScanGate {
    window: Duration,
    last: Option<LastProcessed>,
}

impl Default for ScanGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl ScanGate {
    /// Creates a gate with the given dedup window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Decides whether `code` scanned at `now` should be processed.
    ///
    /// Returns `false` without side effects when the same code was accepted
    /// less than one window ago. Otherwise records `code` as the last
    /// processed code and returns `true`.
    pub fn accept(&mut self, code: &str, now: Instant) -> bool {
        if let Some(last) = &self.last {
            if last.code == code && now.saturating_duration_since(last.at) < self.window {
                return false;
            }
        }
        self.last = Some(LastProcessed {
            code: code.to_owned(),
            at: now,
        });
        true
    }

    /// Forgets the last processed code.
    ///
    /// Must be called whenever the scan mode changes so the code that was
    /// just scanned can be processed again under the new mode.
    pub fn clear(&mut self) {
        self.last = None;
    }

    /// The last accepted code, if any.
    #[must_use]
    pub fn last_code(&self) -> Option<&str> {
        self.last.as_ref().map(|last| last.code.as_str())
    }

    /// The configured dedup window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}
