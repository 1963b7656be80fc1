//! Control-channel transient-error grace window.
//!
//! Transient read errors on the control stream are tolerated for a window
//! (default 20 s) measured from the *first* error; any successful receive
//! resets the window. A fatal error or an error past the window
//! disconnects.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

/// Default tolerance window from the first transient error.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(20);

/// Verdict for one observed transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceDecision {
    /// Keep the connection; retry reading.
    Tolerate,
    /// Window exhausted (or fatal error); disconnect the peer.
    Disconnect,
}

/// Grace-window tracker for one connection.
#[derive(Debug)]
pub struct ErrorGraceWindow<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    window: Duration,
    first_error: Option<I>,
}

impl<I> ErrorGraceWindow<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a tracker with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, first_error: None }
    }

    /// Handle a transient error at `now`.
    pub fn on_transient_error(&mut self, now: I) -> GraceDecision {
        match self.first_error {
            None => {
                self.first_error = Some(now);
                GraceDecision::Tolerate
            },
            Some(first) => {
                if now >= first && now - first > self.window {
                    GraceDecision::Disconnect
                } else {
                    GraceDecision::Tolerate
                }
            },
        }
    }

    /// Handle a fatal error; always disconnects.
    pub fn on_fatal_error(&mut self) -> GraceDecision {
        GraceDecision::Disconnect
    }

    /// A successful receive resets the window.
    pub fn on_success(&mut self) {
        self.first_error = None;
    }

    /// Whether a transient error is currently outstanding.
    #[must_use]
    pub fn in_error_state(&self) -> bool {
        self.first_error.is_some()
    }
}

impl<I> Default for ErrorGraceWindow<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_WINDOW)
    }
}
