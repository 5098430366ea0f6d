//! Liveness debouncer.
//!
//! Absorbs transient health-check failures. The first failed cycle after
//! at least one success arms a single deadline `window` in the future; any
//! success before it passes disarms it and clears the failure count. When
//! the deadline passes the node is declared down, once.
//!
//! The debouncer only holds state. The supervisor waits on
//! [`deadline`](LivenessDebouncer::deadline) and calls
//! [`fire`](LivenessDebouncer::fire) when it passes, so all transitions
//! happen on the supervisor's single control task.

use std::time::Duration;

use tokio::time::Instant;

/// What a failed cycle did to the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// No success seen since the process started; the node may still be
    /// bootstrapping, so nothing is armed.
    Ignored,
    /// A fresh down deadline was armed.
    Armed {
        /// When the node will be declared down.
        deadline: Instant,
    },
    /// A deadline is already pending; it is not extended.
    Pending,
    /// The node was already declared down.
    AlreadyDown,
}

/// Consecutive-failure state for the supervised process.
#[derive(Debug, Clone)]
pub struct LivenessDebouncer {
    window: Duration,
    consecutive_failures: u32,
    seen_first_success: bool,
    deadline: Option<Instant>,
    down: bool,
}

impl LivenessDebouncer {
    /// Debouncer that declares the node down `window` after the first
    /// failure of a streak.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            consecutive_failures: 0,
            seen_first_success: false,
            deadline: None,
            down: false,
        }
    }

    /// A cycle succeeded: clear the streak and cancel any pending deadline.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.deadline = None;
        self.seen_first_success = true;
        self.down = false;
    }

    /// A cycle failed at `now`.
    pub fn record_failure(&mut self, now: Instant) -> FailureAction {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.down {
            FailureAction::AlreadyDown
        } else if !self.seen_first_success {
            FailureAction::Ignored
        } else if self.deadline.is_some() {
            FailureAction::Pending
        } else {
            let deadline = now + self.window;
            self.deadline = Some(deadline);
            FailureAction::Armed { deadline }
        }
    }

    /// Pending down deadline, if armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Declare the node down if the deadline has passed at `now`.
    ///
    /// Returns `true` exactly once per armed deadline.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.down = true;
                true
            }
            _ => false,
        }
    }

    /// Record a down declared outside the debouncer (process exit or
    /// channel error). Returns `false` if the node was already down.
    pub fn mark_down(&mut self) -> bool {
        self.deadline = None;
        !std::mem::replace(&mut self.down, true)
    }

    /// Forget everything; used whenever a process starts or stops.
    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }

    /// Failed cycles since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the node has been declared down since the last success.
    #[must_use]
    pub fn is_down(&self) -> bool {
        self.down
    }
}
