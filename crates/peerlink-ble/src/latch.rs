//! One-shot broadcast latch
//!
//! A latch starts pending and settles exactly once, either released or
//! closed. Every waiter, whether it started waiting before or after the
//! latch settled, observes the same outcome. Closing a pending latch is how
//! teardown frees waiters that would otherwise hang.

use std::time::Duration;

use tokio::sync::watch;

/// Settled or pending state of a latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Pending,
    Released,
    Closed,
}

/// How a wait on a latch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Released,
    Closed,
    TimedOut,
}

#[derive(Debug)]
pub struct Latch {
    state: watch::Sender<LatchState>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LatchState::Pending);
        Self { state }
    }

    /// Release every waiter. Returns false if the latch had already settled.
    pub fn release(&self) -> bool {
        self.settle(LatchState::Released)
    }

    /// Fail every waiter. Returns false if the latch had already settled.
    pub fn close(&self) -> bool {
        self.settle(LatchState::Closed)
    }

    pub fn state(&self) -> LatchState {
        *self.state.borrow()
    }

    pub fn is_released(&self) -> bool {
        self.state() == LatchState::Released
    }

    /// Wait until the latch settles or `timeout` elapses
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(timeout, rx.wait_for(|s| *s != LatchState::Pending)).await;

        match settled {
            Ok(Ok(state)) => match *state {
                LatchState::Released => WaitOutcome::Released,
                _ => WaitOutcome::Closed,
            },
            // Sender gone means the owning device is gone
            Ok(Err(_)) => WaitOutcome::Closed,
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    fn settle(&self, to: LatchState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == LatchState::Pending {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}
