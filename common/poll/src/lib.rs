// Licensed under the Apache-2.0 license

//! Bounded retry loops for polling hardware state.
//!
//! A [`Backoff`] describes how many times a condition is re-checked and how
//! long to wait between checks. Short waits spin; longer ones sleep.

use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcome of a single poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T, E> {
    /// Condition satisfied, stop polling.
    Ready(T),
    /// Not yet; wait and retry.
    Pending,
    /// Condition can never be satisfied, stop polling.
    Abort(E),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("condition not met after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("polling aborted: {0}")]
    Aborted(E),
}

/// How the wait between two attempts is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Spin,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub retries: u32,
    pub delay: Duration,
    pub mode: WaitMode,
}

impl Backoff {
    pub const fn spin(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            mode: WaitMode::Spin,
        }
    }

    pub const fn sleep(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            mode: WaitMode::Sleep,
        }
    }

    /// Upper bound on the time spent waiting by [`Backoff::poll`].
    pub fn budget(&self) -> Duration {
        self.delay * self.retries
    }

    /// Waits for one delay period.
    pub fn wait(&self) {
        match self.mode {
            WaitMode::Sleep => std::thread::sleep(self.delay),
            WaitMode::Spin => {
                let deadline = Instant::now() + self.delay;
                while Instant::now() < deadline {
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Calls `f` until it reports ready or aborts, at most `retries + 1` times.
    pub fn poll<T, E>(&self, mut f: impl FnMut() -> PollStep<T, E>) -> Result<T, PollError<E>> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match f() {
                PollStep::Ready(v) => return Ok(v),
                PollStep::Abort(e) => return Err(PollError::Aborted(e)),
                PollStep::Pending if attempts > self.retries => {
                    return Err(PollError::Timeout { attempts })
                }
                PollStep::Pending => self.wait(),
            }
        }
    }

    /// Convenience wrapper over [`Backoff::poll`] for plain boolean conditions.
    pub fn until(&self, mut cond: impl FnMut() -> bool) -> bool {
        self.poll::<(), ()>(|| {
            if cond() {
                PollStep::Ready(())
            } else {
                PollStep::Pending
            }
        })
        .is_ok()
    }
}
