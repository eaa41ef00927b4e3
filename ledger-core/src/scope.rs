//! Cancellation and deadlines for units of work
//!
//! A unit of work only commits after winning the `begin_commit` handshake on
//! its token. Once a token is cancelled no later commit can start, so a
//! caller that sees `cancel()` return `true` knows the work will roll back.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::result::{Error, Result};

const RUNNING: u8 = 0;
const COMMITTING: u8 = 1;
const CANCELLED: u8 = 2;
const COMMITTED: u8 = 3;
/// Cancel arrived while a commit was in flight
const CANCEL_REQUESTED: u8 = 4;

/// Shared cancellation flag with a commit handshake
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    ///
    /// Returns `true` when no commit can happen from now on and nothing has
    /// committed yet. Returns `false` if a commit is in flight or already
    /// done, in which case the caller has to wait for the real outcome.
    pub fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                CANCELLED => return true,
                CANCEL_REQUESTED | COMMITTED => return false,
                COMMITTING => CANCEL_REQUESTED,
                _ => CANCELLED,
            };
            match self.state.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return previous == RUNNING,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.state.load(Ordering::Acquire),
            CANCELLED | CANCEL_REQUESTED
        )
    }

    /// Claim the right to commit. Fails with `Cancelled` once cancelled.
    pub(crate) fn begin_commit(&self) -> Result<()> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == CANCELLED || current == CANCEL_REQUESTED {
                return Err(Error::Cancelled);
            }
            match self.state.compare_exchange(
                current,
                COMMITTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Release the commit claim
    ///
    /// A failed commit leaves the token usable for a retry unless a cancel
    /// was requested in the meantime.
    pub(crate) fn end_commit(&self, committed: bool) {
        if committed {
            self.state.store(COMMITTED, Ordering::Release);
            return;
        }
        if self
            .state
            .compare_exchange(COMMITTING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.state.store(CANCELLED, Ordering::Release);
        }
    }
}

/// Cancels its token when dropped, unless disarmed
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancelToken,
    armed: bool,
}

impl CancelOnDrop {
    pub fn new(token: CancelToken) -> Self {
        Self { token, armed: true }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

/// Per-call limits applied to a unit of work
#[derive(Debug, Clone, Default)]
pub struct OperationScope {
    pub cancel: Option<CancelToken>,
    pub timeout: Option<Duration>,
}

impl OperationScope {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn deadline_from(&self, start: Instant) -> Option<Instant> {
        self.timeout.map(|timeout| start + timeout)
    }

    /// Fail fast if the call was cancelled or ran past its deadline
    pub(crate) fn check(&self, deadline: Option<Instant>) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Error::Timeout);
        }
        Ok(())
    }

    pub(crate) fn begin_commit(&self) -> Result<()> {
        match &self.cancel {
            Some(token) => token.begin_commit(),
            None => Ok(()),
        }
    }

    pub(crate) fn end_commit(&self, committed: bool) {
        if let Some(token) = &self.cancel {
            token.end_commit(committed);
        }
    }
}
