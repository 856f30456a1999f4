//! Cancellation scopes: run, step, and tool handler.
//!
//! A scope is a cancellation token plus an optional deadline. Child scopes
//! inherit cancellation from their parent and take the tighter of the two
//! deadlines. When a scope is interrupted the cause is kept, so an explicit
//! cancel and an elapsed deadline end a run differently.

use std::future::Future;
use std::time::Duration;

use stepwise_core::event::Termination;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a scope stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Timeout,
    Cancelled,
}

impl From<Interrupt> for Termination {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Timeout => Termination::Timeout,
            Interrupt::Cancelled => Termination::Cancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Scope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    pub(crate) fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// A nested scope; the tighter deadline wins.
    pub(crate) fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal cooperative work running under this scope to stop.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Non-blocking check. Cancellation takes precedence over the deadline.
    pub(crate) fn interrupted(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::Timeout),
            _ => None,
        }
    }

    /// Drive `fut` until it completes or the scope is interrupted.
    ///
    /// A future that is already complete wins over a simultaneous interrupt.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            output = fut => Ok(output),
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = deadline_elapsed(self.deadline) => Err(Interrupt::Timeout),
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
