//! Waiting for asynchronous cloud operations. `job` polls the generic job API, `state`
//! drives a pending/target state machine over an arbitrary refresh function. Both sleep
//! through a `Context`, so the host can abort a wait at any time.
pub mod job;
pub mod state;

use crate::error::{Error, WaitError};

use tokio::sync::watch;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use self::job::{get_job_entity, wait_for_job_success, Job, JobResponse};
pub use self::state::StateChangeConf;

/// Returned from `Context::sleep` when the context was cancelled before the sleep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// The cancellation signal of one host operation. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct Context {
    receiver: watch::Receiver<bool>,
    // keeps the channel open for contexts that can never be cancelled
    _sender: Option<Arc<watch::Sender<bool>>>,
}

/// Cancels every clone of the `Context` it was created with
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // there may be no context left, which is fine
        let _ = self.sender.send(true);
    }
}

impl Context {
    /// A context that is never cancelled
    pub fn background() -> Context {
        let (sender, receiver) = watch::channel(false);
        Context {
            receiver,
            _sender: Some(Arc::new(sender)),
        }
    }

    pub fn with_cancel() -> (Context, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let context = Context {
            receiver,
            _sender: None,
        };
        let handle = CancelHandle {
            sender: Arc::new(sender),
        };
        (context, handle)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the context is cancelled. Never resolves for a context whose
    /// `CancelHandle` was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(Cancelled),
        }
    }

    /// Runs a whole operation under this context. On cancellation the operation future is
    /// dropped, which also aborts any transport retries it has in flight.
    pub async fn run<T, F>(&self, operation: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        if self.is_cancelled() {
            return Err(WaitError::Cancelled {
                last_state: String::new(),
            }
            .into());
        }
        tokio::select! {
            result = operation => result,
            _ = self.cancelled() => Err(WaitError::Cancelled { last_state: String::new() }.into()),
        }
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::background()
    }
}
