//! Cancellation and deadline handling for remote calls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ReconcileError, RemoteError, Step};

/// Per-pass context. Every remote call of a pass goes through [`SyncContext::call`].
#[derive(Debug, Clone)]
pub struct SyncContext {
    shutdown: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl SyncContext {
    pub fn new(shutdown: watch::Receiver<bool>, timeout: Option<Duration>) -> Self {
        Self {
            shutdown,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Context that is never cancelled and has no deadline.
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            shutdown: rx,
            deadline: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run a remote call, aborting it on shutdown or when the deadline passes.
    pub async fn call<T, F>(&self, step: Step, fut: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        if self.is_cancelled() {
            return Err(ReconcileError::Cancelled { step });
        }

        let mut shutdown = self.shutdown.clone();
        let cancelled = async move {
            loop {
                if *shutdown.borrow_and_update() {
                    return;
                }
                if shutdown.changed().await.is_err() {
                    // Sender gone: nobody can cancel us any more.
                    std::future::pending::<()>().await;
                }
            }
        };

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            res = fut => res.map_err(|source| ReconcileError::Remote { step, source }),
            _ = cancelled => Err(ReconcileError::Cancelled { step }),
            _ = expired => Err(ReconcileError::DeadlineExceeded { step }),
        }
    }
}
