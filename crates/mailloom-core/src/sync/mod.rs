//! Synchronization of the local store with the server.
//!
//! [`SyncEngine`] reconciles one folder at a time in committed batches;
//! [`SyncScheduler`] coalesces the triggers that ask for it.

mod engine;
mod remote;
mod scheduler;

use std::future::Future;

use tokio::sync::watch;

pub use engine::{SyncEngine, SyncEvent, SyncReport};
pub use remote::{
    ImapRemote, RemoteChanges, RemoteFlags, RemoteFolder, RemoteFolderInfo, RemoteMailbox, UidQuery,
};
pub use scheduler::{Completion, SyncOutcome, SyncScheduler};

use crate::{Error, Result};

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Cancels every linked [`CancelSignal`].
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Cancellation as seen by a running sync. Checked at remote calls and
/// between batches, never inside a store transaction.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A linked handle and signal.
    #[must_use]
    pub fn pair() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), Self(rx))
    }

    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self::pair().1
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Fails with [`Error::Cancelled`] once cancelled.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancelled; never, if the handle is gone first.
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Runs `future` unless cancellation comes first.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`], or the future's own error.
    pub async fn run<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        self.check()?;
        let mut signal = self.clone();
        tokio::select! {
            biased;
            result = future => result,
            () = signal.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_interrupts_pending_work() {
        let (handle, signal) = CancelSignal::pair();
        assert!(signal.run(async { Ok(1) }).await.is_ok());

        let pending = signal.run(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        handle.cancel();
        assert!(matches!(pending.await, Err(Error::Cancelled)));
        assert!(signal.check().is_err());
    }

    #[tokio::test]
    async fn never_fires() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let result = tokio::time::timeout(Duration::from_millis(20), signal.clone().cancelled()).await;
        assert!(result.is_err());
    }
}
