//! Trigger coalescing.
//!
//! At most one sync runs per folder. A trigger that arrives while one is
//! running marks the folder dirty instead of starting another; however
//! many triggers pile up, exactly one more run follows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use super::engine::{SyncEngine, SyncReport};
use super::remote::RemoteMailbox;
use super::CancelSignal;
use crate::Error;

/// Result of a scheduled run. Errors are shared by every waiter.
pub type SyncOutcome = Result<SyncReport, Arc<Error>>;

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Bookkeeping for a folder with a run in progress.
#[derive(Debug)]
struct Slot {
    current: watch::Sender<Option<SyncOutcome>>,
    /// Set when a trigger arrived during the current run.
    next: Option<watch::Sender<Option<SyncOutcome>>>,
}

/// Resolves when the run covering a trigger has finished.
#[derive(Debug)]
pub struct Completion(watch::Receiver<Option<SyncOutcome>>);

impl Completion {
    /// Waits for the outcome.
    pub async fn wait(mut self) -> SyncOutcome {
        match self.0.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(Arc::new(Error::Cancelled))),
            Err(_) => Err(Arc::new(Error::Cancelled)),
        }
    }
}

/// Runs folder syncs on demand.
#[derive(Debug)]
pub struct SyncScheduler<R> {
    engine: Arc<SyncEngine<R>>,
    slots: Slots,
    cancel: CancelSignal,
}

impl<R: RemoteMailbox> SyncScheduler<R> {
    /// Schedules on `engine`; every run observes `cancel`.
    #[must_use]
    pub fn new(engine: Arc<SyncEngine<R>>, cancel: CancelSignal) -> Self {
        Self {
            engine,
            slots: Arc::new(Mutex::new(HashMap::new())),
            cancel,
        }
    }

    /// The engine runs go to.
    #[must_use]
    pub const fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    /// Requests a sync of `path`.
    pub fn trigger(&self, path: &str) -> Completion {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(path) {
            tracing::trace!(folder = path, "sync already running; coalesced");
            let next = slot.next.get_or_insert_with(|| watch::Sender::new(None));
            return Completion(next.subscribe());
        }

        let current = watch::Sender::new(None);
        let completion = Completion(current.subscribe());
        slots.insert(path.to_string(), Slot { current, next: None });
        drop(slots);

        tokio::spawn(run(
            Arc::clone(&self.engine),
            Arc::clone(&self.slots),
            path.to_string(),
            self.cancel.clone(),
        ));
        completion
    }

    /// Requests a sync and waits for it.
    pub async fn sync(&self, path: &str) -> SyncOutcome {
        self.trigger(path).wait().await
    }

    /// True while `path` has a run in progress.
    #[must_use]
    pub fn is_running(&self, path: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }
}

async fn run<R: RemoteMailbox>(engine: Arc<SyncEngine<R>>, slots: Slots, path: String, cancel: CancelSignal) {
    loop {
        let outcome = engine.sync_folder(&path, &cancel).await.map_err(Arc::new);
        let mut guard = slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = guard.get_mut(&path) else {
            return;
        };
        slot.current.send_replace(Some(outcome));
        match slot.next.take() {
            Some(next) if !cancel.is_cancelled() => slot.current = next,
            Some(next) => {
                next.send_replace(Some(Err(Arc::new(Error::Cancelled))));
                guard.remove(&path);
                return;
            }
            None => {
                guard.remove(&path);
                return;
            }
        }
    }
}
