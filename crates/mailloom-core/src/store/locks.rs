//! Single writer per folder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::model::FolderId;

/// Registry of per-folder write locks. Locks are created on first use and
/// live as long as the store.
#[derive(Debug, Default)]
pub(crate) struct FolderLocks {
    locks: Mutex<HashMap<FolderId, Arc<AsyncMutex<()>>>>,
}

impl FolderLocks {
    /// Waits until no other writer holds `folder`.
    pub(crate) async fn lock(&self, folder: FolderId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(folder).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_folder_waits_other_folder_does_not() {
        let locks = FolderLocks::default();
        let guard = locks.lock(FolderId(1)).await;

        let same = tokio::time::timeout(Duration::from_millis(20), locks.lock(FolderId(1))).await;
        assert!(same.is_err());
        let other = tokio::time::timeout(Duration::from_millis(20), locks.lock(FolderId(2))).await;
        assert!(other.is_ok());

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(20), locks.lock(FolderId(1))).await;
        assert!(again.is_ok());
    }
}
