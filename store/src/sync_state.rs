//! Observable `isSyncing` cell.

use tokio::sync::watch;

/// Whether a sync pass is running, observable through [`watch`] receivers.
#[derive(Debug)]
pub struct SyncState {
    tx: watch::Sender<bool>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn is_syncing(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to transitions of the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Claim the flag for one pass.
    ///
    /// Returns `None` if a pass is already running. The flag is reset when
    /// the returned guard is dropped, whichever way the pass ends.
    pub fn begin(&self) -> Option<SyncGuard<'_>> {
        let claimed = self.tx.send_if_modified(|syncing| {
            if *syncing {
                false
            } else {
                *syncing = true;
                true
            }
        });
        claimed.then(|| SyncGuard { tx: &self.tx })
    }
}

/// Holds the sync flag for the duration of one pass.
#[derive(Debug)]
pub struct SyncGuard<'a> {
    tx: &'a watch::Sender<bool>,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.tx.send_replace(false);
    }
}
