//! Blocking retrieval of finished snapshots.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use tokennet_types::{SnapshotId, SnapshotState};

/// One-shot completion latch for a single snapshot id.
#[derive(Default)]
struct Latch {
    state: Mutex<Option<SnapshotState>>,
    cond: Condvar,
}

/// Cloneable handle for retrieving finished snapshots.
///
/// The runner publishes each reconciled snapshot into a per-id latch;
/// [`collect`](Self::collect) blocks the calling thread until the latch
/// fills. Each snapshot id has its own latch, so overlapping snapshots do
/// not collide on a shared signal, and a latch is allocated on first use
/// so collecting before the snapshot is even started is safe.
///
/// The wait must happen on a different thread from the one driving
/// `tick()`, otherwise the simulation can never make progress.
#[derive(Clone, Default)]
pub struct SnapshotCollector {
    latches: Arc<Mutex<HashMap<SnapshotId, Arc<Latch>>>>,
}

impl SnapshotCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn latch(&self, id: SnapshotId) -> Arc<Latch> {
        Arc::clone(self.latches.lock().entry(id).or_default())
    }

    /// Publish a reconciled snapshot, unblocking any pending `collect`.
    pub(crate) fn publish(&self, state: SnapshotState) {
        let latch = self.latch(state.id);
        *latch.state.lock() = Some(state);
        latch.cond.notify_all();
    }

    /// Block until the snapshot with this id has been reconciled, then
    /// return it.
    ///
    /// One-shot per id: the latch is freed once the result is handed out,
    /// so each finished snapshot can be collected exactly once.
    pub fn collect(&self, id: SnapshotId) -> SnapshotState {
        let latch = self.latch(id);
        let state = {
            let mut slot = latch.state.lock();
            while slot.is_none() {
                latch.cond.wait(&mut slot);
            }
            slot.take().expect("latch filled")
        };
        self.latches.lock().remove(&id);
        state
    }

    /// Non-blocking probe: take the snapshot if it has been published.
    pub fn try_collect(&self, id: SnapshotId) -> Option<SnapshotState> {
        let latch = self.latch(id);
        let state = latch.state.lock().take();
        if state.is_some() {
            self.latches.lock().remove(&id);
        }
        state
    }
}
