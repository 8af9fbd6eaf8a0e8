use parking_lot::Mutex;
use std::sync::Arc;

use transactional_executor::TransactionAware;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lifecycle {
    pub opened: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub closed: usize,
}

impl Lifecycle {
    pub fn committed_once() -> Self {
        Self {
            opened: 1,
            committed: 1,
            rolled_back: 0,
            closed: 1,
        }
    }

    pub fn rolled_back_once() -> Self {
        Self {
            opened: 1,
            committed: 0,
            rolled_back: 1,
            closed: 1,
        }
    }
}

/// Counts lifecycle callbacks for verification in tests
#[derive(Default)]
pub struct LifecycleCounter {
    counts: Mutex<Lifecycle>,
}

impl LifecycleCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Lifecycle {
        *self.counts.lock()
    }

    pub fn reset(&self) {
        *self.counts.lock() = Lifecycle::default();
    }
}

impl TransactionAware for LifecycleCounter {
    fn on_connection_opened(&self) {
        self.counts.lock().opened += 1;
    }

    fn on_commit(&self) {
        self.counts.lock().committed += 1;
    }

    fn on_rollback(&self) {
        self.counts.lock().rolled_back += 1;
    }

    fn on_connection_closed(&self) {
        self.counts.lock().closed += 1;
    }
}
