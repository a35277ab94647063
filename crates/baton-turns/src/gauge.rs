//! Open feed connection counter
//!
//! One gauge per process, owned by the `SessionFeedHub` that created it.
//! Each open subscription holds a guard; dropping the guard decrements the
//! count, so the number is correct however a connection ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ConnectionGauge {
    open: Arc<AtomicUsize>,
}

impl ConnectionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection until the guard drops
    pub fn acquire(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open: Arc::clone(&self.open),
        }
    }

    /// Connections currently open in this process
    pub fn current(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// Decrements its gauge on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
