use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeakStats {
    pub wrappers: usize,
    pub handles_allocated: usize,
    pub handles_revoked: usize,
    pub saves: usize,
    pub loads: usize,
}

impl LeakStats {
    /// Handles issued but not yet revoked.
    pub fn outstanding_handles(&self) -> usize {
        self.handles_allocated.saturating_sub(self.handles_revoked)
    }

    /// Wrappers saved and not yet loaded again.
    pub fn pending_loads(&self) -> usize {
        self.saves.saturating_sub(self.loads)
    }
}

static WRAPPERS: AtomicUsize = AtomicUsize::new(0);
static HANDLES_ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static HANDLES_REVOKED: AtomicUsize = AtomicUsize::new(0);
static SAVES: AtomicUsize = AtomicUsize::new(0);
static LOADS: AtomicUsize = AtomicUsize::new(0);

pub fn record_wrapper() {
    WRAPPERS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_handle_alloc() {
    HANDLES_ALLOCATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_handle_revoke() {
    HANDLES_REVOKED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_save() {
    SAVES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_load() {
    LOADS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> LeakStats {
    LeakStats {
        wrappers: WRAPPERS.load(Ordering::Relaxed),
        handles_allocated: HANDLES_ALLOCATED.load(Ordering::Relaxed),
        handles_revoked: HANDLES_REVOKED.load(Ordering::Relaxed),
        saves: SAVES.load(Ordering::Relaxed),
        loads: LOADS.load(Ordering::Relaxed),
    }
}
