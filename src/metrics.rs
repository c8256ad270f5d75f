//! Process-wide counters for replication and transport activity.
//! Read by the Stats menu; nothing here blocks.
use std::sync::atomic::{AtomicU64, Ordering};

static SYNC_SENT: AtomicU64 = AtomicU64::new(0);
static SYNC_APPLIED: AtomicU64 = AtomicU64::new(0);
static SYNC_DUPLICATE: AtomicU64 = AtomicU64::new(0);
static SYNC_DROPPED: AtomicU64 = AtomicU64::new(0);
static SEND_FAILED: AtomicU64 = AtomicU64::new(0);
static CHUNKS_SENT: AtomicU64 = AtomicU64::new(0);

pub fn inc_sync_sent() {
    SYNC_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sync_applied() {
    SYNC_APPLIED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sync_duplicate() {
    SYNC_DUPLICATE.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sync_dropped() {
    SYNC_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_send_failed() {
    SEND_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chunks_sent() {
    CHUNKS_SENT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub sync_sent: u64,
    pub sync_applied: u64,
    pub sync_duplicate: u64,
    pub sync_dropped: u64,
    pub send_failed: u64,
    pub chunks_sent: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        sync_sent: SYNC_SENT.load(Ordering::Relaxed),
        sync_applied: SYNC_APPLIED.load(Ordering::Relaxed),
        sync_duplicate: SYNC_DUPLICATE.load(Ordering::Relaxed),
        sync_dropped: SYNC_DROPPED.load(Ordering::Relaxed),
        send_failed: SEND_FAILED.load(Ordering::Relaxed),
        chunks_sent: CHUNKS_SENT.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_move_forward() {
        let before = snapshot();
        inc_sync_applied();
        inc_sync_dropped();
        let after = snapshot();
        assert!(after.sync_applied > before.sync_applied);
        assert!(after.sync_dropped > before.sync_dropped);
    }
}
