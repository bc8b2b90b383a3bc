// Cross-tab session replication
// Eventually consistent mirror of checkout session keys between tabs.
// Last writer wins per key, ordered by (logical clock, tab id); there is no locking,
// and a lagging tab simply misses the overwritten updates.

use crate::storage::{MemoryStorage, StorageArea, StorageKey, TRANSIENT_KEYS};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub fn is_replicated(key: &str) -> bool {
    TRANSIENT_KEYS.iter().any(|k| k.name() == key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    pub clock: u64,
    pub tab: Uuid,
}

#[derive(Debug, Clone)]
pub struct SyncMessage {
    pub key: String,
    // None is a removal
    pub value: Option<String>,
    // Expiry travels with the value and is measured from the original write
    pub ttl: Option<Duration>,
    pub written_at: Instant,
    pub stamp: Stamp,
}

// Broadcast hub shared by every tab of one browser profile
#[derive(Clone)]
pub struct TabSync {
    tx: broadcast::Sender<SyncMessage>,
}

impl Default for TabSync {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl TabSync {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn open_tab(&self) -> Arc<ReplicatedStorage> {
        Arc::new(ReplicatedStorage {
            tab: Uuid::new_v4(),
            local: MemoryStorage::new(),
            clock: AtomicU64::new(0),
            stamps: DashMap::new(),
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
        })
    }

    pub fn tab_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// One tab's session storage. Incoming updates are applied lazily before
// every read, or explicitly through apply_pending.
pub struct ReplicatedStorage {
    tab: Uuid,
    local: MemoryStorage,
    clock: AtomicU64,
    stamps: DashMap<String, Stamp>,
    tx: broadcast::Sender<SyncMessage>,
    rx: Mutex<broadcast::Receiver<SyncMessage>>,
}

impl ReplicatedStorage {
    pub fn tab_id(&self) -> Uuid {
        self.tab
    }

    fn tick(&self) -> Stamp {
        Stamp {
            clock: self.clock.fetch_add(1, Ordering::SeqCst) + 1,
            tab: self.tab,
        }
    }

    // Returns false when an equal or newer write for the key was already applied
    fn accept(&self, key: &str, stamp: Stamp) -> bool {
        let mut accepted = false;
        self.stamps
            .entry(key.to_string())
            .and_modify(|current| {
                if stamp > *current {
                    *current = stamp;
                    accepted = true;
                }
            })
            .or_insert_with(|| {
                accepted = true;
                stamp
            });
        accepted
    }

    fn publish(&self, key: &str, value: Option<String>, ttl: Option<Duration>) {
        if !is_replicated(key) {
            return;
        }
        let stamp = self.tick();
        self.accept(key, stamp);
        let message = SyncMessage {
            key: key.to_string(),
            value,
            ttl,
            written_at: Instant::now(),
            stamp,
        };
        if self.tx.send(message).is_err() {
            debug!(key, "no tabs listening for session update");
        }
    }

    fn apply(&self, message: SyncMessage) -> bool {
        if message.stamp.tab == self.tab {
            return false;
        }
        // Lamport merge so later local writes order after what we've seen
        self.clock.fetch_max(message.stamp.clock, Ordering::SeqCst);

        if !self.accept(&message.key, message.stamp) {
            debug!(key = %message.key, "stale session update ignored");
            return false;
        }
        let remaining = message
            .ttl
            .map(|ttl| ttl.saturating_sub(message.written_at.elapsed()));
        match (message.value, remaining) {
            (Some(_), Some(remaining)) if remaining.is_zero() => {
                debug!(key = %message.key, "session update expired in transit");
                self.local.remove(&message.key);
            }
            (Some(value), remaining) => {
                self.local.set_raw_with_ttl(&message.key, value, remaining)
            }
            (None, _) => {
                self.local.remove(&message.key);
            }
        }
        true
    }

    // Drains updates broadcast by other tabs, returning how many were applied
    pub fn apply_pending(&self) -> usize {
        let mut rx = self.rx.lock();
        let mut applied = 0;
        loop {
            match rx.try_recv() {
                Ok(message) => {
                    if self.apply(message) {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(tab = %self.tab, missed, "tab lagged behind session updates");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        applied
    }
}

impl StorageArea for ReplicatedStorage {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.apply_pending();
        self.local.get_raw(key)
    }

    fn set_raw(&self, key: &str, value: String) {
        self.set_raw_with_ttl(key, value, None);
    }

    fn set_raw_with_ttl(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.apply_pending();
        self.local.set_raw_with_ttl(key, value.clone(), ttl);
        self.publish(key, Some(value), ttl);
    }

    fn remove(&self, key: &str) -> bool {
        self.apply_pending();
        let removed = self.local.remove(key);
        self.publish(key, None, None);
        removed
    }

    fn keys(&self) -> Vec<String> {
        self.apply_pending();
        self.local.keys()
    }

    fn clear(&self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }
}

// Convenience for callers holding a typed key
pub fn replicated(key: &StorageKey) -> bool {
    is_replicated(&key.name())
}
