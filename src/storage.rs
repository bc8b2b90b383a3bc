// Client-side key/value storage
// Replaces the browser's ad hoc session/local storage with named keys and a versioned JSON envelope.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

// Bumped whenever a stored payload changes shape.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Serialization error for key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Schema mismatch for key {key}: found v{found}, expected v{expected}")]
    SchemaMismatch {
        key: String,
        found: u32,
        expected: u32,
    },
}

// Every key the checkout reads or writes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageKey {
    BookingData,
    Hotel,
    Rooms,
    PaymentType,
    FullBookingData,
    BookingPosted(String),
    UserCountry,
    Auth,
}

// In-progress checkout entries, cleared after restore or successful submission
pub const TRANSIENT_KEYS: [StorageKey; 5] = [
    StorageKey::BookingData,
    StorageKey::Hotel,
    StorageKey::Rooms,
    StorageKey::PaymentType,
    StorageKey::FullBookingData,
];

const LEGACY_USER_COUNTRY: &str = "usercountry";

impl StorageKey {
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            StorageKey::BookingData => Cow::Borrowed("bookingData"),
            StorageKey::Hotel => Cow::Borrowed("hotel"),
            StorageKey::Rooms => Cow::Borrowed("rooms"),
            StorageKey::PaymentType => Cow::Borrowed("paymentType"),
            StorageKey::FullBookingData => Cow::Borrowed("fullBookingData"),
            StorageKey::BookingPosted(reference) => {
                Cow::Owned(format!("booking_posted_{}", reference))
            }
            StorageKey::UserCountry => Cow::Borrowed("userCountry"),
            StorageKey::Auth => Cow::Borrowed("auth"),
        }
    }
}

// Raw string storage. A browser shell implements this over
// `sessionStorage`/`localStorage`; tests and native shells use MemoryStorage.
pub trait StorageArea: Send + Sync {
    fn get_raw(&self, key: &str) -> Option<String>;

    fn set_raw(&self, key: &str, value: String);

    // Areas without expiry support ignore the ttl
    fn set_raw_with_ttl(&self, key: &str, value: String, _ttl: Option<Duration>) {
        self.set_raw(key, value);
    }

    fn remove(&self, key: &str) -> bool;

    fn contains(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    fn keys(&self) -> Vec<String>;

    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct StorageStats {
    pub reads: AtomicUsize,
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub writes: AtomicUsize,
    pub removals: AtomicUsize,
    pub expired: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStatsReport {
    pub items_count: usize,
    pub reads: usize,
    pub hits: usize,
    pub misses: usize,
    pub writes: usize,
    pub removals: usize,
    pub expired: usize,
}

struct StoredEntry {
    value: String,
    created_at: Instant,
    ttl: Option<Duration>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.ttl
            .map_or(false, |ttl| self.created_at.elapsed() > ttl)
    }
}

pub struct MemoryStorage {
    entries: DashMap<String, StoredEntry>,
    stats: StorageStats,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stats: StorageStats::default(),
        }
    }

    pub fn stats(&self) -> StorageStatsReport {
        StorageStatsReport {
            items_count: self.entries.len(),
            reads: self.stats.reads.load(Ordering::SeqCst),
            hits: self.stats.hits.load(Ordering::SeqCst),
            misses: self.stats.misses.load(Ordering::SeqCst),
            writes: self.stats.writes.load(Ordering::SeqCst),
            removals: self.stats.removals.load(Ordering::SeqCst),
            expired: self.stats.expired.load(Ordering::SeqCst),
        }
    }

    // Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let purged = before.saturating_sub(self.entries.len());
        self.stats.expired.fetch_add(purged, Ordering::SeqCst);
        purged
    }
}

impl StorageArea for MemoryStorage {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.stats.hits.fetch_add(1, Ordering::SeqCst);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        // The read guard is released above; removing while holding it would deadlock the shard
        if expired && self.entries.remove(key).is_some() {
            debug!(key, "storage entry expired");
            self.stats.expired.fetch_add(1, Ordering::SeqCst);
        }
        self.stats.misses.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn set_raw(&self, key: &str, value: String) {
        self.set_raw_with_ttl(key, value, None);
    }

    fn set_raw_with_ttl(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    fn remove(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.removals.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    v: u32,
    data: &'a T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

// Typed view over a StorageArea. Values are written as
// `{"v": SCHEMA_VERSION, "data": ...}`; bare JSON from older shells is
// still accepted on read when it deserializes into the requested type.
#[derive(Clone)]
pub struct TypedStore {
    area: Arc<dyn StorageArea>,
}

impl TypedStore {
    pub fn new(area: Arc<dyn StorageArea>) -> Self {
        Self { area }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn area(&self) -> &Arc<dyn StorageArea> {
        &self.area
    }

    pub fn put<T: Serialize>(&self, key: &StorageKey, value: &T) -> Result<(), StorageError> {
        self.put_with_ttl(key, value, None)
    }

    pub fn put_with_ttl<T: Serialize>(
        &self,
        key: &StorageKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let name = key.name();
        let raw = serde_json::to_string(&EnvelopeOut {
            v: SCHEMA_VERSION,
            data: value,
        })
        .map_err(|source| StorageError::Serialization {
            key: name.to_string(),
            source,
        })?;
        self.area.set_raw_with_ttl(&name, raw, ttl);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &StorageKey) -> Result<Option<T>, StorageError> {
        let name = key.name();
        match self.area.get_raw(&name) {
            Some(raw) => decode(&name, &raw).map(Some),
            None => Ok(None),
        }
    }

    // Read-once: the entry is removed even when it fails to decode
    pub fn take<T: DeserializeOwned>(&self, key: &StorageKey) -> Result<Option<T>, StorageError> {
        let value = self.get(key);
        self.area.remove(&key.name());
        value
    }

    pub fn remove(&self, key: &StorageKey) -> bool {
        self.area.remove(&key.name())
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.area.contains(&key.name())
    }

    pub fn clear_transient(&self) -> usize {
        TRANSIENT_KEYS
            .iter()
            .filter(|key| self.remove(key))
            .count()
    }

    pub fn has_transient(&self) -> bool {
        TRANSIENT_KEYS.iter().any(|key| self.contains(key))
    }

    // Stored country code, falling back to the legacy lowercase key. Older
    // shells stored the bare code without JSON quoting.
    pub fn user_country(&self) -> Option<String> {
        let primary = StorageKey::UserCountry.name();
        let raw = self
            .area
            .get_raw(&primary)
            .or_else(|| self.area.get_raw(LEGACY_USER_COUNTRY))?;

        let code = match decode::<String>(&primary, &raw) {
            Ok(code) => code,
            Err(_) => raw.trim().to_string(),
        };
        let code = code.trim().to_uppercase();

        if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(code)
        } else {
            debug!(code = %code, "ignoring malformed stored country code");
            None
        }
    }

    pub fn bearer_token(&self) -> Option<String> {
        match self.get::<AuthSession>(&StorageKey::Auth) {
            Ok(session) => session
                .map(|s| s.access_token)
                .filter(|token| !token.trim().is_empty()),
            Err(e) => {
                warn!(error = %e, "stored auth session is unreadable");
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StorageError> {
    let serialization = |source| StorageError::Serialization {
        key: key.to_string(),
        source,
    };

    let value: serde_json::Value = serde_json::from_str(raw).map_err(serialization)?;

    let is_envelope = value
        .as_object()
        .map_or(false, |obj| obj.len() == 2 && obj.contains_key("v") && obj.contains_key("data"));

    if is_envelope {
        let found = value["v"].as_u64().unwrap_or(0) as u32;
        if found != SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                key: key.to_string(),
                found,
                expected: SCHEMA_VERSION,
            });
        }
        return serde_json::from_value(value["data"].clone()).map_err(serialization);
    }

    serde_json::from_value(value).map_err(serialization)
}

#[derive(Clone)]
pub struct ClientStorage {
    // Per-tab, in-progress checkout data
    pub session: TypedStore,
    // Survives reloads; holds auth, country and posted markers
    pub local: TypedStore,
}

impl ClientStorage {
    pub fn new(session: TypedStore, local: TypedStore) -> Self {
        Self { session, local }
    }

    pub fn in_memory() -> Self {
        Self::new(TypedStore::in_memory(), TypedStore::in_memory())
    }
}
