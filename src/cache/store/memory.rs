use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::{CacheIndex, CacheStore, GroupDeletion};
use crate::cache::entry::CachedResponse;
use crate::cache::error::CacheResult;
use crate::cache::keys::GroupIndex;
use crate::cache::lock::mutex_lock;

/// How often the background sweeper drops expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct Slot {
    response: CachedResponse,
    // `None` when the TTL overflows the clock; such entries never expire.
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Slots {
    entries: DashMap<String, Slot>,
    groups: Mutex<GroupIndex>,
}

impl Slots {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.retain(|key, slot| {
            let keep = !slot.is_expired(now);
            if !keep {
                expired.push(key.clone());
            }
            keep
        });
        if !expired.is_empty() {
            let mut groups = mutex_lock(&self.groups, "memory.purge_expired");
            for key in &expired {
                groups.remove_key(key);
            }
        }
        expired.len()
    }

    fn forget(&self, key: &str) {
        self.entries.remove(key);
        mutex_lock(&self.groups, "memory.forget").remove_key(key);
    }
}

/// Process-local backend.
///
/// An expired entry is dropped the next time it is read, and a sweeper task
/// removes the rest every [`SWEEP_INTERVAL`]. The sweeper starts with the
/// first write on a tokio runtime and stops once the store is dropped.
/// Nothing survives a restart.
pub struct MemoryStore {
    slots: Arc<Slots>,
    sweep_every: Duration,
    sweeping: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }

    /// A store whose sweeper runs every `every` (at least one millisecond).
    pub fn with_sweep_interval(every: Duration) -> Self {
        Self {
            slots: Arc::default(),
            sweep_every: every.max(Duration::from_millis(1)),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Drops every expired entry and its group memberships.
    pub fn purge_expired(&self) -> usize {
        self.slots.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.slots.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.entries.is_empty()
    }

    fn ensure_sweeper(&self) {
        if self.sweeping.load(Ordering::Acquire) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.sweeping.swap(true, Ordering::AcqRel) {
            return;
        }
        runtime.spawn(sweep(Arc::downgrade(&self.slots), self.sweep_every));
    }
}

async fn sweep(slots: Weak<Slots>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(slots) = slots.upgrade() else {
            break;
        };
        let purged = slots.purge_expired();
        if purged > 0 {
            debug!(purged, "swept expired cache entries");
        }
    }
    debug!("memory store dropped, sweeper stopped");
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<CachedResponse>> {
        let now = Instant::now();
        let slots = &self.slots;
        if let Some(slot) = slots.entries.get(key) {
            if !slot.is_expired(now) {
                return Ok(Some(slot.response.clone()));
            }
        }
        if slots
            .entries
            .remove_if(key, |_, slot| slot.is_expired(now))
            .is_some()
        {
            debug!(key, "expired entry evicted on read");
            mutex_lock(&slots.groups, "memory.get").remove_key(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, response: CachedResponse, duration_ms: u64) -> CacheResult<()> {
        self.ensure_sweeper();
        let expires_at = Instant::now().checked_add(Duration::from_millis(duration_ms));
        self.slots.entries.insert(
            key.to_owned(),
            Slot {
                response,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.slots.forget(key);
        Ok(())
    }

    async fn clear_all(&self) -> CacheResult<usize> {
        let removed = self.slots.entries.len();
        self.slots.entries.clear();
        mutex_lock(&self.slots.groups, "memory.clear_all").clear();
        Ok(removed)
    }

    async fn add_member(&self, group: &str, key: &str) -> CacheResult<()> {
        mutex_lock(&self.slots.groups, "memory.add_member").add(group, key);
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> CacheResult<GroupDeletion> {
        let members = mutex_lock(&self.slots.groups, "memory.delete_group").remove_group(group);
        let removed = members.len();
        for key in &members {
            self.slots.forget(key);
        }
        Ok(GroupDeletion { removed, failed: 0 })
    }

    async fn index(&self) -> CacheResult<CacheIndex> {
        let now = Instant::now();
        let mut all: Vec<String> = self
            .slots
            .entries
            .iter()
            .filter(|slot| !slot.value().is_expired(now))
            .map(|slot| slot.key().clone())
            .collect();
        all.sort();
        let groups = mutex_lock(&self.slots.groups, "memory.index").snapshot();
        Ok(CacheIndex { all, groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, StatusCode};

    fn entry(body: &str) -> CachedResponse {
        CachedResponse::new(StatusCode::OK, Headers::new(), body.to_owned())
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
        store.delete("nope").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store.set("k", entry("v"), 1_000).await.unwrap();
        store.add_member("g", "k").await.unwrap();

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.index().await.unwrap().groups.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let store = MemoryStore::new();
        store.set("short", entry("a"), 10).await.unwrap();
        store.set("long", entry("b"), 10_000).await.unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_without_reads() {
        let store = MemoryStore::new();
        for i in 0..1_000 {
            let key = format!("apicache:/search?q={i}");
            store.set(&key, entry("hit"), 1_000).await.unwrap();
            store.add_member("search", &key).await.unwrap();
        }
        assert_eq!(store.len(), 1_000);

        tokio::time::sleep(SWEEP_INTERVAL * 2).await;
        assert!(store.is_empty());
        assert!(store.index().await.unwrap().groups.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_keeps_live_entries() {
        let store = MemoryStore::with_sweep_interval(Duration::from_millis(100));
        store.set("short", entry("a"), 50).await.unwrap();
        store.set("long", entry("b"), 60_000).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweeper_does_not_keep_the_store_alive() {
        let store = MemoryStore::with_sweep_interval(Duration::from_millis(1));
        store.set("k", entry("v"), 60_000).await.unwrap();
        let slots = Arc::downgrade(&store.slots);
        drop(store);
        assert!(slots.upgrade().is_none());
    }

    #[test]
    fn writes_outside_a_runtime_skip_the_sweeper() {
        let store = MemoryStore::new();
        store.ensure_sweeper();
        assert!(!store.sweeping.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn delete_removes_group_membership() {
        let store = MemoryStore::new();
        store.set("k1", entry("a"), 60_000).await.unwrap();
        store.add_member("users", "k1").await.unwrap();
        store.delete("k1").await.unwrap();
        let index = store.index().await.unwrap();
        assert!(index.all.is_empty());
        assert!(index.groups.is_empty());
    }

    #[tokio::test]
    async fn delete_group_leaves_other_keys() {
        let store = MemoryStore::new();
        for key in ["u1", "u2", "p1", "loose"] {
            store.set(key, entry(key), 60_000).await.unwrap();
        }
        store.add_member("users", "u1").await.unwrap();
        store.add_member("users", "u2").await.unwrap();
        store.add_member("posts", "p1").await.unwrap();

        let outcome = store.delete_group("users").await.unwrap();
        assert_eq!(outcome, GroupDeletion { removed: 2, failed: 0 });
        assert!(store.get("u1").await.unwrap().is_none());
        assert!(store.get("p1").await.unwrap().is_some());
        assert!(store.get("loose").await.unwrap().is_some());
        assert_eq!(store.index().await.unwrap().groups.len(), 1);
    }

    #[tokio::test]
    async fn overwrite_replaces_wholesale() {
        let store = MemoryStore::new();
        store.set("k", entry("first"), 60_000).await.unwrap();
        store.set("k", entry("second"), 60_000).await.unwrap();
        let got = store.get("k").await.unwrap().unwrap();
        assert_eq!(&got.body[..], b"second");
        assert_eq!(store.clear_all().await.unwrap(), 1);
    }
}
