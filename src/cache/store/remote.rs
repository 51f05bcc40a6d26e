use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CacheIndex, CacheStore, GroupDeletion, delete_members};
use crate::cache::entry::CachedResponse;
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::keys::KeySpace;

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

/// Connection parameters for the Redis backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RedisOptions {
    /// `redis://[user:password@]host[:port][/db]`
    pub url: String,
}

impl RedisOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Backend on a Redis server that may be shared with unrelated data.
///
/// Membership of a group is a Redis set under `<prefix>:group:<name>`; it is
/// the source of truth, and members whose entries already expired are simply
/// deleted again (a no-op) when the group is cleared.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Config`]: the URL is invalid, or the prefix is empty,
    ///   which would let [`clear_all`](CacheStore::clear_all) touch keys the
    ///   cache does not own.
    /// - [`CacheError::Backend`]: the server is unreachable.
    pub async fn connect(options: &RedisOptions, keys: KeySpace) -> CacheResult<Self> {
        if keys.prefix().is_empty() {
            return Err(CacheError::config(
                "the redis backend requires a non-empty key prefix",
            ));
        }
        let client = redis::Client::open(options.url.as_str())
            .map_err(|e| CacheError::config(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        info!(prefix = keys.prefix(), "connected to redis cache backend");
        Ok(Self { conn, keys })
    }

    async fn scan_owned(&self) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = self.keys.owned_pattern();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        found.sort();
        found.dedup();
        Ok(found)
    }
}

/// Redis expiry in whole seconds: rounded to nearest, never below one.
pub(crate) fn ttl_seconds(duration_ms: u64) -> u64 {
    (duration_ms.saturating_add(500) / 1000).max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<CachedResponse>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match CachedResponse::decode(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(key, error = %CacheError::from(err), "treating undecodable entry as a miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, response: CachedResponse, duration_ms: u64) -> CacheResult<()> {
        let raw = response.encode()?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, raw, ttl_seconds(duration_ms)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn clear_all(&self) -> CacheResult<usize> {
        let owned = self.scan_owned().await?;
        let mut conn = self.conn.clone();
        for chunk in owned.chunks(SCAN_BATCH) {
            let _: () = conn.del(chunk).await?;
        }
        debug!(removed = owned.len(), "cleared namespaced redis keys");
        Ok(owned.len())
    }

    async fn add_member(&self, group: &str, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(self.keys.group_key(group), key).await?;
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> CacheResult<GroupDeletion> {
        let group_key = self.keys.group_key(group);
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(&group_key).await?;

        let outcome = delete_members(group, members, |key| {
            let mut conn = self.conn.clone();
            async move {
                let result = conn.del::<_, ()>(&key).await.map_err(CacheError::from);
                (key, result)
            }
        })
        .await;

        let _: () = conn.del(&group_key).await?;
        Ok(outcome)
    }

    async fn index(&self) -> CacheResult<CacheIndex> {
        let mut conn = self.conn.clone();
        let group_prefix = self.keys.group_key("");
        let mut all = Vec::new();
        let mut groups = BTreeMap::new();
        for key in self.scan_owned().await? {
            match key.strip_prefix(&group_prefix) {
                Some(name) => {
                    let mut members: Vec<String> = conn.smembers(&key).await?;
                    members.sort();
                    groups.insert(name.to_owned(), members);
                }
                None => all.push(key),
            }
        }
        Ok(CacheIndex { all, groups })
    }
}
