//! Storage backends for the response cache.
//!
//! Every backend implements [`CacheStore`]. Two ship with the crate:
//!
//! - [`MemoryStore`]: a process-local map with lazy TTL expiry.
//! - [`RedisStore`]: a shared Redis server, namespaced by the key prefix.
//!
//! The backend is chosen once, when the cache is configured; callers never
//! branch on the backend kind per request.

mod memory;
mod remote;

pub use memory::MemoryStore;
pub use remote::{RedisOptions, RedisStore};

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::warn;

use super::entry::CachedResponse;
use super::error::CacheResult;

/// Upper bound on concurrent member deletions while clearing a group.
pub(crate) const GROUP_DELETE_CONCURRENCY: usize = 8;

/// Outcome of [`CacheStore::delete_group`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupDeletion {
    /// Member keys that were deleted.
    pub removed: usize,
    /// Member keys whose deletion failed. Failures are logged, not returned.
    pub failed: usize,
}

/// Snapshot of what the cache currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheIndex {
    pub all: Vec<String>,
    pub groups: BTreeMap<String, Vec<String>>,
}

/// Uniform contract over cache backends.
///
/// "Not found" is `Ok(None)` and deleting an absent key is `Ok(())`.
/// Transport failures come back as
/// [`CacheError::Backend`](crate::cache::CacheError::Backend) and are never
/// folded into a miss here: deciding to fail open is the caller's job.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> CacheResult<Option<CachedResponse>>;

    /// Stores `response` under `key` for `duration_ms` milliseconds.
    async fn set(&self, key: &str, response: CachedResponse, duration_ms: u64) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Removes every key the cache owns and returns how many were removed.
    async fn clear_all(&self) -> CacheResult<usize>;

    async fn add_member(&self, group: &str, key: &str) -> CacheResult<()>;

    /// Deletes every member of `group`, then the group itself.
    ///
    /// Member failures are tolerated; only failing to remove the group entry
    /// is an error.
    async fn delete_group(&self, group: &str) -> CacheResult<GroupDeletion>;

    async fn index(&self) -> CacheResult<CacheIndex>;
}

/// Runs `delete` over `members` with bounded concurrency and waits for all
/// of them to settle.
pub(crate) async fn delete_members<F, Fut>(group: &str, members: Vec<String>, delete: F) -> GroupDeletion
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = (String, CacheResult<()>)>,
{
    let results: Vec<_> = stream::iter(members)
        .map(delete)
        .buffer_unordered(GROUP_DELETE_CONCURRENCY)
        .collect()
        .await;

    let mut outcome = GroupDeletion::default();
    for (key, result) in results {
        match result {
            Ok(()) => outcome.removed += 1,
            Err(err) => {
                warn!(group, key = %key, error = %err, "failed to delete group member");
                outcome.failed += 1;
            }
        }
    }

    if outcome.failed > 0 {
        warn!(
            group,
            removed = outcome.removed,
            failed = outcome.failed,
            "group cleared with failures"
        );
    }
    outcome
}
