//! Read-through cache in front of the ranking engine and aggregates.
//!
//! Every cached operation follows the same path: look the key up, return
//! the stored value on a hit, otherwise compute it, store it for the
//! operation's TTL and return it. Leaderboards are stored in their compact
//! [`codec`](crate::codec) form and rehydrated on every read, hit or miss.
//!
//! There is no single-flight: concurrent misses on one key may both compute,
//! and the last write wins. Staleness is bounded by the TTL alone; writes to
//! the chat store do not evict anything.

pub mod key;
pub mod store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::aggregation;
use crate::codec::{self, CachedRecord, ROOM_ATTRIBUTES, USER_ATTRIBUTES};
use crate::error::Result;
use crate::model::{
    DailyCount, HistoryOrder, LeaderboardEntry, Limit, NewestMember, RankResult, RoomActivity,
    RoomId, Scope, SystemMetrics, UserId,
};
use crate::period::Period;
use crate::ranking;
use crate::resources::{ResourceSampler, Unsampled};
use crate::storage::Storage;

pub use key::{KeySpace, Operation};
pub use store::{CacheStore, MemoryStore};

/// TTL of per-room leaderboards and ranks.
pub const ROOM_STATS_TTL: Duration = Duration::from_secs(5 * 60);
pub const SYSTEM_METRICS_TTL: Duration = Duration::from_secs(5 * 60);
pub const TOP_ROOMS_TTL: Duration = Duration::from_secs(10 * 60);
pub const NEWEST_MEMBERS_TTL: Duration = Duration::from_secs(10 * 60);
pub const RECENT_HISTORY_TTL: Duration = Duration::from_secs(5 * 60);
pub const ALL_TIME_HISTORY_TTL: Duration = Duration::from_secs(15 * 60);

/// Cached access to every stats operation.
#[derive(Clone)]
pub struct StatsCache {
    storage: Storage,
    store: Arc<dyn CacheStore>,
    sampler: Arc<dyn ResourceSampler>,
    keys: KeySpace,
}

impl StatsCache {
    /// A cache over `storage` backed by `store`, with no resource sampler.
    pub fn new(storage: Storage, store: Arc<dyn CacheStore>) -> Self {
        Self {
            storage,
            store,
            sampler: Arc::new(Unsampled),
            keys: KeySpace::default(),
        }
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.keys = KeySpace::new(prefix);
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Return the value under `key`, computing and storing it on a miss.
    ///
    /// A stored payload that no longer decodes as `T` is treated as a miss
    /// and overwritten.
    pub async fn fetch<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(payload) = self.store.get(key).await {
            match serde_json::from_str(&payload) {
                Ok(value) => {
                    debug!(key, "Stats cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
            }
        }

        debug!(key, ttl_secs = ttl.as_secs(), "Stats cache miss");
        let value = compute().await?;
        self.store
            .set(key, serde_json::to_string(&value)?, ttl)
            .await;

        Ok(value)
    }

    /// Top posters for any scope.
    ///
    /// Room scope ignores `period` and is cached under the room's key.
    pub async fn top_posters(
        &self,
        scope: Scope,
        period: Period,
        limit: Limit,
    ) -> Result<Vec<LeaderboardEntry>> {
        match scope {
            Scope::Global => self.fetch_top_posters(period, limit).await,
            Scope::Room(room_id) => self.fetch_room_top_posters(room_id, limit).await,
        }
    }

    /// Rank of one user for any scope.
    pub async fn rank_of(
        &self,
        scope: Scope,
        period: Period,
        user_id: UserId,
    ) -> Result<Option<RankResult>> {
        match scope {
            Scope::Global => self.fetch_user_stats(user_id, period).await,
            Scope::Room(room_id) => self.fetch_room_user_stats(room_id, user_id).await,
        }
    }

    /// Global top posters for a period, cached for the period's TTL.
    #[instrument(skip(self))]
    pub async fn fetch_top_posters(
        &self,
        period: Period,
        limit: Limit,
    ) -> Result<Vec<LeaderboardEntry>> {
        let key = self.keys.key(
            Operation::TopPosters,
            &[period.to_string(), limit.to_string()],
        );
        let storage = &self.storage;

        let records: Vec<CachedRecord<i64>> = self
            .fetch(&key, period.ttl(), || async move {
                let entries =
                    ranking::top_posters(storage, Scope::Global, period, limit, Utc::now())
                        .await?;
                Ok(codec::serialize(&entries, USER_ATTRIBUTES))
            })
            .await?;

        codec::deserialize_users(storage, records).await
    }

    /// Top posters of one room, threads included.
    #[instrument(skip(self))]
    pub async fn fetch_room_top_posters(
        &self,
        room_id: RoomId,
        limit: Limit,
    ) -> Result<Vec<LeaderboardEntry>> {
        let key = self.keys.key(
            Operation::RoomTopPosters,
            &[room_id.to_string(), limit.to_string()],
        );
        let storage = &self.storage;

        let records: Vec<CachedRecord<i64>> = self
            .fetch(&key, ROOM_STATS_TTL, || async move {
                let entries = ranking::top_posters(
                    storage,
                    Scope::Room(room_id),
                    Period::AllTime,
                    limit,
                    Utc::now(),
                )
                .await?;
                Ok(codec::serialize(&entries, USER_ATTRIBUTES))
            })
            .await?;

        codec::deserialize_users(storage, records).await
    }

    /// Global rank of one user, cached for the period's TTL.
    #[instrument(skip(self))]
    pub async fn fetch_user_stats(
        &self,
        user_id: UserId,
        period: Period,
    ) -> Result<Option<RankResult>> {
        let key = self.keys.key(
            Operation::UserStats,
            &[user_id.to_string(), period.to_string()],
        );
        let storage = &self.storage;

        self.fetch(&key, period.ttl(), || async move {
            ranking::rank_of(storage, Scope::Global, period, user_id, Utc::now()).await
        })
        .await
    }

    /// Rank of one user within one room.
    #[instrument(skip(self))]
    pub async fn fetch_room_user_stats(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RankResult>> {
        let key = self.keys.key(
            Operation::RoomUserStats,
            &[room_id.to_string(), user_id.to_string()],
        );
        let storage = &self.storage;

        self.fetch(&key, ROOM_STATS_TTL, || async move {
            ranking::rank_of(
                storage,
                Scope::Room(room_id),
                Period::AllTime,
                user_id,
                Utc::now(),
            )
            .await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn fetch_top_rooms(&self, limit: Limit) -> Result<Vec<RoomActivity>> {
        let key = self.keys.key(Operation::TopRooms, &[limit.to_string()]);
        let storage = &self.storage;

        let records: Vec<CachedRecord<i64>> = self
            .fetch(&key, TOP_ROOMS_TTL, || async move {
                let rooms = aggregation::top_rooms(storage, limit).await?;
                Ok(codec::serialize(&rooms, ROOM_ATTRIBUTES))
            })
            .await?;

        codec::deserialize_rooms(storage, records).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_newest_members(&self, limit: Limit) -> Result<Vec<NewestMember>> {
        let key = self.keys.key(Operation::NewestMembers, &[limit.to_string()]);
        let storage = &self.storage;

        let records = self
            .fetch(&key, NEWEST_MEMBERS_TTL, || async move {
                let members = aggregation::newest_members(storage, limit).await?;
                Ok(codec::serialize(&members, &["name"]))
            })
            .await?;

        codec::deserialize_users(storage, records).await
    }

    /// Daily counts for the most recent `days` days with messages.
    #[instrument(skip(self))]
    pub async fn fetch_message_history_recent(&self, days: u32) -> Result<Vec<DailyCount>> {
        let key = self.keys.key(
            Operation::MessageHistory,
            &["recent".to_string(), days.to_string()],
        );
        let storage = &self.storage;

        self.fetch(&key, RECENT_HISTORY_TTL, || async move {
            aggregation::message_history(storage, Limit::Top(days), HistoryOrder::NewestFirst)
                .await
        })
        .await
    }

    /// Daily counts since the first message, oldest first.
    #[instrument(skip(self))]
    pub async fn fetch_message_history_all_time(&self) -> Result<Vec<DailyCount>> {
        let key = self.keys.key(
            Operation::MessageHistory,
            &[Period::AllTime.to_string()],
        );
        let storage = &self.storage;

        self.fetch(&key, ALL_TIME_HISTORY_TTL, || async move {
            aggregation::message_history(storage, Limit::Unbounded, HistoryOrder::OldestFirst)
                .await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn fetch_system_metrics(&self) -> Result<SystemMetrics> {
        let key = self.keys.key(Operation::SystemMetrics, &[]);
        let storage = &self.storage;
        let sampler = self.sampler.as_ref();

        self.fetch(&key, SYSTEM_METRICS_TTL, || async move {
            aggregation::system_metrics(storage, sampler).await
        })
        .await
    }

    /// Evict cache entries of one operation.
    ///
    /// With no `params` every key of the operation goes; otherwise exactly
    /// the key built from `params`. Returns how many entries were removed.
    pub async fn invalidate(&self, operation: Operation, params: &[String]) -> usize {
        let removed = if params.is_empty() {
            let bare = usize::from(self.store.delete(&self.keys.key(operation, &[])).await);
            bare + self
                .store
                .delete_by_prefix(&self.keys.pattern(operation, &[]))
                .await
        } else {
            usize::from(self.store.delete(&self.keys.key(operation, params)).await)
        };

        debug!(%operation, ?params, removed, "Stats cache invalidated");
        removed
    }

    /// Evict every key of `operation` whose leading parameters are `leading`,
    /// e.g. all limits of `top_posters:month` or all periods of one user.
    pub async fn invalidate_matching(&self, operation: Operation, leading: &[String]) -> usize {
        let removed = self
            .store
            .delete_by_prefix(&self.keys.pattern(operation, leading))
            .await;

        debug!(%operation, ?leading, removed, "Stats cache invalidated by pattern");
        removed
    }

    /// Evict every stats entry.
    pub async fn clear_all(&self) -> usize {
        let removed = self.store.delete_by_prefix(&self.keys.all()).await;

        debug!(removed, "Stats cache cleared");
        removed
    }
}
