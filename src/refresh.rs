//! Periodic cache warming.
//!
//! [`refresh_all`] reads every stats view users see by default, so entries
//! that expired since the last run are recomputed before a request needs
//! them. It adds no logic of its own beyond choosing what to warm.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cache::StatsCache;
use crate::error::Result;
use crate::model::Limit;
use crate::period::Period;

/// Leaderboard, room and member list length warmed by the refresh.
pub const DEFAULT_LIMIT: Limit = Limit::Top(10);

/// Days of recent message history warmed by the refresh.
pub const RECENT_HISTORY_DAYS: u32 = 7;

/// What one refresh pass touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RefreshReport {
    pub periods: Vec<Period>,
    pub leaderboard_entries: usize,
    pub top_rooms: usize,
    pub newest_members: usize,
    pub history_days: usize,
}

/// Warm the global leaderboard for every period plus the auxiliary
/// aggregates. Store failures abort the pass and are returned.
pub async fn refresh_all(cache: &StatsCache) -> Result<RefreshReport> {
    let mut report = RefreshReport::default();

    for period in Period::ALL {
        let entries = cache.fetch_top_posters(period, DEFAULT_LIMIT).await?;
        report.leaderboard_entries += entries.len();
        report.periods.push(period);
    }

    cache.fetch_system_metrics().await?;
    report.top_rooms = cache.fetch_top_rooms(DEFAULT_LIMIT).await?.len();
    report.history_days = cache
        .fetch_message_history_recent(RECENT_HISTORY_DAYS)
        .await?
        .len();
    cache.fetch_message_history_all_time().await?;
    report.newest_members = cache.fetch_newest_members(DEFAULT_LIMIT).await?.len();

    info!(
        periods = ?report.periods,
        leaderboard_entries = report.leaderboard_entries,
        top_rooms = report.top_rooms,
        newest_members = report.newest_members,
        "Stats cache refreshed"
    );

    Ok(report)
}

/// Run [`refresh_all`] every `every`, starting immediately.
///
/// A failed pass is logged and the loop carries on with the next tick.
pub fn spawn_refresh_loop(cache: StatsCache, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = refresh_all(&cache).await {
                warn!(error = %e, "Stats cache refresh failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::storage::{NewMessage, NewRoom, NewUser, Storage};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_refresh_warms_every_view() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        let room = storage.insert_room(&NewRoom::open("lobby", now)).await.unwrap();
        let user = storage.insert_user(&NewUser::new("ada", now)).await.unwrap();
        storage
            .insert_message(&NewMessage::new(room, user, now))
            .await
            .unwrap();

        let store = Arc::new(MemoryStore::new());
        let cache = StatsCache::new(storage, store.clone());

        let report = refresh_all(&cache).await.unwrap();

        assert_eq!(report.periods, Period::ALL.to_vec());
        assert_eq!(report.leaderboard_entries, 4);
        assert_eq!(report.top_rooms, 1);
        assert_eq!(report.newest_members, 1);
        assert_eq!(report.history_days, 1);

        for key in [
            "stats:top_posters:today:10",
            "stats:top_posters:month:10",
            "stats:top_posters:year:10",
            "stats:top_posters:all_time:10",
            "stats:system_metrics",
            "stats:top_rooms:10",
            "stats:message_history:recent:7",
            "stats:message_history:all_time",
            "stats:newest_members:10",
        ] {
            assert!(store.exists(key).await, "{key} not warmed");
        }
    }

    #[tokio::test]
    async fn test_refresh_returns_store_failures() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        storage.close().await;
        let cache = StatsCache::new(storage, Arc::new(MemoryStore::new()));

        let err = refresh_all(&cache).await.unwrap_err();

        assert!(matches!(err, crate::error::StatsError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_refresh_loop_runs_immediately() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = StatsCache::new(storage, store.clone());

        let handle = spawn_refresh_loop(cache, Duration::from_secs(3600));

        let mut warmed = false;
        for _ in 0..100 {
            if store.exists("stats:newest_members:10").await {
                warmed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert!(warmed);
    }
}
