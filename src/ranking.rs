//! Leaderboard ranking over the chat store.
//!
//! A user's qualifying messages are their active messages in scope:
//!
//! - **Global**: any room that is not a direct conversation, restricted to
//!   the period's interval. A thread counts as its parent message's room,
//!   so threads started in a direct conversation are excluded too.
//! - **Room**: the room itself plus every thread whose parent message lives
//!   in it. Room scope is always all-time.
//!
//! Only eligible users (active, not suspended) are counted. Leaderboards are
//! ordered by message count descending, then `joined_at` ascending, then
//! user id ascending, so every run over the same data agrees.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use crate::error::Result;
use crate::model::{LeaderboardEntry, Limit, Projection, RankResult, Scope, User, UserId};
use crate::period::{Interval, Period};
use crate::storage::{Storage, USER_COLUMNS, user_from_row};

/// SQL expression for a user's join date in unix seconds.
const JOINED_AT: &str = "COALESCE(users.membership_started_at, users.created_at)";

/// Compute the top posters for a scope and period.
///
/// Returns an empty leaderboard, never an error, when nobody qualifies
/// (including when the room does not exist).
pub async fn top_posters(
    storage: &Storage,
    scope: Scope,
    period: Period,
    limit: Limit,
    now: DateTime<Utc>,
) -> Result<Vec<LeaderboardEntry>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {USER_COLUMNS}, COUNT(DISTINCT messages.id) AS message_count"
    ));
    push_qualifying_messages(&mut query, scope, window(scope, period, now));
    query.push(format!(
        " GROUP BY users.id ORDER BY message_count DESC, {JOINED_AT} ASC, users.id ASC LIMIT "
    ));
    query.push_bind(limit.sql_value());

    let rows = query.build().fetch_all(storage.pool()).await?;

    let entries = rows
        .iter()
        .map(|row| -> Result<LeaderboardEntry> {
            Ok(Projection::new(
                user_from_row(row)?,
                row.try_get("message_count")?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(?scope, %period, %limit, entries = entries.len(), "Top posters computed");

    Ok(entries)
}

/// Compute one user's rank and message count for a scope and period.
///
/// Returns `None` when the user does not exist, is not eligible, or has no
/// qualifying messages. The rank equals the user's 1-based position in the
/// unbounded [`top_posters`] leaderboard, without materializing it.
pub async fn rank_of(
    storage: &Storage,
    scope: Scope,
    period: Period,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Option<RankResult>> {
    let Some(user) = storage.find_user(user_id).await? else {
        return Ok(None);
    };
    if !user.is_eligible() {
        return Ok(None);
    }

    let window = window(scope, period, now);
    let message_count = count_user_messages(storage, scope, window, user_id).await?;
    if message_count == 0 {
        return Ok(None);
    }

    let ahead = count_users_ahead(storage, scope, window, &user, message_count).await?;

    Ok(Some(RankResult {
        rank: ahead + 1,
        message_count,
    }))
}

/// The time restriction applied to a scope. Room scope is always all-time.
fn window(scope: Scope, period: Period, now: DateTime<Utc>) -> Option<Interval> {
    match scope {
        Scope::Global => period.interval(now),
        Scope::Room(_) => None,
    }
}

/// Append the `FROM ... WHERE ...` clause selecting qualifying messages of
/// eligible users. Callers may extend the `WHERE` with further `AND` terms.
fn push_qualifying_messages(
    query: &mut QueryBuilder<'_, Sqlite>,
    scope: Scope,
    window: Option<Interval>,
) {
    match scope {
        Scope::Global => {
            query.push(
                " FROM users \
                 INNER JOIN messages ON messages.creator_id = users.id \
                 INNER JOIN rooms ON rooms.id = messages.room_id \
                 LEFT JOIN messages parent_messages \
                 ON parent_messages.id = rooms.parent_message_id AND rooms.kind = 'thread' \
                 LEFT JOIN rooms parent_rooms ON parent_rooms.id = parent_messages.room_id \
                 WHERE users.active = 1 AND users.suspended_at IS NULL \
                 AND messages.active = 1 \
                 AND COALESCE(parent_rooms.kind, rooms.kind) != 'direct'",
            );
        }
        Scope::Room(room_id) => {
            query
                .push(
                    " FROM users \
                     INNER JOIN messages ON messages.creator_id = users.id \
                     LEFT JOIN rooms threads \
                     ON threads.id = messages.room_id AND threads.kind = 'thread' \
                     LEFT JOIN messages parent_messages \
                     ON parent_messages.id = threads.parent_message_id \
                     WHERE users.active = 1 AND users.suspended_at IS NULL \
                     AND messages.active = 1 \
                     AND (messages.room_id = ",
                )
                .push_bind(room_id)
                .push(" OR parent_messages.room_id = ")
                .push_bind(room_id)
                .push(")");
        }
    }

    if let Some(interval) = window {
        query
            .push(" AND messages.created_at >= ")
            .push_bind(interval.start.timestamp())
            .push(" AND messages.created_at < ")
            .push_bind(interval.end.timestamp());
    }
}

async fn count_user_messages(
    storage: &Storage,
    scope: Scope,
    window: Option<Interval>,
    user_id: UserId,
) -> Result<i64> {
    let mut query =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(DISTINCT messages.id) AS message_count");
    push_qualifying_messages(&mut query, scope, window);
    query.push(" AND users.id = ").push_bind(user_id);

    let row = query.build().fetch_one(storage.pool()).await?;

    Ok(row.try_get("message_count")?)
}

/// Count eligible users ordered strictly ahead of `user` on the leaderboard.
async fn count_users_ahead(
    storage: &Storage,
    scope: Scope,
    window: Option<Interval>,
    user: &User,
    message_count: i64,
) -> Result<i64> {
    let joined_at = user.joined_at().timestamp();

    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT COUNT(*) AS ahead FROM (\
         SELECT users.id AS user_id, \
         COUNT(DISTINCT messages.id) AS message_count, \
         {JOINED_AT} AS joined_at"
    ));
    push_qualifying_messages(&mut query, scope, window);
    query
        .push(" GROUP BY users.id) ranked WHERE ranked.message_count > ")
        .push_bind(message_count)
        .push(" OR (ranked.message_count = ")
        .push_bind(message_count)
        .push(" AND (ranked.joined_at < ")
        .push_bind(joined_at)
        .push(" OR (ranked.joined_at = ")
        .push_bind(joined_at)
        .push(" AND ranked.user_id < ")
        .push_bind(user.id)
        .push(")))");

    let row = query.build().fetch_one(storage.pool()).await?;

    Ok(row.try_get("ahead")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatsError;
    use crate::model::RoomId;
    use crate::storage::{NewMessage, NewRoom, NewUser};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        storage: Storage,
        now: DateTime<Utc>,
        lobby: RoomId,
        direct: RoomId,
    }

    async fn setup() -> Fixture {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let created = now - Duration::days(365);

        let lobby = storage
            .insert_room(&NewRoom::open("lobby", created))
            .await
            .unwrap();
        let direct = storage
            .insert_room(&NewRoom::direct("dm", created))
            .await
            .unwrap();

        Fixture {
            storage,
            now,
            lobby,
            direct,
        }
    }

    impl Fixture {
        async fn user(&self, name: &str, joined_days_ago: i64) -> UserId {
            let user = NewUser::new(name, self.now - Duration::days(joined_days_ago));
            self.storage.insert_user(&user).await.unwrap()
        }

        async fn post(&self, room: RoomId, user: UserId, count: usize) {
            self.post_at(room, user, count, self.now - Duration::hours(1))
                .await;
        }

        async fn post_at(&self, room: RoomId, user: UserId, count: usize, at: DateTime<Utc>) {
            for _ in 0..count {
                self.storage
                    .insert_message(&NewMessage::new(room, user, at))
                    .await
                    .unwrap();
            }
        }

        async fn top(&self, scope: Scope, period: Period, limit: Limit) -> Vec<(UserId, i64)> {
            top_posters(&self.storage, scope, period, limit, self.now)
                .await
                .unwrap()
                .into_iter()
                .map(|e| (e.entity.id, e.value))
                .collect()
        }

        async fn rank(&self, scope: Scope, period: Period, user: UserId) -> Option<RankResult> {
            rank_of(&self.storage, scope, period, user, self.now)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_inactive_messages_do_not_count() {
        let f = setup().await;
        let a = f.user("a", 30).await;
        let b = f.user("b", 30).await;

        f.post(f.lobby, a, 3).await;
        for _ in 0..2 {
            f.storage
                .insert_message(&NewMessage::new(f.lobby, a, f.now - Duration::hours(2)).inactive())
                .await
                .unwrap();
        }
        f.post(f.lobby, b, 5).await;

        let top = f.top(Scope::Global, Period::Month, Limit::Top(10)).await;
        assert_eq!(top, vec![(b, 5), (a, 3)]);

        let rank = f.rank(Scope::Global, Period::Month, a).await;
        assert_eq!(
            rank,
            Some(RankResult {
                rank: 2,
                message_count: 3
            })
        );
    }

    #[tokio::test]
    async fn test_direct_rooms_are_excluded_globally() {
        let f = setup().await;
        let a = f.user("a", 30).await;
        let c = f.user("c", 30).await;

        f.post(f.lobby, a, 1).await;
        f.post(f.direct, c, 7).await;

        let top = f.top(Scope::Global, Period::AllTime, Limit::Top(10)).await;
        assert_eq!(top, vec![(a, 1)]);
        assert!(f.rank(Scope::Global, Period::AllTime, c).await.is_none());
    }

    #[tokio::test]
    async fn test_ineligible_users_are_never_ranked() {
        let f = setup().await;
        let active = f.user("active", 30).await;
        let inactive = f
            .storage
            .insert_user(&NewUser::new("inactive", f.now).inactive())
            .await
            .unwrap();
        let suspended = f
            .storage
            .insert_user(&NewUser::new("suspended", f.now).with_suspension(f.now))
            .await
            .unwrap();

        f.post(f.lobby, active, 1).await;
        f.post(f.lobby, inactive, 10).await;
        f.post(f.lobby, suspended, 10).await;

        for scope in [Scope::Global, Scope::Room(f.lobby)] {
            let top = f.top(scope, Period::AllTime, Limit::Unbounded).await;
            assert_eq!(top, vec![(active, 1)]);
            assert!(f.rank(scope, Period::AllTime, inactive).await.is_none());
            assert!(f.rank(scope, Period::AllTime, suspended).await.is_none());
            assert_eq!(f.rank(scope, Period::AllTime, active).await.unwrap().rank, 1);
        }
    }

    #[tokio::test]
    async fn test_ties_break_on_earlier_join() {
        let f = setup().await;
        let newer = f.user("newer", 10).await;
        let older = f.user("older", 100).await;

        f.post(f.lobby, newer, 2).await;
        f.post(f.lobby, older, 2).await;

        let top = f.top(Scope::Global, Period::Today, Limit::Top(10)).await;
        assert_eq!(top, vec![(older, 2), (newer, 2)]);
        assert_eq!(f.rank(Scope::Global, Period::Today, older).await.unwrap().rank, 1);
        assert_eq!(f.rank(Scope::Global, Period::Today, newer).await.unwrap().rank, 2);
    }

    #[tokio::test]
    async fn test_membership_start_overrides_account_creation() {
        let f = setup().await;
        let veteran = f.user("veteran", 10).await;
        let rejoined = f
            .storage
            .insert_user(
                &NewUser::new("rejoined", f.now - Duration::days(500))
                    .with_membership_start(f.now - Duration::days(5)),
            )
            .await
            .unwrap();

        f.post(f.lobby, rejoined, 4).await;
        f.post(f.lobby, veteran, 4).await;

        let top = f.top(Scope::Global, Period::AllTime, Limit::Top(10)).await;
        assert_eq!(top, vec![(veteran, 4), (rejoined, 4)]);
    }

    #[tokio::test]
    async fn test_full_ties_break_on_user_id() {
        let f = setup().await;
        let first = f.user("first", 20).await;
        let second = f.user("second", 20).await;

        f.post(f.lobby, second, 3).await;
        f.post(f.lobby, first, 3).await;

        let top = f.top(Scope::Global, Period::Year, Limit::Top(10)).await;
        assert_eq!(top, vec![(first, 3), (second, 3)]);
        assert_eq!(f.rank(Scope::Global, Period::Year, first).await.unwrap().rank, 1);
        assert_eq!(f.rank(Scope::Global, Period::Year, second).await.unwrap().rank, 2);
    }

    #[tokio::test]
    async fn test_thread_messages_roll_up_to_parent_room() {
        let f = setup().await;
        let a = f.user("a", 30).await;
        let b = f.user("b", 30).await;

        let parent = f
            .storage
            .insert_message(&NewMessage::new(f.lobby, a, f.now - Duration::hours(3)))
            .await
            .unwrap();
        let thread = f
            .storage
            .insert_room(&NewRoom::thread(parent, f.now))
            .await
            .unwrap();
        f.post(thread, b, 4).await;

        let top = f.top(Scope::Room(f.lobby), Period::AllTime, Limit::Top(10)).await;
        assert_eq!(top, vec![(b, 4), (a, 1)]);
        assert_eq!(
            f.rank(Scope::Room(f.lobby), Period::AllTime, b).await,
            Some(RankResult {
                rank: 1,
                message_count: 4
            })
        );

        // Thread messages count globally too
        let top = f.top(Scope::Global, Period::AllTime, Limit::Top(10)).await;
        assert_eq!(top, vec![(b, 4), (a, 1)]);
    }

    #[tokio::test]
    async fn test_room_scope_ignores_other_rooms() {
        let f = setup().await;
        let other = f
            .storage
            .insert_room(&NewRoom::open("other", f.now))
            .await
            .unwrap();
        let a = f.user("a", 30).await;
        let b = f.user("b", 30).await;

        f.post(f.lobby, a, 1).await;
        f.post(other, b, 9).await;

        let top = f.top(Scope::Room(f.lobby), Period::AllTime, Limit::Top(10)).await;
        assert_eq!(top, vec![(a, 1)]);
        assert!(f.rank(Scope::Room(f.lobby), Period::AllTime, b).await.is_none());
    }

    #[tokio::test]
    async fn test_room_scope_is_all_time() {
        let f = setup().await;
        let a = f.user("a", 800).await;

        f.post_at(f.lobby, a, 2, f.now - Duration::days(400)).await;

        let top = f.top(Scope::Room(f.lobby), Period::Today, Limit::Top(10)).await;
        assert_eq!(top, vec![(a, 2)]);
    }

    #[tokio::test]
    async fn test_periods_filter_by_message_time() {
        let f = setup().await;
        let a = f.user("a", 800).await;

        f.post(f.lobby, a, 1).await;
        f.post_at(f.lobby, a, 2, f.now - Duration::days(3)).await;
        f.post_at(f.lobby, a, 4, f.now - Duration::days(60)).await;
        f.post_at(f.lobby, a, 8, f.now - Duration::days(400)).await;

        for (period, expected) in [
            (Period::Today, 1),
            (Period::Month, 3),
            (Period::Year, 7),
            (Period::AllTime, 15),
        ] {
            let rank = f.rank(Scope::Global, period, a).await.unwrap();
            assert_eq!(rank.message_count, expected, "{period}");

            let top = f.top(Scope::Global, period, Limit::Top(10)).await;
            assert_eq!(top, vec![(a, expected)]);
        }
    }

    #[tokio::test]
    async fn test_limit_bounds_result() {
        let f = setup().await;
        for (i, name) in ["a", "b", "c", "d"].into_iter().enumerate() {
            let user = f.user(name, 30).await;
            f.post(f.lobby, user, i + 1).await;
        }

        assert_eq!(f.top(Scope::Global, Period::Month, Limit::Top(2)).await.len(), 2);
        assert_eq!(f.top(Scope::Global, Period::Month, Limit::Unbounded).await.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_and_missing_data() {
        let f = setup().await;
        let quiet = f.user("quiet", 30).await;

        assert!(f.top(Scope::Global, Period::AllTime, Limit::Top(10)).await.is_empty());
        assert!(f.top(Scope::Room(9999), Period::AllTime, Limit::Top(10)).await.is_empty());
        assert!(f.rank(Scope::Global, Period::AllTime, quiet).await.is_none());
        assert!(f.rank(Scope::Global, Period::AllTime, 9999).await.is_none());
        assert!(f.rank(Scope::Room(9999), Period::AllTime, quiet).await.is_none());
    }

    #[tokio::test]
    async fn test_rank_matches_leaderboard_position() {
        let f = setup().await;
        let counts = [3, 1, 3, 5, 1, 3, 2];
        for (i, count) in counts.into_iter().enumerate() {
            let user = f.user(&format!("user-{i}"), (i % 3) as i64 * 10).await;
            f.post(f.lobby, user, count).await;
        }

        for scope in [Scope::Global, Scope::Room(f.lobby)] {
            let top = f.top(scope, Period::Month, Limit::Unbounded).await;
            assert_eq!(top.len(), counts.len());

            // Repeated calls agree
            assert_eq!(top, f.top(scope, Period::Month, Limit::Unbounded).await);

            for (index, (user, count)) in top.into_iter().enumerate() {
                let rank = f.rank(scope, Period::Month, user).await.unwrap();
                assert_eq!(rank.rank, index as i64 + 1);
                assert_eq!(rank.message_count, count);
            }
        }
    }

    #[tokio::test]
    async fn test_threads_in_direct_rooms_are_excluded_globally() {
        let f = setup().await;
        let a = f.user("a", 30).await;
        let b = f.user("b", 30).await;

        let parent = f
            .storage
            .insert_message(&NewMessage::new(f.direct, a, f.now - Duration::hours(3)))
            .await
            .unwrap();
        let thread = f
            .storage
            .insert_room(&NewRoom::thread(parent, f.now))
            .await
            .unwrap();
        f.post(thread, b, 4).await;
        f.post(f.lobby, a, 1).await;

        let top = f.top(Scope::Global, Period::AllTime, Limit::Unbounded).await;
        assert_eq!(top, vec![(a, 1)]);
        assert_eq!(f.rank(Scope::Global, Period::AllTime, b).await, None);

        // Within the direct room itself the thread still rolls up
        let top = f.top(Scope::Room(f.direct), Period::AllTime, Limit::Unbounded).await;
        assert_eq!(top, vec![(b, 4), (a, 1)]);
    }

    #[tokio::test]
    async fn test_store_failures_propagate() {
        let f = setup().await;
        let a = f.user("a", 30).await;
        f.post(f.lobby, a, 1).await;

        f.storage.close().await;

        let err = top_posters(&f.storage, Scope::Global, Period::Month, Limit::Top(10), f.now)
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::StoreUnavailable(_)));
        assert!(!err.is_client_error());

        let err = rank_of(&f.storage, Scope::Room(f.lobby), Period::AllTime, a, f.now)
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::StoreUnavailable(_)));
    }
}
