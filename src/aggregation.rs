//! Auxiliary aggregates shown next to the leaderboards.
//!
//! Top rooms, newest members, daily message history and application
//! metrics. Like the leaderboards, these are computed from the store on
//! every call and cached by [`crate::cache::StatsCache`].

use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use crate::error::Result;
use crate::model::{
    ApplicationMetrics, DailyCount, HistoryOrder, Limit, NewestMember, Projection, RoomActivity,
    SystemMetrics,
};
use crate::resources::ResourceSampler;
use crate::storage::{
    ROOM_COLUMNS, Storage, USER_COLUMNS, room_from_row, timestamp_column, user_from_row,
};

/// Open rooms ordered by active message count, threads rolled up into
/// their parent room. Rooms without messages are included with a count of 0.
pub async fn top_rooms(storage: &Storage, limit: Limit) -> Result<Vec<RoomActivity>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        r#"
        SELECT {ROOM_COLUMNS}, COALESCE(counts.message_count, 0) AS message_count
        FROM rooms
        LEFT JOIN (
            SELECT
                COALESCE(parent_messages.room_id, messages.room_id) AS room_id,
                COUNT(DISTINCT messages.id) AS message_count
            FROM messages
            LEFT JOIN rooms threads
                ON threads.id = messages.room_id AND threads.kind = 'thread'
            LEFT JOIN messages parent_messages
                ON parent_messages.id = threads.parent_message_id
            WHERE messages.active = 1
            GROUP BY COALESCE(parent_messages.room_id, messages.room_id)
        ) counts ON counts.room_id = rooms.id
        WHERE rooms.kind = 'open'
        ORDER BY message_count DESC, rooms.created_at ASC, rooms.id ASC
        LIMIT "#
    ));
    query.push_bind(limit.sql_value());

    let rows = query.build().fetch_all(storage.pool()).await?;

    rows.iter()
        .map(|row| -> Result<RoomActivity> {
            Ok(Projection::new(
                room_from_row(row)?,
                row.try_get("message_count")?,
            ))
        })
        .collect()
}

/// Eligible users, most recently joined first.
pub async fn newest_members(storage: &Storage, limit: Limit) -> Result<Vec<NewestMember>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {USER_COLUMNS}, \
         COALESCE(users.membership_started_at, users.created_at) AS joined_at \
         FROM users \
         WHERE users.active = 1 AND users.suspended_at IS NULL \
         ORDER BY joined_at DESC, users.id DESC \
         LIMIT "
    ));
    query.push_bind(limit.sql_value());

    let rows = query.build().fetch_all(storage.pool()).await?;

    rows.iter()
        .map(|row| -> Result<NewestMember> {
            Ok(Projection::new(
                user_from_row(row)?,
                timestamp_column(row, "joined_at")?,
            ))
        })
        .collect()
}

/// Active message counts per UTC calendar day.
pub async fn message_history(
    storage: &Storage,
    limit: Limit,
    order: HistoryOrder,
) -> Result<Vec<DailyCount>> {
    let direction = match order {
        HistoryOrder::NewestFirst => "DESC",
        HistoryOrder::OldestFirst => "ASC",
    };

    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT strftime('%Y-%m-%d', created_at, 'unixepoch') AS date, COUNT(*) AS count \
         FROM messages \
         WHERE active = 1 \
         GROUP BY date \
         ORDER BY date {direction} \
         LIMIT "
    ));
    query.push_bind(limit.sql_value());

    let rows = query.build().fetch_all(storage.pool()).await?;

    rows.iter()
        .map(|row| -> Result<DailyCount> {
            Ok(DailyCount {
                date: row.try_get("date")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

/// Platform-wide counts derived from the store.
pub async fn application_metrics(storage: &Storage) -> Result<ApplicationMetrics> {
    let total_users = scalar(
        storage,
        "SELECT COUNT(*) FROM users WHERE active = 1 AND suspended_at IS NULL",
    )
    .await?;

    let total_messages = scalar(storage, "SELECT COUNT(*) FROM messages").await?;

    let total_threads = scalar(
        storage,
        r#"
        SELECT COUNT(DISTINCT rooms.id)
        FROM rooms
        INNER JOIN messages ON messages.room_id = rooms.id
        WHERE rooms.kind = 'thread' AND messages.active = 1
        "#,
    )
    .await?;

    let total_posters = scalar(
        storage,
        r#"
        SELECT COUNT(DISTINCT users.id)
        FROM users
        INNER JOIN messages ON messages.creator_id = users.id
        INNER JOIN rooms ON rooms.id = messages.room_id
        LEFT JOIN messages parent_messages
            ON parent_messages.id = rooms.parent_message_id AND rooms.kind = 'thread'
        LEFT JOIN rooms parent_rooms ON parent_rooms.id = parent_messages.room_id
        WHERE users.active = 1 AND messages.active = 1
            AND COALESCE(parent_rooms.kind, rooms.kind) != 'direct'
        "#,
    )
    .await?;

    Ok(ApplicationMetrics {
        total_users,
        total_messages,
        total_threads,
        total_posters,
        database_size: database_size(storage).await,
    })
}

/// Application metrics merged with a host resource sample.
pub async fn system_metrics(
    storage: &Storage,
    sampler: &dyn ResourceSampler,
) -> Result<SystemMetrics> {
    let application = application_metrics(storage).await?;
    let resources = sampler.sample();

    Ok(SystemMetrics {
        application,
        resources,
    })
}

async fn scalar(storage: &Storage, sql: &str) -> Result<i64> {
    let row = sqlx::query(sql).fetch_one(storage.pool()).await?;

    Ok(row.try_get(0)?)
}

/// Database size in bytes, or 0 if SQLite cannot report it.
async fn database_size(storage: &Storage) -> i64 {
    let size = sqlx::query(
        "SELECT page_count * page_size AS size FROM pragma_page_count(), pragma_page_size()",
    )
    .fetch_one(storage.pool())
    .await
    .and_then(|row| row.try_get::<i64, _>("size"));

    match size {
        Ok(size) => size,
        Err(e) => {
            debug!(error = %e, "Database size unavailable");
            0
        }
    }
}
