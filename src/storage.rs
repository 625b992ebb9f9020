//! SQLite storage layer for Chatstats.
//!
//! Timestamps are stored as unix seconds. The store holds the source truth
//! for users, rooms and messages; ranks and counts are always derived from
//! it on demand and never written back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::error::Result;
use crate::model::{MessageId, Room, RoomId, RoomKind, User, UserId};

/// Columns selected whenever a full [`User`] is read.
pub(crate) const USER_COLUMNS: &str = "users.id AS id, users.name AS name, \
     users.active AS active, users.suspended_at AS suspended_at, \
     users.membership_started_at AS membership_started_at, \
     users.created_at AS created_at, users.avatar_url AS avatar_url";

/// Columns selected whenever a full [`Room`] is read.
pub(crate) const ROOM_COLUMNS: &str = "rooms.id AS id, rooms.name AS name, rooms.kind AS kind, \
     rooms.parent_message_id AS parent_message_id, rooms.created_at AS created_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

/// A user to insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub active: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub membership_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub avatar_url: Option<String>,
}

impl NewUser {
    /// An active, unsuspended user.
    pub fn new(name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            active: true,
            suspended_at: None,
            membership_started_at: None,
            created_at,
            avatar_url: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_suspension(mut self, at: DateTime<Utc>) -> Self {
        self.suspended_at = Some(at);
        self
    }

    pub fn with_membership_start(mut self, at: DateTime<Utc>) -> Self {
        self.membership_started_at = Some(at);
        self
    }

    pub fn with_avatar(mut self, url: &str) -> Self {
        self.avatar_url = Some(url.to_string());
        self
    }
}

/// A room to insert.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub kind: RoomKind,
    pub parent_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

impl NewRoom {
    pub fn open(name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            kind: RoomKind::Open,
            parent_message_id: None,
            created_at,
        }
    }

    pub fn direct(name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            kind: RoomKind::Direct,
            parent_message_id: None,
            created_at,
        }
    }

    /// A thread anchored to `parent_message_id`.
    pub fn thread(parent_message_id: MessageId, created_at: DateTime<Utc>) -> Self {
        Self {
            name: format!("thread-{parent_message_id}"),
            kind: RoomKind::Thread,
            parent_message_id: Some(parent_message_id),
            created_at,
        }
    }
}

/// A message to insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl NewMessage {
    pub fn new(room_id: RoomId, creator_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            room_id,
            creator_id,
            created_at,
            active: true,
        }
    }

    /// Mark the message as soft-deleted.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:chatstats.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection. Later queries fail with
    /// [`StatsError::StoreUnavailable`](crate::error::StatsError::StoreUnavailable).
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                suspended_at INTEGER,
                membership_started_at INTEGER,
                created_at INTEGER NOT NULL,
                avatar_url TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('open', 'direct', 'thread')),
                parent_message_id INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL,
                creator_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes backing the ranking and history aggregates
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_messages_active_created_creator \
             ON messages(active, created_at, creator_id)",
            "CREATE INDEX IF NOT EXISTS idx_messages_active_room_created \
             ON messages(active, room_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_users_active_suspended \
             ON users(active, suspended_at)",
            "CREATE INDEX IF NOT EXISTS idx_rooms_kind ON rooms(kind)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Insert a user and return its id.
    pub async fn insert_user(&self, user: &NewUser) -> Result<UserId> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, active, suspended_at, membership_started_at, created_at, avatar_url)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.name)
        .bind(user.active)
        .bind(user.suspended_at.map(|t| t.timestamp()))
        .bind(user.membership_started_at.map(|t| t.timestamp()))
        .bind(user.created_at.timestamp())
        .bind(&user.avatar_url)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a room (or thread) and return its id.
    pub async fn insert_room(&self, room: &NewRoom) -> Result<RoomId> {
        let result = sqlx::query(
            r#"
            INSERT INTO rooms (name, kind, parent_message_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&room.name)
        .bind(room.kind.as_str())
        .bind(room.parent_message_id)
        .bind(room.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a message and return its id.
    pub async fn insert_message(&self, message: &NewMessage) -> Result<MessageId> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (room_id, creator_id, created_at, active)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(message.room_id)
        .bind(message.creator_id)
        .bind(message.created_at.timestamp())
        .bind(message.active)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Permanently remove a user.
    pub async fn delete_user(&self, id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Look up a single user.
    pub async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE users.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    /// Fetch users by id in one query, avatar included.
    ///
    /// Ids that no longer resolve are simply absent from the map.
    pub async fn users_by_ids(&self, ids: &[UserId]) -> Result<HashMap<UserId, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {USER_COLUMNS} FROM users WHERE users.id IN ("
        ));
        push_id_list(&mut query, ids);

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut users = HashMap::with_capacity(rows.len());
        for row in &rows {
            let user = user_from_row(row)?;
            users.insert(user.id, user);
        }

        Ok(users)
    }

    /// Fetch rooms by id in one query.
    pub async fn rooms_by_ids(&self, ids: &[RoomId]) -> Result<HashMap<RoomId, Room>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE rooms.id IN ("
        ));
        push_id_list(&mut query, ids);

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut rooms = HashMap::with_capacity(rows.len());
        for row in &rows {
            let room = room_from_row(row)?;
            rooms.insert(room.id, room);
        }

        Ok(rooms)
    }
}

fn push_id_list(query: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut list = query.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
}

fn timestamp(secs: i64) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| sqlx::Error::Decode(format!("timestamp out of range: {secs}").into()))
}

fn optional_timestamp(
    secs: Option<i64>,
) -> std::result::Result<Option<DateTime<Utc>>, sqlx::Error> {
    secs.map(timestamp).transpose()
}

/// Build a [`User`] from a row selected with [`USER_COLUMNS`].
pub(crate) fn user_from_row(row: &SqliteRow) -> std::result::Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        suspended_at: optional_timestamp(row.try_get("suspended_at")?)?,
        membership_started_at: optional_timestamp(row.try_get("membership_started_at")?)?,
        created_at: timestamp(row.try_get("created_at")?)?,
        avatar_url: row.try_get("avatar_url")?,
    })
}

/// Build a [`Room`] from a row selected with [`ROOM_COLUMNS`].
pub(crate) fn room_from_row(row: &SqliteRow) -> std::result::Result<Room, sqlx::Error> {
    let kind: String = row.try_get("kind")?;

    Ok(Room {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: kind.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        parent_message_id: row.try_get("parent_message_id")?,
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

/// Read a unix-seconds column as a timestamp.
pub(crate) fn timestamp_column(
    row: &SqliteRow,
    column: &str,
) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    timestamp(row.try_get(column)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find_user() {
        let storage = setup_test_storage().await;
        let now = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();

        let id = storage
            .insert_user(&NewUser::new("ada", now).with_avatar("https://cdn/ada.png"))
            .await
            .unwrap();

        let user = storage.find_user(id).await.unwrap().unwrap();
        assert_eq!(user.name, "ada");
        assert_eq!(user.created_at, now);
        assert_eq!(user.avatar_url.as_deref(), Some("https://cdn/ada.png"));
        assert!(user.is_eligible());
    }

    #[tokio::test]
    async fn test_find_missing_user() {
        let storage = setup_test_storage().await;

        assert!(storage.find_user(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_users_by_ids_skips_unknown_ids() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        let a = storage.insert_user(&NewUser::new("a", now)).await.unwrap();
        let b = storage.insert_user(&NewUser::new("b", now)).await.unwrap();

        let users = storage.users_by_ids(&[a, b, 999]).await.unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users[&a].name, "a");
        assert_eq!(users[&b].name, "b");
        assert!(storage.users_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rooms_by_ids_reads_thread_parent() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        let user = storage.insert_user(&NewUser::new("a", now)).await.unwrap();
        let room = storage.insert_room(&NewRoom::open("lobby", now)).await.unwrap();
        let parent = storage
            .insert_message(&NewMessage::new(room, user, now))
            .await
            .unwrap();
        let thread = storage
            .insert_room(&NewRoom::thread(parent, now))
            .await
            .unwrap();

        let rooms = storage.rooms_by_ids(&[room, thread]).await.unwrap();

        assert_eq!(rooms[&room].kind, RoomKind::Open);
        assert_eq!(rooms[&thread].kind, RoomKind::Thread);
        assert_eq!(rooms[&thread].parent_message_id, Some(parent));
    }
}
