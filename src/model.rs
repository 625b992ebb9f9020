//! Data models for Chatstats.
//!
//! Users and rooms mirror the rows of the chat store. Computed
//! aggregates are never stored on these types; they travel alongside an
//! entity in a [`Projection`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type RoomId = i64;
pub type MessageId = i64;

/// A chat platform member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub active: bool,

    /// When the user was suspended; `None` if not suspended.
    pub suspended_at: Option<DateTime<Utc>>,

    /// Start of the user's membership, if it differs from account creation.
    pub membership_started_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Eager-loaded avatar location.
    pub avatar_url: Option<String>,
}

impl User {
    /// Eligible users are active and not suspended. Only they are ranked.
    pub fn is_eligible(&self) -> bool {
        self.active && self.suspended_at.is_none()
    }

    /// Membership start, falling back to account creation.
    pub fn joined_at(&self) -> DateTime<Utc> {
        self.membership_started_at.unwrap_or(self.created_at)
    }
}

/// Room discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Public room; counted everywhere.
    Open,
    /// One-to-one conversation; excluded from global rankings.
    Direct,
    /// Sub-conversation anchored to a parent message in another room.
    Thread,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Open => "open",
            RoomKind::Direct => "direct",
            RoomKind::Thread => "thread",
        }
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(RoomKind::Open),
            "direct" => Ok(RoomKind::Direct),
            "thread" => Ok(RoomKind::Thread),
            other => Err(format!("unknown room kind: {other}")),
        }
    }
}

/// A room, direct conversation or thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,

    /// Set for threads only. Thread messages roll up to this message's room.
    pub parent_message_id: Option<MessageId>,

    pub created_at: DateTime<Utc>,
}

/// An entity paired with a computed, non-persisted aggregate.
///
/// Built fresh by every query or cache read and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection<E, A> {
    pub entity: E,
    pub value: A,
}

impl<E, A> Projection<E, A> {
    pub fn new(entity: E, value: A) -> Self {
        Self { entity, value }
    }
}

/// A user with their qualifying message count.
pub type LeaderboardEntry = Projection<User, i64>;

/// A user with their `joined_at` date.
pub type NewestMember = Projection<User, DateTime<Utc>>;

/// A room with its message count, threads included.
pub type RoomActivity = Projection<Room, i64>;

/// One user's position in one scope and period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankResult {
    /// 1-based position, consistent with the leaderboard order.
    pub rank: i64,
    pub message_count: i64,
}

/// What a leaderboard counts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every non-direct room on the platform.
    Global,
    /// One room plus the threads anchored in it. Always all-time.
    Room(RoomId),
}

/// Upper bound on the length of a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    Top(u32),
    Unbounded,
}

impl Limit {
    /// Value bound to a SQLite `LIMIT` clause; negative means no limit.
    pub fn sql_value(&self) -> i64 {
        match self {
            Limit::Top(n) => i64::from(*n),
            Limit::Unbounded => -1,
        }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Limit::Top(10)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Top(n) => write!(f, "{n}"),
            Limit::Unbounded => f.write_str("all"),
        }
    }
}

impl FromStr for Limit {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(Limit::Unbounded)
        } else {
            s.parse().map(Limit::Top)
        }
    }
}

/// Number of active messages posted on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub count: i64,
}

/// Sort direction for message history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOrder {
    NewestFirst,
    OldestFirst,
}

/// Counts derived from the chat store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetrics {
    /// Eligible users.
    pub total_users: i64,
    /// Every message row, active or not.
    pub total_messages: i64,
    /// Threads with at least one active message.
    pub total_threads: i64,
    /// Active users with at least one active message outside direct rooms.
    pub total_posters: i64,
    /// Database size in bytes; 0 when it cannot be determined.
    pub database_size: i64,
}

/// Host resource readings. Each field is `None` when sampling it failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemResources {
    pub cpu_util: Option<f64>,
    pub cpu_cores: Option<u32>,
    pub memory_util_percent: Option<f64>,
    pub total_memory_gb: Option<f64>,
    pub disk_util_percent: Option<f64>,
    pub total_disk_gb: Option<f64>,
}

/// Application metrics merged with host resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    #[serde(flatten)]
    pub application: ApplicationMetrics,
    #[serde(flatten)]
    pub resources: SystemResources,
}
