//! Cache key layout.
//!
//! Keys are `{prefix}:{operation}:{param}:...`. The format is a stable
//! contract: monitoring checks look keys up by their literal text.
//!
//! | Operation           | Parameters             |
//! |---------------------|------------------------|
//! | `top_posters`       | `period`, `limit`      |
//! | `room_top_posters`  | `room_id`, `limit`     |
//! | `user_stats`        | `user_id`, `period`    |
//! | `room_user_stats`   | `room_id`, `user_id`   |
//! | `system_metrics`    | none                   |
//! | `top_rooms`         | `limit`                |
//! | `message_history`   | `recent`, `limit` or `all_time` |
//! | `newest_members`    | `limit`                |
//!
//! An unbounded limit renders as `all`.

use std::fmt;
use std::str::FromStr;

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "stats";

/// A cached operation, the second key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TopPosters,
    RoomTopPosters,
    UserStats,
    RoomUserStats,
    SystemMetrics,
    TopRooms,
    MessageHistory,
    NewestMembers,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::TopPosters,
        Operation::RoomTopPosters,
        Operation::UserStats,
        Operation::RoomUserStats,
        Operation::SystemMetrics,
        Operation::TopRooms,
        Operation::MessageHistory,
        Operation::NewestMembers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::TopPosters => "top_posters",
            Operation::RoomTopPosters => "room_top_posters",
            Operation::UserStats => "user_stats",
            Operation::RoomUserStats => "room_user_stats",
            Operation::SystemMetrics => "system_metrics",
            Operation::TopRooms => "top_rooms",
            Operation::MessageHistory => "message_history",
            Operation::NewestMembers => "newest_members",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown cache operation: {s}"))
    }
}

/// Builds keys under one prefix.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeySpace {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// The full key for `operation` with `params` in order.
    pub fn key(&self, operation: Operation, params: &[String]) -> String {
        let mut key = format!("{}:{}", self.prefix, operation);
        for param in params {
            key.push(':');
            key.push_str(param);
        }
        key
    }

    /// Prefix matching every key of `operation` whose leading parameters
    /// equal `leading`.
    pub fn pattern(&self, operation: Operation, leading: &[String]) -> String {
        let mut pattern = self.key(operation, leading);
        pattern.push(':');
        pattern
    }

    /// Prefix matching every key in this space.
    pub fn all(&self) -> String {
        format!("{}:", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::default();

        assert_eq!(
            keys.key(Operation::TopPosters, &params(&["month", "10"])),
            "stats:top_posters:month:10"
        );
        assert_eq!(keys.key(Operation::SystemMetrics, &[]), "stats:system_metrics");
        assert_eq!(
            keys.pattern(Operation::UserStats, &params(&["42"])),
            "stats:user_stats:42:"
        );
        assert_eq!(keys.all(), "stats:");
    }

    #[test]
    fn test_distinct_limits_do_not_collide() {
        let keys = KeySpace::new("s");

        assert_ne!(
            keys.key(Operation::TopPosters, &params(&["today", "5"])),
            keys.key(Operation::TopPosters, &params(&["today", "50"]))
        );
        assert!(
            !keys
                .key(Operation::TopPosters, &params(&["today", "50"]))
                .starts_with(&keys.pattern(Operation::TopPosters, &params(&["today", "5"])))
        );
    }

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("everything".parse::<Operation>().is_err());
    }
}
