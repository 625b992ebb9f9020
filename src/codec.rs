//! Compact cache representation of projected entities.
//!
//! Cached leaderboards store only ids, the computed aggregate and a few
//! display attributes. Reading them back re-fetches the entities in one
//! batched lookup and pairs each with its aggregate again. Records whose
//! entity no longer exists are dropped; the rest keep their order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::model::{Projection, Room, User};
use crate::storage::Storage;

/// Display attributes kept alongside cached users.
pub const USER_ATTRIBUTES: &[&str] = &["name", "joined_at"];

/// Display attributes kept alongside cached rooms.
pub const ROOM_ATTRIBUTES: &[&str] = &["name", "kind"];

/// An entity that can be reduced to a cache record.
pub trait Projectable {
    fn id(&self) -> i64;

    /// The named display attribute, or `None` if the entity has no such field.
    fn attribute(&self, name: &str) -> Option<Value>;
}

impl Projectable for User {
    fn id(&self) -> i64 {
        self.id
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(self.name.as_str())),
            "joined_at" => Some(Value::from(self.joined_at().to_rfc3339())),
            "avatar_url" => self.avatar_url.as_deref().map(Value::from),
            _ => None,
        }
    }
}

impl Projectable for Room {
    fn id(&self) -> i64 {
        self.id
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(self.name.as_str())),
            "kind" => Some(Value::from(self.kind.as_str())),
            _ => None,
        }
    }
}

/// The cached form of one [`Projection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord<A> {
    pub id: i64,
    pub value: A,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

/// Reduce projections to cache records, keeping the named attributes.
pub fn serialize<E, A>(entries: &[Projection<E, A>], attributes: &[&str]) -> Vec<CachedRecord<A>>
where
    E: Projectable,
    A: Clone,
{
    entries
        .iter()
        .map(|entry| CachedRecord {
            id: entry.entity.id(),
            value: entry.value.clone(),
            attributes: attributes
                .iter()
                .filter_map(|name| {
                    entry
                        .entity
                        .attribute(name)
                        .map(|value| (name.to_string(), value))
                })
                .collect(),
        })
        .collect()
}

/// Pair records with freshly loaded entities, in record order.
///
/// Records whose id is missing from `entities` are dropped.
pub fn rehydrate<E, A>(
    records: Vec<CachedRecord<A>>,
    entities: &HashMap<i64, E>,
) -> Vec<Projection<E, A>>
where
    E: Clone,
{
    let total = records.len();

    let entries: Vec<_> = records
        .into_iter()
        .filter_map(|record| {
            entities
                .get(&record.id)
                .map(|entity| Projection::new(entity.clone(), record.value))
        })
        .collect();

    if entries.len() < total {
        debug!(
            dropped = total - entries.len(),
            "Cached records no longer resolve to entities"
        );
    }

    entries
}

fn record_ids<A>(records: &[CachedRecord<A>]) -> Vec<i64> {
    records.iter().map(|r| r.id).collect()
}

/// Rehydrate cached user records with one batched lookup.
///
/// Every cached user list holds eligible users only, so users deactivated
/// or suspended since the records were written are dropped like deleted
/// ones.
pub async fn deserialize_users<A>(
    storage: &Storage,
    records: Vec<CachedRecord<A>>,
) -> Result<Vec<Projection<User, A>>> {
    let mut users = storage.users_by_ids(&record_ids(&records)).await?;
    users.retain(|_, user| user.is_eligible());

    Ok(rehydrate(records, &users))
}

/// Rehydrate cached room records with one batched lookup.
pub async fn deserialize_rooms<A>(
    storage: &Storage,
    records: Vec<CachedRecord<A>>,
) -> Result<Vec<Projection<Room, A>>> {
    let rooms = storage.rooms_by_ids(&record_ids(&records)).await?;

    Ok(rehydrate(records, &rooms))
}
