//! HTTP API handlers for Chatstats.
//!
//! Every read goes through the [`StatsCache`], so a warm cache answers
//! without touching the store. Handlers only parse parameters and shape
//! JSON; ranking and aggregation live in their own modules.
//!
//! - `GET /stats/top_posters` - Leaderboard for a period or a room
//! - `GET /stats/users/:id/rank` - One user's position
//! - `GET /stats/top_rooms` - Busiest open rooms
//! - `GET /stats/newest_members` - Most recently joined users
//! - `GET /stats/message_history` - Messages per day
//! - `GET /stats/system_metrics` - Application and host metrics
//! - `POST /stats/refresh` - Warm every default view now
//! - `DELETE /stats/cache/:operation` - Evict cached entries
//! - `GET /health` - Health check

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::cache::{Operation, StatsCache};
use crate::error::StatsError;
use crate::model::{
    DailyCount, LeaderboardEntry, Limit, NewestMember, RoomActivity, RoomId, RoomKind, Scope,
    SystemMetrics, UserId,
};
use crate::period::Period;
use crate::refresh::{self, RefreshReport};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: StatsCache,
}

/// Build the stats router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stats/top_posters", get(get_top_posters))
        .route("/stats/users/:id/rank", get(get_user_rank))
        .route("/stats/top_rooms", get(get_top_rooms))
        .route("/stats/newest_members", get(get_newest_members))
        .route("/stats/message_history", get(get_message_history))
        .route("/stats/system_metrics", get(get_system_metrics))
        .route("/stats/refresh", post(post_refresh))
        .route("/stats/cache/:operation", delete(delete_cache))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Map a library error to a response status, logging it.
fn error_status(e: &StatsError, context: &'static str) -> StatusCode {
    warn!(error = %e, "{context}");
    if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn parse_limit(raw: Option<&str>) -> Result<Limit, StatusCode> {
    match raw {
        None => Ok(Limit::default()),
        Some(raw) => raw.parse::<Limit>().map_err(|_| {
            warn!(limit = %raw, "Invalid limit");
            StatusCode::BAD_REQUEST
        }),
    }
}

fn parse_period(raw: Option<&str>) -> Result<Period, StatusCode> {
    raw.unwrap_or("all_time")
        .parse::<Period>()
        .map_err(|e| error_status(&e, "Invalid period"))
}

fn scope_for(room_id: Option<RoomId>) -> Scope {
    room_id.map_or(Scope::Global, Scope::Room)
}

// ============================================================================
// Leaderboards
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    /// `today`, `month`, `year` or `all_time` (default). Ignored for rooms.
    pub period: Option<String>,
    /// Entry count, or `all`. Defaults to 10.
    pub limit: Option<String>,
    /// Rank within this room and its threads instead of globally.
    pub room_id: Option<RoomId>,
}

/// One leaderboard row.
#[derive(Debug, Serialize)]
pub struct PosterView {
    pub rank: usize,
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
    pub message_count: i64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TopPostersResponse {
    pub period: Period,
    pub room_id: Option<RoomId>,
    pub limit: String,
    pub entries: Vec<PosterView>,
}

fn poster_views(entries: Vec<LeaderboardEntry>) -> Vec<PosterView> {
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| PosterView {
            rank: index + 1,
            id: entry.entity.id,
            joined_at: entry.entity.joined_at(),
            name: entry.entity.name,
            avatar_url: entry.entity.avatar_url,
            message_count: entry.value,
        })
        .collect()
}

/// GET /stats/top_posters - Ordered leaderboard.
///
/// # Response
///
/// ```json
/// {
///     "period": "month",
///     "room_id": null,
///     "limit": "10",
///     "entries": [
///         {"rank": 1, "id": 7, "name": "ada", "avatar_url": null,
///          "message_count": 42, "joined_at": "2023-05-01T00:00:00Z"}
///     ]
/// }
/// ```
#[instrument(skip(state))]
pub async fn get_top_posters(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<TopPostersResponse>, StatusCode> {
    let period = parse_period(query.period.as_deref())?;
    let limit = parse_limit(query.limit.as_deref())?;
    let scope = scope_for(query.room_id);

    match state.cache.top_posters(scope, period, limit).await {
        Ok(entries) => {
            info!(%period, %limit, ?scope, count = entries.len(), "Top posters queried");
            Ok(Json(TopPostersResponse {
                period,
                room_id: query.room_id,
                limit: limit.to_string(),
                entries: poster_views(entries),
            }))
        }
        Err(e) => Err(error_status(&e, "Failed to compute top posters")),
    }
}

#[derive(Debug, Deserialize)]
pub struct RankQuery {
    pub period: Option<String>,
    pub room_id: Option<RoomId>,
}

/// A user's position. `rank` and `message_count` are `null` for users
/// who are not ranked yet.
#[derive(Debug, Serialize)]
pub struct RankResponse {
    pub user_id: UserId,
    pub period: Period,
    pub room_id: Option<RoomId>,
    pub rank: Option<i64>,
    pub message_count: Option<i64>,
}

/// GET /stats/users/:id/rank - One user's rank.
#[instrument(skip(state))]
pub async fn get_user_rank(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<RankQuery>,
) -> Result<Json<RankResponse>, StatusCode> {
    let period = parse_period(query.period.as_deref())?;
    let scope = scope_for(query.room_id);

    match state.cache.rank_of(scope, period, user_id).await {
        Ok(result) => {
            info!(user_id, %period, ?scope, ranked = result.is_some(), "Rank queried");
            Ok(Json(RankResponse {
                user_id,
                period,
                room_id: query.room_id,
                rank: result.map(|r| r.rank),
                message_count: result.map(|r| r.message_count),
            }))
        }
        Err(e) => Err(error_status(&e, "Failed to compute rank")),
    }
}

// ============================================================================
// Auxiliary aggregates
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    pub kind: RoomKind,
    pub message_count: i64,
}

impl From<RoomActivity> for RoomView {
    fn from(activity: RoomActivity) -> Self {
        Self {
            id: activity.entity.id,
            name: activity.entity.name,
            kind: activity.entity.kind,
            message_count: activity.value,
        }
    }
}

/// GET /stats/top_rooms - Open rooms by message count.
#[instrument(skip(state))]
pub async fn get_top_rooms(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<RoomView>>, StatusCode> {
    let limit = parse_limit(query.limit.as_deref())?;

    match state.cache.fetch_top_rooms(limit).await {
        Ok(rooms) => {
            info!(%limit, count = rooms.len(), "Top rooms queried");
            Ok(Json(rooms.into_iter().map(RoomView::from).collect()))
        }
        Err(e) => Err(error_status(&e, "Failed to compute top rooms")),
    }
}

#[derive(Debug, Serialize)]
pub struct MemberView {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl From<NewestMember> for MemberView {
    fn from(member: NewestMember) -> Self {
        Self {
            id: member.entity.id,
            name: member.entity.name,
            avatar_url: member.entity.avatar_url,
            joined_at: member.value,
        }
    }
}

/// GET /stats/newest_members - Most recently joined eligible users.
#[instrument(skip(state))]
pub async fn get_newest_members(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<MemberView>>, StatusCode> {
    let limit = parse_limit(query.limit.as_deref())?;

    match state.cache.fetch_newest_members(limit).await {
        Ok(members) => {
            info!(%limit, count = members.len(), "Newest members queried");
            Ok(Json(members.into_iter().map(MemberView::from).collect()))
        }
        Err(e) => Err(error_status(&e, "Failed to load newest members")),
    }
}

/// GET /stats/message_history - Active messages per UTC day.
///
/// With `limit=N` the last N days with messages are returned newest first;
/// without it the whole history is returned oldest first.
#[instrument(skip(state))]
pub async fn get_message_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<DailyCount>>, StatusCode> {
    let result = match parse_limit(query.limit.as_deref().or(Some("all")))? {
        Limit::Top(days) => state.cache.fetch_message_history_recent(days).await,
        Limit::Unbounded => state.cache.fetch_message_history_all_time().await,
    };

    match result {
        Ok(days) => {
            info!(days = days.len(), "Message history queried");
            Ok(Json(days))
        }
        Err(e) => Err(error_status(&e, "Failed to load message history")),
    }
}

/// GET /stats/system_metrics - Application counts merged with host readings.
#[instrument(skip(state))]
pub async fn get_system_metrics(
    State(state): State<AppState>,
) -> Result<Json<SystemMetrics>, StatusCode> {
    match state.cache.fetch_system_metrics().await {
        Ok(metrics) => {
            info!(
                total_users = metrics.application.total_users,
                total_messages = metrics.application.total_messages,
                "System metrics queried"
            );
            Ok(Json(metrics))
        }
        Err(e) => Err(error_status(&e, "Failed to compute system metrics")),
    }
}

// ============================================================================
// Cache maintenance
// ============================================================================

/// POST /stats/refresh - Run one refresh pass now.
#[instrument(skip(state))]
pub async fn post_refresh(
    State(state): State<AppState>,
) -> Result<Json<RefreshReport>, StatusCode> {
    refresh::refresh_all(&state.cache)
        .await
        .map(Json)
        .map_err(|e| error_status(&e, "Stats cache refresh failed"))
}

#[derive(Debug, Deserialize)]
pub struct EvictQuery {
    /// Colon-separated key parameters, e.g. `month:10`.
    pub params: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EvictResponse {
    pub operation: String,
    pub removed: usize,
}

/// DELETE /stats/cache/:operation - Evict cached entries.
///
/// `operation` is a cache operation name or `all`. With `params` only the
/// exact key is evicted; without it every key of the operation is.
#[instrument(skip(state))]
pub async fn delete_cache(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Query(query): Query<EvictQuery>,
) -> Result<Json<EvictResponse>, StatusCode> {
    let removed = if operation == "all" {
        state.cache.clear_all().await
    } else {
        let op: Operation = operation.parse().map_err(|e: String| {
            warn!(error = %e, "Invalid cache operation");
            StatusCode::BAD_REQUEST
        })?;
        let params: Vec<String> = query
            .params
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| p.split(':').map(str::to_string).collect())
            .unwrap_or_default();

        state.cache.invalidate(op, &params).await
    };

    info!(operation = %operation, removed, "Stats cache evicted");
    Ok(Json(EvictResponse { operation, removed }))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
