//! Chatstats - cached message leaderboards and activity statistics for chat rooms.
//!
//! # Overview
//!
//! Leaderboards rank eligible users (active, not suspended) by how many
//! active messages they posted, globally outside direct conversations or
//! within one room and its threads. Ties go to the earlier member, then
//! to the lower user id, so every ordering is total and a single user's
//! rank always matches their leaderboard position.
//!
//! Computed views are cached under stable keys with a TTL that grows with
//! the period's length. Cached leaderboards hold only ids and counts; the
//! users are reloaded on read, so a deleted user silently drops out.
//!
//! # Modules
//!
//! - [`period`]: Period symbols, their UTC windows and cache TTLs
//! - [`model`]: Users, rooms, messages and computed projections
//! - [`storage`]: SQLite storage layer
//! - [`ranking`]: Top-N leaderboards and single-user ranks
//! - [`aggregation`]: Top rooms, newest members, history and metrics
//! - [`codec`]: Compact cache records for projected entities
//! - [`cache`]: TTL cache fronting every stats view
//! - [`refresh`]: Periodic cache warming
//! - [`resources`]: Host resource sampling seam
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod period;
pub mod ranking;
pub mod refresh;
pub mod resources;
pub mod storage;
