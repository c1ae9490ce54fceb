//! # locmerge common library
//!
//! Shared code for the locality consolidation workspace:
//! - Error type shared by every crate
//! - TOML bootstrap configuration and state folder resolution
//! - SQLite keyspace initialization
//! - Geographic and locality data model

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use error::{Error, Result};
pub use models::{GeoEntity, LocalityId, PendingLocality, Rank, RegionId, SeriesPair};
