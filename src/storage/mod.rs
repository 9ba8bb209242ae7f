//! Storage layer for the recommender
//!
//! Defines the catalog and feedback collaborators as traits, with an
//! SQLite implementation for the binary and an in-memory one for tests and
//! embedding.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::types::{CatalogItem, FeedbackRecord, NewFeedback};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Source of recommendable items
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Load the full catalog
    async fn load_items(&self) -> Result<Vec<CatalogItem>>;
}

/// Append-only feedback log
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Append a record, returning it with its assigned id and timestamp
    async fn append(&self, feedback: NewFeedback) -> Result<FeedbackRecord>;

    /// Count records, optionally restricted to one polarity
    async fn count(&self, accepted: Option<bool>) -> Result<u64>;

    /// Records `[offset, offset + limit)` in insertion order
    async fn fetch_range(&self, offset: usize, limit: usize) -> Result<Vec<FeedbackRecord>>;

    /// Every record in insertion order
    async fn fetch_all(&self) -> Result<Vec<FeedbackRecord>>;
}

/// Housekeeping operations on the feedback log
#[async_trait]
pub trait FeedbackMaintenance: Send + Sync {
    /// Delete all but the newest `keep` records; returns the number removed
    async fn prune_to_latest(&self, keep: usize) -> Result<usize>;

    /// Randomly delete majority-class records until both polarities have
    /// equal counts; returns the number removed
    async fn balance_polarity(&self) -> Result<usize>;
}
