//! Durable report storage.
//!
//! Backends only offer whole-record primitives. Every mutation goes through
//! [`ReportStore::compare_and_swap`], which applies a new state only if the
//! stored `version` still matches what the caller read, so concurrent writers
//! retry instead of losing each other's set changes.

mod memory;
mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Report, ReportFilter};

// Re-export public items
pub use memory::MemoryStore;
pub use sqlite::{open_pool, SqliteStore, MIGRATOR};

#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a newly created report.
    async fn insert(&self, report: &Report) -> Result<()>;

    /// Fetch a live report. Reports past `expires_at` are treated as absent
    /// even before the sweep removes them.
    async fn fetch(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Report>>;

    /// List live reports matching `filter`, newest first.
    async fn list(&self, filter: &ReportFilter, now: DateTime<Utc>) -> Result<Vec<Report>>;

    /// Replace the mutable state of `report` if the stored version equals
    /// `expected`. Returns `false` when the record changed or vanished.
    async fn compare_and_swap(&self, report: &Report, expected: i64) -> Result<bool>;

    /// Remove a live report. Returns `false` if it did not exist or had
    /// already expired, leaving expired records to the sweep.
    async fn delete(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Remove every report whose `expires_at` is at or before `now`,
    /// returning the removed identifiers.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}
