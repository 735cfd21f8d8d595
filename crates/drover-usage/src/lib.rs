//! Persistent per-task, per-provider, per-day usage and cost aggregation.
//!
//! The surrounding runtime owns the database file; this crate owns the
//! `tasks` projection schema, its best-effort migration, the atomic usage
//! update with first-write-wins provider pinning, and the read APIs the
//! status surfaces consume.

pub mod aggregator;
pub mod db;
pub mod error;

pub use aggregator::{DailySummaryRow, UsageStore};
pub use error::UsageError;
