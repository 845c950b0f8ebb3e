//! Convenience wrappers around Google Cloud data services.
//!
//! This crate reduces the boilerplate of moving tabular data into BigQuery:
//! it infers a column schema from sample records (or accepts one), stages
//! the data as newline-delimited JSON in a Cloud Storage bucket, and issues
//! a load job against the destination table. It also carries small helpers
//! for Cloud Storage staging objects, Secret Manager access, and logging
//! setup that internal services share.

/// BigQuery functionality for staged bulk loads and query execution.
pub mod bigquery {
    /// Configuration structures for loader operations.
    pub mod config;
    /// Staged bulk loader for moving tabular data into a destination table.
    pub mod loader;
    /// SQL query execution returning plain JSON records.
    pub mod query;
}
/// Tabular input variants and their serialization rules.
pub mod input;
/// Process-wide logging setup from an explicit configuration object.
pub mod logging;
/// Column schema types and inference from sample records.
pub mod schema;
/// Secret Manager access for reading and writing secret payloads.
pub mod secrets;
/// Cloud Storage staging-object helpers.
pub mod storage;
