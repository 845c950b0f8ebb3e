//! Configuration structures for loader operations.

use google_cloud_bigquery::http::job::WriteDisposition as BqWriteDisposition;
use google_cloud_bigquery::http::table::TableReference as BqTableReference;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fully qualified destination table.
#[derive(PartialEq, Eq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct TableId {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableId {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        TableId {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    pub(crate) fn to_bq(&self) -> BqTableReference {
        BqTableReference {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset_id.clone(),
            table_id: self.table_id.clone(),
        }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// How a load job treats existing table contents.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    /// Append rows to the table.
    #[default]
    WriteAppend,
    /// Replace the table contents.
    WriteTruncate,
    /// Fail when the table is not empty.
    WriteEmpty,
}

impl WriteDisposition {
    pub(crate) fn to_bq(self) -> BqWriteDisposition {
        match self {
            WriteDisposition::WriteAppend => BqWriteDisposition::WriteAppend,
            WriteDisposition::WriteTruncate => BqWriteDisposition::WriteTruncate,
            WriteDisposition::WriteEmpty => BqWriteDisposition::WriteEmpty,
        }
    }
}

fn default_sample_size() -> usize {
    1000
}

fn default_chunk_size() -> usize {
    10000
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_poll_duration() -> Duration {
    Duration::from_secs(600)
}

/// Tuning knobs for staged loads. The defaults match typical batch sizes;
/// override them per loader when tables are unusually wide or jobs are slow.
///
/// # Fields
/// - `sample_size`: How many leading records schema inference examines.
/// - `chunk_size`: Records per staging object; larger inputs are split.
/// - `poll_interval`: Delay between load job status polls.
/// - `max_poll_duration`: Give up waiting for a job after this long.
/// - `location`: Optional dataset location (e.g. "US", "EU", "us-central1").
/// - `staging_prefix`: Optional staging object name prefix; defaults to
///   `{table_id}_data`.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct LoaderOptions {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_poll_duration", with = "humantime_serde")]
    pub max_poll_duration: Duration,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub staging_prefix: Option<String>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            sample_size: default_sample_size(),
            chunk_size: default_chunk_size(),
            poll_interval: default_poll_interval(),
            max_poll_duration: default_max_poll_duration(),
            location: None,
            staging_prefix: None,
        }
    }
}
