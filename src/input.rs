//! Tabular input variants and their serialization rules.
//!
//! Each variant carries its own serialization rule instead of inspecting
//! the payload at runtime: record sequences serialize row-by-row through
//! serde_json, frames go through Arrow's line-delimited JSON writer, and
//! raw bytes pass through untouched (assumed to already be NDJSON).

use arrow::array::RecordBatch;
use bytes::Bytes;

/// One row: an insertion-ordered mapping from field name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Errors that can occur while serializing input data to the staging format.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("JSON serialization failed with error: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("Arrow serialization failed with error: {source}")]
    Arrow {
        #[source]
        source: arrow::error::ArrowError,
    },
}

/// Data accepted by the loader.
#[derive(Debug, Clone)]
pub enum TableData {
    /// A sequence of key-value records.
    Records(Vec<Record>),
    /// A columnar Arrow batch.
    Frame(RecordBatch),
    /// Pre-serialized newline-delimited JSON.
    RawBytes(Bytes),
}

impl TableData {
    /// Returns true when there is nothing to load.
    pub fn is_empty(&self) -> bool {
        match self {
            TableData::Records(records) => records.is_empty(),
            TableData::Frame(batch) => batch.num_rows() == 0,
            TableData::RawBytes(bytes) => bytes.is_empty(),
        }
    }

    /// Serializes the whole input as newline-delimited JSON.
    pub(crate) fn to_ndjson(&self) -> Result<Vec<u8>, Error> {
        match self {
            TableData::Records(records) => records_to_ndjson(records),
            TableData::Frame(batch) => {
                let mut writer = arrow::json::LineDelimitedWriter::new(Vec::new());
                writer.write(batch).map_err(|source| Error::Arrow { source })?;
                writer.finish().map_err(|source| Error::Arrow { source })?;
                Ok(writer.into_inner())
            }
            TableData::RawBytes(bytes) => Ok(bytes.to_vec()),
        }
    }
}

/// Serializes a slice of records as newline-delimited JSON.
pub(crate) fn records_to_ndjson(records: &[Record]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record).map_err(|source| Error::Serialize { source })?;
        buf.push(b'\n');
    }
    Ok(buf)
}
