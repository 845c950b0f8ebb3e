//! SQL query execution returning plain JSON records.
//!
//! BigQuery's REST API returns every cell as a string; this module maps
//! them back to typed JSON values using the response schema. Rows from all
//! result pages are drained before returning, so callers never see a page
//! token.

use crate::input::Record;
use google_cloud_bigquery::client::Client;
use google_cloud_bigquery::http::job::get_query_results::{
    GetQueryResultsRequest, GetQueryResultsResponse,
};
use google_cloud_bigquery::http::job::query::{QueryRequest, QueryResponse};
use google_cloud_bigquery::http::job::JobReference;
use google_cloud_bigquery::http::table::{TableFieldSchema, TableFieldType};
use google_cloud_bigquery::http::tabledata::list::{Tuple, Value};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};

/// Errors that can occur during query execution.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("BigQuery query execution failed with error: {source}")]
    Execution {
        #[source]
        source: google_cloud_bigquery::http::error::Error,
    },
    #[error("BigQuery response missing schema")]
    MissingSchema,
    #[error("Query polling timed out after {duration:?}")]
    PollTimeout { duration: Duration },
}

/// Executes SQL and returns all result rows as JSON records keyed by
/// column name. Nested and repeated columns come back as null; only
/// scalar columns survive the record conversion. Completion polling is
/// bounded by `max_poll_duration`.
pub(crate) async fn execute(
    client: &Client,
    project_id: &str,
    location: Option<&str>,
    sql: &str,
    poll_interval: Duration,
    max_poll_duration: Duration,
) -> Result<Vec<Record>, Error> {
    let mut request = QueryRequest {
        query: sql.to_string(),
        use_legacy_sql: false,
        ..Default::default()
    };
    if let Some(location) = location {
        request.location = location.to_string();
    }

    let response: QueryResponse = client
        .job()
        .query(project_id, &request)
        .await
        .map_err(|source| Error::Execution { source })?;

    // Poll through getQueryResults when the query is still running.
    let (schema, job_ref, mut rows, mut page_token) = if !response.job_complete {
        let result = poll_query_results(
            client,
            &response.job_reference,
            poll_interval,
            max_poll_duration,
        )
        .await?;
        (
            result.schema,
            result.job_reference,
            result.rows.unwrap_or_default(),
            result.page_token,
        )
    } else {
        (
            response.schema,
            response.job_reference,
            response.rows.unwrap_or_default(),
            response.page_token,
        )
    };

    while let Some(token) = page_token {
        let page = next_page(client, &job_ref, &token).await?;
        if let Some(mut page_rows) = page.rows {
            rows.append(&mut page_rows);
        }
        page_token = page.page_token;
    }

    let schema = match schema {
        Some(schema) => schema,
        // Statements like DDL legitimately return no schema and no rows.
        None if rows.is_empty() => return Ok(Vec::new()),
        None => return Err(Error::MissingSchema),
    };

    Ok(rows_to_records(&schema.fields, &rows))
}

/// Polls for query completion until the deadline passes. Each
/// getQueryResults call already waits up to 10 seconds server-side before
/// reporting an incomplete job.
async fn poll_query_results(
    client: &Client,
    job_ref: &JobReference,
    poll_interval: Duration,
    max_poll_duration: Duration,
) -> Result<GetQueryResultsResponse, Error> {
    let start = Instant::now();

    let request = GetQueryResultsRequest {
        start_index: 0,
        page_token: None,
        max_results: None,
        timeout_ms: Some(10000),
        location: job_ref.location.clone(),
        format_options: None,
    };

    loop {
        let response = client
            .job()
            .get_query_results(&job_ref.project_id, &job_ref.job_id, &request)
            .await
            .map_err(|source| Error::Execution { source })?;

        if response.job_complete {
            return Ok(response);
        }

        if start.elapsed() > max_poll_duration {
            return Err(Error::PollTimeout {
                duration: max_poll_duration,
            });
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Fetches one page of results by page token.
async fn next_page(
    client: &Client,
    job_ref: &JobReference,
    page_token: &str,
) -> Result<GetQueryResultsResponse, Error> {
    let request = GetQueryResultsRequest {
        start_index: 0,
        page_token: Some(page_token.to_string()),
        max_results: None,
        timeout_ms: None,
        location: job_ref.location.clone(),
        format_options: None,
    };

    client
        .job()
        .get_query_results(&job_ref.project_id, &job_ref.job_id, &request)
        .await
        .map_err(|source| Error::Execution { source })
}

fn rows_to_records(fields: &[TableFieldSchema], rows: &[Tuple]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            fields
                .iter()
                .zip(&row.f)
                .map(|(field, cell)| (field.name.clone(), cell_to_json(field, &cell.v)))
                .collect()
        })
        .collect()
}

fn cell_to_json(field: &TableFieldSchema, value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::String(s) => scalar_to_json(&field.data_type, s),
        // Nested and repeated cells are dropped as null, not flattened.
        _ => JsonValue::Null,
    }
}

/// Maps a stringly-typed cell back to a JSON value. Values the API hands
/// back in an unexpected shape become null rather than failing the whole
/// result set.
fn scalar_to_json(data_type: &TableFieldType, raw: &str) -> JsonValue {
    match data_type {
        TableFieldType::Int64 | TableFieldType::Integer => raw
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        TableFieldType::Float64 | TableFieldType::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        TableFieldType::Bool | TableFieldType::Boolean => raw
            .parse::<bool>()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        TableFieldType::Timestamp => parse_timestamp(raw)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        TableFieldType::Json => {
            serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
        }
        _ => JsonValue::String(raw.to_string()),
    }
}

/// Timestamps arrive as epoch seconds with a fractional part; render them
/// as RFC 3339 so records stay self-describing.
fn parse_timestamp(raw: &str) -> Option<String> {
    let seconds: f64 = raw.parse().ok()?;
    let micros = (seconds * 1_000_000.0) as i64;
    let datetime = chrono::DateTime::from_timestamp_micros(micros)?;
    Some(datetime.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_cloud_bigquery::http::tabledata::list::Cell;
    use serde_json::json;

    fn field(name: &str, data_type: TableFieldType) -> TableFieldSchema {
        TableFieldSchema {
            name: name.to_string(),
            data_type,
            ..Default::default()
        }
    }

    fn row(values: Vec<Value>) -> Tuple {
        Tuple {
            f: values.into_iter().map(|v| Cell { v }).collect(),
        }
    }

    #[test]
    fn test_scalar_to_json_int64() {
        assert_eq!(scalar_to_json(&TableFieldType::Int64, "42"), json!(42));
        assert_eq!(
            scalar_to_json(&TableFieldType::Integer, "-7"),
            json!(-7)
        );
        assert_eq!(
            scalar_to_json(&TableFieldType::Int64, "not a number"),
            JsonValue::Null
        );
    }

    #[test]
    fn test_scalar_to_json_float64() {
        assert_eq!(
            scalar_to_json(&TableFieldType::Float64, "99.5"),
            json!(99.5)
        );
        assert_eq!(
            scalar_to_json(&TableFieldType::Float64, "nan"),
            JsonValue::Null
        );
    }

    #[test]
    fn test_scalar_to_json_bool() {
        assert_eq!(scalar_to_json(&TableFieldType::Bool, "true"), json!(true));
        assert_eq!(
            scalar_to_json(&TableFieldType::Boolean, "false"),
            json!(false)
        );
    }

    #[test]
    fn test_scalar_to_json_string() {
        assert_eq!(
            scalar_to_json(&TableFieldType::String, "hello"),
            json!("hello")
        );
    }

    #[test]
    fn test_scalar_to_json_json() {
        assert_eq!(
            scalar_to_json(&TableFieldType::Json, r#"{"a":1}"#),
            json!({"a": 1})
        );
        assert_eq!(
            scalar_to_json(&TableFieldType::Json, "not json"),
            json!("not json")
        );
    }

    #[test]
    fn test_parse_timestamp() {
        let rendered = parse_timestamp("0").unwrap();
        assert!(rendered.starts_with("1970-01-01T00:00:00"));
        let rendered = parse_timestamp("1700000000.5").unwrap();
        assert!(rendered.starts_with("2023-11-14T22:13:20.5"));
        assert!(parse_timestamp("invalid").is_none());
    }

    #[test]
    fn test_rows_to_records() {
        let fields = vec![
            field("name", TableFieldType::String),
            field("count", TableFieldType::Int64),
            field("active", TableFieldType::Bool),
        ];
        let rows = vec![
            row(vec![
                Value::String("alice".to_string()),
                Value::String("10".to_string()),
                Value::String("true".to_string()),
            ]),
            row(vec![
                Value::Null,
                Value::String("20".to_string()),
                Value::Null,
            ]),
        ];

        let records = rows_to_records(&fields, &rows);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], json!("alice"));
        assert_eq!(records[0]["count"], json!(10));
        assert_eq!(records[0]["active"], json!(true));
        assert_eq!(records[1]["name"], JsonValue::Null);
        assert_eq!(records[1]["count"], json!(20));
    }

    #[test]
    fn test_cell_to_json_nested_value_becomes_null() {
        let field = field("attrs", TableFieldType::String);
        assert_eq!(
            cell_to_json(&field, &Value::Array(Vec::new())),
            JsonValue::Null
        );
    }

    #[test]
    fn test_error_types() {
        let err = Error::PollTimeout {
            duration: std::time::Duration::from_secs(600),
        };
        assert!(matches!(err, Error::PollTimeout { .. }));
        assert!(format!("{err}").contains("600"));

        let err = Error::MissingSchema;
        assert!(matches!(err, Error::MissingSchema));
    }

    #[test]
    fn test_rows_to_records_preserves_column_order() {
        let fields = vec![
            field("z", TableFieldType::String),
            field("a", TableFieldType::String),
        ];
        let rows = vec![row(vec![
            Value::String("first".to_string()),
            Value::String("second".to_string()),
        ])];

        let records = rows_to_records(&fields, &rows);
        let keys: Vec<&String> = records[0].keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
