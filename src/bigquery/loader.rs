//! Staged bulk loader for moving tabular data into a destination table.
//!
//! The loader serializes input as newline-delimited JSON, stages it in a
//! Cloud Storage bucket, and runs a load job against the destination table.
//! Schema inference happens before any bytes leave the process, so a bad
//! sample fails fast without touching the bucket or the table.

use crate::bigquery::config::{LoaderOptions, TableId, WriteDisposition};
use crate::bigquery::query;
use crate::input::{records_to_ndjson, Record, TableData};
use crate::schema::Schema;
use crate::storage::{Stage, StagedObject};
use gcloud_auth::credentials::CredentialsFile;
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::job::get::GetJobRequest;
use google_cloud_bigquery::http::job::{
    Job, JobConfiguration, JobConfigurationLoad, JobReference, JobState, JobType,
};
use google_cloud_bigquery::http::table::{SourceFormat, Table};
use google_cloud_bigquery::http::types::ErrorProto;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Wrapper for ErrorProto to provide Display implementation.
#[derive(Debug, Clone)]
pub struct JobFailure(ErrorProto);

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref message) = self.0.message {
            parts.push(message.clone());
        }

        if let Some(ref reason) = self.0.reason {
            parts.push(format!("reason: {reason}"));
        }

        if let Some(ref location) = self.0.location {
            parts.push(format!("location: {location}"));
        }

        write!(f, "{}", parts.join(", "))
    }
}

/// Errors that can occur during loader operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("BigQuery client authentication failed with error: {source}")]
    ClientAuth {
        #[source]
        source: gcloud_auth::error::Error,
    },
    #[error("BigQuery client creation failed with error: {source}")]
    ClientCreation {
        #[source]
        source: gcloud_auth::error::Error,
    },
    #[error("BigQuery client connection failed with error: {source}")]
    ClientConnection {
        #[source]
        source: gcloud_gax::conn::Error,
    },
    #[error("Table {table} already exists")]
    AlreadyExists { table: String },
    #[error("Schema inference failed with error: {source}")]
    InvalidSchema {
        #[source]
        source: crate::schema::Error,
    },
    #[error("Input serialization failed with error: {source}")]
    Serialization {
        #[source]
        source: crate::input::Error,
    },
    #[error("Staging operation failed with error: {source}")]
    Storage {
        #[source]
        source: crate::storage::Error,
    },
    #[error("BigQuery request failed with error: {source}")]
    Transport {
        #[source]
        source: google_cloud_bigquery::http::error::Error,
    },
    #[error("Load job failed: {error}")]
    LoadJobFailed { error: JobFailure },
    #[error("Query execution failed with error: {source}")]
    Query {
        #[source]
        source: query::Error,
    },
    #[error("Job polling timed out after {duration:?}")]
    PollTimeout { duration: std::time::Duration },
    #[error("Missing required builder attribute: {}", _0)]
    MissingBuilderAttribute(String),
}

/// Staged bulk loader scoped to one destination table and one staging bucket.
pub struct Loader {
    client: Client,
    stage: Stage,
    table: TableId,
    options: LoaderOptions,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("stage", &self.stage)
            .field("table", &self.table)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Loader {
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::default()
    }

    /// The destination table this loader writes to.
    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// The staging client used for intermediate objects.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Checks whether the destination table exists.
    pub async fn table_exists(&self) -> Result<bool, Error> {
        match self
            .client
            .table()
            .get(
                &self.table.project_id,
                &self.table.dataset_id,
                &self.table.table_id,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(ref e) if is_not_found(e) => Ok(false),
            Err(source) => Err(Error::Transport { source }),
        }
    }

    /// Creates the destination table with an explicit schema.
    ///
    /// Fails with [`Error::AlreadyExists`] when the table exists and
    /// `replace` is false. With `replace` the existing table is dropped
    /// first, which discards its contents.
    pub async fn create_table(&self, schema: &Schema, replace: bool) -> Result<(), Error> {
        if self.table_exists().await? {
            if !replace {
                return Err(Error::AlreadyExists {
                    table: self.table.to_string(),
                });
            }
            self.client
                .table()
                .delete(
                    &self.table.project_id,
                    &self.table.dataset_id,
                    &self.table.table_id,
                )
                .await
                .map_err(|source| Error::Transport { source })?;
            info!(table = %self.table, "dropped existing table before replace");
        }

        let table = Table {
            table_reference: self.table.to_bq(),
            schema: Some(schema.to_table_schema()),
            ..Default::default()
        };
        self.client
            .table()
            .create(&table)
            .await
            .map_err(|source| Error::Transport { source })?;
        info!(table = %self.table, fields = schema.fields.len(), "created table");
        Ok(())
    }

    /// Infers a schema from sample records and creates the destination
    /// table from it. Returns the inferred schema.
    pub async fn create_table_from_records(
        &self,
        records: &[Record],
        replace: bool,
    ) -> Result<Schema, Error> {
        let schema = Schema::infer(records, self.options.sample_size)
            .map_err(|source| Error::InvalidSchema { source })?;
        self.create_table(&schema, replace).await?;
        Ok(schema)
    }

    /// Loads data into the destination table through Cloud Storage staging.
    ///
    /// Record inputs larger than `chunk_size` are split across several
    /// staging objects; the first chunk uses the given disposition and the
    /// rest append, so a truncating load replaces the table exactly once.
    /// When the destination table is missing it is created from the
    /// inferred (or frame) schema first; raw byte inputs fall back to the
    /// load job's own schema detection.
    ///
    /// Returns the staging objects written. They are not deleted here;
    /// bucket lifecycle rules or the caller decide when they go away.
    pub async fn load(
        &self,
        data: &TableData,
        disposition: WriteDisposition,
    ) -> Result<Vec<StagedObject>, Error> {
        if data.is_empty() {
            info!(table = %self.table, "nothing to load");
            return Ok(Vec::new());
        }

        // Inference runs before serialization or any network call.
        let schema = match data {
            TableData::Records(records) => Some(
                Schema::infer(records, self.options.sample_size)
                    .map_err(|source| Error::InvalidSchema { source })?,
            ),
            TableData::Frame(batch) => Some(Schema::from_record_batch(batch)),
            TableData::RawBytes(_) => None,
        };

        let chunks = serialize_chunks(data, self.options.chunk_size)
            .map_err(|source| Error::Serialization { source })?;

        let exists = self.table_exists().await?;
        if !exists {
            if let Some(ref schema) = schema {
                self.create_table(schema, false).await?;
            }
        }
        // Only raw bytes into a missing table rely on job-side detection.
        let autodetect = !exists && schema.is_none();

        let prefix = match self.options.staging_prefix {
            Some(ref prefix) => prefix.clone(),
            None => format!("{}_data", self.table.table_id),
        };

        let mut staged = Vec::with_capacity(chunks.len());
        let chunk_count = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let name = staging_object_name(&prefix, index);
            let object = self
                .stage
                .upload(&name, chunk)
                .await
                .map_err(|source| Error::Storage { source })?;

            // Later chunks append so the disposition applies once.
            let chunk_disposition = if index == 0 {
                disposition
            } else {
                WriteDisposition::WriteAppend
            };
            self.run_load_job(vec![object.uri()], chunk_disposition, autodetect && index == 0)
                .await?;
            info!(
                table = %self.table,
                object = %object.uri(),
                chunk = index + 1,
                chunks = chunk_count,
                "loaded chunk"
            );
            staged.push(object);
        }

        Ok(staged)
    }

    /// Loads an already staged object into the destination table.
    ///
    /// The object must hold newline-delimited JSON and the table must
    /// already exist; the load job detects the schema when the table
    /// carries none.
    pub async fn load_staged(
        &self,
        object: &StagedObject,
        disposition: WriteDisposition,
    ) -> Result<(), Error> {
        self.run_load_job(vec![object.uri()], disposition, false)
            .await
    }

    /// Executes SQL and returns all result rows as plain JSON records.
    /// Nested and repeated result columns come back as null. Waiting for
    /// query completion is bounded by the loader's poll deadline.
    pub async fn query(&self, sql: &str) -> Result<Vec<Record>, Error> {
        query::execute(
            &self.client,
            &self.table.project_id,
            self.options.location.as_deref(),
            sql,
            self.options.poll_interval,
            self.options.max_poll_duration,
        )
        .await
        .map_err(|source| Error::Query { source })
    }

    async fn run_load_job(
        &self,
        source_uris: Vec<String>,
        disposition: WriteDisposition,
        autodetect: bool,
    ) -> Result<(), Error> {
        let load = JobConfigurationLoad {
            source_uris,
            destination_table: self.table.to_bq(),
            source_format: Some(SourceFormat::NewlineDelimitedJson),
            write_disposition: Some(disposition.to_bq()),
            autodetect: Some(autodetect),
            ..Default::default()
        };

        let job = Job {
            job_reference: JobReference {
                project_id: self.table.project_id.clone(),
                job_id: String::new(), // Let BigQuery generate job ID
                location: self.options.location.clone(),
            },
            configuration: JobConfiguration {
                job: JobType::Load(load),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = self
            .client
            .job()
            .create(&job)
            .await
            .map_err(|source| Error::Transport { source })?;

        self.wait_for_job(created).await
    }

    /// Polls a job until it finishes or the poll deadline passes.
    async fn wait_for_job(&self, mut job: Job) -> Result<(), Error> {
        let start = Instant::now();

        loop {
            if matches!(job.status.state, JobState::Done) {
                if let Some(error) = job.status.error_result {
                    return Err(Error::LoadJobFailed {
                        error: JobFailure(error),
                    });
                }
                return Ok(());
            }

            if start.elapsed() > self.options.max_poll_duration {
                return Err(Error::PollTimeout {
                    duration: self.options.max_poll_duration,
                });
            }

            tokio::time::sleep(self.options.poll_interval).await;

            let request = GetJobRequest {
                location: self.options.location.clone(),
            };
            job = self
                .client
                .job()
                .get(
                    &job.job_reference.project_id,
                    &job.job_reference.job_id,
                    &request,
                )
                .await
                .map_err(|source| Error::Transport { source })?;
        }
    }
}

fn is_not_found(error: &google_cloud_bigquery::http::error::Error) -> bool {
    matches!(error, google_cloud_bigquery::http::error::Error::Response(r) if r.code == 404)
}

/// Serializes input into one NDJSON buffer per staging object. Record
/// inputs beyond `chunk_size` rows are split; a zero chunk size is
/// treated as one record per chunk.
fn serialize_chunks(
    data: &TableData,
    chunk_size: usize,
) -> Result<Vec<Vec<u8>>, crate::input::Error> {
    let chunk_size = chunk_size.max(1);
    match data {
        TableData::Records(records) if records.len() > chunk_size => records
            .chunks(chunk_size)
            .map(records_to_ndjson)
            .collect(),
        _ => Ok(vec![data.to_ndjson()?]),
    }
}

/// Names a staging object so concurrent loads never collide.
fn staging_object_name(prefix: &str, index: usize) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}_{index}.json", &id[..8])
}

/// Builder for table-scoped loader instances.
#[derive(Default)]
pub struct LoaderBuilder {
    table: Option<TableId>,
    bucket: Option<String>,
    credentials_path: Option<PathBuf>,
    options: Option<LoaderOptions>,
}

impl LoaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: TableId) -> Self {
        self.table = Some(table);
        self
    }

    /// Cloud Storage bucket used for staging objects.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Path to a service account credentials JSON file. When absent the
    /// default application credentials are used.
    pub fn credentials_path(mut self, credentials_path: PathBuf) -> Self {
        self.credentials_path = Some(credentials_path);
        self
    }

    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub async fn build(self) -> Result<Loader, Error> {
        // Validation happens before any client is constructed.
        let table = self
            .table
            .ok_or_else(|| Error::MissingBuilderAttribute("table".to_string()))?;
        let bucket = self
            .bucket
            .ok_or_else(|| Error::MissingBuilderAttribute("bucket".to_string()))?;

        let client_config = match self.credentials_path {
            Some(ref path) => {
                let credentials =
                    CredentialsFile::new_from_file(path.to_string_lossy().to_string())
                        .await
                        .map_err(|source| Error::ClientAuth { source })?;
                let (client_config, _project_id) =
                    ClientConfig::new_with_credentials(credentials)
                        .await
                        .map_err(|source| Error::ClientCreation { source })?;
                client_config
            }
            None => {
                let (client_config, _project_id) = ClientConfig::new_with_auth()
                    .await
                    .map_err(|source| Error::ClientCreation { source })?;
                client_config
            }
        };

        let client = Client::new(client_config)
            .await
            .map_err(|source| Error::ClientConnection { source })?;

        let mut stage_builder = Stage::builder().bucket(bucket);
        if let Some(path) = self.credentials_path {
            stage_builder = stage_builder.credentials_path(path);
        }
        let stage = stage_builder
            .build()
            .await
            .map_err(|source| Error::Storage { source })?;

        Ok(Loader {
            client,
            stage,
            table,
            options: self.options.unwrap_or_default(),
        })
    }
}
