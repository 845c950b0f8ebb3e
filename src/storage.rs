//! Cloud Storage staging-object helpers.
//!
//! A `Stage` is scoped to one bucket and moves serialized payloads in and
//! out of it. Staging objects written by the loader are left in place; the
//! delete helper exists for callers that clean up on their own schedule.

use gcloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Errors that can occur during staging-object operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Storage client authentication failed with error: {source}")]
    ClientAuth {
        #[source]
        source: gcloud_auth::error::Error,
    },
    #[error("Object upload failed with error: {source}")]
    Upload {
        #[source]
        source: google_cloud_storage::http::Error,
    },
    #[error("Object deletion failed with error: {source}")]
    Delete {
        #[source]
        source: google_cloud_storage::http::Error,
    },
    #[error("Missing required builder attribute: {0}")]
    MissingBuilderAttribute(String),
}

/// Locator for an object staged in Cloud Storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedObject {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object path within the bucket.
    pub name: String,
}

impl StagedObject {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        StagedObject {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// The `gs://bucket/name` form used by load jobs.
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.name)
    }
}

/// Bucket-scoped Cloud Storage client for staging data.
pub struct Stage {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl Stage {
    pub fn builder() -> StageBuilder {
        StageBuilder::default()
    }

    /// The staging bucket this client writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Uploads a payload under the given object name and returns its locator.
    pub async fn upload(&self, name: &str, data: Vec<u8>) -> Result<StagedObject, Error> {
        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };
        let media = Media::new(name.to_string());
        self.client
            .upload_object(&request, data, &UploadType::Simple(media))
            .await
            .map_err(|source| Error::Upload { source })?;
        info!(bucket = %self.bucket, object = %name, "uploaded staging object");
        Ok(StagedObject::new(self.bucket.clone(), name))
    }

    /// Deletes a staging object. A missing object is tolerated since cleanup
    /// may race with lifecycle rules or another caller.
    pub async fn delete(&self, name: &str) -> Result<(), Error> {
        let request = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            object: name.to_string(),
            ..Default::default()
        };
        match self.client.delete_object(&request).await {
            Ok(()) => {
                info!(bucket = %self.bucket, object = %name, "deleted staging object");
                Ok(())
            }
            Err(ref e) if is_not_found(e) => {
                warn!(bucket = %self.bucket, object = %name, "staging object already gone");
                Ok(())
            }
            Err(source) => Err(Error::Delete { source }),
        }
    }
}

fn is_not_found(error: &google_cloud_storage::http::Error) -> bool {
    matches!(error, google_cloud_storage::http::Error::Response(r) if r.code == 404)
}

/// Builder for bucket-scoped staging clients.
#[derive(Default)]
pub struct StageBuilder {
    bucket: Option<String>,
    credentials_path: Option<PathBuf>,
}

impl StageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

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

    pub async fn build(self) -> Result<Stage, Error> {
        let bucket = self
            .bucket
            .ok_or_else(|| Error::MissingBuilderAttribute("bucket".to_string()))?;
        let config = match self.credentials_path {
            Some(path) => {
                let credentials =
                    CredentialsFile::new_from_file(path.to_string_lossy().to_string())
                        .await
                        .map_err(|source| Error::ClientAuth { source })?;
                ClientConfig::default()
                    .with_credentials(credentials)
                    .await
                    .map_err(|source| Error::ClientAuth { source })?
            }
            None => ClientConfig::default()
                .with_auth()
                .await
                .map_err(|source| Error::ClientAuth { source })?,
        };
        Ok(Stage {
            client: Client::new(config),
            bucket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_object_uri() {
        let object = StagedObject::new("data-staging", "orders_data_ab12cd34_0.json");
        assert_eq!(
            object.uri(),
            "gs://data-staging/orders_data_ab12cd34_0.json"
        );
    }

    #[test]
    fn test_staged_object_serde_roundtrip() {
        let object = StagedObject::new("bucket", "path/file.json");
        let json = serde_json::to_string(&object).unwrap();
        let deserialized: StagedObject = serde_json::from_str(&json).unwrap();
        assert_eq!(object, deserialized);
    }

    #[tokio::test]
    async fn test_builder_missing_bucket() {
        let result = StageBuilder::new().build().await;
        assert!(matches!(
            result.unwrap_err(),
            Error::MissingBuilderAttribute(_)
        ));
    }
}
