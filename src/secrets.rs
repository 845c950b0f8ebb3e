//! Secret Manager access for reading and writing secret payloads.
//!
//! The API is exposed over REST v1. Payloads are raw bytes; the wire
//! format base64-encodes them and this module hides that detail.

use base64::prelude::{Engine, BASE64_STANDARD};
use gcloud_auth::credentials::CredentialsFile;
use gcloud_auth::project::Config;
use gcloud_auth::token::DefaultTokenSourceProvider;
use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use token_source::{TokenSource, TokenSourceProvider};
use tracing::info;

const ENDPOINT: &str = "https://secretmanager.googleapis.com/v1";
const SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/cloud-platform"];

/// Errors that can occur during Secret Manager operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Secret Manager client authentication failed with error: {source}")]
    ClientAuth {
        #[source]
        source: gcloud_auth::error::Error,
    },
    #[error("Token retrieval failed with error: {source}")]
    Token {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("HTTP request failed with error: {source}")]
    Http {
        #[source]
        source: reqwest::Error,
    },
    #[error("Secret Manager returned error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("Payload decoding failed with error: {source}")]
    Decode {
        #[source]
        source: base64::DecodeError,
    },
    #[error("Response deserialization failed with error: {source}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("Secret version response carried no payload")]
    MissingPayload,
    #[error("Missing required builder attribute: {0}")]
    MissingBuilderAttribute(String),
}

/// Metadata for a stored secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default, rename = "createTime")]
    pub create_time: Option<String>,
}

/// Metadata for one version of a secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersion {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "createTime")]
    pub create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    #[serde(default)]
    payload: Option<SecretPayload>,
}

#[derive(Debug, Deserialize)]
struct SecretList {
    #[serde(default)]
    secrets: Vec<Secret>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

fn secret_path(project_id: &str, secret_id: &str) -> String {
    format!("{ENDPOINT}/projects/{project_id}/secrets/{secret_id}")
}

fn version_path(project_id: &str, secret_id: &str, version: &str) -> String {
    format!("{ENDPOINT}/projects/{project_id}/secrets/{secret_id}/versions/{version}")
}

/// Project-scoped Secret Manager client.
#[derive(Debug)]
pub struct SecretStore {
    http: reqwest::Client,
    token_source: Arc<dyn TokenSource>,
    project_id: String,
}

impl SecretStore {
    pub fn builder() -> SecretStoreBuilder {
        SecretStoreBuilder::default()
    }

    /// Reads the payload of one secret version. `version` is a version
    /// number or the alias `latest`.
    pub async fn get_secret(&self, secret_id: &str, version: &str) -> Result<Vec<u8>, Error> {
        let url = format!(
            "{}:access",
            version_path(&self.project_id, secret_id, version)
        );
        let response = self.request(Method::GET, &url, None).await?;
        let access: AccessResponse =
            serde_json::from_value(response).map_err(|source| Error::Deserialize { source })?;
        let payload = access.payload.ok_or(Error::MissingPayload)?;
        BASE64_STANDARD
            .decode(payload.data)
            .map_err(|source| Error::Decode { source })
    }

    /// Stores `data` as a new version of `secret_id`, creating the secret
    /// first when it does not exist yet. Returns the new version metadata.
    pub async fn add_secret(
        &self,
        secret_id: &str,
        data: &[u8],
        labels: &HashMap<String, String>,
    ) -> Result<SecretVersion, Error> {
        let secret_url = secret_path(&self.project_id, secret_id);
        match self.request(Method::GET, &secret_url, None).await {
            Ok(_) => {}
            Err(Error::Api { code: 404, .. }) => {
                let create_url = format!(
                    "{ENDPOINT}/projects/{}/secrets?secretId={secret_id}",
                    self.project_id
                );
                let body = json!({
                    "replication": {"automatic": {}},
                    "labels": labels,
                });
                self.request(Method::POST, &create_url, Some(body)).await?;
                info!(secret = %secret_id, "created secret");
            }
            Err(e) => return Err(e),
        }

        let add_url = format!("{secret_url}:addVersion");
        let body = json!({
            "payload": {"data": BASE64_STANDARD.encode(data)},
        });
        let response = self.request(Method::POST, &add_url, Some(body)).await?;
        let version: SecretVersion =
            serde_json::from_value(response).map_err(|source| Error::Deserialize { source })?;
        info!(secret = %secret_id, version = %version.name, "added secret version");
        Ok(version)
    }

    /// Deletes a secret and all of its versions.
    pub async fn delete_secret(&self, secret_id: &str) -> Result<(), Error> {
        let url = secret_path(&self.project_id, secret_id);
        self.request(Method::DELETE, &url, None).await?;
        info!(secret = %secret_id, "deleted secret");
        Ok(())
    }

    /// Lists all secrets in the project, following pagination.
    pub async fn list_secrets(&self) -> Result<Vec<Secret>, Error> {
        let base = format!("{ENDPOINT}/projects/{}/secrets", self.project_id);
        let mut secrets = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{base}?pageToken={token}"),
                None => base.clone(),
            };
            let response = self.request(Method::GET, &url, None).await?;
            let page: SecretList =
                serde_json::from_value(response).map_err(|source| Error::Deserialize { source })?;
            secrets.extend(page.secrets);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(secrets)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, Error> {
        let token = self
            .token_source
            .token()
            .await
            .map_err(|source| Error::Token { source })?;
        let mut request = self.http.request(method, url).header(AUTHORIZATION, token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|source| Error::Http { source })?;
        let status = response.status();
        let value: Value = response
            .json()
            .await
            .map_err(|source| Error::Http { source })?;
        if !status.is_success() {
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::Api {
                code: status.as_u16(),
                message,
            });
        }
        Ok(value)
    }
}

/// Builder for project-scoped Secret Manager clients.
#[derive(Default)]
pub struct SecretStoreBuilder {
    project_id: Option<String>,
    credentials_path: Option<PathBuf>,
}

impl SecretStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Path to a service account credentials JSON file. When absent the
    /// default application credentials are used.
    pub fn credentials_path(mut self, credentials_path: PathBuf) -> Self {
        self.credentials_path = Some(credentials_path);
        self
    }

    pub async fn build(self) -> Result<SecretStore, Error> {
        let project_id = self
            .project_id
            .ok_or_else(|| Error::MissingBuilderAttribute("project_id".to_string()))?;
        let config = Config::default().with_scopes(&SCOPES);
        let provider = match self.credentials_path {
            Some(path) => {
                let credentials =
                    CredentialsFile::new_from_file(path.to_string_lossy().to_string())
                        .await
                        .map_err(|source| Error::ClientAuth { source })?;
                DefaultTokenSourceProvider::new_with_credentials(config, Box::new(credentials))
                    .await
                    .map_err(|source| Error::ClientAuth { source })?
            }
            None => DefaultTokenSourceProvider::new(config)
                .await
                .map_err(|source| Error::ClientAuth { source })?,
        };
        Ok(SecretStore {
            http: reqwest::Client::new(),
            token_source: provider.token_source(),
            project_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_path() {
        assert_eq!(
            secret_path("acme-data", "db-password"),
            "https://secretmanager.googleapis.com/v1/projects/acme-data/secrets/db-password"
        );
    }

    #[test]
    fn test_version_path() {
        assert_eq!(
            version_path("acme-data", "db-password", "latest"),
            "https://secretmanager.googleapis.com/v1/projects/acme-data/secrets/db-password/versions/latest"
        );
    }

    #[test]
    fn test_access_response_payload_decodes() {
        let value = json!({
            "name": "projects/p/secrets/s/versions/1",
            "payload": {"data": BASE64_STANDARD.encode(b"hunter2")},
        });
        let access: AccessResponse = serde_json::from_value(value).unwrap();
        let data = BASE64_STANDARD
            .decode(access.payload.unwrap().data)
            .unwrap();
        assert_eq!(data, b"hunter2");
    }

    #[test]
    fn test_secret_list_deserialization() {
        let value = json!({
            "secrets": [
                {"name": "projects/p/secrets/a", "labels": {"team": "data"}},
                {"name": "projects/p/secrets/b"}
            ],
            "nextPageToken": "tok"
        });
        let list: SecretList = serde_json::from_value(value).unwrap();
        assert_eq!(list.secrets.len(), 2);
        assert_eq!(list.secrets[0].labels["team"], "data");
        assert_eq!(list.next_page_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_builder_missing_project_id() {
        let result = SecretStoreBuilder::new().build().await;
        assert!(matches!(
            result.unwrap_err(),
            Error::MissingBuilderAttribute(_)
        ));
    }
}
