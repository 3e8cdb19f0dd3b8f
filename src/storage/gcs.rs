use super::{ByteSource, ObjectStore, StorageError};
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use std::time::Duration;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Connection settings for the Cloud Storage JSON API.
#[derive(Clone)]
pub struct GcsConfig {
    pub endpoint: String,
    /// Static bearer token; when absent the metadata server is asked.
    pub access_token: Option<String>,
    /// Skip authentication entirely (storage emulators).
    pub anonymous: bool,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for GcsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsConfig")
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("anonymous", &self.anonymous)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Streams objects from Google Cloud Storage.
#[derive(Clone)]
pub struct GcsStore {
    http: reqwest::Client,
    config: GcsConfig,
}

impl GcsStore {
    pub fn new(config: GcsConfig) -> Result<Self, StorageError> {
        // Bodies pass through compressed; `GzipStream` decodes them.
        let http = reqwest::Client::builder()
            .no_gzip()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("gcs-pg-import/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GcsConfig {
        &self.config
    }

    /// Media download URL for one object; the object name is a single
    /// percent-encoded path segment.
    pub fn object_url(&self, bucket: &str, path: &str) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| StorageError::Endpoint(format!("{}: {e}", self.config.endpoint)))?;

        url.path_segments_mut()
            .map_err(|_| StorageError::Endpoint(self.config.endpoint.clone()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket, "o", path]);
        url.query_pairs_mut().append_pair("alt", "media");

        Ok(url)
    }

    async fn bearer_token(&self) -> Result<Option<String>, StorageError> {
        if let Some(token) = &self.config.access_token {
            return Ok(Some(token.clone()));
        }
        if self.config.anonymous {
            return Ok(None);
        }

        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| StorageError::Credentials(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Credentials(format!(
                "metadata server returned status {}",
                response.status()
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| StorageError::Credentials(e.to_string()))?;

        Ok(Some(token.access_token))
    }
}

#[rocket::async_trait]
impl ObjectStore for GcsStore {
    async fn open(&self, bucket: &str, path: &str) -> Result<Box<dyn ByteSource>, StorageError> {
        let url = self.object_url(bucket, path)?;
        log::debug!("opening object stream {}", url);

        // Asking for gzip keeps GCS from transcoding objects stored with
        // `Content-Encoding: gzip`.
        let mut request = self
            .http
            .get(url)
            .header(header::ACCEPT_ENCODING, "gzip");
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                status: status.as_u16(),
                bucket: bucket.to_string(),
                path: path.to_string(),
                body,
            });
        }

        Ok(Box::new(GcsObject { response }))
    }
}

/// Body of an open media download.
struct GcsObject {
    response: reqwest::Response,
}

#[rocket::async_trait]
impl ByteSource for GcsObject {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.response.chunk().await?.map(|bytes| bytes.to_vec()))
    }
}
