//! Object-store client
//!
//! Talks to the blob storage service over its small HTTP surface:
//! multipart upload, download, delete, metadata, health. The canonical
//! identifier for a stored object is `"{bucket}/{key}"`.

use reqwest::multipart;
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::{PipelineError, PipelineResult};

pub struct StorageClient {
    base_url: String,
    bucket: String,
    client: Client,
}

impl StorageClient {
    pub fn new(base_url: &str, bucket: &str, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.base_url, &config.bucket, config.timeout_secs)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a local file under `key`, returning the canonical
    /// `"{bucket}/{key}"` identifier.
    pub async fn upload_file(&self, file_path: &Path, key: &str) -> PipelineResult<String> {
        let bytes = tokio::fs::read(file_path).await.map_err(|e| {
            PipelineError::StorageUploadFailure(format!("{}: {e}", file_path.display()))
        })?;

        let part = multipart::Part::bytes(bytes).file_name(key.to_string());
        let form = multipart::Form::new()
            .text("bucket", self.bucket.clone())
            .text("key", key.to_string())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::StorageUploadFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::StorageUploadFailure(format!(
                "upload returned {status}: {body}"
            )));
        }

        let remote = format!("{}/{}", self.bucket, key);
        info!(%remote, "uploaded file to storage");
        Ok(remote)
    }

    /// Download an object into `output_path`, creating parent directories.
    pub async fn download_to(&self, key: &str, output_path: &Path) -> PipelineResult<()> {
        let bytes = self.download(key).await?;
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, bytes).await?;
        info!(key, path = %output_path.display(), "downloaded file");
        Ok(())
    }

    /// Download an object's bytes.
    pub async fn download(&self, key: &str) -> PipelineResult<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/download/{key}", self.base_url))
            .query(&[("bucket", &self.bucket)])
            .send()
            .await
            .map_err(|e| PipelineError::from_http(e, "storage/download"))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        Ok(response
            .bytes()
            .await
            .map_err(|e| PipelineError::ProtocolError(e.to_string()))?
            .to_vec())
    }

    /// Delete an object. Missing keys are treated as already gone.
    pub async fn delete(&self, key: &str) -> PipelineResult<bool> {
        let response = self
            .client
            .delete(format!("{}/delete/{key}", self.base_url))
            .query(&[("bucket", &self.bucket)])
            .send()
            .await
            .map_err(|e| PipelineError::from_http(e, "storage/delete"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!(key, "delete of missing object");
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(true)
    }

    /// Object metadata as the service reports it.
    pub async fn info(&self, key: &str) -> PipelineResult<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/info/{key}", self.base_url))
            .query(&[("bucket", &self.bucket)])
            .send()
            .await
            .map_err(|e| PipelineError::from_http(e, "storage/info"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(Some(response.json().await.map_err(|e| {
            PipelineError::ProtocolError(e.to_string())
        })?))
    }

    /// Short-timeout liveness probe.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("storage health check failed: {e}");
                false
            }
        }
    }
}

async fn remote_error(response: reqwest::Response) -> PipelineError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    PipelineError::RemoteError { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_identifier_shape() {
        let client = StorageClient::new("http://storage:30880/", "voice-cloning", 30);
        assert_eq!(client.bucket(), "voice-cloning");
        // trailing slash on the base URL must not double up
        assert_eq!(client.base_url, "http://storage:30880");
    }
}
