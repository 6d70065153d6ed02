//! Chat screenshot service client
//!
//! One POST renders the whole conversation and reports where each bubble
//! landed. The coordinate list is the contract the overlay engine builds
//! on, so its length is validated here, at the boundary, not downstream.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ScreenshotConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{ChatMessage, MessageCoordinate};

#[derive(Serialize)]
struct ScreenshotRequest<'a> {
    messages: &'a [ChatMessage],
    participants: &'a [String],
    #[serde(rename = "outputDir")]
    output_dir: &'a str,
    /// (height, width) of the rendered page
    img_size: (u32, u32),
}

#[derive(Deserialize)]
struct ScreenshotResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "imagePaths")]
    image_paths: Vec<String>,
    #[serde(default, rename = "imageUrls")]
    image_urls: Vec<String>,
    #[serde(default, rename = "messageCoordinates")]
    message_coordinates: Vec<MessageCoordinate>,
}

/// The rendered chat plus where every bubble sits in it.
#[derive(Debug, Clone)]
pub struct ScreenshotArtifact {
    pub image_path: String,
    pub image_url: Option<String>,
    pub coordinates: Vec<MessageCoordinate>,
}

pub struct ScreenshotClient {
    base_url: String,
    client: reqwest::Client,
    img_size: (u32, u32),
}

impl ScreenshotClient {
    pub fn new(base_url: &str, timeout_secs: u64, img_size: (u32, u32)) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs.max(60)))
                .build()
                .unwrap_or_default(),
            img_size,
        }
    }

    pub fn from_config(config: &ScreenshotConfig) -> Self {
        Self::new(&config.base_url, config.timeout_secs, config.img_size)
    }

    /// Render the conversation and return the screenshot with per-message
    /// bounding boxes.
    pub async fn get_screenshot_with_coordinates(
        &self,
        messages: &[ChatMessage],
        participants: &[String],
        output_dir: &str,
    ) -> PipelineResult<ScreenshotArtifact> {
        info!(
            count = messages.len(),
            "requesting chat screenshot with coordinates"
        );

        let request = ScreenshotRequest {
            messages,
            participants,
            output_dir,
            img_size: self.img_size,
        };

        let response = self
            .client
            .post(format!("{}/api/generate-screenshots", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::from_http(e, "screenshot"))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::RemoteError { status, body });
        }

        let body: ScreenshotResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::ProtocolError(format!("screenshot response: {e}")))?;

        if !body.success {
            return Err(PipelineError::RemoteError {
                status: 200,
                body: body.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let image_path = body
            .image_paths
            .first()
            .cloned()
            .ok_or_else(|| PipelineError::ProtocolError("no screenshot path returned".into()))?;

        if body.message_coordinates.len() != messages.len() {
            return Err(PipelineError::ProtocolError(format!(
                "coordinate count {} does not match message count {}",
                body.message_coordinates.len(),
                messages.len()
            )));
        }

        info!(
            path = %image_path,
            coordinates = body.message_coordinates.len(),
            "screenshot generated"
        );

        Ok(ScreenshotArtifact {
            image_path,
            image_url: body.image_urls.first().cloned(),
            coordinates: body.message_coordinates,
        })
    }

    /// Liveness gate before the orchestrator commits to the screenshot step.
    pub async fn ping(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/health", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("screenshot service health check failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_shape_parses() {
        let raw = r#"{
            "success": true,
            "imagePaths": ["/tmp/chat/shot_0.png"],
            "imageUrls": [],
            "messageCoordinates": [
                {"index": 0, "y": 120, "height": 64, "width": 320, "from": "Ana", "text": "Oi!"}
            ]
        }"#;
        let parsed: ScreenshotResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.image_paths.len(), 1);
        assert_eq!(parsed.message_coordinates[0].from, "Ana");
        assert_eq!(parsed.message_coordinates[0].bottom(), 184);
    }

    #[test]
    fn error_response_carries_message() {
        let raw = r#"{"success": false, "error": "render crashed"}"#;
        let parsed: ScreenshotResponse = serde_json::from_str(raw).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error.as_deref(), Some("render crashed"));
    }
}
