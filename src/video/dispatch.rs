//! Voice-job hand-off
//!
//! The orchestrator never publishes to the worker's queue — that queue
//! does not exist yet. It hands the job to the runner's intake queue and
//! the runner provisions a temporary queue plus a worker process for it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::VoiceJob;

/// The runner's intake queue
pub const JOBBER_QUEUE: &str = "jobber-requests";

#[async_trait]
pub trait VoiceDispatch: Send + Sync {
    async fn dispatch(&self, job: &VoiceJob, participants: &[String]) -> PipelineResult<()>;
}

/// What the runner expects on its intake queue
#[derive(Debug, Serialize)]
struct JobberRequest<'a> {
    id: Uuid,
    #[serde(rename = "type")]
    kind: &'static str,
    video_id: &'a str,
    messages: &'a [crate::types::ChatMessage],
    participants: &'a [String],
    voice_mapping: &'a std::collections::HashMap<String, String>,
    use_voice_cloning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dir: Option<&'a str>,
    timestamp: DateTime<Utc>,
}

/// Publishes to the runner's durable intake queue over AMQP.
pub struct JobberDispatch {
    config: BrokerConfig,
}

impl JobberDispatch {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl VoiceDispatch for JobberDispatch {
    async fn dispatch(&self, job: &VoiceJob, participants: &[String]) -> PipelineResult<()> {
        let request = JobberRequest {
            id: Uuid::new_v4(),
            kind: "voice_cloning",
            video_id: &job.video_id,
            messages: &job.messages,
            participants,
            voice_mapping: &job.voice_mapping,
            use_voice_cloning: job.use_voice_cloning,
            output_dir: job.output_dir.as_deref(),
            timestamp: Utc::now(),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| PipelineError::ProtocolError(e.to_string()))?;

        let connection = Connection::connect(&self.config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| {
                PipelineError::TransportUnavailable(format!("broker unreachable: {e}"))
            })?;
        let channel = connection.create_channel().await?;
        channel
            .queue_declare(
                JOBBER_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_publish(
                "",
                JOBBER_QUEUE,
                Default::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;

        if let Err(e) = connection.close(200, "done").await {
            tracing::warn!("error closing dispatch connection: {e}");
        }

        info!(request_id = %request.id, video_id = %job.video_id, "voice job handed to runner");
        Ok(())
    }
}

/// Dispatch that records the hand-off without a broker. Used when the
/// worker is driven out of band (database mode, tests).
pub struct NoopDispatch;

#[async_trait]
impl VoiceDispatch for NoopDispatch {
    async fn dispatch(&self, job: &VoiceJob, _participants: &[String]) -> PipelineResult<()> {
        info!(
            video_id = %job.video_id,
            messages = job.messages.len(),
            "dispatch skipped (no broker configured)"
        );
        Ok(())
    }
}
