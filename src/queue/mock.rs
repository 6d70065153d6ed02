//! Mock job source for local runs
//!
//! Selected with `USE_MOCK_MODE=true`. Supplies one deterministic
//! four-message job and no-ops every broker step, so the whole worker can
//! be exercised without RabbitMQ.

use async_trait::async_trait;
use tracing::info;

use super::JobSource;
use crate::error::PipelineResult;
use crate::types::{ChatMessage, JobEnvelope, VoiceJob};

pub struct MockSource {
    queue_name: String,
    consumed: bool,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            queue_name: "voice-cloning-queue".to_string(),
            consumed: false,
        }
    }

    /// The built-in fixture: a short two-speaker exchange.
    pub fn fixture_job() -> VoiceJob {
        VoiceJob {
            // Fixed id so repeated mock runs land on the same rows
            video_id: "0b0daf8e-1c4a-4c6f-9f51-2d9b6a7e4c10".to_string(),
            messages: vec![
                ChatMessage::new("Olá, sou o aluno Lucas!", "aluno"),
                ChatMessage::new("Olá Lucas, sou a professora Marina!", "professora"),
                ChatMessage::new("Como está indo com os estudos?", "aluno"),
                ChatMessage::new("Muito bem! Continue assim!", "professora"),
            ],
            voice_mapping: [
                ("aluno".to_string(), "voices/voz_aluno_lucas.wav".to_string()),
                (
                    "professora".to_string(),
                    "voices/voz_referencia.wav".to_string(),
                ),
            ]
            .into_iter()
            .collect(),
            use_voice_cloning: true,
            output_dir: None,
        }
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobSource<JobEnvelope> for MockSource {
    async fn connect(&mut self) -> PipelineResult<()> {
        info!(queue = %self.queue_name, "mock mode: connected");
        Ok(())
    }

    async fn poll_one(&mut self) -> PipelineResult<Option<JobEnvelope>> {
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        info!("mock mode: returning built-in test job");
        Ok(Some(JobEnvelope::VoiceCloning(Self::fixture_job())))
    }

    async fn delete_queue(&mut self) -> PipelineResult<()> {
        info!(queue = %self.queue_name, "mock mode: queue deleted");
        Ok(())
    }

    async fn close(&mut self) {
        info!("mock mode: connection closed");
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{consume_one, ConsumeOutcome};

    #[tokio::test]
    async fn yields_fixture_exactly_once() {
        let mut source = MockSource::new();

        let outcome = consume_one(&mut source, |envelope| async move {
            match envelope {
                JobEnvelope::VoiceCloning(job) => {
                    assert_eq!(job.messages.len(), 4);
                    assert!(job.validate().is_ok());
                    Ok(())
                }
                other => panic!("expected voice_cloning fixture, got {other:?}"),
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome, ConsumeOutcome::Processed);

        let second = consume_one(&mut source, |_| async { Ok(()) }).await.unwrap();
        assert_eq!(second, ConsumeOutcome::Empty);
    }
}
