//! Queue consumer shell
//!
//! Workers here live one message long: the job runner creates a temporary
//! queue, publishes exactly one job, and launches the process with the
//! queue name in `CONSUMER_QUEUE_NAME`. The shell drains that one message,
//! hands it to the worker, deletes the queue (the runner will not), and
//! releases the session.
//!
//! ```text
//! Started → Connected → Consumed(0|1) → QueueDeleted → Closed
//! ```
//!
//! Every branch reaches `QueueDeleted`, including "queue was empty",
//! "body failed to parse", and "handler failed" — a leaked queue is worse
//! than a dropped job, because the runner treats the ephemeral queue as
//! the job's lifetime.

mod mock;
mod rabbit;

pub use mock::MockSource;
pub use rabbit::RabbitConsumer;

use async_trait::async_trait;
use std::future::Future;
use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::types::{JobEnvelope, VideoGenJob};

/// A job shape that can be read off a queue.
///
/// Each worker parses at its own boundary; a body that does not parse is
/// nacked without requeue by the source, because the job is spent either
/// way and the scheduling layer must not retry it.
pub trait QueuePayload: Sized + Send {
    fn parse(body: &[u8]) -> Result<Self, String>;
}

impl QueuePayload for JobEnvelope {
    fn parse(body: &[u8]) -> Result<Self, String> {
        JobEnvelope::from_bytes(body).map_err(|e| e.to_string())
    }
}

impl QueuePayload for VideoGenJob {
    fn parse(body: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(body).map_err(|e| e.to_string())
    }
}

/// One-message job source. Implemented by the RabbitMQ consumer and the
/// mock fixture source; workers only see this seam.
#[async_trait]
pub trait JobSource<T: QueuePayload>: Send {
    /// Establish a session and declare the queue (durable, idempotent).
    async fn connect(&mut self) -> PipelineResult<()>;

    /// Bounded get of at most one message, acked on receipt. A malformed
    /// body is nacked without requeue and reported as `Ok(None)`.
    async fn poll_one(&mut self) -> PipelineResult<Option<T>>;

    /// Remove the ephemeral queue. Idempotent.
    async fn delete_queue(&mut self) -> PipelineResult<()>;

    /// Release the session. Never fails; errors are logged and swallowed.
    async fn close(&mut self);

    /// Queue name, for logs.
    fn queue_name(&self) -> &str;
}

/// Outcome of one shell lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Queue held no (parseable) message
    Empty,
    /// One message was drained and the handler ran it to completion
    Processed,
}

/// Drives a [`JobSource`] through the full shell lifetime, running
/// `handler` on the drained message.
///
/// Connect errors are fatal and propagate directly. Once connected, the
/// queue is always deleted and the session always closed — after a poll
/// error, after a handler error, after an empty queue. Cleanup failures
/// on those paths are logged, never returned, so they cannot mask the
/// original failure.
pub async fn consume_one<T, S, F, Fut>(source: &mut S, handler: F) -> PipelineResult<ConsumeOutcome>
where
    T: QueuePayload,
    S: JobSource<T> + ?Sized,
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = PipelineResult<()>>,
{
    info!(queue = source.queue_name(), "connecting to job queue");
    source.connect().await?;

    let result = match source.poll_one().await {
        Ok(Some(job)) => {
            info!(queue = source.queue_name(), "drained one job");
            handler(job).await.map(|()| ConsumeOutcome::Processed)
        }
        Ok(None) => {
            info!(queue = source.queue_name(), "queue was empty");
            Ok(ConsumeOutcome::Empty)
        }
        Err(e) => Err(e),
    };

    if let Err(e) = source.delete_queue().await {
        warn!(queue = source.queue_name(), "failed to delete queue: {e}");
    }
    source.close().await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::types::{ChatMessage, VoiceJob};
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    /// Scripted source that records lifecycle calls
    struct ScriptedSource {
        job: Option<JobEnvelope>,
        poll_error: Option<PipelineError>,
        deletes: Arc<AtomicU8>,
        closes: Arc<AtomicU8>,
    }

    impl ScriptedSource {
        fn new(job: Option<JobEnvelope>) -> (Self, Arc<AtomicU8>, Arc<AtomicU8>) {
            let deletes = Arc::new(AtomicU8::new(0));
            let closes = Arc::new(AtomicU8::new(0));
            (
                Self {
                    job,
                    poll_error: None,
                    deletes: deletes.clone(),
                    closes: closes.clone(),
                },
                deletes,
                closes,
            )
        }
    }

    #[async_trait]
    impl JobSource<JobEnvelope> for ScriptedSource {
        async fn connect(&mut self) -> PipelineResult<()> {
            Ok(())
        }

        async fn poll_one(&mut self) -> PipelineResult<Option<JobEnvelope>> {
            if let Some(err) = self.poll_error.take() {
                return Err(err);
            }
            Ok(self.job.take())
        }

        async fn delete_queue(&mut self) -> PipelineResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn queue_name(&self) -> &str {
            "scripted"
        }
    }

    fn job() -> JobEnvelope {
        JobEnvelope::VoiceCloning(VoiceJob {
            video_id: "v1".to_string(),
            messages: vec![ChatMessage::new("oi", "Ana")],
            voice_mapping: Default::default(),
            use_voice_cloning: true,
            output_dir: None,
        })
    }

    #[tokio::test]
    async fn processes_one_message_then_cleans_up() {
        let (mut source, deletes, closes) = ScriptedSource::new(Some(job()));

        let outcome = consume_one(&mut source, |job| async move {
            assert!(matches!(job, JobEnvelope::VoiceCloning(_)));
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Processed);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_queue_still_deletes() {
        let (mut source, deletes, closes) = ScriptedSource::new(None);

        let outcome = consume_one(&mut source, |_| async { Ok(()) }).await.unwrap();

        assert_eq!(outcome, ConsumeOutcome::Empty);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_still_deletes_and_closes() {
        let (mut source, deletes, closes) = ScriptedSource::new(Some(job()));

        let result = consume_one(&mut source, |_| async {
            Err(PipelineError::SynthesisFailure("model oom".into()))
        })
        .await;

        assert!(matches!(result, Err(PipelineError::SynthesisFailure(_))));
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poll_error_still_deletes_and_closes() {
        let (mut source, deletes, closes) = ScriptedSource::new(None);
        source.poll_error = Some(PipelineError::ProtocolError("bad frame".into()));

        let result = consume_one(&mut source, |_| async { Ok(()) }).await;

        assert!(result.is_err());
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn video_gen_payload_parses_with_defaults() {
        let body = br#"{"participants": ["Ana", "Bruno"], "messages": []}"#;
        let job = VideoGenJob::parse(body).unwrap();
        assert_eq!(job.messages_per_group, 4);
        assert!((job.start_buffer - 1.0).abs() < f64::EPSILON);
        assert!(job.use_voice_cloning);
    }
}
