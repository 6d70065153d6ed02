//! Voice worker
//!
//! Turns one voice-cloning job into N completed `voices` rows. The rows
//! are the coordination surface: this worker fans the transcript out as
//! `pending` rows, claims them back one by one (other workers may be
//! racing on the same table), synthesizes, optionally uploads, and
//! completes. The orchestrator never talks to this process directly; it
//! watches the rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{StorageConfig, WorkerConfig};
use crate::db::VoiceGateway;
use crate::error::{PipelineError, PipelineResult};
use crate::storage::StorageClient;
use crate::types::{BatchTtsJob, JobEnvelope, PendingVoice, SingleTtsJob, VoiceJob};
use crate::voice::audio::voice_output_filename;
use crate::voice::tts::{clean_text, TtsEngine};

/// Wall-clock budget for one job's rows to all turn terminal
const JOB_WAIT_BUDGET: Duration = Duration::from_secs(600);

/// Pause between barrier checks while other workers hold rows
const BARRIER_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct VoiceWorker {
    gateway: VoiceGateway,
    engine: Arc<dyn TtsEngine>,
    /// Present only in remote-storage mode
    storage: Option<Arc<StorageClient>>,
    output_dir: PathBuf,
    pool_size: usize,
    sweep_interval: Duration,
    running: Arc<AtomicBool>,
}

impl VoiceWorker {
    pub fn new(
        gateway: VoiceGateway,
        engine: Arc<dyn TtsEngine>,
        worker_config: &WorkerConfig,
        storage_config: &StorageConfig,
    ) -> Self {
        let storage = if storage_config.use_local_storage {
            None
        } else {
            Some(Arc::new(StorageClient::from_config(storage_config)))
        };

        // Engines that are not concurrency-safe cap the pool at one
        // regardless of configuration.
        let pool_size = if engine.concurrency_safe() {
            worker_config.synthesis_pool_size.max(1)
        } else {
            1
        };

        Self {
            gateway,
            engine,
            storage,
            output_dir: PathBuf::from(&worker_config.output_dir),
            pool_size,
            sweep_interval: Duration::from_secs(worker_config.sweep_interval_secs),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag flipped by the signal handler; checked between loop rounds.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Entry point for one queue message.
    pub async fn handle_envelope(&self, envelope: JobEnvelope) -> PipelineResult<()> {
        match envelope {
            JobEnvelope::VoiceCloning(job) => self.handle_voice_job(job).await,
            JobEnvelope::Single(job) => self.handle_single(job).await,
            JobEnvelope::Batch(job) => self.handle_batch(job).await,
        }
    }

    /// The fan-out / completion-barrier flow for one video.
    pub async fn handle_voice_job(&self, job: VoiceJob) -> PipelineResult<()> {
        job.validate().map_err(PipelineError::ProtocolError)?;
        let video_id = Uuid::parse_str(&job.video_id).map_err(|_| {
            PipelineError::ProtocolError(format!("video_id is not a UUID: {}", job.video_id))
        })?;

        // Re-running against a video that already has rows must not create
        // duplicates; the existing rows are the job's state.
        let existing = self.gateway.status_for_video(video_id).await?;
        if existing.total == 0 {
            for message in &job.messages {
                self.gateway
                    .create_voice(video_id, &message.from_user, &message.text, None)
                    .await?;
            }
            info!(%video_id, rows = job.messages.len(), "voice rows created");
        } else {
            info!(
                %video_id,
                rows = existing.total,
                "voice rows already exist, reusing"
            );
        }

        let job_mapping = if job.voice_mapping.is_empty() {
            None
        } else {
            Some(&job.voice_mapping)
        };

        let deadline = Instant::now() + JOB_WAIT_BUDGET;
        loop {
            let processed = self.sweep_pending(job_mapping).await?;

            let status = self.gateway.status_for_video(video_id).await?;
            if status.any_failed() {
                return Err(PipelineError::SynthesisFailure(format!(
                    "{} of {} voice rows failed for video {video_id}",
                    status.failed, status.total
                )));
            }
            if status.all_completed() {
                info!(%video_id, rows = status.total, "all voices completed");
                return Ok(());
            }

            // Rows this process could claim are exhausted; whatever is
            // left belongs to another worker. Wait, bounded.
            if processed == 0 {
                if !self.is_running() || Instant::now() >= deadline {
                    return Err(PipelineError::Timeout(JOB_WAIT_BUDGET.as_secs()));
                }
                tokio::time::sleep(BARRIER_POLL_INTERVAL).await;
            }
        }
    }

    /// One sweep over the pending rows: claim what we can, process every
    /// claimed row under the synthesis pool cap. Returns how many rows
    /// this process claimed.
    pub async fn sweep_pending(
        &self,
        job_mapping: Option<&HashMap<String, String>>,
    ) -> PipelineResult<usize> {
        let pending = self.gateway.pending_voices().await?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(rows = pending.len(), "found pending voice rows");

        let mut claimed = Vec::new();
        for row in pending {
            if !self.is_running() {
                break;
            }
            if self.gateway.claim_voice(row.id).await? {
                claimed.push(row);
            }
        }

        let count = claimed.len();
        futures::stream::iter(claimed)
            .for_each_concurrent(self.pool_size, |row| async move {
                self.process_row(row, job_mapping).await;
            })
            .await;

        Ok(count)
    }

    /// Process one claimed row end to end; any error fails the row, never
    /// the sweep.
    async fn process_row(&self, row: PendingVoice, job_mapping: Option<&HashMap<String, String>>) {
        let voice_id = row.id;
        if let Err(e) = self.synthesize_row(&row, job_mapping).await {
            error!(%voice_id, "voice row failed: {e}");
            if let Err(db_err) = self.gateway.fail_voice(voice_id, &e.to_string()).await {
                error!(%voice_id, "could not record failure: {db_err}");
            }
        }
    }

    async fn synthesize_row(
        &self,
        row: &PendingVoice,
        job_mapping: Option<&HashMap<String, String>>,
    ) -> PipelineResult<()> {
        info!(voice_id = %row.id, character = %row.character_name, "processing voice row");

        let text = clean_text(&row.text_content);
        if text.is_empty() {
            return Err(PipelineError::SynthesisFailure(
                "text is empty after cleanup".into(),
            ));
        }

        // Mapping resolution: the row's joined mapping wins, then the
        // job-level participant mapping, then the seeded default.
        let reference_source = match &row.voice_file {
            Some(file) => Some(file.clone()),
            None => match job_mapping.and_then(|m| m.get(&row.character_name)) {
                Some(file) => Some(file.clone()),
                None => self.gateway.default_mapping().await?.map(|m| m.voice_file),
            },
        };
        let Some(reference_source) = reference_source else {
            return Err(PipelineError::SynthesisFailure(
                "no voice mapping available".into(),
            ));
        };
        let reference = self.resolve_reference(&reference_source).await?;

        let output_path = self
            .output_dir
            .join(voice_output_filename(&row.id, &row.character_name));
        self.engine
            .synthesize(&text, reference.as_deref(), &output_path)
            .await?;

        // Upload failures are recoverable: the local file is the result.
        let mut final_path = output_path.to_string_lossy().into_owned();
        let mut is_local = true;
        let mut remote_path = None;
        if let Some(storage) = &self.storage {
            let key = voice_output_filename(&row.id, &row.character_name);
            match storage.upload_file(&output_path, &key).await {
                Ok(remote) => {
                    final_path = remote.clone();
                    is_local = false;
                    remote_path = Some(remote);
                }
                Err(e) => {
                    warn!(voice_id = %row.id, "upload failed, keeping local audio: {e}");
                }
            }
        }

        self.gateway
            .complete_voice(row.id, &final_path, is_local, remote_path.as_deref())
            .await?;
        info!(voice_id = %row.id, path = %final_path, "voice row completed");
        Ok(())
    }

    /// Turn a mapping's `voice_file` into a local path the engine can
    /// read: an existing local file as-is, otherwise fetched from the
    /// object store into the references directory.
    async fn resolve_reference(&self, source: &str) -> PipelineResult<Option<PathBuf>> {
        let path = Path::new(source);
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }

        if let Some(storage) = &self.storage {
            let file_name = source.rsplit('/').next().unwrap_or(source);
            let local = self.output_dir.join("references").join(file_name);
            if !local.exists() {
                storage.download_to(source, &local).await?;
            }
            return Ok(Some(local));
        }

        // No store to ask; hand the engine the raw path and let it report
        // the failure against this row.
        Ok(Some(path.to_path_buf()))
    }

    /// `single` job kind: one utterance straight to disk, no rows.
    async fn handle_single(&self, job: SingleTtsJob) -> PipelineResult<()> {
        let text = clean_text(&job.text);
        if text.is_empty() {
            return Err(PipelineError::ProtocolError(
                "single job has no speakable text".into(),
            ));
        }

        let dir = job
            .output_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output_dir.clone());
        let output = dir.join(&job.output_filename);

        let reference = match &job.voice_file {
            Some(file) => self.resolve_reference(file).await?,
            None => None,
        };

        self.engine
            .synthesize(&text, reference.as_deref(), &output)
            .await?;
        info!(path = %output.display(), "single TTS generated");
        Ok(())
    }

    /// `batch` job kind: a message list synthesized in order, no rows.
    async fn handle_batch(&self, job: BatchTtsJob) -> PipelineResult<()> {
        if job.messages.is_empty() {
            return Err(PipelineError::ProtocolError("batch job has no messages".into()));
        }

        let dir = job
            .output_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output_dir.clone());

        let mut generated = 0_usize;
        for (index, message) in job.messages.iter().enumerate() {
            let text = clean_text(&message.text);
            if text.is_empty() {
                warn!(index, "skipping message with no speakable text");
                continue;
            }

            let reference = match job.voice_mapping.get(&message.from_user) {
                Some(file) => self.resolve_reference(file).await?,
                None => None,
            };
            let output = dir.join(format!("msg_{index:03}_{}.wav", message.from_user));

            match self
                .engine
                .synthesize(&text, reference.as_deref(), &output)
                .await
            {
                Ok(()) => generated += 1,
                Err(e) => error!(index, "batch synthesis failed: {e}"),
            }
        }

        if generated == 0 {
            return Err(PipelineError::SynthesisFailure(
                "no audio files were generated".into(),
            ));
        }
        info!(generated, total = job.messages.len(), "batch TTS finished");
        Ok(())
    }

    /// Database mode: ignore the broker and keep sweeping pending rows
    /// until a signal stops the process.
    pub async fn run_database_mode(&self) -> PipelineResult<()> {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            "starting continuous database-mode processing"
        );

        while self.is_running() {
            match self.sweep_pending(None).await {
                Ok(0) => info!("no pending voice rows"),
                Ok(n) => info!(processed = n, "sweep finished"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!("sweep failed: {e}"),
            }

            // Sleep in short slices so a signal is honored promptly.
            let mut remaining = self.sweep_interval;
            while self.is_running() && !remaining.is_zero() {
                let step = remaining.min(Duration::from_secs(1));
                tokio::time::sleep(step).await;
                remaining -= step;
            }
        }

        info!("database mode stopped");
        Ok(())
    }
}
