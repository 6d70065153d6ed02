//! Video orchestrator
//!
//! Runs the whole pipeline for exactly one video request: fan the voice
//! work out through the runner, wait on the database completion barrier,
//! fetch the chat screenshot, generate the overlay frames, and invoke the
//! mux. Every step either finishes or aborts the run; there is no partial
//! recovery inside a single process, because re-running the orchestrator
//! with the same video id observes the same rows and resumes cheaply.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use uuid::Uuid;

use super::dispatch::VoiceDispatch;
use super::mux::{self, MuxRequest};
use crate::config::OverlayConfig;
use crate::db::VoiceGateway;
use crate::error::{PipelineError, PipelineResult};
use crate::overlay::{ChatCrop, ProgressiveOverlay};
use crate::screenshot::{ScreenshotArtifact, ScreenshotClient};
use crate::storage::StorageClient;
use crate::types::{ChatMessage, VoiceJob, VoiceRow};
use crate::voice::audio::wav_duration_secs;

/// Wall-clock budget for the voice completion barrier
pub const VOICE_WAIT_BUDGET: Duration = Duration::from_secs(300);

/// Pause between barrier polls
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One fully-specified video request.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub video_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub participants: Vec<String>,
    pub voice_mapping: std::collections::HashMap<String, String>,
    pub use_voice_cloning: bool,
    /// Frame timing for this request
    pub overlay: OverlayConfig,
    /// Directory to pick a random background clip from
    pub background_dir: Option<PathBuf>,
    /// Scratch space for screenshots, audio, and frames
    pub work_dir: PathBuf,
    pub output_path: PathBuf,
    /// Remove scratch directories after a successful mux
    pub cleanup: bool,
}

impl VideoRequest {
    fn screenshot_dir(&self) -> PathBuf {
        self.work_dir.join("temp_chat_imgs")
    }

    fn audio_dir(&self) -> PathBuf {
        self.work_dir.join("temp_audio")
    }

    fn frames_dir(&self) -> PathBuf {
        self.work_dir.join("temp_frames")
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub video_id: Uuid,
    pub output_path: PathBuf,
    pub frame_count: u64,
    pub audio_count: usize,
}

pub struct VideoOrchestrator {
    gateway: VoiceGateway,
    screenshot: ScreenshotClient,
    storage: StorageClient,
    dispatch: Box<dyn VoiceDispatch>,
    running: Arc<AtomicBool>,
}

impl VideoOrchestrator {
    pub fn new(
        gateway: VoiceGateway,
        screenshot: ScreenshotClient,
        storage: StorageClient,
        dispatch: Box<dyn VoiceDispatch>,
    ) -> Self {
        Self {
            gateway,
            screenshot,
            storage,
            dispatch,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run the full pipeline for one request.
    pub async fn run(&self, request: &VideoRequest) -> PipelineResult<PipelineOutcome> {
        if request.messages.is_empty() {
            return Err(PipelineError::ProtocolError(
                "conversation transcript is empty".into(),
            ));
        }
        info!(
            video_id = %request.video_id,
            messages = request.messages.len(),
            "starting video pipeline"
        );

        self.dispatch_voice_job(request).await?;
        self.wait_for_voices(request.video_id).await?;

        let (audio_paths, durations) = self.collect_audio(request).await?;

        if !self.screenshot.ping().await {
            return Err(PipelineError::TransportUnavailable(
                "screenshot service failed its health check".into(),
            ));
        }
        let artifact = self
            .screenshot
            .get_screenshot_with_coordinates(
                &request.messages,
                &request.participants,
                &request.screenshot_dir().to_string_lossy(),
            )
            .await?;

        let frame_count = self
            .generate_frames(request, &artifact, &durations)
            .await?;

        let background = request
            .background_dir
            .as_deref()
            .and_then(mux::pick_background_clip);
        if background.is_none() {
            warn!("no background clip; muxing frames only");
        }

        let output = mux::run_mux(&MuxRequest {
            frames_dir: request.frames_dir(),
            fps: request.overlay.fps,
            audio_paths: audio_paths.clone(),
            background,
            output: request.output_path.clone(),
        })
        .await?;

        if request.cleanup {
            self.cleanup_scratch(request);
        }

        info!(video_id = %request.video_id, output = %output.display(), "pipeline finished");
        Ok(PipelineOutcome {
            video_id: request.video_id,
            output_path: output,
            frame_count,
            audio_count: audio_paths.len(),
        })
    }

    /// Step 3: hand the voice job to the runner. The worker owns row
    /// creation; this side only describes the work.
    async fn dispatch_voice_job(&self, request: &VideoRequest) -> PipelineResult<()> {
        let job = VoiceJob {
            video_id: request.video_id.to_string(),
            messages: request.messages.clone(),
            voice_mapping: request.voice_mapping.clone(),
            use_voice_cloning: request.use_voice_cloning,
            output_dir: None,
        };
        self.dispatch.dispatch(&job, &request.participants).await
    }

    /// Step 4: the completion barrier. Rows decide everything: a failed
    /// row aborts immediately, full completion proceeds, anything else
    /// waits until the budget runs out.
    async fn wait_for_voices(&self, video_id: Uuid) -> PipelineResult<()> {
        let deadline = Instant::now() + VOICE_WAIT_BUDGET;

        loop {
            let status = self.gateway.status_for_video(video_id).await?;

            if status.any_failed() {
                error!(
                    %video_id,
                    failed = status.failed,
                    total = status.total,
                    "voice generation failed"
                );
                return Err(PipelineError::SynthesisFailure(format!(
                    "{} of {} voice rows failed",
                    status.failed, status.total
                )));
            }
            if status.all_completed() {
                info!(%video_id, total = status.total, "all voices completed");
                return Ok(());
            }

            info!(
                %video_id,
                completed = status.completed,
                total = status.total,
                "waiting for voices"
            );

            if !self.running.load(Ordering::SeqCst) || Instant::now() >= deadline {
                return Err(PipelineError::Timeout(VOICE_WAIT_BUDGET.as_secs()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Step 5: pull completed rows in insertion order, make every audio
    /// file local, probe durations.
    async fn collect_audio(
        &self,
        request: &VideoRequest,
    ) -> PipelineResult<(Vec<PathBuf>, Vec<f64>)> {
        let rows = self.gateway.completed_voices(request.video_id).await?;
        if rows.is_empty() {
            return Err(PipelineError::ProtocolError(format!(
                "no completed voice rows for video {}",
                request.video_id
            )));
        }

        let mut paths = Vec::with_capacity(rows.len());
        for row in &rows {
            paths.push(self.localize_audio(row, &request.audio_dir()).await?);
        }

        let mut durations = Vec::with_capacity(paths.len());
        for path in &paths {
            let secs = wav_duration_secs(path)?;
            durations.push(secs);
        }
        info!(files = paths.len(), "audio durations probed");
        Ok((paths, durations))
    }

    /// A completed row points either at a local file or at an object in
    /// the store (`"{bucket}/{key}"`); either way the mux needs a path.
    async fn localize_audio(&self, row: &VoiceRow, audio_dir: &Path) -> PipelineResult<PathBuf> {
        let recorded = row.output_audio_path.as_deref().ok_or_else(|| {
            PipelineError::ProtocolError(format!("completed row {} has no audio path", row.id))
        })?;

        if row.is_local_storage {
            return Ok(PathBuf::from(recorded));
        }

        let key = recorded
            .split_once('/')
            .map(|(_, key)| key)
            .unwrap_or(recorded);
        let local = audio_dir.join(key);
        if !local.exists() {
            self.storage.download_to(key, &local).await?;
        }
        Ok(local)
    }

    /// Steps 7–8: crop the screenshot and write the frame sequence.
    async fn generate_frames(
        &self,
        request: &VideoRequest,
        artifact: &ScreenshotArtifact,
        durations: &[f64],
    ) -> PipelineResult<u64> {
        let screenshot = self.load_screenshot(artifact).await?;
        let crop = ChatCrop::prepare(&screenshot, &artifact.coordinates)?;
        let overlay = ProgressiveOverlay::new(crop, request.overlay.clone());

        let frames_dir = request.frames_dir();
        let frames = overlay.write_frames(durations, &frames_dir)?;
        info!(count = frames.len(), dir = %frames_dir.display(), "overlay frames written");
        Ok(frames.len() as u64)
    }

    /// The screenshot service reports a path on shared storage; when the
    /// path is not visible from this process, fall back to the blob URL.
    async fn load_screenshot(
        &self,
        artifact: &ScreenshotArtifact,
    ) -> PipelineResult<image::DynamicImage> {
        let path = Path::new(&artifact.image_path);
        if path.exists() {
            return Ok(image::open(path)?);
        }

        let Some(url) = artifact.image_url.as_deref() else {
            return Err(PipelineError::ProtocolError(format!(
                "screenshot path {} is not accessible and no URL was given",
                artifact.image_path
            )));
        };

        info!(url, "fetching screenshot over HTTP");
        let bytes = reqwest::get(url)
            .await
            .map_err(|e| PipelineError::from_http(e, "screenshot image"))?
            .bytes()
            .await
            .map_err(|e| PipelineError::ProtocolError(e.to_string()))?;
        Ok(image::load_from_memory(&bytes)?)
    }

    fn cleanup_scratch(&self, request: &VideoRequest) {
        for dir in [
            request.screenshot_dir(),
            request.audio_dir(),
            request.frames_dir(),
        ] {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), "scratch cleanup failed: {e}");
                }
            }
        }
    }
}
