//! Video orchestrator
//!
//! Drives the full pipeline for one video request. With
//! `CONSUMER_QUEUE_NAME` set the request arrives as a queue job; without
//! it the CLI describes the request directly and the transcript is read
//! from a JSON file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use uuid::Uuid;

use chatcast::config::{Config, OverlayConfig};
use chatcast::db::{self, VoiceGateway};
use chatcast::error::{PipelineError, PipelineResult};
use chatcast::queue::{consume_one, MockSource, RabbitConsumer};
use chatcast::screenshot::ScreenshotClient;
use chatcast::signals;
use chatcast::storage::StorageClient;
use chatcast::types::{ChatMessage, VideoGenJob};
use chatcast::video::{
    JobberDispatch, NoopDispatch, VideoOrchestrator, VideoRequest, VoiceDispatch,
};

#[derive(Parser, Debug)]
#[command(name = "video-orchestrator", about = "Chat-narration video pipeline")]
struct Cli {
    /// Video id; generated when omitted
    #[arg(long)]
    video_id: Option<Uuid>,

    /// JSON file with the conversation transcript
    /// (array of {"text", "from_user"})
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Participant names
    #[arg(long, num_args = 2, default_values = ["Ana", "Bruno"])]
    participants: Vec<String>,

    /// Map participants to reference voices: name:voice.wav
    #[arg(long)]
    voice_mapping: Vec<String>,

    /// Disable voice cloning for this run
    #[arg(long)]
    no_voice_cloning: bool,

    /// Messages revealed per overlay group
    #[arg(long, default_value_t = 4)]
    messages_per_group: usize,

    /// Seconds of empty video before the first message
    #[arg(long, default_value_t = 1.0)]
    start_buffer: f64,

    /// Seconds of empty video after the last message
    #[arg(long, default_value_t = 3.0)]
    end_buffer: f64,

    /// Hold between messages inside a group, seconds
    #[arg(long, default_value_t = 0.5)]
    pause_between_messages: f64,

    /// Output frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Directory of background clips to pick from
    #[arg(long, env = "BACKGROUND_VIDEO_DIR")]
    background_dir: Option<PathBuf>,

    /// Final video path
    #[arg(long, default_value = "output_with_overlay.mp4")]
    output: PathBuf,

    /// Scratch directory for screenshots, audio, and frames
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Remove scratch directories after a successful run
    #[arg(long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = chatcast::logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => {
            info!("video orchestrator finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("video orchestrator failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> PipelineResult<()> {
    let config = Config::from_env();

    let pool = db::connect_pool(&config.database).await?;
    db::ensure_schema(&pool).await?;
    let gateway = VoiceGateway::new(pool);
    let screenshot = ScreenshotClient::from_config(&config.screenshot);
    let storage = StorageClient::from_config(&config.storage);

    // In mock mode the worker is driven out of band; everywhere else the
    // job runner gets the hand-off.
    let dispatch: Box<dyn VoiceDispatch> = if config.worker.use_mock_mode {
        Box::new(NoopDispatch)
    } else {
        Box::new(JobberDispatch::new(&config.broker))
    };

    let orchestrator = VideoOrchestrator::new(gateway, screenshot, storage, dispatch);
    signals::watch_shutdown(orchestrator.running_flag());

    if config.broker.queue_name.is_some() && !config.worker.use_mock_mode {
        // Queue mode: the runner publishes one video job on our queue.
        let mut source = RabbitConsumer::<VideoGenJob>::from_config(&config.broker)?;
        let cli = &cli;
        let orchestrator = &orchestrator;
        consume_one(&mut source, |job| async move {
            let request = request_from_job(cli, job)?;
            orchestrator.run(&request).await.map(|_| ())
        })
        .await?;
        return Ok(());
    }

    let request = request_from_cli(&cli, config.worker.use_mock_mode)?;
    orchestrator.run(&request).await.map(|_| ())
}

fn overlay_from_cli(cli: &Cli) -> OverlayConfig {
    OverlayConfig {
        fps: cli.fps,
        messages_per_group: cli.messages_per_group,
        start_buffer: cli.start_buffer,
        end_buffer: cli.end_buffer,
        pause_between_messages: cli.pause_between_messages,
    }
}

fn parse_voice_mapping(pairs: &[String]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for pair in pairs {
        match pair.split_once(':') {
            Some((name, file)) => {
                mapping.insert(name.trim().to_string(), file.trim().to_string());
            }
            None => warn!(%pair, "ignoring voice mapping without name:file shape"),
        }
    }
    mapping
}

/// Direct mode: the transcript comes from a file, or from the built-in
/// fixture when running in mock mode with no file given.
fn request_from_cli(cli: &Cli, mock_mode: bool) -> PipelineResult<VideoRequest> {
    // In mock mode the worker processed the fixture job; default to its
    // video id so the barrier observes the same rows.
    let mut default_video_id = Uuid::new_v4();

    let messages: Vec<ChatMessage> = match &cli.transcript {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).map_err(|e| {
                PipelineError::ProtocolError(format!("transcript {}: {e}", path.display()))
            })?
        }
        None if mock_mode => {
            let fixture = MockSource::fixture_job();
            if let Ok(id) = Uuid::parse_str(&fixture.video_id) {
                default_video_id = id;
            }
            fixture.messages
        }
        None => {
            return Err(PipelineError::ProtocolError(
                "no transcript: pass --transcript (conversation generation is external)".into(),
            ))
        }
    };

    Ok(VideoRequest {
        video_id: cli.video_id.unwrap_or(default_video_id),
        messages,
        participants: cli.participants.clone(),
        voice_mapping: parse_voice_mapping(&cli.voice_mapping),
        use_voice_cloning: !cli.no_voice_cloning,
        overlay: overlay_from_cli(cli),
        background_dir: cli.background_dir.clone(),
        work_dir: cli.work_dir.clone(),
        output_path: cli.output.clone(),
        cleanup: cli.cleanup,
    })
}

/// Queue mode: the job payload wins over CLI defaults where it speaks.
fn request_from_job(cli: &Cli, job: VideoGenJob) -> PipelineResult<VideoRequest> {
    if job.messages.is_empty() {
        // A bare prompt cannot be expanded here; transcript generation is
        // the chat generator's job.
        return Err(PipelineError::ProtocolError(
            "video job carries no transcript messages".into(),
        ));
    }

    let video_id = match &job.video_id {
        Some(raw) => Uuid::parse_str(raw)
            .map_err(|_| PipelineError::ProtocolError(format!("video_id is not a UUID: {raw}")))?,
        None => Uuid::new_v4(),
    };

    let participants = if job.participants.is_empty() {
        cli.participants.clone()
    } else {
        job.participants.clone()
    };

    // The job's timing fields win over CLI defaults; fps and the
    // inter-message pause only exist on the CLI side.
    let overlay = OverlayConfig {
        fps: cli.fps,
        messages_per_group: job.messages_per_group,
        start_buffer: job.start_buffer,
        end_buffer: job.end_buffer,
        pause_between_messages: cli.pause_between_messages,
    };

    Ok(VideoRequest {
        video_id,
        messages: job.messages.clone(),
        participants,
        voice_mapping: job.voice_mapping.clone(),
        use_voice_cloning: job.use_voice_cloning,
        overlay,
        background_dir: cli.background_dir.clone(),
        work_dir: cli.work_dir.clone(),
        output_path: cli.output.clone(),
        cleanup: cli.cleanup,
    })
}
