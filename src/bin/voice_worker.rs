//! Voice-cloning TTS worker
//!
//! One job, one process: drain a single voice job from the injected
//! queue (or the mock fixture), drive its rows to completion, exit.
//! `USE_DATABASE_MODE=true` skips the broker entirely and sweeps pending
//! rows on an interval until signalled.

use std::process::ExitCode;

use tracing::{error, info};

use chatcast::config::Config;
use chatcast::db::{self, VoiceGateway};
use chatcast::error::PipelineResult;
use chatcast::queue::{consume_one, MockSource, RabbitConsumer};
use chatcast::signals;
use chatcast::types::JobEnvelope;
use chatcast::voice::{engine_from_config, VoiceWorker};

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = chatcast::logging::init();

    match run().await {
        Ok(()) => {
            info!("voice worker finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("voice worker failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PipelineResult<()> {
    let config = Config::from_env();

    let pool = db::connect_pool(&config.database).await?;
    db::ensure_schema(&pool).await?;
    let gateway = VoiceGateway::new(pool);

    let engine = engine_from_config(&config.tts);
    info!(engine = engine.name(), "TTS engine selected");

    let worker = VoiceWorker::new(gateway, engine, &config.worker, &config.storage);
    signals::watch_shutdown(worker.running_flag());

    if config.worker.use_database_mode {
        info!("starting in database mode");
        return worker.run_database_mode().await;
    }

    if config.worker.use_mock_mode {
        info!("starting in mock mode");
        let mut source = MockSource::new();
        consume_one(&mut source, |envelope| worker.handle_envelope(envelope)).await?;
    } else {
        info!("starting in queue mode");
        let mut source = RabbitConsumer::<JobEnvelope>::from_config(&config.broker)?;
        consume_one(&mut source, |envelope| worker.handle_envelope(envelope)).await?;
    }

    Ok(())
}
