//! Database layer
//!
//! Pool construction and the embedded schema for the shared Postgres
//! database. All reads and writes against `voices` go through
//! [`voices::VoiceGateway`]; nothing else in the crate issues SQL.

pub mod voices;

pub use voices::VoiceGateway;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{PipelineError, PipelineResult};

/// Schema applied idempotently on startup.
///
/// The partial unique index is what enforces "at most one default
/// mapping": a second `is_default = TRUE` row violates it.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS voice_mappings (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    voice_id TEXT UNIQUE NOT NULL,
    voice_name TEXT NOT NULL,
    voice_file TEXT NOT NULL,
    is_default BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_voice_mappings_single_default
    ON voice_mappings (is_default) WHERE is_default;

CREATE TABLE IF NOT EXISTS voices (
    id UUID PRIMARY KEY,
    video_id UUID NOT NULL,
    voice_mapping_id UUID REFERENCES voice_mappings(id),
    character_name TEXT NOT NULL,
    text_content TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    output_audio_path TEXT,
    is_local_storage BOOLEAN NOT NULL DEFAULT TRUE,
    remote_storage_path TEXT,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    processing_started_at TIMESTAMPTZ,
    processing_completed_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_voices_video ON voices (video_id);
CREATE INDEX IF NOT EXISTS idx_voices_status ON voices (status, created_at);
"#;

/// Connect a bounded pool. Unreachable Postgres is an infrastructure
/// failure, so the error is already mapped for the exit-code path.
pub async fn connect_pool(config: &DatabaseConfig) -> PipelineResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.connection_url())
        .await
        .map_err(|e| {
            PipelineError::TransportUnavailable(format!(
                "postgres {}:{}: {e}",
                config.host, config.port
            ))
        })?;

    info!(
        host = %config.host,
        database = %config.database,
        "connected to postgres"
    );
    Ok(pool)
}

/// Apply the embedded schema (idempotent).
pub async fn ensure_schema(pool: &PgPool) -> PipelineResult<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
