//! Typed gateway over the `voices` and `voice_mappings` tables
//!
//! The single-claimer guarantee lives here: `claim_voice` is a
//! conditional update that only fires while the row is still `pending`,
//! so concurrent workers racing for the same row see exactly one winner.

use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::PipelineResult;
use crate::types::{PendingVoice, VideoVoiceStatus, VoiceMapping, VoiceRow};

#[derive(Clone)]
pub struct VoiceGateway {
    pool: PgPool,
}

impl VoiceGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a fresh `pending` row and return its id.
    ///
    /// No dedup at this layer: callers that insert twice get two
    /// independent units of work.
    pub async fn create_voice(
        &self,
        video_id: Uuid,
        character_name: &str,
        text_content: &str,
        voice_mapping_id: Option<Uuid>,
    ) -> PipelineResult<Uuid> {
        let voice_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO voices (id, video_id, voice_mapping_id, character_name, text_content, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            "#,
        )
        .bind(voice_id)
        .bind(video_id)
        .bind(voice_mapping_id)
        .bind(character_name)
        .bind(text_content)
        .execute(&self.pool)
        .await?;

        debug!(%voice_id, %video_id, "created voice row");
        Ok(voice_id)
    }

    /// Conditional `pending -> processing` transition. Returns whether the
    /// caller now owns the row.
    pub async fn claim_voice(&self, voice_id: Uuid) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE voices
            SET status = 'processing',
                processing_started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(voice_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal `completed`, recording where the audio ended up.
    ///
    /// Conditional on `processing` so completing an already-terminal row
    /// is a no-op returning `false`; callers must not branch on which.
    pub async fn complete_voice(
        &self,
        voice_id: Uuid,
        output_audio_path: &str,
        is_local: bool,
        remote_path: Option<&str>,
    ) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE voices
            SET status = 'completed',
                output_audio_path = $2,
                is_local_storage = $3,
                remote_storage_path = $4,
                processing_completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(voice_id)
        .bind(output_audio_path)
        .bind(is_local)
        .bind(remote_path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal `failed` with the collaborator's error text.
    pub async fn fail_voice(&self, voice_id: Uuid, error_message: &str) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE voices
            SET status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(voice_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Aggregate counts for one video.
    pub async fn status_for_video(&self, video_id: Uuid) -> PipelineResult<VideoVoiceStatus> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status IN ('pending', 'processing')) AS pending
            FROM voices
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(VideoVoiceStatus {
            total: row.try_get("total")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            pending: row.try_get("pending")?,
        })
    }

    /// The completion barrier: at least one row, all of them completed.
    pub async fn all_voices_completed(&self, video_id: Uuid) -> PipelineResult<bool> {
        Ok(self.status_for_video(video_id).await?.all_completed())
    }

    /// Pending rows joined with their mapping, oldest first — the
    /// deterministic work queue the sweep loop drains.
    pub async fn pending_voices(&self) -> PipelineResult<Vec<PendingVoice>> {
        let rows = sqlx::query_as::<_, PendingVoice>(
            r#"
            SELECT v.id, v.video_id, v.voice_mapping_id, v.character_name, v.text_content,
                   vm.voice_file, vm.voice_id AS mapping_voice_id
            FROM voices v
            LEFT JOIN voice_mappings vm ON v.voice_mapping_id = vm.id
            WHERE v.status = 'pending'
            ORDER BY v.created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Full row fetch, for diagnostics and tests.
    pub async fn get_voice(&self, voice_id: Uuid) -> PipelineResult<Option<VoiceRow>> {
        let row = sqlx::query_as::<_, VoiceRow>("SELECT * FROM voices WHERE id = $1")
            .bind(voice_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Completed rows in insertion order; this is how the orchestrator
    /// reassembles transcript order after the fan-out.
    pub async fn completed_voices(&self, video_id: Uuid) -> PipelineResult<Vec<VoiceRow>> {
        let rows = sqlx::query_as::<_, VoiceRow>(
            r#"
            SELECT *
            FROM voices
            WHERE video_id = $1 AND status = 'completed'
            ORDER BY created_at ASC
            "#,
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Look up a mapping by its stable name key.
    pub async fn get_mapping(&self, voice_id: &str) -> PipelineResult<Option<VoiceMapping>> {
        let mapping =
            sqlx::query_as::<_, VoiceMapping>("SELECT * FROM voice_mappings WHERE voice_id = $1")
                .bind(voice_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(mapping)
    }

    /// The fallback mapping for speakers without one of their own.
    pub async fn default_mapping(&self) -> PipelineResult<Option<VoiceMapping>> {
        let mapping = sqlx::query_as::<_, VoiceMapping>(
            "SELECT * FROM voice_mappings WHERE is_default = TRUE LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(mapping)
    }
}
