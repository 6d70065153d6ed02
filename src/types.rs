//! Shared types used across modules
//!
//! Wire shapes for queue messages and the screenshot service, plus the
//! persistent `voices` / `voice_mappings` row types. Kept in one module so
//! the queue, database, and video layers agree on the same definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single line of the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Spoken/displayed text
    pub text: String,
    /// Participant name that sent it
    pub from_user: String,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, from_user: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            from_user: from_user.into(),
        }
    }
}

/// A voice-cloning job: one batch of transcript lines for one video.
///
/// This is the body the job runner publishes to the worker's temporary
/// queue. `voice_mapping` maps participant names to reference-audio keys;
/// participants without an entry fall back to the default mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceJob {
    pub video_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub voice_mapping: std::collections::HashMap<String, String>,
    #[serde(default = "default_true")]
    pub use_voice_cloning: bool,
    /// Advisory output directory for generated audio
    #[serde(default)]
    pub output_dir: Option<String>,
}

fn default_true() -> bool {
    true
}

impl VoiceJob {
    /// Basic shape validation: a job needs a video id and at least one line.
    pub fn validate(&self) -> Result<(), String> {
        if self.video_id.trim().is_empty() {
            return Err("missing video_id".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages list is empty".to_string());
        }
        Ok(())
    }
}

/// A single-utterance TTS job (legacy shape, still accepted on the queue)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleTtsJob {
    pub text: String,
    #[serde(default)]
    pub voice_file: Option<String>,
    #[serde(default = "default_single_filename")]
    pub output_filename: String,
    #[serde(default)]
    pub output_dir: Option<String>,
}

fn default_single_filename() -> String {
    "single_tts.wav".to_string()
}

/// A batch TTS job without database fan-out (legacy shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTtsJob {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub voice_mapping: std::collections::HashMap<String, String>,
    #[serde(default = "default_true")]
    pub use_voice_cloning: bool,
    #[serde(default)]
    pub output_dir: Option<String>,
}

/// Everything a worker may find on its queue.
///
/// The `voice_cloning` kind is what the job runner sends; `single` and
/// `batch` are the direct-dispatch shapes. Any other tag is a protocol
/// error at the consumer boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEnvelope {
    Single(SingleTtsJob),
    Batch(BatchTtsJob),
    VoiceCloning(VoiceJob),
}

impl JobEnvelope {
    /// Parse a raw queue body.
    ///
    /// Jobber messages carry `video_id` + `messages` but not always a
    /// `type` tag, so those are recognized structurally before falling
    /// back to the tagged union.
    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        if value.get("type").is_none()
            && value.get("video_id").is_some()
            && value.get("messages").is_some()
        {
            return serde_json::from_value(value).map(JobEnvelope::VoiceCloning);
        }
        serde_json::from_value(value)
    }
}

/// A video-generation job for the orchestrator's queue.
///
/// The transcript must arrive pre-generated (`messages`); turning a raw
/// `prompt` into a conversation belongs to the external chat generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoGenJob {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub voice_mapping: std::collections::HashMap<String, String>,
    #[serde(default = "default_messages_per_group")]
    pub messages_per_group: usize,
    #[serde(default = "default_start_buffer")]
    pub start_buffer: f64,
    #[serde(default = "default_end_buffer")]
    pub end_buffer: f64,
    #[serde(default = "default_true")]
    pub use_voice_cloning: bool,
}

fn default_messages_per_group() -> usize {
    4
}

fn default_start_buffer() -> f64 {
    1.0
}

fn default_end_buffer() -> f64 {
    3.0
}

/// Lifecycle state of one voice row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl VoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceStatus::Pending => "pending",
            VoiceStatus::Processing => "processing",
            VoiceStatus::Completed => "completed",
            VoiceStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for VoiceStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(VoiceStatus::Pending),
            "processing" => Ok(VoiceStatus::Processing),
            "completed" => Ok(VoiceStatus::Completed),
            "failed" => Ok(VoiceStatus::Failed),
            other => Err(format!("unknown voice status: {other}")),
        }
    }
}

impl std::fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `voices` table, one per transcript line
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VoiceRow {
    pub id: Uuid,
    pub video_id: Uuid,
    pub voice_mapping_id: Option<Uuid>,
    pub character_name: String,
    pub text_content: String,
    #[sqlx(try_from = "String")]
    pub status: VoiceStatus,
    pub output_audio_path: Option<String>,
    pub is_local_storage: bool,
    pub remote_storage_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A pending row joined with its mapping's reference file, if any
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingVoice {
    pub id: Uuid,
    pub video_id: Uuid,
    pub voice_mapping_id: Option<Uuid>,
    pub character_name: String,
    pub text_content: String,
    /// `voice_mappings.voice_file` from the left join
    pub voice_file: Option<String>,
    /// `voice_mappings.voice_id` from the left join
    pub mapping_voice_id: Option<String>,
}

/// A pre-seeded reference-voice entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VoiceMapping {
    pub id: Uuid,
    /// Stable name key, e.g. "narrator_female"
    pub voice_id: String,
    pub voice_name: String,
    /// Blob key or local path of the reference audio
    pub voice_file: String,
    pub is_default: bool,
}

/// Aggregate per-video counts over the `voices` table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoVoiceStatus {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    /// Rows still pending or processing
    pub pending: i64,
}

impl VideoVoiceStatus {
    /// The completion barrier: every row terminal-completed, and at least one row exists.
    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }
}

/// Bounding box of one rendered chat bubble, as reported by the
/// screenshot service. Coordinates are in screenshot pixel space until
/// [`crate::overlay::ChatCrop`] rebases them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCoordinate {
    /// Position in the transcript, 0-based
    pub index: usize,
    pub y: u32,
    pub height: u32,
    pub width: u32,
    /// Speaker name
    pub from: String,
    /// Rendered text after the service's cleanup
    pub text: String,
}

impl MessageCoordinate {
    /// Bottom edge of the bubble (exclusive)
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_job_round_trip() {
        let job = VoiceJob {
            video_id: "5e0ad4e4-6a5c-4d4b-8d2a-9b8f3c2e1a00".to_string(),
            messages: vec![
                ChatMessage::new("Oi!", "Ana"),
                ChatMessage::new("E aí", "Bruno"),
            ],
            voice_mapping: [("Ana".to_string(), "voices/ana.wav".to_string())]
                .into_iter()
                .collect(),
            use_voice_cloning: true,
            output_dir: None,
        };

        let body = serde_json::to_vec(&job).unwrap();
        let parsed: VoiceJob = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.video_id, job.video_id);
        assert_eq!(parsed.messages, job.messages);
        assert_eq!(parsed.voice_mapping, job.voice_mapping);
    }

    #[test]
    fn envelope_recognizes_untagged_jobber_shape() {
        let body = br#"{
            "video_id": "v1",
            "messages": [{"text": "hello", "from_user": "Ana"}],
            "voice_mapping": {}
        }"#;

        match JobEnvelope::from_bytes(body).unwrap() {
            JobEnvelope::VoiceCloning(job) => {
                assert_eq!(job.video_id, "v1");
                assert_eq!(job.messages.len(), 1);
                assert!(job.use_voice_cloning);
            }
            other => panic!("expected voice_cloning, got {other:?}"),
        }
    }

    #[test]
    fn envelope_parses_tagged_kinds() {
        let single = br#"{"type": "single", "text": "ola"}"#;
        assert!(matches!(
            JobEnvelope::from_bytes(single).unwrap(),
            JobEnvelope::Single(_)
        ));

        let batch = br#"{"type": "batch", "messages": []}"#;
        assert!(matches!(
            JobEnvelope::from_bytes(batch).unwrap(),
            JobEnvelope::Batch(_)
        ));
    }

    #[test]
    fn envelope_rejects_unknown_tag() {
        let body = br#"{"type": "video_generation", "prompt": "funny chat"}"#;
        assert!(JobEnvelope::from_bytes(body).is_err());
    }

    #[test]
    fn validate_rejects_empty_job() {
        let job = VoiceJob {
            video_id: "v1".to_string(),
            messages: vec![],
            voice_mapping: Default::default(),
            use_voice_cloning: true,
            output_dir: None,
        };
        assert!(job.validate().is_err());

        let job = VoiceJob {
            video_id: "  ".to_string(),
            messages: vec![ChatMessage::new("oi", "Ana")],
            voice_mapping: Default::default(),
            use_voice_cloning: true,
            output_dir: None,
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn barrier_requires_rows() {
        let empty = VideoVoiceStatus::default();
        assert!(!empty.all_completed());

        let done = VideoVoiceStatus {
            total: 4,
            completed: 4,
            failed: 0,
            pending: 0,
        };
        assert!(done.all_completed());

        let partial = VideoVoiceStatus {
            total: 4,
            completed: 3,
            failed: 1,
            pending: 0,
        };
        assert!(!partial.all_completed());
        assert!(partial.any_failed());
    }
}
