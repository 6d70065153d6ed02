//! Pipeline error taxonomy
//!
//! Splits failures the way the process model needs them split: transport
//! failures kill the process (non-zero exit), protocol and synthesis
//! failures are recorded against the affected unit and the process keeps
//! going, storage-upload failures degrade to local paths.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Broker, database, storage, or screenshot endpoint not reachable.
    /// Fatal to the process.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Malformed message, length mismatch, missing required field.
    /// Fails the affected unit, not the process.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A collaborator answered with a non-success HTTP status.
    #[error("remote error ({status}): {body}")]
    RemoteError {
        status: u16,
        body: String,
    },

    /// The TTS collaborator failed to produce audio for one row.
    #[error("synthesis failure: {0}")]
    SynthesisFailure(String),

    /// Upload to the object store failed; the row keeps its local path.
    #[error("storage upload failure: {0}")]
    StorageUploadFailure(String),

    /// The orchestrator's wait budget ran out.
    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("audio error: {0}")]
    Audio(#[from] hound::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the process should exit non-zero because of this error.
    ///
    /// Unit-scoped failures are already recorded in the `voices` table;
    /// only infrastructure failures need to surface through the exit code
    /// so the job runner reschedules.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::TransportUnavailable(_)
                | PipelineError::Database(_)
                | PipelineError::Broker(_)
                | PipelineError::Timeout(_)
        )
    }

    /// Map a reqwest failure onto the taxonomy: connectivity problems are
    /// transport errors, anything else is a protocol-level failure.
    pub fn from_http(err: reqwest::Error, endpoint: &str) -> Self {
        if err.is_connect() || err.is_timeout() {
            PipelineError::TransportUnavailable(format!("{endpoint}: {err}"))
        } else {
            PipelineError::ProtocolError(format!("{endpoint}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_split() {
        assert!(PipelineError::TransportUnavailable("amqp".into()).is_fatal());
        assert!(PipelineError::Timeout(300).is_fatal());
        assert!(!PipelineError::ProtocolError("bad body".into()).is_fatal());
        assert!(!PipelineError::SynthesisFailure("model oom".into()).is_fatal());
        assert!(!PipelineError::StorageUploadFailure("http 500".into()).is_fatal());
    }
}
