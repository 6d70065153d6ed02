//! Voice-cloning worker and its collaborators
//!
//! - [`worker`]: the job flow — fan out rows, claim, synthesize, upload,
//!   complete.
//! - [`tts`]: the engine seam in front of the neural TTS collaborator.
//! - [`audio`]: WAV probing and output naming.

pub mod audio;
pub mod tts;
pub mod worker;

pub use tts::{engine_from_config, TtsEngine};
pub use worker::VoiceWorker;
