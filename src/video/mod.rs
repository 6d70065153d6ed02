//! Video pipeline orchestration
//!
//! - [`orchestrator`]: the per-request pipeline driver.
//! - [`dispatch`]: hand-off of voice jobs to the job runner.
//! - [`mux`]: ffmpeg invocation and background clip selection.

pub mod dispatch;
pub mod mux;
pub mod orchestrator;

pub use dispatch::{JobberDispatch, NoopDispatch, VoiceDispatch};
pub use orchestrator::{PipelineOutcome, VideoOrchestrator, VideoRequest};
