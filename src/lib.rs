//! Chatcast - distributed chat-narration video pipeline
//!
//! Three cooperating single-job processes build a narrated video that
//! overlays a rendered chat on a background clip:
//!
//! - the **voice worker** turns one voice-cloning job into completed
//!   `voices` rows with synthesized audio;
//! - the **video orchestrator** fans that work out, waits on the
//!   database completion barrier, and assembles screenshot + frames +
//!   audio into the final mux;
//! - the **chat screenshot service** (external) renders the conversation
//!   and reports per-message bounding boxes.
//!
//! Coordination happens through a RabbitMQ-style broker (one ephemeral
//! queue per job) and a shared Postgres database (the `voices` table is
//! the only shared mutable state).

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod overlay;
pub mod queue;
pub mod screenshot;
pub mod signals;
pub mod storage;
pub mod types;
pub mod video;
pub mod voice;

pub use config::Config;
pub use error::{PipelineError, PipelineResult};
