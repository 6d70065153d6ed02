//! Progressive overlay engine
//!
//! Turns one rendered chat screenshot plus per-message bounding boxes and
//! per-message audio durations into an ordered PNG frame sequence. The
//! frames reveal bubbles group by group in sync with the narration; the
//! mux step lays them over the background clip.
//!
//! Two stages, both deterministic:
//! 1. [`crop::ChatCrop`] trims the screenshot down to the chat region and
//!    rebases the coordinates into cropped space (once per video).
//! 2. [`frames::ProgressiveOverlay`] derives a [`frames::FramePlan`] from
//!    the audio durations and writes `frame_NNNNNN.png` files.

pub mod crop;
pub mod frames;

pub use crop::ChatCrop;
pub use frames::{FrameKind, FramePlan, PlanSegment, ProgressiveOverlay};
