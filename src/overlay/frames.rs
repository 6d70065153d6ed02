//! Frame plan derivation and PNG frame writing
//!
//! The timeline is: start buffer (empty), then per group each message's
//! audio duration revealing one more bubble, a short hold between
//! messages (skipped after a group's last message), then the end buffer
//! (empty). Frame counts come from rounding the *cumulative* timeline at
//! every segment edge, so the total is exactly `round(fps * total_secs)`
//! no matter how the durations fall against the frame grid.

use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::crop::{ChatCrop, CROP_PADDING};
use crate::config::OverlayConfig;
use crate::error::{PipelineError, PipelineResult};

/// Corner radius of the revealed chat tile
pub const TILE_CORNER_RADIUS: u32 = 15;

/// What one stretch of frames shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Fully transparent frame (buffers)
    Empty,
    /// First `shown` messages of group `group` are visible
    Reveal { group: usize, shown: usize },
}

/// A run of identical frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSegment {
    pub kind: FrameKind,
    pub frames: u64,
    /// True for the between-message hold that repeats the previous reveal
    pub is_pause: bool,
}

/// The full per-video frame schedule
#[derive(Debug, Clone)]
pub struct FramePlan {
    pub segments: Vec<PlanSegment>,
}

impl FramePlan {
    /// Derive the schedule from per-message audio durations.
    ///
    /// `durations.len()` must equal the coordinate count the overlay was
    /// built with; the caller validates that before building a plan.
    pub fn build(durations: &[f64], config: &OverlayConfig) -> PipelineResult<Self> {
        if config.fps == 0 {
            return Err(PipelineError::ProtocolError("fps must be positive".into()));
        }
        if config.messages_per_group == 0 {
            return Err(PipelineError::ProtocolError(
                "messages_per_group must be positive".into(),
            ));
        }
        if let Some(bad) = durations.iter().find(|d| !d.is_finite() || **d <= 0.0) {
            return Err(PipelineError::ProtocolError(format!(
                "audio durations must be positive, got {bad}"
            )));
        }

        let fps = f64::from(config.fps);
        let mut segments = Vec::new();
        let mut elapsed = 0.0_f64;
        let mut emitted = 0_u64;

        let mut push = |segments: &mut Vec<PlanSegment>,
                        kind: FrameKind,
                        seconds: f64,
                        is_pause: bool| {
            elapsed += seconds;
            let edge = (elapsed * fps).round() as u64;
            let frames = edge - emitted;
            emitted = edge;
            if frames > 0 {
                segments.push(PlanSegment {
                    kind,
                    frames,
                    is_pause,
                });
            }
        };

        push(&mut segments, FrameKind::Empty, config.start_buffer, false);

        for (group, chunk) in durations.chunks(config.messages_per_group).enumerate() {
            for (offset, duration) in chunk.iter().enumerate() {
                let kind = FrameKind::Reveal {
                    group,
                    shown: offset + 1,
                };
                push(&mut segments, kind, *duration, false);
                if offset + 1 < chunk.len() {
                    push(&mut segments, kind, config.pause_between_messages, true);
                }
            }
        }

        push(&mut segments, FrameKind::Empty, config.end_buffer, false);

        Ok(Self { segments })
    }

    pub fn total_frames(&self) -> u64 {
        self.segments.iter().map(|s| s.frames).sum()
    }

    /// Expand the run-length segments into one kind per frame.
    pub fn frame_kinds(&self) -> impl Iterator<Item = FrameKind> + '_ {
        self.segments
            .iter()
            .flat_map(|s| std::iter::repeat(s.kind).take(s.frames as usize))
    }
}

/// Writes the planned frames against a prepared [`ChatCrop`].
pub struct ProgressiveOverlay {
    crop: ChatCrop,
    config: OverlayConfig,
}

impl ProgressiveOverlay {
    pub fn new(crop: ChatCrop, config: OverlayConfig) -> Self {
        Self { crop, config }
    }

    pub fn crop(&self) -> &ChatCrop {
        &self.crop
    }

    /// Derive the plan, refusing mismatched inputs up front.
    pub fn plan(&self, durations: &[f64]) -> PipelineResult<FramePlan> {
        if durations.len() != self.crop.coordinates.len() {
            return Err(PipelineError::ProtocolError(format!(
                "audio durations ({}) must match message coordinates ({})",
                durations.len(),
                self.crop.coordinates.len()
            )));
        }
        FramePlan::build(durations, &self.config)
    }

    /// Write the full `frame_NNNNNN.png` sequence into `output_dir`.
    pub fn write_frames(
        &self,
        durations: &[f64],
        output_dir: &Path,
    ) -> PipelineResult<Vec<PathBuf>> {
        let plan = self.plan(durations)?;
        std::fs::create_dir_all(output_dir)?;

        info!(
            frames = plan.total_frames(),
            dir = %output_dir.display(),
            "writing progressive overlay frames"
        );

        // Each distinct kind renders once; runs of identical frames reuse
        // the encoded image.
        let mut paths = Vec::with_capacity(plan.total_frames() as usize);
        let mut frame_number = 0_u64;
        for segment in &plan.segments {
            let rendered = self.render(segment.kind)?;
            for _ in 0..segment.frames {
                let path = output_dir.join(format!("frame_{frame_number:06}.png"));
                rendered.save(&path).map_err(|e| {
                    PipelineError::ProtocolError(format!(
                        "failed to write frame {frame_number}: {e}"
                    ))
                })?;
                paths.push(path);
                frame_number += 1;
            }
            debug!(?segment.kind, frames = segment.frames, "segment written");
        }

        Ok(paths)
    }

    fn render(&self, kind: FrameKind) -> PipelineResult<RgbaImage> {
        match kind {
            FrameKind::Empty => Ok(self.empty_frame()),
            FrameKind::Reveal { group, shown } => self.reveal_frame(group, shown),
        }
    }

    fn empty_frame(&self) -> RgbaImage {
        RgbaImage::from_pixel(self.crop.width(), self.crop.height(), Rgba([0, 0, 0, 0]))
    }

    /// Crop window for "first `shown` messages of `group`" in cropped-image
    /// space, using natural-spacing boundaries.
    pub fn reveal_window(&self, group: usize, shown: usize) -> (u32, u32) {
        let coords = &self.crop.coordinates;
        let first = group * self.config.messages_per_group;
        let last = first + shown - 1;

        let top = if first == 0 {
            coords[first].y.saturating_sub(CROP_PADDING)
        } else {
            // halfway through the gap above; integer division keeps the
            // midpoint pixel with the lower window
            (coords[first - 1].bottom() + coords[first].y) / 2
        };

        let group_len = coords.len().min(first + self.config.messages_per_group) - first;
        let bottom = if shown == group_len {
            (coords[last].bottom() + CROP_PADDING).min(self.crop.height())
        } else {
            (coords[last].bottom() + coords[last + 1].y) / 2
        };

        (top, bottom.max(top + 1).min(self.crop.height()))
    }

    fn reveal_frame(&self, group: usize, shown: usize) -> PipelineResult<RgbaImage> {
        let (top, bottom) = self.reveal_window(group, shown);

        let mut tile = image::imageops::crop_imm(
            &self.crop.image,
            0,
            top,
            self.crop.width(),
            bottom - top,
        )
        .to_image();
        round_corners(&mut tile, TILE_CORNER_RADIUS);

        let mut frame = self.empty_frame();
        image::imageops::overlay(&mut frame, &tile, 0, 0);
        Ok(frame)
    }
}

/// Zero out the alpha of pixels outside a quarter-circle in each corner.
fn round_corners(image: &mut RgbaImage, radius: u32) {
    let (width, height) = image.dimensions();
    if width < 2 * radius || height < 2 * radius {
        return;
    }
    let r = radius as i64;
    let r_sq = r * r;

    let centers = [
        (r - 1, r - 1),
        (i64::from(width) - r, r - 1),
        (r - 1, i64::from(height) - r),
        (i64::from(width) - r, i64::from(height) - r),
    ];

    for (corner, &(cx, cy)) in centers.iter().enumerate() {
        for dy in 0..r {
            for dx in 0..r {
                let x = match corner {
                    0 | 2 => dx,
                    _ => i64::from(width) - 1 - dx,
                };
                let y = match corner {
                    0 | 1 => dy,
                    _ => i64::from(height) - 1 - dy,
                };
                let dist_x = x - cx;
                let dist_y = y - cy;
                if dist_x * dist_x + dist_y * dist_y > r_sq {
                    image.get_pixel_mut(x as u32, y as u32).0[3] = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageCoordinate;
    use image::DynamicImage;

    fn coord(index: usize, y: u32, height: u32) -> MessageCoordinate {
        MessageCoordinate {
            index,
            y,
            height,
            width: 300,
            from: if index % 2 == 0 { "Ana" } else { "Bruno" }.to_string(),
            text: format!("msg {index}"),
        }
    }

    fn overlay_with(n: usize, config: OverlayConfig) -> ProgressiveOverlay {
        // bubbles at y = 50, 150, 250, ... each 60 tall, image comfortably larger
        let coords: Vec<_> = (0..n).map(|i| coord(i, 50 + 100 * i as u32, 60)).collect();
        let height = 50 + 100 * n as u32 + 100;
        let screenshot = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            400,
            height,
            Rgba([255, 255, 255, 255]),
        ));
        let crop = ChatCrop::prepare(&screenshot, &coords).unwrap();
        ProgressiveOverlay::new(crop, config)
    }

    fn default_config() -> OverlayConfig {
        OverlayConfig {
            fps: 30,
            messages_per_group: 4,
            start_buffer: 1.0,
            end_buffer: 3.0,
            pause_between_messages: 0.5,
        }
    }

    #[test]
    fn four_messages_single_group_totals_300_frames() {
        // 30 fps * (1.0 + 4.5 + 3 * 0.5 + 3.0) = 300
        let overlay = overlay_with(4, default_config());
        let plan = overlay.plan(&[1.0, 1.0, 1.2, 1.3]).unwrap();
        assert_eq!(plan.total_frames(), 300);

        // last non-empty frame shows all four messages
        let last_reveal = plan
            .frame_kinds()
            .filter(|k| matches!(k, FrameKind::Reveal { .. }))
            .last()
            .unwrap();
        assert_eq!(last_reveal, FrameKind::Reveal { group: 0, shown: 4 });
    }

    #[test]
    fn fifth_message_overflows_into_second_group_without_pause() {
        let overlay = overlay_with(5, default_config());
        let plan = overlay.plan(&[1.0, 1.0, 1.0, 1.0, 1.0]).unwrap();

        // group 0 has three pauses, group 1 (singleton) has none
        let pauses: Vec<_> = plan.segments.iter().filter(|s| s.is_pause).collect();
        assert_eq!(pauses.len(), 3);
        assert!(pauses
            .iter()
            .all(|s| matches!(s.kind, FrameKind::Reveal { group: 0, .. })));

        // the reveal right after group 0's last is group 1's first, with
        // no pause segment between them
        let kinds: Vec<_> = plan
            .segments
            .iter()
            .map(|s| (s.kind, s.is_pause))
            .collect();
        let last_of_g0 = kinds
            .iter()
            .position(|(k, _)| *k == FrameKind::Reveal { group: 0, shown: 4 })
            .unwrap();
        assert_eq!(
            kinds[last_of_g0 + 1],
            (FrameKind::Reveal { group: 1, shown: 1 }, false)
        );

        // 30 * (1 + 5 + 3*0.5 + 3) = 315
        assert_eq!(plan.total_frames(), 315);
    }

    #[test]
    fn singleton_groups_have_no_pauses() {
        let mut config = default_config();
        config.messages_per_group = 1;
        let overlay = overlay_with(3, config);
        let plan = overlay.plan(&[1.0, 1.0, 1.0]).unwrap();
        assert!(plan.segments.iter().all(|s| !s.is_pause));
        // 30 * (1 + 3 + 0 + 3) = 210
        assert_eq!(plan.total_frames(), 210);
    }

    #[test]
    fn duration_count_mismatch_is_refused() {
        let overlay = overlay_with(4, default_config());
        let err = overlay.plan(&[1.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::ProtocolError(_)));
    }

    #[test]
    fn fractional_durations_still_round_the_total() {
        let overlay = overlay_with(2, default_config());
        // total = 1.0 + 0.317 + 0.5 + 0.421 + 3.0 = 5.238 s -> round(157.14) = 157
        let plan = overlay.plan(&[0.317, 0.421]).unwrap();
        assert_eq!(plan.total_frames(), 157);
    }

    #[test]
    fn frame_count_monotone_in_buffers() {
        let overlay = overlay_with(2, default_config());
        let base = overlay.plan(&[1.0, 1.0]).unwrap().total_frames();

        let mut longer = default_config();
        longer.end_buffer += 0.4;
        let overlay_longer = overlay_with(2, longer);
        assert!(overlay_longer.plan(&[1.0, 1.0]).unwrap().total_frames() > base);
    }

    #[test]
    fn reveal_window_uses_padding_and_midpoints() {
        let overlay = overlay_with(6, default_config());
        // cropped space: bubble i at y = 15 + 100*i, height 60

        // group 0, first message: padded top, midpoint bottom
        let (top, bottom) = overlay.reveal_window(0, 1);
        assert_eq!(top, 0); // 15 - 15
        // midpoint of gap between bottom(0)=75 and top(1)=115 -> 95
        assert_eq!(bottom, 95);

        // group 0 fully shown: padded bottom below message 3
        let (_, bottom) = overlay.reveal_window(0, 4);
        assert_eq!(bottom, 15 + 300 + 60 + 15);

        // group 1 top: midpoint between bottom(3)=375 and top(4)=415 -> 395
        let (top, _) = overlay.reveal_window(1, 1);
        assert_eq!(top, 395);
    }

    #[test]
    fn reveal_window_contains_revealed_bubbles() {
        let overlay = overlay_with(6, default_config());
        let coords = overlay.crop().coordinates.clone();

        for (group, shown_max) in [(0, 4), (1, 2)] {
            for shown in 1..=shown_max {
                let (top, bottom) = overlay.reveal_window(group, shown);
                assert!(bottom <= overlay.crop().height());
                let first = group * 4;
                for c in &coords[first..first + shown] {
                    assert!(c.y >= top, "bubble {} above window", c.index);
                    assert!(c.bottom() <= bottom, "bubble {} below window", c.index);
                }
            }
        }
    }

    #[test]
    fn writes_named_frames_to_disk() {
        let overlay = overlay_with(2, {
            let mut c = default_config();
            c.fps = 5;
            c.start_buffer = 0.2;
            c.end_buffer = 0.2;
            c.pause_between_messages = 0.0;
            c
        });
        let dir = tempfile::tempdir().unwrap();
        let paths = overlay.write_frames(&[0.4, 0.4], dir.path()).unwrap();

        // 5 fps * (0.2 + 0.8 + 0.2) = 6 frames
        assert_eq!(paths.len(), 6);
        assert!(paths[0].ends_with("frame_000000.png"));
        assert!(paths[5].ends_with("frame_000005.png"));
        for path in &paths {
            assert!(path.exists());
        }

        // buffers are fully transparent, reveals are not
        let first = image::open(&paths[0]).unwrap().to_rgba8();
        assert!(first.pixels().all(|p| p.0[3] == 0));
        let mid = image::open(&paths[2]).unwrap().to_rgba8();
        assert!(mid.pixels().any(|p| p.0[3] != 0));
    }

    #[test]
    fn rounded_corners_clear_the_tile_corners() {
        let mut tile = RgbaImage::from_pixel(100, 80, Rgba([10, 20, 30, 255]));
        round_corners(&mut tile, 15);
        assert_eq!(tile.get_pixel(0, 0).0[3], 0);
        assert_eq!(tile.get_pixel(99, 0).0[3], 0);
        assert_eq!(tile.get_pixel(0, 79).0[3], 0);
        assert_eq!(tile.get_pixel(99, 79).0[3], 0);
        // center untouched
        assert_eq!(tile.get_pixel(50, 40).0[3], 255);
        // edge midpoints untouched
        assert_eq!(tile.get_pixel(50, 0).0[3], 255);
        assert_eq!(tile.get_pixel(0, 40).0[3], 255);
    }
}
