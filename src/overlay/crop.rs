//! Screenshot preprocessing
//!
//! Isolates the chat region of the rendered screenshot before any frame
//! is produced: vertical auto-crop around the message bubbles, removal of
//! the page chrome's side borders, and rebasing of every coordinate into
//! cropped-image space.

use image::{DynamicImage, RgbaImage};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::types::MessageCoordinate;

/// Vertical padding kept above the first and below the last bubble
pub const CROP_PADDING: u32 = 15;

/// Page chrome color the side-border scan matches against
pub const BORDER_COLOR: [u8; 3] = [0xd7, 0xd2, 0xd2];

/// Per-channel tolerance for the border match
pub const BORDER_TOLERANCE: u8 = 10;

/// The screenshot reduced to its chat region, with coordinates rebased
/// so `y = 0` is the cropped image's top row.
pub struct ChatCrop {
    pub image: RgbaImage,
    pub coordinates: Vec<MessageCoordinate>,
}

impl ChatCrop {
    /// Crop `screenshot` around `coordinates` and rebase them.
    ///
    /// Coordinates that fall outside the screenshot are a protocol error:
    /// the screenshot service guarantees every bubble lies inside the
    /// image it reports.
    pub fn prepare(
        screenshot: &DynamicImage,
        coordinates: &[MessageCoordinate],
    ) -> PipelineResult<Self> {
        let rgba = screenshot.to_rgba8();
        let (width, height) = rgba.dimensions();

        for c in coordinates {
            if c.bottom() > height {
                return Err(PipelineError::ProtocolError(format!(
                    "coordinate {} exceeds image height ({} > {height})",
                    c.index,
                    c.bottom()
                )));
            }
        }

        let (top, bottom) = vertical_bounds(coordinates, height);
        let (left, right) = border_bounds(&rgba, width, height);

        debug!(top, bottom, left, right, "chat crop rectangle");

        let cropped =
            image::imageops::crop_imm(&rgba, left, top, right - left, bottom - top).to_image();

        let rebased = coordinates
            .iter()
            .map(|c| MessageCoordinate {
                y: c.y - top,
                ..c.clone()
            })
            .collect();

        info!(
            original_w = width,
            original_h = height,
            cropped_w = cropped.width(),
            cropped_h = cropped.height(),
            "screenshot cropped to chat region"
        );

        Ok(Self {
            image: cropped,
            coordinates: rebased,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Vertical crop range from the bubble boxes, padded and clamped. With no
/// coordinates there is nothing to anchor on; fall back to the middle 60%
/// of the page.
fn vertical_bounds(coordinates: &[MessageCoordinate], height: u32) -> (u32, u32) {
    if coordinates.is_empty() {
        let top = height / 5;
        let bottom = height - height / 5;
        return (top, bottom.max(top + 1));
    }

    let min_y = coordinates.iter().map(|c| c.y).min().unwrap_or(0);
    let max_bottom = coordinates.iter().map(|c| c.bottom()).max().unwrap_or(height);

    let top = min_y.saturating_sub(CROP_PADDING);
    let bottom = (max_bottom + CROP_PADDING).min(height);
    (top, bottom.max(top + 1))
}

/// Scan the middle row from both edges inward, consuming pixels that
/// match the chrome color. A chat rendered with a different chrome simply
/// matches nothing and keeps its full width.
fn border_bounds(image: &RgbaImage, width: u32, height: u32) -> (u32, u32) {
    let mid_row = height / 2;

    let mut left = 0;
    while left < width && is_border_pixel(image, left, mid_row) {
        left += 1;
    }

    let mut right = width;
    while right > left && is_border_pixel(image, right - 1, mid_row) {
        right -= 1;
    }

    // A fully matching row means the mid-row landed on chrome; keep the
    // full width rather than cropping everything away.
    if right <= left {
        return (0, width);
    }
    (left, right)
}

fn is_border_pixel(image: &RgbaImage, x: u32, y: u32) -> bool {
    let pixel = image.get_pixel(x, y);
    pixel.0[..3]
        .iter()
        .zip(BORDER_COLOR.iter())
        .all(|(&channel, &target)| channel.abs_diff(target) <= BORDER_TOLERANCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn coord(index: usize, y: u32, height: u32) -> MessageCoordinate {
        MessageCoordinate {
            index,
            y,
            height,
            width: 300,
            from: "Ana".to_string(),
            text: "oi".to_string(),
        }
    }

    fn blank(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([255, 255, 255, 255]),
        ))
    }

    #[test]
    fn crops_around_bubbles_with_padding() {
        let screenshot = blank(400, 1000);
        let coords = vec![coord(0, 100, 60), coord(1, 200, 60)];

        let crop = ChatCrop::prepare(&screenshot, &coords).unwrap();
        // top = 100 - 15, bottom = 260 + 15
        assert_eq!(crop.height(), 190);
        assert_eq!(crop.coordinates[0].y, 15);
        assert_eq!(crop.coordinates[1].y, 115);
    }

    #[test]
    fn clamps_padding_at_image_edges() {
        let screenshot = blank(400, 300);
        let coords = vec![coord(0, 5, 60), coord(1, 230, 65)];

        let crop = ChatCrop::prepare(&screenshot, &coords).unwrap();
        // top clamps to 0, bottom clamps to 300
        assert_eq!(crop.height(), 300);
        assert_eq!(crop.coordinates[0].y, 5);
    }

    #[test]
    fn empty_coordinates_fall_back_to_middle_slice() {
        let screenshot = blank(400, 1000);
        let crop = ChatCrop::prepare(&screenshot, &[]).unwrap();
        assert_eq!(crop.height(), 600);
        assert!(crop.coordinates.is_empty());
    }

    #[test]
    fn rejects_out_of_bounds_coordinate() {
        let screenshot = blank(400, 200);
        let coords = vec![coord(0, 180, 60)];
        assert!(matches!(
            ChatCrop::prepare(&screenshot, &coords),
            Err(PipelineError::ProtocolError(_))
        ));
    }

    #[test]
    fn trims_matching_side_borders() {
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        // 10px chrome-colored bands on both sides
        for y in 0..100 {
            for x in 0..10 {
                img.put_pixel(x, y, Rgba([0xd7, 0xd2, 0xd2, 255]));
                img.put_pixel(99 - x, y, Rgba([0xd0, 0xd0, 0xd8, 255])); // within tolerance
            }
        }
        let screenshot = DynamicImage::ImageRgba8(img);
        let coords = vec![coord(0, 20, 60)];

        let crop = ChatCrop::prepare(&screenshot, &coords).unwrap();
        assert_eq!(crop.width(), 80);
    }

    #[test]
    fn unexpected_chrome_color_trims_nothing() {
        let screenshot = blank(100, 100);
        let coords = vec![coord(0, 20, 60)];
        let crop = ChatCrop::prepare(&screenshot, &coords).unwrap();
        assert_eq!(crop.width(), 100);
    }
}
