//! Face crops cut from grayscale frames.

use crate::pipeline::FrameView;
use crate::types::BoundingRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Fraction of the region's longer side added on every edge before cropping.
const CROP_MARGIN: f32 = 0.1;

/// A grayscale face crop at source resolution.
#[derive(Debug, Clone)]
pub struct FaceImage {
    image: GrayImage,
}

impl FaceImage {
    /// Cut a square crop centered on `region`, clamped to the frame.
    ///
    /// Returns `None` if the frame buffer is inconsistent with its
    /// dimensions or the clamped crop is empty.
    pub fn from_frame(frame: &FrameView<'_>, region: &BoundingRegion) -> Option<Self> {
        let pixels = (frame.width as usize) * (frame.height as usize);
        if frame.data.len() < pixels || pixels == 0 {
            return None;
        }
        let source = GrayImage::from_raw(frame.width, frame.height, frame.data[..pixels].to_vec())?;

        let side = region.width.max(region.height) * (1.0 + 2.0 * CROP_MARGIN);
        let cx = region.x + region.width / 2.0;
        let cy = region.y + region.height / 2.0;

        let x0 = (cx - side / 2.0).floor().max(0.0) as u32;
        let y0 = (cy - side / 2.0).floor().max(0.0) as u32;
        let x1 = ((cx + side / 2.0).ceil() as u32).min(frame.width);
        let y1 = ((cy + side / 2.0).ceil() as u32).min(frame.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let image = imageops::crop_imm(&source, x0, y0, x1 - x0, y1 - y0).to_image();
        Some(Self { image })
    }

    pub fn from_gray(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        GrayImage::from_raw(width, height, data).map(|image| Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resize to `size`×`size` and return row-major pixels.
    pub fn resized(&self, size: u32) -> Vec<u8> {
        imageops::resize(&self.image, size, size, FilterType::Triangle).into_raw()
    }
}
