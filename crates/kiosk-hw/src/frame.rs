//! Grayscale frames and pixel-format conversion.

use std::time::Instant;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;
/// Pixels below this value count as near-black.
const DARK_PIXEL_LEVEL: u8 = 32;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixels, row-major, width * height bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Mean brightness, 0.0–255.0.
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Packed YUYV 4:2:2 ([Y0, U, Y1, V] per pixel pair) to luma.
pub fn yuyv_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len(buf, expected)?;
    Ok(buf[..expected].iter().step_by(2).copied().collect())
}

/// 16-bit little-endian grayscale to 8-bit (high byte).
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len(buf, expected)?;
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// 8-bit grayscale passthrough, truncated to the frame size.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    check_len(buf, expected)?;
    Ok(buf[..expected].to_vec())
}

/// True if more than `ratio` of the pixels are near-black. Empty frames are dark.
pub fn is_dark_frame(gray: &[u8], ratio: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_LEVEL).count();
    (dark as f32 / gray.len() as f32) > ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_extracts_luma() {
        let buf: Vec<u8> = vec![10, 128, 20, 128, 30, 128, 40, 128];
        assert_eq!(yuyv_to_grayscale(&buf, 2, 2).unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_y16_takes_high_byte() {
        // 0x1234 LE -> [0x34, 0x12]; 0xff00 -> [0x00, 0xff]
        let buf = vec![0x34, 0x12, 0x00, 0xff];
        assert_eq!(y16_to_grayscale(&buf, 2, 1).unwrap(), vec![0x12, 0xff]);
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert!(yuyv_to_grayscale(&[1, 2], 2, 1).is_err());
        assert!(y16_to_grayscale(&[1, 2, 3], 2, 1).is_err());
        assert!(grey_to_grayscale(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_threshold() {
        assert!(is_dark_frame(&[], DARK_FRAME_RATIO));
        assert!(is_dark_frame(&[0u8; 500], DARK_FRAME_RATIO));
        assert!(!is_dark_frame(&[140u8; 500], DARK_FRAME_RATIO));

        let mut mostly_dark = vec![5u8; 97];
        mostly_dark.extend([200u8; 3]);
        assert!(is_dark_frame(&mostly_dark, DARK_FRAME_RATIO));

        let mut lit = vec![5u8; 90];
        lit.extend([200u8; 10]);
        assert!(!is_dark_frame(&lit, DARK_FRAME_RATIO));
    }

    #[test]
    fn test_frame_new_flags_dark_and_brightness() {
        let frame = Frame::new(vec![100u8; 16], 4, 4, 7);
        assert!(!frame.is_dark);
        assert_eq!(frame.sequence, 7);
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-6);
    }
}
