//! Frame type and pixel conversion — YUYV/GREY to RGB, dark detection.

use image::RgbImage;

/// A captured camera frame, already converted to RGB.
#[derive(Clone)]
pub struct CapturedFrame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    /// Set when the sensor delivered an almost-black frame (covered lens,
    /// auto-exposure still settling).
    pub is_dark: bool,
}

impl CapturedFrame {
    /// Average luma brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.image.pixels().len();
        if pixels == 0 {
            return 0.0;
        }
        let sum: f32 = self.image.pixels().map(|p| luma(p.0)).sum();
        sum / pixels as f32
    }
}

fn luma(rgb: [u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to RGB using the BT.601 matrix.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], with U and V shared
/// by the pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let [y0, u, y1, v] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        rgb.extend_from_slice(&bt601_to_rgb(y0, u, v));
        rgb.extend_from_slice(&bt601_to_rgb(y1, u, v));
    }

    // Capacity matches expected exactly, so from_raw cannot fail here.
    Ok(RgbImage::from_raw(width, height, rgb)
        .unwrap_or_else(|| RgbImage::new(width, height)))
}

/// Expand an 8-bit grayscale plane to RGB.
pub fn gray_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }

    let mut rgb = Vec::with_capacity(expected * 3);
    for &value in &gray[..expected] {
        rgb.extend_from_slice(&[value, value, value]);
    }
    Ok(RgbImage::from_raw(width, height, rgb)
        .unwrap_or_else(|| RgbImage::new(width, height)))
}

/// BT.601 limited-range YUV to full-range RGB for one pixel.
fn bt601_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Check whether a luma plane is dark using the darkest histogram bucket.
///
/// Returns true when more than `threshold_pct` of the pixels fall below 32.
pub fn is_dark_plane(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark_count = luma.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / luma.len() as f32) > threshold_pct
}
