use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::DepthMapError;

/// Min-max normalizes a depth prediction into 8-bit intensities.
///
/// Values are shifted by their minimum, divided by the shifted maximum when it is positive,
/// scaled by 255 and truncated. A constant prediction therefore maps to all zeros.
pub fn normalize_to_u8(values: &[f32]) -> Vec<u8> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    if !min.is_finite() {
        return vec![0; values.len()];
    }

    let shifted: Vec<f32> = values.iter().map(|&value| value - min).collect();
    let max = shifted.iter().copied().fold(0.0f32, f32::max);
    let divisor = if max > 0.0 { max } else { 1.0 };

    // `as u8` truncates toward zero and saturates at 255.
    shifted
        .into_iter()
        .map(|value| (value / divisor * 255.0) as u8)
        .collect()
}

/// Normalizes row-major depth and lays it out as a `width` x `height` gray image.
pub fn depth_to_gray(values: &[f32], width: u32, height: u32) -> Result<GrayImage, DepthMapError> {
    GrayImage::from_vec(width, height, normalize_to_u8(values)).ok_or_else(|| {
        DepthMapError::Shape(format!(
            "{} depth values cannot fill a {width}x{height} image",
            values.len()
        ))
    })
}

/// Replicates the single channel into RGB so the map reads as neutral gray.
pub fn gray_to_rgb(gray: GrayImage) -> RgbImage {
    DynamicImage::ImageLuma8(gray).to_rgb8()
}
