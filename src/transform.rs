use burn::{config::Config, prelude::*};
use image::RgbImage;

use crate::{error::DepthMapError, interpolate::resize_plane};

pub const DEPTH_ANYTHING_V2_TRANSFORM: &str = "depth_anything_v2";

// taken from the ImageNet statistics the DINOv2 backbone was trained with
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How the target size bounds the resized image when the aspect ratio is kept.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum ResizeMethod {
    /// Both sides end up at least as large as the target.
    LowerBound,
    /// Both sides end up at most as large as the target.
    UpperBound,
    /// Scale as little as possible.
    Minimal,
}

impl Default for ResizeMethod {
    fn default() -> Self {
        Self::LowerBound
    }
}

/// Preprocessing that turns a source image into a network-ready `NCHW` tensor.
#[derive(Config, Debug)]
pub struct Transform {
    pub width: usize,
    pub height: usize,
    #[config(default = "true")]
    pub keep_aspect_ratio: bool,
    #[config(default = "1")]
    pub multiple_of: usize,
    #[config(default = "ResizeMethod::LowerBound")]
    pub resize_method: ResizeMethod,
    #[config(default = "IMAGENET_MEAN")]
    pub mean: [f32; 3],
    #[config(default = "IMAGENET_STD")]
    pub std: [f32; 3],
}

impl Transform {
    pub fn depth_anything_v2() -> Self {
        Self::new(518, 518).with_multiple_of(14)
    }

    /// Resolves a transform preset by the name a model card refers to it with.
    pub fn by_name(name: &str) -> Result<Self, DepthMapError> {
        match name {
            DEPTH_ANYTHING_V2_TRANSFORM => Ok(Self::depth_anything_v2()),
            _ => Err(DepthMapError::UnknownTransform(name.to_string())),
        }
    }

    fn constrain_to_multiple_of(&self, x: f64, min_val: usize, max_val: Option<usize>) -> usize {
        let multiple = self.multiple_of.max(1) as f64;
        let mut y = ((x / multiple).round_ties_even() * multiple) as usize;
        if let Some(max_val) = max_val {
            if y > max_val {
                y = ((x / multiple).floor() * multiple) as usize;
            }
        }
        if y < min_val {
            y = ((x / multiple).ceil() * multiple) as usize;
        }
        y
    }

    /// Rejects a transform whose output sides would not land on the model's patch grid.
    pub fn ensure_patch_aligned(&self, patch_size: usize) -> Result<(), DepthMapError> {
        if patch_size == 0 || self.multiple_of % patch_size != 0 {
            return Err(DepthMapError::Shape(format!(
                "transform rounds to multiples of {}, not of patch size {patch_size}",
                self.multiple_of
            )));
        }
        Ok(())
    }

    /// Network input size `[height, width]` for a source image of the given size.
    pub fn target_size(&self, height: usize, width: usize) -> [usize; 2] {
        let mut scale_height = self.height as f64 / height.max(1) as f64;
        let mut scale_width = self.width as f64 / width.max(1) as f64;

        if self.keep_aspect_ratio {
            let use_width = match self.resize_method {
                ResizeMethod::LowerBound => scale_width > scale_height,
                ResizeMethod::UpperBound => scale_width < scale_height,
                ResizeMethod::Minimal => (1.0 - scale_width).abs() < (1.0 - scale_height).abs(),
            };
            if use_width {
                scale_height = scale_width;
            } else {
                scale_width = scale_height;
            }
        }

        let scaled_height = scale_height * height as f64;
        let scaled_width = scale_width * width as f64;
        match self.resize_method {
            ResizeMethod::LowerBound => [
                self.constrain_to_multiple_of(scaled_height, self.height, None),
                self.constrain_to_multiple_of(scaled_width, self.width, None),
            ],
            ResizeMethod::UpperBound => [
                self.constrain_to_multiple_of(scaled_height, 0, Some(self.height)),
                self.constrain_to_multiple_of(scaled_width, 0, Some(self.width)),
            ],
            ResizeMethod::Minimal => [
                self.constrain_to_multiple_of(scaled_height, 0, None),
                self.constrain_to_multiple_of(scaled_width, 0, None),
            ],
        }
    }

    /// Resizes in float space with the half-pixel A = -0.75 bicubic kernel, then normalizes.
    pub fn apply<B: Backend>(
        &self,
        image: &RgbImage,
        device: &B::Device,
    ) -> Result<Tensor<B, 4>, DepthMapError> {
        let (src_width, src_height) = (image.width() as usize, image.height() as usize);
        let [height, width] = self.target_size(src_height, src_width);
        if height == 0 || width == 0 {
            return Err(DepthMapError::Shape(format!(
                "transform produced an empty {width}x{height} input"
            )));
        }

        let mut planes = rgb_planes(image.as_raw(), src_width, src_height)?;
        if [src_height, src_width] != [height, width] {
            planes = planes
                .chunks_exact(src_width * src_height)
                .flat_map(|plane| resize_plane(plane, src_height, src_width, height, width))
                .collect();
        }

        log::debug!(
            "transformed {src_width}x{src_height} source into {width}x{height} network input"
        );
        Ok(self.normalize_planes(planes, width, height, device))
    }

    fn normalize_planes<B: Backend>(
        &self,
        mut planes: Vec<f32>,
        width: usize,
        height: usize,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        for (channel, plane) in planes.chunks_exact_mut(width * height).enumerate() {
            for value in plane {
                *value = (*value - self.mean[channel]) / self.std[channel];
            }
        }

        Tensor::<B, 1>::from_floats(planes.as_slice(), device).reshape([
            1,
            3,
            height as i32,
            width as i32,
        ])
    }
}

/// Splits packed RGB bytes into three channel planes scaled to `[0, 1]`.
fn rgb_planes(rgb: &[u8], width: usize, height: usize) -> Result<Vec<f32>, DepthMapError> {
    let expected_len = width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or_else(|| {
            DepthMapError::Shape("image dimensions overflowed while preparing input".to_string())
        })?;

    if rgb.len() != expected_len {
        return Err(DepthMapError::Shape(format!(
            "expected {expected_len} RGB bytes for {width}x{height}, got {}",
            rgb.len()
        )));
    }

    let hw = width * height;
    let mut planes = vec![0.0f32; 3 * hw];
    for (idx, pixel) in rgb.chunks_exact(3).enumerate() {
        for channel in 0..3 {
            planes[channel * hw + idx] = pixel[channel] as f32 / 255.0;
        }
    }
    Ok(planes)
}

/// Converts packed RGB bytes into a mean/std normalized, channel-first (`NCHW`) tensor.
///
/// The input slice must contain `width * height * 3` bytes in row-major order.
pub fn rgb_to_input_tensor<B: Backend>(
    rgb: &[u8],
    width: usize,
    height: usize,
    transform: &Transform,
    device: &B::Device,
) -> Result<Tensor<B, 4>, DepthMapError> {
    let planes = rgb_planes(rgb, width, height)?;
    Ok(transform.normalize_planes(planes, width, height, device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate::to_f32_vec;

    type TestBackend = crate::InferenceBackend;

    #[test]
    fn lower_bound_keeps_aspect_on_multiples_of_patch() {
        let transform = Transform::depth_anything_v2();
        assert_eq!(transform.target_size(384, 512), [518, 686]);
        assert_eq!(transform.target_size(518, 518), [518, 518]);
        let [height, width] = transform.target_size(1080, 1920);
        assert_eq!(height, 518);
        assert_eq!(width % 14, 0);
        assert!(width >= 518);
    }

    #[test]
    fn upper_bound_fits_inside_target() {
        let transform = Transform::new(256, 256)
            .with_multiple_of(32)
            .with_resize_method(ResizeMethod::UpperBound);
        assert_eq!(transform.target_size(384, 512), [192, 256]);
    }

    #[test]
    fn minimal_prefers_the_smaller_scale_change() {
        let transform = Transform::new(384, 384)
            .with_multiple_of(32)
            .with_resize_method(ResizeMethod::Minimal);
        assert_eq!(transform.target_size(384, 512), [384, 512]);
    }

    #[test]
    fn stretch_without_aspect_ratio() {
        let transform = Transform::new(64, 32).with_keep_aspect_ratio(false);
        assert_eq!(transform.target_size(100, 300), [32, 64]);
    }

    #[test]
    fn patch_alignment_follows_multiple_of() {
        let transform = Transform::depth_anything_v2();
        assert!(transform.ensure_patch_aligned(14).is_ok());
        assert!(transform.ensure_patch_aligned(7).is_ok());
        assert!(matches!(
            transform.ensure_patch_aligned(16),
            Err(DepthMapError::Shape(_))
        ));
        assert!(Transform::new(64, 64).ensure_patch_aligned(14).is_err());
    }

    #[test]
    fn unknown_transform_is_rejected() {
        assert!(matches!(
            Transform::by_name("small_transform"),
            Err(DepthMapError::UnknownTransform(_))
        ));
        assert!(Transform::by_name(DEPTH_ANYTHING_V2_TRANSFORM).is_ok());
    }

    #[test]
    fn rgb_to_input_tensor_normalizes_channels() {
        let device = <TestBackend as Backend>::Device::default();
        let transform = Transform::new(1, 2)
            .with_mean([0.5, 0.5, 0.5])
            .with_std([0.5, 0.5, 0.5]);
        let rgb = vec![
            0u8, 255, 128, //
            255, 0, 128,
        ];
        let tensor = rgb_to_input_tensor::<TestBackend>(&rgb, 1, 2, &transform, &device).unwrap();
        assert_eq!(tensor.shape().dims::<4>(), [1, 3, 2, 1]);
        let values = to_f32_vec(tensor).unwrap();

        let expected = [-1.0f32, 1.0, 1.0, -1.0, 0.0039215689, 0.0039215689];
        for (value, expected) in values.iter().zip(expected.iter()) {
            assert!((value - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn rgb_to_input_tensor_rejects_invalid_length() {
        let device = <TestBackend as Backend>::Device::default();
        let transform = Transform::depth_anything_v2();
        let result = rgb_to_input_tensor::<TestBackend>(&[0u8; 5], 1, 2, &transform, &device);
        assert!(matches!(result, Err(DepthMapError::Shape(_))));
    }

    #[test]
    fn apply_resizes_to_network_size() {
        let device = <TestBackend as Backend>::Device::default();
        let transform = Transform::new(28, 28).with_multiple_of(14);
        let image = RgbImage::from_pixel(40, 20, image::Rgb([10, 20, 30]));
        let tensor = transform.apply::<TestBackend>(&image, &device).unwrap();
        assert_eq!(tensor.shape().dims::<4>(), [1, 3, 28, 56]);
    }

    #[test]
    fn apply_resizes_unclamped_floats_with_cubic_kernel() {
        let device = <TestBackend as Backend>::Device::default();
        let transform = Transform::new(4, 1)
            .with_keep_aspect_ratio(false)
            .with_mean([0.0; 3])
            .with_std([1.0; 3]);
        let image = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 0, 0])
            }
        });

        let tensor = transform.apply::<TestBackend>(&image, &device).unwrap();
        assert_eq!(tensor.shape().dims::<4>(), [1, 3, 1, 4]);
        let values = to_f32_vec(tensor).unwrap();

        // Overshoot past [0, 1] survives because resizing happens before any quantization.
        let expected = [-0.10546875f32, 0.2265625, 0.7734375, 1.10546875];
        for (value, expected) in values[..4].iter().zip(expected) {
            assert!((value - expected).abs() < 1e-5, "{values:?}");
        }
        assert!(values[4..].iter().all(|value| value.abs() < 1e-6));
    }
}
