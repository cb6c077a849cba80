use burn::{
    config::Config,
    nn::interpolate::{Interpolate2dConfig, InterpolateMode},
    tensor::{
        Tensor,
        backend::Backend,
        module,
        ops::{InterpolateMode as BurnInterpolateMode, InterpolateOptions},
    },
};
use image::{GrayImage, Luma};

use crate::error::DepthMapError;

/// Keys coefficient used by PyTorch and OpenCV bicubic resampling.
const CUBIC_A: f32 = -0.75;

#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum InterpolationMethod {
    /// Half-pixel centers, clamped borders (`align_corners = false`).
    Custom,
    /// Burn's built-in bicubic kernel, which aligns corners.
    Burn,
}

impl Default for InterpolationMethod {
    fn default() -> Self {
        Self::Custom
    }
}

fn cubic_weight(x: f32) -> f32 {
    let abs = x.abs();
    let abs2 = abs * abs;
    let abs3 = abs2 * abs;
    if abs <= 1.0 {
        (CUBIC_A + 2.0) * abs3 - (CUBIC_A + 3.0) * abs2 + 1.0
    } else if abs < 2.0 {
        CUBIC_A * abs3 - 5.0 * CUBIC_A * abs2 + 8.0 * CUBIC_A * abs - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug)]
struct Taps {
    index: [usize; 4],
    weight: [f32; 4],
}

fn axis_taps(in_len: usize, out_len: usize) -> Vec<Taps> {
    let scale = in_len as f32 / out_len as f32;
    let last = in_len as isize - 1;
    (0..out_len)
        .map(|dst| {
            let src = (dst as f32 + 0.5) * scale - 0.5;
            let base = src.floor();
            let t = src - base;
            let base = base as isize;
            let mut taps = Taps {
                index: [0; 4],
                weight: [0.0; 4],
            };
            for k in 0..4 {
                let offset = k as isize - 1;
                taps.index[k] = (base + offset).clamp(0, last) as usize;
                taps.weight[k] = cubic_weight(t - offset as f32);
            }
            taps
        })
        .collect()
}

/// Resamples one row-major plane; the kernel is separable so rows are filtered first.
pub(crate) fn resize_plane(
    plane: &[f32],
    in_height: usize,
    in_width: usize,
    out_height: usize,
    out_width: usize,
) -> Vec<f32> {
    let x_taps = axis_taps(in_width, out_width);
    let y_taps = axis_taps(in_height, out_height);

    let mut rows = vec![0.0f32; in_height * out_width];
    for y in 0..in_height {
        let src = &plane[y * in_width..(y + 1) * in_width];
        let dst = &mut rows[y * out_width..(y + 1) * out_width];
        for (value, taps) in dst.iter_mut().zip(&x_taps) {
            *value = (0..4).map(|k| taps.weight[k] * src[taps.index[k]]).sum();
        }
    }

    let mut output = vec![0.0f32; out_height * out_width];
    for (oy, taps) in y_taps.iter().enumerate() {
        let dst = &mut output[oy * out_width..(oy + 1) * out_width];
        for (ox, value) in dst.iter_mut().enumerate() {
            *value = (0..4)
                .map(|k| taps.weight[k] * rows[taps.index[k] * out_width + ox])
                .sum();
        }
    }
    output
}

pub(crate) fn to_f32_vec<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, DepthMapError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| DepthMapError::Shape(format!("failed to read tensor values: {err:?}")))
}

fn resize_bicubic_align_corners_false_custom<B: Backend>(
    input: Tensor<B, 4>,
    output_size: [usize; 2],
) -> Result<Tensor<B, 4>, DepthMapError> {
    let [batch, channels, in_height, in_width] = input.shape().dims::<4>();
    let [out_height, out_width] = output_size;

    if in_height == out_height && in_width == out_width {
        return Ok(input);
    }

    let device = input.device();
    let values = to_f32_vec(input)?;
    let in_plane = in_height * in_width;
    let mut output = Vec::with_capacity(batch * channels * out_height * out_width);
    for plane in values.chunks_exact(in_plane) {
        output.extend(resize_plane(
            plane, in_height, in_width, out_height, out_width,
        ));
    }

    Ok(
        Tensor::<B, 1>::from_floats(output.as_slice(), &device).reshape([
            batch as i32,
            channels as i32,
            out_height as i32,
            out_width as i32,
        ]),
    )
}

fn resize_bicubic_burn<B: Backend>(input: Tensor<B, 4>, output_size: [usize; 2]) -> Tensor<B, 4> {
    module::interpolate(
        input,
        output_size,
        InterpolateOptions::new(BurnInterpolateMode::Bicubic),
    )
}

/// Bicubic resize of an `NCHW` tensor to `[height, width]`.
pub fn resize_bicubic<B: Backend>(
    input: Tensor<B, 4>,
    output_size: [usize; 2],
    method: InterpolationMethod,
) -> Result<Tensor<B, 4>, DepthMapError> {
    if output_size.contains(&0) {
        return Err(DepthMapError::Shape(format!(
            "resize target {output_size:?} must be positive"
        )));
    }
    match method {
        InterpolationMethod::Custom => resize_bicubic_align_corners_false_custom(input, output_size),
        InterpolationMethod::Burn => Ok(resize_bicubic_burn(input, output_size)),
    }
}

/// Bilinear resize with aligned corners, the mode DPT fusion blocks are trained with.
pub fn resize_bilinear<B: Backend>(input: Tensor<B, 4>, output_size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, in_height, in_width] = input.shape().dims::<4>();
    if [in_height, in_width] == output_size {
        return input;
    }

    Interpolate2dConfig::new()
        .with_output_size(Some(output_size))
        .with_mode(InterpolateMode::Linear)
        .init()
        .forward(input)
}

/// Bicubic resize of an 8-bit map, rounding and saturating like OpenCV's `INTER_CUBIC`.
///
/// Matching dimensions return an unchanged copy.
pub fn resize_gray_bicubic(
    image: &GrayImage,
    target_width: u32,
    target_height: u32,
) -> Result<GrayImage, DepthMapError> {
    if target_width == 0 || target_height == 0 {
        return Err(DepthMapError::Shape(
            "target dimensions must be positive".to_string(),
        ));
    }
    if image.width() == target_width && image.height() == target_height {
        return Ok(image.clone());
    }

    let plane: Vec<f32> = image.as_raw().iter().map(|&value| value as f32).collect();
    let resized = resize_plane(
        &plane,
        image.height() as usize,
        image.width() as usize,
        target_height as usize,
        target_width as usize,
    );

    let mut output = GrayImage::new(target_width, target_height);
    for (pixel, value) in output.pixels_mut().zip(resized) {
        *pixel = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }
    Ok(output)
}
