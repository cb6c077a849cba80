use burn::prelude::*;
use image::RgbImage;

use crate::{
    error::DepthMapError,
    interpolate::{InterpolationMethod, resize_bicubic, to_f32_vec},
    model::DepthEstimator,
    transform::Transform,
};

/// Runs a single forward pass and checks the prediction is one `[1, h, w]` map.
///
/// Callers use plain (non-autodiff) backends, so no gradient graph is recorded.
pub fn predict<B: Backend, M: DepthEstimator<B>>(
    model: &M,
    input: Tensor<B, 4>,
) -> Result<Tensor<B, 3>, DepthMapError> {
    let [batch, _, height, width] = input.shape().dims::<4>();
    let prediction = model.estimate(input);
    let dims = prediction.shape().dims::<3>();
    if dims[0] != batch || batch != 1 {
        return Err(DepthMapError::Shape(format!(
            "expected a single depth map for {width}x{height} input, got {dims:?}"
        )));
    }
    Ok(prediction)
}

/// Bicubic upsampling (`align_corners = false`) of a `[1, h, w]` prediction to `[height, width]`.
pub fn upsample_prediction<B: Backend>(
    prediction: Tensor<B, 3>,
    output_size: [usize; 2],
) -> Result<Tensor<B, 2>, DepthMapError> {
    let [height, width] = output_size;
    let upsampled = resize_bicubic(
        prediction.unsqueeze_dim::<4>(1),
        output_size,
        InterpolationMethod::Custom,
    )?;
    Ok(upsampled.reshape([height as i32, width as i32]))
}

/// Transforms `image`, runs the estimator and returns row-major depth at the source resolution.
pub fn infer_from_rgb<B: Backend, M: DepthEstimator<B>>(
    model: &M,
    transform: &Transform,
    image: &RgbImage,
    device: &B::Device,
) -> Result<Vec<f32>, DepthMapError> {
    let input = transform.apply::<B>(image, device)?;
    let prediction = predict(model, input)?;
    log::debug!("raw prediction shape {:?}", prediction.shape().dims::<3>());

    let size = [image.height() as usize, image.width() as usize];
    to_f32_vec(upsample_prediction(prediction, size)?)
}
