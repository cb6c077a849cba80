use std::path::Path;

use burn::prelude::*;
use image::{
    DynamicImage, ImageDecoder, ImageReader, ImageResult, RgbImage, metadata::Orientation,
};

use crate::{
    config::GenerateDepthConfig,
    device::{ComputeDevice, select_device},
    error::DepthMapError,
    hub::{ModelCard, ModelHub},
    inference::infer_from_rgb,
    interpolate::resize_gray_bicubic,
    model::DepthEstimator,
    normalize::{depth_to_gray, gray_to_rgb},
    transform::Transform,
};

/// Decodes the source image as RGB, upright according to its EXIF orientation.
///
/// Any decode failure is reported as a missing input.
pub fn load_source_image(path: &Path) -> Result<RgbImage, DepthMapError> {
    let image = decode_upright(path).map_err(|err| {
        log::debug!("failed to open {}: {err}", path.display());
        DepthMapError::InputNotFound {
            path: path.to_path_buf(),
        }
    })?;
    Ok(image.to_rgb8())
}

fn decode_upright(path: &Path) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or_else(|err| {
        log::warn!("ignoring unreadable orientation of {}: {err}", path.display());
        Orientation::NoTransforms
    });
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Turns a source image into the three-channel normalized depth image of the same size.
pub fn render_depth_image<B: Backend, M: DepthEstimator<B>>(
    estimator: &M,
    transform: &Transform,
    image: &RgbImage,
    device: &B::Device,
) -> Result<RgbImage, DepthMapError> {
    let (width, height) = image.dimensions();
    let depth = infer_from_rgb::<B, M>(estimator, transform, image, device)?;

    let gray = depth_to_gray(&depth, width, height)?;
    let gray = resize_gray_bicubic(&gray, width, height)?;
    Ok(gray_to_rgb(gray))
}

/// Writes `image`, creating missing parent directories first. The format follows the extension.
pub fn save_depth_image(image: &RgbImage, path: &Path) -> Result<(), DepthMapError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Runs the generator end to end with `config`.
pub fn run(config: &GenerateDepthConfig) -> Result<(), DepthMapError> {
    let image = load_source_image(&config.input)?;
    log::info!(
        "loaded {} ({}x{})",
        config.input.display(),
        image.width(),
        image.height()
    );

    let device = select_device();
    if device.is_accelerated() {
        log::info!("using {} device", device.label());
    } else {
        log::info!("no accelerated device available, using {}", device.label());
    }

    let card = ModelHub::resolve(&config.model)?;
    let hub = ModelHub::new()?;

    let depth = match device {
        #[cfg(feature = "backend_cuda")]
        ComputeDevice::Cuda(device) => {
            render_with::<crate::device::CudaBackend>(&hub, card, config, &image, &device)?
        }
        #[cfg(feature = "backend_wgpu")]
        ComputeDevice::Wgpu(device) => {
            render_with::<crate::device::WgpuBackend>(&hub, card, config, &image, &device)?
        }
        ComputeDevice::Cpu(device) => {
            render_with::<crate::device::CpuBackend>(&hub, card, config, &image, &device)?
        }
    };

    save_depth_image(&depth, &config.output)?;
    log::info!("wrote {}", config.output.display());
    Ok(())
}

fn render_with<B: Backend>(
    hub: &ModelHub,
    card: &ModelCard,
    config: &GenerateDepthConfig,
    image: &RgbImage,
    device: &B::Device,
) -> Result<RgbImage, DepthMapError> {
    let model = hub.load_model::<B>(card, &config.checkpoint_dir, device)?;
    let transform = card.transform()?;
    transform.ensure_patch_aligned(model.patch_size())?;
    render_depth_image(&model, &transform, image, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    type TestBackend = crate::InferenceBackend;

    /// Depth proportional to the red channel of the transformed input.
    struct RedChannel;

    impl<B: Backend> DepthEstimator<B> for RedChannel {
        fn estimate(&self, input: Tensor<B, 4>) -> Tensor<B, 3> {
            let [batch, _, height, width] = input.shape().dims::<4>();
            input
                .slice([0..batch, 0..1, 0..height, 0..width])
                .squeeze_dim::<3>(1)
        }
    }

    struct Flat;

    impl<B: Backend> DepthEstimator<B> for Flat {
        fn estimate(&self, input: Tensor<B, 4>) -> Tensor<B, 3> {
            let [batch, _, height, width] = input.shape().dims::<4>();
            Tensor::full([batch, height, width], 3.5, &input.device())
        }
    }

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            let value = (x * 255 / (width - 1)) as u8;
            Rgb([value, value / 2, 255 - value])
        })
    }

    fn small_transform() -> Transform {
        Transform::new(28, 28).with_multiple_of(14)
    }

    fn render(estimator: &impl DepthEstimator<TestBackend>, image: &RgbImage) -> RgbImage {
        let device = <TestBackend as Backend>::Device::default();
        render_depth_image::<TestBackend, _>(estimator, &small_transform(), image, &device).unwrap()
    }

    #[test]
    fn output_matches_source_size_with_three_equal_channels() {
        let image = gradient_image(37, 21);
        let depth = render(&RedChannel, &image);
        assert_eq!(depth.dimensions(), (37, 21));
        assert!(depth.pixels().all(|&Rgb([r, g, b])| r == g && g == b));
    }

    #[test]
    fn constant_prediction_renders_black() {
        // Network size equals source size, so both resizes are the identity.
        let depth = render(&Flat, &gradient_image(28, 28));
        assert!(depth.as_raw().iter().all(|&value| value == 0));
    }

    #[test]
    fn varying_prediction_spans_full_range() {
        let depth = render(&RedChannel, &gradient_image(40, 16));
        assert!(depth.as_raw().contains(&0));
        assert!(depth.as_raw().contains(&255));
    }

    #[test]
    fn rendering_is_deterministic() {
        let image = gradient_image(33, 19);
        assert_eq!(
            render(&RedChannel, &image).as_raw(),
            render(&RedChannel, &image).as_raw()
        );
    }

    #[test]
    fn saved_png_decodes_to_same_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public").join("hero").join("depth.png");
        let depth = render(&RedChannel, &gradient_image(24, 10));

        save_depth_image(&depth, &path).unwrap();
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.as_raw(), depth.as_raw());
    }

    /// Splices an EXIF APP1 segment carrying only `Orientation = value` after the SOI marker.
    fn with_exif_orientation(jpeg: &[u8], value: u8) -> Vec<u8> {
        #[rustfmt::skip]
        let app1: [u8; 36] = [
            0xFF, 0xE1, 0x00, 0x22,
            b'E', b'x', b'i', b'f', 0x00, 0x00,
            b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08,
            0x00, 0x01,
            0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, value, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn source_image_is_rotated_by_exif_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotated.jpg");

        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut jpeg)
            .encode_image(&gradient_image(40, 20))
            .unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        std::fs::write(&path, with_exif_orientation(&jpeg, 6)).unwrap();

        let image = load_source_image(&path).unwrap();
        assert_eq!(image.dimensions(), (20, 40));
    }

    #[test]
    fn source_image_without_orientation_keeps_its_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upright.jpg");
        gradient_image(40, 20).save(&path).unwrap();
        assert_eq!(load_source_image(&path).unwrap().dimensions(), (40, 20));
    }

    #[test]
    fn undecodable_input_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        assert!(matches!(
            load_source_image(&path),
            Err(DepthMapError::InputNotFound { .. })
        ));
    }

    #[test]
    fn missing_input_aborts_before_creating_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = GenerateDepthConfig::for_root(dir.path());

        let err = run(&config).unwrap_err();
        assert!(matches!(&err, DepthMapError::InputNotFound { path } if *path == config.input));
        assert!(err.to_string().starts_with("Could not load image: "));
        assert!(!dir.path().join("public").exists());
        assert!(!config.output.exists());
    }
}
