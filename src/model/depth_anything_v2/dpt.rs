use burn::{
    config::Config,
    module::Module,
    nn::{
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::interpolate::resize_bilinear;

#[derive(Config, Debug)]
pub struct DptHeadConfig {
    pub dim_in: usize,
    pub features: usize,
    pub out_channels: [usize; 4],
    #[config(default = "32")]
    pub head_features: usize,
}

impl DptHeadConfig {
    pub fn small() -> Self {
        Self::new(384, 64, [48, 96, 192, 384])
    }
}

/// Dense prediction head: reassembles four ViT stages into a pyramid and fuses it top-down.
#[derive(Module, Debug)]
pub struct DptHead<B: Backend> {
    projects: Vec<Conv2d<B>>,
    resize_layers: Vec<ResizeOp<B>>,
    scratch: Scratch<B>,
}

impl<B: Backend> DptHead<B> {
    pub fn new(device: &B::Device, config: &DptHeadConfig) -> Self {
        let projects = config
            .out_channels
            .iter()
            .map(|&channels| {
                Conv2dConfig::new([config.dim_in, channels], [1, 1])
                    .with_bias(true)
                    .init(device)
            })
            .collect();

        let [c0, c1, _, c3] = config.out_channels;
        let resize_layers = vec![
            ResizeOp::conv_transpose(
                ConvTranspose2dConfig::new([c0, c0], [4, 4])
                    .with_stride([4, 4])
                    .with_bias(true)
                    .init(device),
            ),
            ResizeOp::conv_transpose(
                ConvTranspose2dConfig::new([c1, c1], [2, 2])
                    .with_stride([2, 2])
                    .with_bias(true)
                    .init(device),
            ),
            ResizeOp::identity(),
            ResizeOp::conv(
                Conv2dConfig::new([c3, c3], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_stride([2, 2])
                    .with_bias(true)
                    .init(device),
            ),
        ];

        Self {
            projects,
            resize_layers,
            scratch: Scratch::new(device, config),
        }
    }

    /// Maps four `[batch, tokens, dim]` patch-token stages to a `[batch, 1, height, width]` map.
    pub fn forward(
        &self,
        hooks: &[Tensor<B, 3>],
        height: usize,
        width: usize,
        patch_size: usize,
    ) -> Tensor<B, 4> {
        assert!(
            hooks.len() >= 4,
            "DptHead expects 4 hook tensors, got {}",
            hooks.len()
        );
        let ph = height / patch_size;
        let pw = width / patch_size;

        let stages: [Tensor<B, 4>; 4] = std::array::from_fn(|stage| {
            self.prepare_stage(hooks[stage].clone(), stage, ph, pw)
        });

        let fused = self.fuse(stages);
        let fused = self.scratch.output_conv1.forward(fused);
        let fused = resize_bilinear(fused, [ph * patch_size, pw * patch_size]);
        self.scratch.output_conv2.forward(fused)
    }

    fn prepare_stage(&self, tokens: Tensor<B, 3>, stage: usize, ph: usize, pw: usize) -> Tensor<B, 4> {
        let [batch, token_count, channels] = tokens.shape().dims::<3>();
        assert_eq!(
            token_count,
            ph * pw,
            "hook tensor for stage {stage} has {token_count} tokens, expected {ph}x{pw}"
        );

        let x = tokens
            .permute([0, 2, 1])
            .reshape([batch as i32, channels as i32, ph as i32, pw as i32]);
        let x = self.projects[stage].forward(x);
        self.resize_layers[stage].forward(x)
    }

    fn fuse(&self, stages: [Tensor<B, 4>; 4]) -> Tensor<B, 4> {
        let [l1, l2, l3, l4] = stages;

        let l1_rn = self.scratch.layer1_rn.forward(l1);
        let l2_rn = self.scratch.layer2_rn.forward(l2);
        let l3_rn = self.scratch.layer3_rn.forward(l3);
        let l4_rn = self.scratch.layer4_rn.forward(l4);

        let mut out = self
            .scratch
            .refinenet4
            .forward(l4_rn, None, Some(hw(&l3_rn)));
        out = self
            .scratch
            .refinenet3
            .forward(out, Some(l3_rn), Some(hw(&l2_rn)));
        out = self
            .scratch
            .refinenet2
            .forward(out, Some(l2_rn), Some(hw(&l1_rn)));
        self.scratch.refinenet1.forward(out, Some(l1_rn), None)
    }
}

fn hw<B: Backend>(tensor: &Tensor<B, 4>) -> [usize; 2] {
    let dims = tensor.shape().dims::<4>();
    [dims[2], dims[3]]
}

#[derive(Module, Debug)]
struct ResizeOp<B: Backend> {
    conv_t: Option<ConvTranspose2d<B>>,
    conv: Option<Conv2d<B>>,
}

impl<B: Backend> ResizeOp<B> {
    fn identity() -> Self {
        Self {
            conv_t: None,
            conv: None,
        }
    }

    fn conv_transpose(layer: ConvTranspose2d<B>) -> Self {
        Self {
            conv_t: Some(layer),
            conv: None,
        }
    }

    fn conv(layer: Conv2d<B>) -> Self {
        Self {
            conv_t: None,
            conv: Some(layer),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match (&self.conv_t, &self.conv) {
            (Some(layer), _) => layer.forward(x),
            (None, Some(layer)) => layer.forward(x),
            (None, None) => x,
        }
    }
}

#[derive(Module, Debug)]
struct Scratch<B: Backend> {
    layer1_rn: Conv2d<B>,
    layer2_rn: Conv2d<B>,
    layer3_rn: Conv2d<B>,
    layer4_rn: Conv2d<B>,
    refinenet1: FeatureFusionBlock<B>,
    refinenet2: FeatureFusionBlock<B>,
    refinenet3: FeatureFusionBlock<B>,
    refinenet4: FeatureFusionBlock<B>,
    output_conv1: Conv2d<B>,
    output_conv2: OutputHead<B>,
}

impl<B: Backend> Scratch<B> {
    fn new(device: &B::Device, config: &DptHeadConfig) -> Self {
        let features = config.features;
        let [c0, c1, c2, c3] = config.out_channels;
        Self {
            layer1_rn: conv3x3(device, c0, features, false),
            layer2_rn: conv3x3(device, c1, features, false),
            layer3_rn: conv3x3(device, c2, features, false),
            layer4_rn: conv3x3(device, c3, features, false),
            refinenet1: FeatureFusionBlock::new(device, features, true),
            refinenet2: FeatureFusionBlock::new(device, features, true),
            refinenet3: FeatureFusionBlock::new(device, features, true),
            refinenet4: FeatureFusionBlock::new(device, features, false),
            output_conv1: conv3x3(device, features, features / 2, true),
            output_conv2: OutputHead::new(device, features / 2, config.head_features),
        }
    }
}

#[derive(Module, Debug)]
struct FeatureFusionBlock<B: Backend> {
    residual1: Option<ResidualConvUnit<B>>,
    residual2: ResidualConvUnit<B>,
    out_conv: Conv2d<B>,
}

impl<B: Backend> FeatureFusionBlock<B> {
    fn new(device: &B::Device, channels: usize, has_lateral: bool) -> Self {
        Self {
            residual1: has_lateral.then(|| ResidualConvUnit::new(device, channels)),
            residual2: ResidualConvUnit::new(device, channels),
            out_conv: Conv2dConfig::new([channels, channels], [1, 1])
                .with_bias(true)
                .init(device),
        }
    }

    /// Adds the lateral branch, refines, then upsamples to `size` (or 2x when absent).
    fn forward(
        &self,
        top: Tensor<B, 4>,
        lateral: Option<Tensor<B, 4>>,
        size: Option<[usize; 2]>,
    ) -> Tensor<B, 4> {
        let mut y = top;
        if let (Some(residual), Some(lateral)) = (&self.residual1, lateral) {
            y = y + residual.forward(lateral);
        }

        y = self.residual2.forward(y);
        let [h, w] = hw(&y);
        y = resize_bilinear(y, size.unwrap_or([h * 2, w * 2]));
        self.out_conv.forward(y)
    }
}

#[derive(Module, Debug)]
struct ResidualConvUnit<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> ResidualConvUnit<B> {
    fn new(device: &B::Device, channels: usize) -> Self {
        Self {
            conv1: conv3x3(device, channels, channels, true),
            conv2: conv3x3(device, channels, channels, true),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(relu(input.clone()));
        let x = self.conv2.forward(relu(x));
        x + input
    }
}

/// `conv3x3 -> relu -> conv1x1 -> relu`, producing one non-negative channel.
#[derive(Module, Debug)]
struct OutputHead<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> OutputHead<B> {
    fn new(device: &B::Device, in_channels: usize, mid_channels: usize) -> Self {
        Self {
            conv1: conv3x3(device, in_channels, mid_channels, true),
            conv2: Conv2dConfig::new([mid_channels, 1], [1, 1])
                .with_bias(true)
                .init(device),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv1.forward(input));
        relu(self.conv2.forward(x))
    }
}

fn conv3x3<B: Backend>(
    device: &B::Device,
    in_channels: usize,
    out_channels: usize,
    bias: bool,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(bias)
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = crate::InferenceBackend;

    fn small_head_config() -> DptHeadConfig {
        DptHeadConfig::new(8, 8, [4, 4, 8, 8]).with_head_features(4)
    }

    #[test]
    fn head_emits_full_resolution_single_channel() {
        let device = <TestBackend as Backend>::Device::default();
        let config = small_head_config();
        let head = DptHead::<TestBackend>::new(&device, &config);
        let (ph, pw, patch) = (4, 6, 14);
        let hooks: Vec<Tensor<TestBackend, 3>> = (0..4)
            .map(|_| Tensor::random([1, ph * pw, 8], burn::tensor::Distribution::Default, &device))
            .collect();

        let output = head.forward(&hooks, ph * patch, pw * patch, patch);
        assert_eq!(output.shape().dims::<4>(), [1, 1, ph * patch, pw * patch]);

        let min = output.min().into_scalar();
        assert!(min >= 0.0, "output head must be non-negative, got {min}");
    }

    #[test]
    #[should_panic(expected = "tokens")]
    fn head_rejects_mismatched_token_grid() {
        let device = <TestBackend as Backend>::Device::default();
        let head = DptHead::<TestBackend>::new(&device, &small_head_config());
        let hooks: Vec<Tensor<TestBackend, 3>> =
            (0..4).map(|_| Tensor::zeros([1, 10, 8], &device)).collect();
        head.forward(&hooks, 42, 42, 14);
    }
}
