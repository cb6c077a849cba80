use burn::{
    module::{Ignored, Module},
    nn::{LayerNorm, LayerNormConfig},
    prelude::*,
    tensor::activation::relu,
};
use burn_dino::model::dino::{DinoVisionTransformer, DinoVisionTransformerConfig};

mod dpt;

pub use dpt::{DptHead, DptHeadConfig};

use super::DepthEstimator;

#[derive(Config, Debug)]
pub struct DepthAnythingV2Config {
    pub head: DptHeadConfig,
    #[config(default = "518")]
    pub image_size: usize,
    #[config(default = "14")]
    pub patch_size: usize,
    #[config(default = "vec![2, 5, 8, 11]")]
    pub hook_block_ids: Vec<usize>,
}

impl DepthAnythingV2Config {
    pub fn small() -> Self {
        Self::new(DptHeadConfig::small())
    }
}

#[derive(Module, Debug)]
struct Backbone<B: Backend> {
    pretrained: DinoVisionTransformer<B>,
    /// The ViT's final norm, applied to every hooked stage rather than only the last block.
    hook_norm: LayerNorm<B>,
}

impl<B: Backend> Backbone<B> {
    fn new(device: &B::Device, config: &DepthAnythingV2Config) -> Self {
        let mut vit_config =
            DinoVisionTransformerConfig::vits(Some(config.image_size), Some(config.patch_size));
        vit_config.register_token_count = 0;
        vit_config.use_register_tokens = false;
        vit_config.use_mask_token = false;
        vit_config.block_config.attn.quiet_softmax = false;

        Self {
            pretrained: vit_config.init(device),
            hook_norm: LayerNormConfig::new(config.head.dim_in)
                .with_epsilon(1e-6)
                .init(device),
        }
    }

    fn forward_with_hooks(&self, input: Tensor<B, 4>, hook_blocks: &[usize]) -> Vec<Tensor<B, 3>> {
        let (_, hooks, _) =
            self.pretrained
                .forward_with_intermediate_tokens_ext(input, hook_blocks, &[], None);
        hooks
            .into_iter()
            .map(|hook| self.hook_norm.forward(hook.patches))
            .collect()
    }
}

/// Depth Anything V2: DINOv2 patch tokens decoded by a DPT head into relative inverse depth.
#[derive(Module, Debug)]
pub struct DepthAnythingV2<B: Backend> {
    backbone: Backbone<B>,
    head: DptHead<B>,
    img_size: Ignored<usize>,
    patch_size: Ignored<usize>,
    hook_block_ids: Ignored<Vec<usize>>,
}

impl<B: Backend> DepthAnythingV2<B> {
    pub fn new(device: &B::Device, config: DepthAnythingV2Config) -> Self {
        Self {
            backbone: Backbone::new(device, &config),
            head: DptHead::new(device, &config.head),
            img_size: Ignored(config.image_size),
            patch_size: Ignored(config.patch_size),
            hook_block_ids: Ignored(config.hook_block_ids),
        }
    }

    /// Relative depth `[batch, height, width]` for a normalized `[batch, 3, height, width]` input.
    ///
    /// Both spatial sides must be multiples of the patch size. Larger values are nearer.
    pub fn infer(&self, input: Tensor<B, 4>) -> Tensor<B, 3> {
        let [_, _, height, width] = input.shape().dims::<4>();
        let patch_size = self.patch_size.0;
        assert_eq!(
            height % patch_size,
            0,
            "Input height {height} must be divisible by patch size {patch_size}"
        );
        assert_eq!(
            width % patch_size,
            0,
            "Input width {width} must be divisible by patch size {patch_size}"
        );

        let hooks = self
            .backbone
            .forward_with_hooks(input, &self.hook_block_ids.0);
        let depth = self.head.forward(&hooks, height, width, patch_size);
        relu(depth).squeeze_dim(1)
    }

    pub fn img_size(&self) -> usize {
        self.img_size.0
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size.0
    }
}

impl<B: Backend> DepthEstimator<B> for DepthAnythingV2<B> {
    fn estimate(&self, input: Tensor<B, 4>) -> Tensor<B, 3> {
        self.infer(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InferenceBackend;

    #[test]
    fn depth_anything_v2_emits_depth_at_input_resolution() {
        let device = <InferenceBackend as Backend>::Device::default();
        let model = DepthAnythingV2::<InferenceBackend>::new(
            &device,
            DepthAnythingV2Config::small().with_image_size(56),
        );
        let input = Tensor::<InferenceBackend, 4>::zeros([1, 3, 56, 84], &device);
        let depth = model.infer(input);
        assert_eq!(depth.shape().dims(), [1, 56, 84]);
        assert!(depth.min().into_scalar() >= 0.0);
    }

    #[test]
    #[should_panic(expected = "divisible by patch size")]
    fn rejects_inputs_off_the_patch_grid() {
        let device = <InferenceBackend as Backend>::Device::default();
        let model = DepthAnythingV2::<InferenceBackend>::new(
            &device,
            DepthAnythingV2Config::small().with_image_size(56),
        );
        model.infer(Tensor::zeros([1, 3, 50, 56], &device));
    }

    #[test]
    fn record_roundtrip_keeps_configuration() {
        let device = <InferenceBackend as Backend>::Device::default();
        let config = DepthAnythingV2Config::small().with_image_size(56);
        let model = DepthAnythingV2::<InferenceBackend>::new(&device, config.clone());
        let record = model.clone().into_record();
        let reloaded = DepthAnythingV2::<InferenceBackend>::new(&device, config).load_record(record);
        assert_eq!(model.img_size(), reloaded.img_size());
        assert_eq!(model.patch_size(), reloaded.patch_size());
    }
}
