pub mod depth_anything_v2;

use burn::prelude::*;

pub use depth_anything_v2::{DepthAnythingV2, DepthAnythingV2Config};

/// A monocular depth network seen from the pipeline.
pub trait DepthEstimator<B: Backend> {
    /// Raw relative depth `[batch, height, width]` for a transformed `[batch, 3, height, width]`
    /// input. Values have no unit and no fixed range.
    fn estimate(&self, input: Tensor<B, 4>) -> Tensor<B, 3>;
}

mod stack_guard {
    #[cfg(not(target_arch = "wasm32"))]
    use stacker::maybe_grow;

    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_model_load_stack<R>(f: impl FnOnce() -> R) -> R {
        // Applying a full ViT record recurses deeply; Windows main threads only get 1MB.
        const STACK_SIZE: usize = 32 * 1024 * 1024;
        const RED_ZONE: usize = 2 * 1024 * 1024;
        maybe_grow(RED_ZONE, STACK_SIZE, f)
    }

    #[cfg(target_arch = "wasm32")]
    pub fn with_model_load_stack<R>(f: impl FnOnce() -> R) -> R {
        f()
    }
}

pub use stack_guard::with_model_load_stack;
