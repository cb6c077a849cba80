use std::path::{Path, PathBuf};

use burn::config::Config;

pub const INPUT_IMAGE: &str = "public/hero/montanas.jpg";
pub const OUTPUT_IMAGE: &str = "public/hero/montanas-depth.png";
pub const DEFAULT_MODEL: &str = "depth_anything_v2_small";
pub const DEFAULT_CHECKPOINT_DIR: &str = "assets/model";

/// Paths and model selection for one generator run.
///
/// Every field has a fixed value for the shipped binary; see [`GenerateDepthConfig::for_root`].
#[derive(Config, Debug)]
pub struct GenerateDepthConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    #[config(default = "DEFAULT_MODEL.to_string()")]
    pub model: String,
    /// Directory searched for a pre-converted `<model>.mpk` before the hub is contacted.
    #[config(default = "PathBuf::from(DEFAULT_CHECKPOINT_DIR)")]
    pub checkpoint_dir: PathBuf,
}

impl GenerateDepthConfig {
    pub fn for_root(root: &Path) -> Self {
        Self::new(root.join(INPUT_IMAGE), root.join(OUTPUT_IMAGE))
            .with_checkpoint_dir(root.join(DEFAULT_CHECKPOINT_DIR))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_dir.join(format!("{}.mpk", self.model))
    }
}
