use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use burn_store::{ApplyResult, KeyRemapper, ModuleSnapshot, PyTorchToBurnAdapter, SafetensorsStore};
use hf_hub::api::sync::Api;

use crate::{
    error::DepthMapError,
    model::{DepthAnythingV2, DepthAnythingV2Config, with_model_load_stack},
    transform::{DEPTH_ANYTHING_V2_TRANSFORM, Transform},
};

/// One weights file in a Hugging Face model repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubFile {
    pub repo: &'static str,
    pub filename: &'static str,
}

/// Everything needed to build a named model: its architecture, companion transform and weights.
#[derive(Clone, Copy, Debug)]
pub struct ModelCard {
    pub name: &'static str,
    pub transform: &'static str,
    pub weights: &'static [HubFile],
    config: fn() -> DepthAnythingV2Config,
}

impl ModelCard {
    pub fn config(&self) -> DepthAnythingV2Config {
        (self.config)()
    }

    pub fn transform(&self) -> Result<Transform, DepthMapError> {
        Transform::by_name(self.transform)
    }

    pub fn checkpoint_file_name(&self) -> String {
        format!("{}.mpk", self.name)
    }
}

pub const DEPTH_ANYTHING_V2_SMALL: ModelCard = ModelCard {
    name: "depth_anything_v2_small",
    transform: DEPTH_ANYTHING_V2_TRANSFORM,
    weights: &[
        HubFile {
            repo: "lmz/candle-dino-v2",
            filename: "dinov2_vits14.safetensors",
        },
        HubFile {
            repo: "jeroenvlek/depth-anything-v2-safetensors",
            filename: "depth_anything_v2_vits.safetensors",
        },
    ],
    config: DepthAnythingV2Config::small,
};

const MODEL_CARDS: &[ModelCard] = &[DEPTH_ANYTHING_V2_SMALL];

// Applied in order; later patterns see the output of earlier ones.
const KEY_PATTERNS: &[(&str, &str)] = &[
    (r"^pretrained\.", "backbone.pretrained."),
    (
        r"^(cls_token|mask_token|register_tokens|pos_embed|patch_embed|blocks|norm)\b",
        "backbone.pretrained.$1",
    ),
    (r"^depth_head\.", "head."),
    (r"^backbone\.pretrained\.norm\.weight$", "backbone.hook_norm.gamma"),
    (r"^backbone\.pretrained\.norm\.bias$", "backbone.hook_norm.beta"),
    (r"^(backbone\.pretrained\..*\.norm\d+)\.weight$", "$1.gamma"),
    (r"^(backbone\.pretrained\..*\.norm\d+)\.bias$", "$1.beta"),
    (r"^(head\.resize_layers\.[01])\.(weight|bias)$", "$1.conv_t.$2"),
    (r"^(head\.resize_layers\.3)\.(weight|bias)$", "$1.conv.$2"),
    (r"^(head\.scratch\.output_conv2)\.0\.(weight|bias)$", "$1.conv1.$2"),
    (r"^(head\.scratch\.output_conv2)\.2\.(weight|bias)$", "$1.conv2.$2"),
    (r"^(head\.scratch\.refinenet\d)\.resConfUnit1\.", "$1.residual1."),
    (r"^(head\.scratch\.refinenet\d)\.resConfUnit2\.", "$1.residual2."),
];

fn weight_remapper() -> Result<KeyRemapper, DepthMapError> {
    KEY_PATTERNS
        .iter()
        .try_fold(KeyRemapper::new(), |remapper, &(from, to)| {
            remapper
                .add_pattern(from, to)
                .map_err(|err| DepthMapError::Weights(format!("invalid key pattern `{from}`: {err}")))
        })
}

/// Resolves named models and fetches their weights through the Hugging Face hub cache.
pub struct ModelHub {
    api: Api,
}

impl ModelHub {
    pub fn new() -> Result<Self, DepthMapError> {
        Ok(Self { api: Api::new()? })
    }

    pub fn resolve(name: &str) -> Result<&'static ModelCard, DepthMapError> {
        MODEL_CARDS
            .iter()
            .find(|card| card.name == name)
            .ok_or_else(|| DepthMapError::UnknownModel(name.to_string()))
    }

    /// Downloads any weights file not yet in the local hub cache.
    pub fn fetch(&self, card: &ModelCard) -> Result<Vec<PathBuf>, DepthMapError> {
        card.weights
            .iter()
            .map(|file| {
                let path = self.api.model(file.repo.to_string()).get(file.filename)?;
                log::info!("resolved {}/{} -> {}", file.repo, file.filename, path.display());
                Ok(path)
            })
            .collect()
    }

    /// Builds the model on `device`, preferring `<checkpoint_dir>/<name>.mpk` over the hub.
    pub fn load_model<B: Backend>(
        &self,
        card: &ModelCard,
        checkpoint_dir: &Path,
        device: &B::Device,
    ) -> Result<DepthAnythingV2<B>, DepthMapError> {
        let checkpoint = checkpoint_dir.join(card.checkpoint_file_name());
        if checkpoint.is_file() {
            log::info!("loading {} from {}", card.name, checkpoint.display());
            return load_checkpoint(card, &checkpoint, device);
        }

        let files = self.fetch(card)?;
        let (model, _) = load_safetensors(card, &files, device)?;
        Ok(model)
    }
}

/// Applies PyTorch-named safetensors files to a freshly initialized model.
pub fn load_safetensors<B: Backend>(
    card: &ModelCard,
    files: &[PathBuf],
    device: &B::Device,
) -> Result<(DepthAnythingV2<B>, Vec<ApplyResult>), DepthMapError> {
    let mut model = DepthAnythingV2::<B>::new(device, card.config());
    let mut results = Vec::with_capacity(files.len());

    for path in files {
        let mut store = SafetensorsStore::from_file(path)
            .remap(weight_remapper()?)
            .with_from_adapter(PyTorchToBurnAdapter::default())
            .allow_partial(true);
        let result = with_model_load_stack(|| model.load_from(&mut store)).map_err(|err| {
            DepthMapError::Weights(format!("failed to apply `{}`: {err}", path.display()))
        })?;
        log::debug!(
            "{}: applied {} tensors ({} skipped, {} unused)",
            path.display(),
            result.applied.len(),
            result.skipped.len(),
            result.unused.len()
        );
        results.push(result);
    }

    let missing = missing_everywhere(&results);
    if !missing.is_empty() {
        log::warn!(
            "{} parameters of {} were not found in any weights file",
            missing.len(),
            card.name
        );
        for key in &missing {
            log::debug!("missing tensor: {key}");
        }
    }

    Ok((model, results))
}

/// Keys that no file in a multi-file load provided.
pub fn missing_everywhere(results: &[ApplyResult]) -> Vec<String> {
    unprovided_keys(results.iter().map(|result| {
        (
            result.applied.iter().map(|key| key.to_string()).collect(),
            result.missing.iter().map(|key| key.to_string()).collect(),
        )
    }))
}

fn unprovided_keys(results: impl Iterator<Item = (Vec<String>, Vec<String>)>) -> Vec<String> {
    let mut applied = HashSet::new();
    let mut missing = HashSet::new();
    for (file_applied, file_missing) in results {
        applied.extend(file_applied);
        missing.extend(file_missing);
    }
    let mut missing: Vec<String> = missing.difference(&applied).cloned().collect();
    missing.sort();
    missing
}

pub fn load_checkpoint<B: Backend>(
    card: &ModelCard,
    checkpoint: &Path,
    device: &B::Device,
) -> Result<DepthAnythingV2<B>, DepthMapError> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    with_model_load_stack(|| {
        DepthAnythingV2::<B>::new(device, card.config()).load_file(checkpoint, &recorder, device)
    })
    .map_err(|err| {
        DepthMapError::Weights(format!(
            "failed to load checkpoint `{}`: {err}",
            checkpoint.display()
        ))
    })
}

pub fn save_checkpoint<B: Backend>(
    model: DepthAnythingV2<B>,
    checkpoint: &Path,
) -> Result<(), DepthMapError> {
    if let Some(parent) = checkpoint.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .save_file(checkpoint.to_path_buf(), &recorder)
        .map_err(|err| {
            DepthMapError::Weights(format!(
                "failed to save checkpoint `{}`: {err}",
                checkpoint.display()
            ))
        })
}
