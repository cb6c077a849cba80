use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum DepthMapError {
    #[error("Could not load image: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("unknown depth model `{0}`")]
    UnknownModel(String),

    #[error("unknown preprocessing transform `{0}`")]
    UnknownTransform(String),

    #[error("failed to fetch model weights from the hub")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("failed to apply model weights: {0}")]
    Weights(String),

    #[error("failed to encode depth image")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unexpected tensor shape: {0}")]
    Shape(String),
}
