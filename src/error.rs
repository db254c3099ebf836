use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by model loading, inference and batch evaluation.
///
/// Every variant renders to the message returned in `{"error": ...}` payloads.
#[derive(Debug, Error)]
pub enum XrayError {
    #[error("Checkpoint not found: {}", .0.display())]
    CheckpointMissing(PathBuf),

    #[error("Failed to read checkpoint {}: {source}", path.display())]
    CheckpointUnreadable {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },

    #[error("Error(s) in loading weights for {model}: {detail}")]
    WeightMismatch { model: String, detail: String },

    #[error("Cannot identify image file: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("Model not loaded properly")]
    ModelNotLoaded,

    #[error("Missing upload field '{0}'")]
    MissingUpload(String),

    #[error("Invalid multipart payload: {0}")]
    Multipart(String),

    #[error("Test images directory not found: {}", .0.display())]
    SamplesDirMissing(PathBuf),

    #[error("No test images found")]
    NoSamples,

    #[error("Merged checkpoint failed verification: {0}")]
    MergeVerification(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unexpected model output: {0}")]
    OutputShape(String),

    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Inference task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type XrayResult<T> = std::result::Result<T, XrayError>;
