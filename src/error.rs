use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StyleError {
    #[error("Image loading error: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("Fingerprint metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Insufficient data: {usable} usable image(s), {skipped} skipped")]
    InsufficientData { usable: usize, skipped: usize },

    #[error("Numeric instability during {stage}: {count} non-finite value(s)")]
    NumericInstability { stage: &'static str, count: usize },

    #[error("Incompatible fingerprint: {0}")]
    IncompatibleFingerprint(String),

    #[error("Failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("No fingerprint found in {} (run extraction first)", .0.display())]
    MissingFingerprint(PathBuf),
}

impl StyleError {
    /// Per-file failures the pipeline recovers from by skipping the file.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StyleError::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, StyleError>;
