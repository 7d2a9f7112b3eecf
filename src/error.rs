//! Error types for the classification pipeline

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A rejected upload. These are always caused by the client and carry a
/// message that tells them what to fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request has no file under the expected field name
    #[error("the request has no `{0}` file field")]
    MissingFile(String),

    /// A file field is present but no file was chosen
    #[error("no file was selected for upload")]
    EmptyFilename,

    #[error("unsupported file extension `{extension}`, expected one of: {allowed}")]
    UnsupportedExtension { extension: String, allowed: String },

    #[error("upload is larger than the {limit} byte limit")]
    TooLarge { limit: usize },
}

/// Everything that can go wrong while classifying one upload
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to write scratch file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read scratch file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytes are not an image we can decode, whatever the extension said
    #[error("could not decode the uploaded image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("inference did not finish within {0:?}")]
    InferenceTimeout(Duration),

    /// The model produced an index the registry does not know about
    #[error("class index {index} is outside the registry of {len} classes")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("classification task aborted: {0}")]
    Aborted(String),
}

impl ClassifyError {
    /// Whether the client caused this error (bad upload or undecodable image)
    pub fn is_client_error(&self) -> bool {
        matches!(self, ClassifyError::Validation(_) | ClassifyError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, ClassifyError>;
