use std::fmt;
use std::path::PathBuf;

use align_features::FeatureError;
use align_geometry::GeometryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Image store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode or encode {name}: {source}")]
    Image {
        name: String,
        #[source]
        source: image::ImageError,
    },
    #[error("no image named {0}")]
    NotFound(String),
}

/// Failure of a single image; never aborts the rest of the run
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("feature extraction failed: {0}")]
    Features(#[from] FeatureError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cancelled")]
    Cancelled,
}

impl AlignError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AlignError::Features(_) => FailureKind::FeatureExtraction,
            AlignError::Geometry(GeometryError::InsufficientCorrespondences { .. }) => {
                FailureKind::InsufficientCorrespondences
            }
            AlignError::Geometry(GeometryError::DegenerateSample) => FailureKind::DegenerateSample,
            AlignError::Geometry(_) => FailureKind::EstimationFailed,
            AlignError::Store(_) => FailureKind::IoFailure,
            AlignError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// User-visible classification of a per-image failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    InsufficientCorrespondences,
    DegenerateSample,
    EstimationFailed,
    #[serde(rename = "IOFailure")]
    IoFailure,
    FeatureExtraction,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::InsufficientCorrespondences => "InsufficientCorrespondences",
            FailureKind::DegenerateSample => "DegenerateSample",
            FailureKind::EstimationFailed => "EstimationFailed",
            FailureKind::IoFailure => "IOFailure",
            FailureKind::FeatureExtraction => "FeatureExtraction",
            FailureKind::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Failure of the run as a whole
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no images found")]
    NoImages,
    #[error("reference image {name} is unusable: {source}")]
    Reference {
        name: String,
        #[source]
        source: AlignError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Focus-stack compositing failures
#[derive(Debug, Error)]
pub enum StackError {
    #[error("no aligned images to composite")]
    Empty,
    #[error("{name} is {found:?}, the stack is {expected:?}; align onto the reference canvas")]
    DimensionMismatch {
        name: String,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot write composite {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("cannot write TOML: {0}")]
    TomlWrite(#[from] toml::ser::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
