use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AlignError, FailureKind};

/// Progress of one image through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Unprocessed,
    Matched,
    Filtered,
    Estimated,
    Warped,
    Persisted,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Persisted | Stage::Failed | Stage::Cancelled)
    }
}

/// What happened to one input image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOutcome {
    pub name: String,
    pub stage: Stage,
    /// Stage being worked on when the image failed or was cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Stage>,
    pub correspondences: usize,
    pub inliers: usize,
    /// Source-to-reference homography, row-major
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homography: Option<[f64; 9]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageOutcome {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: Stage::Unprocessed,
            failed_at: None,
            correspondences: 0,
            inliers: 0,
            homography: None,
            kind: None,
            error: None,
        }
    }

    /// Record a failure that happened while working towards `at`
    pub fn fail(&mut self, at: Stage, err: &AlignError) {
        let kind = err.kind();
        self.stage = if kind == FailureKind::Cancelled {
            Stage::Cancelled
        } else {
            Stage::Failed
        };
        self.failed_at = Some(at);
        self.kind = Some(kind);
        self.error = Some(err.to_string());
    }

    pub fn succeeded(&self) -> bool {
        self.stage == Stage::Persisted
    }
}

/// Per-image outcomes of a run, in input order; the first entry is the reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub images: Vec<ImageOutcome>,
}

impl AlignmentReport {
    pub fn get(&self, name: &str) -> Option<&ImageOutcome> {
        self.images.iter().find(|o| o.name == name)
    }

    pub fn succeeded(&self) -> usize {
        self.images.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.images.iter().filter(|o| o.stage == Stage::Failed).count()
    }

    pub fn cancelled(&self) -> usize {
        self.images.iter().filter(|o| o.stage == Stage::Cancelled).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
