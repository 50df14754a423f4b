#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Feature detection settings for the default FAST + BRIEF extractor
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FeatureConfig {
    /// FAST intensity threshold (1-127)
    pub threshold: u8,
    /// Patch size for orientation and descriptor sampling, must be odd
    pub patch_size: usize,
    /// Strongest corners kept per image after non-maximum suppression
    pub max_features: usize,
    /// Minimum distance between accepted corners
    pub nms_distance: f32,
    /// Gaussian smoothing applied before sampling descriptors
    pub blur_sigma: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            patch_size: 31,
            max_features: 1500,
            nms_distance: 3.0,
            blur_sigma: 2.0,
        }
    }
}

/// Ratio test and truncation applied to raw k=2 matches
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FilterConfig {
    /// Nearest/second-nearest distance ratio; a match must be strictly below it
    pub ratio: f32,
    /// Longest correspondence list handed to the estimator
    pub max_correspondences: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ratio: 0.7,
            max_correspondences: 128,
        }
    }
}

/// RANSAC homography estimation settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RansacConfig {
    /// Reprojection error (pixels) below which a correspondence is an inlier
    pub inlier_threshold: f64,
    /// Fixed number of hypotheses evaluated
    pub max_iterations: usize,
    /// Redraws allowed per iteration when a sample is degenerate
    pub max_sample_attempts: usize,
    /// Random seed for reproducibility (None draws one from the OS)
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: 2.0,
            max_iterations: 2000,
            max_sample_attempts: 100,
            seed: Some(0),
        }
    }
}
