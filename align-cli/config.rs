use std::path::Path;

use align_core::{default_threads, FeatureConfig, FilterConfig, RansacConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Output canvas for warped images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Canvas {
    /// Keep each source image's own dimensions
    #[default]
    Source,
    /// Resample every image onto the reference image's dimensions
    Reference,
}

/// Focus-stack compositing applied to the aligned images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StackMethod {
    /// Every pixel from the image with the strongest Laplacian response
    Laplacian,
    /// Whole grid cells from a reduced set of images, by cell focus measure
    Generalized,
}

impl StackMethod {
    /// Suffix appended to the output directory name for the composite file
    pub fn suffix(self) -> &'static str {
        match self {
            StackMethod::Laplacian => "(FocusStacking)",
            StackMethod::Generalized => "(generalized)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// `None` leaves the aligned images uncomposited
    pub method: Option<StackMethod>,
    /// Gaussian sigma applied before the Laplacian; 0 disables smoothing
    pub blur_sigma: f32,
    /// Grid rows of the generalized method
    pub rows: u32,
    /// Grid columns of the generalized method
    pub cols: u32,
    /// Downscale factor of the images the cell focus measures are taken on
    pub measure_downscale: u32,
    /// Cells whose focus measures all stay this close to their mean are background
    pub background_threshold: f64,
    /// An image covers a cell when its measure is this close to the cell's best
    pub cover_threshold: f64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            method: None,
            blur_sigma: 1.1,
            rows: 16,
            cols: 24,
            measure_downscale: 8,
            background_threshold: 90.0,
            cover_threshold: 30.0,
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub features: FeatureConfig,
    pub filter: FilterConfig,
    pub ransac: RansacConfig,
    /// Worker threads for per-image processing
    pub threads: usize,
    pub canvas: Canvas,
    pub stack: StackConfig,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            filter: FilterConfig::default(),
            ransac: RansacConfig::default(),
            threads: default_threads(),
            canvas: Canvas::default(),
            stack: StackConfig::default(),
        }
    }
}

impl AlignConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let f = &self.features;
        if f.threshold == 0 || f.threshold > 127 {
            return invalid(format!("features.threshold {} must be 1-127", f.threshold));
        }
        if f.patch_size % 2 == 0 || f.patch_size < 7 {
            return invalid(format!("features.patch_size {} must be odd and >= 7", f.patch_size));
        }
        if f.max_features == 0 {
            return invalid("features.max_features must be > 0".into());
        }
        if !(f.nms_distance.is_finite() && f.nms_distance >= 0.0) {
            return invalid(format!("features.nms_distance {} must be >= 0", f.nms_distance));
        }
        if !(f.blur_sigma.is_finite() && f.blur_sigma >= 0.0) {
            return invalid(format!("features.blur_sigma {} must be >= 0", f.blur_sigma));
        }

        if !(self.filter.ratio > 0.0 && self.filter.ratio <= 1.0) {
            return invalid(format!("filter.ratio {} must be in (0, 1]", self.filter.ratio));
        }
        if self.filter.max_correspondences < 4 {
            return invalid(format!(
                "filter.max_correspondences {} must be >= 4",
                self.filter.max_correspondences
            ));
        }

        let r = &self.ransac;
        if !(r.inlier_threshold.is_finite() && r.inlier_threshold > 0.0) {
            return invalid(format!("ransac.inlier_threshold {} must be > 0", r.inlier_threshold));
        }
        if r.max_iterations == 0 {
            return invalid("ransac.max_iterations must be > 0".into());
        }
        if r.max_sample_attempts == 0 {
            return invalid("ransac.max_sample_attempts must be > 0".into());
        }

        if self.threads == 0 {
            return invalid("threads must be > 0".into());
        }

        let st = &self.stack;
        if !(st.blur_sigma.is_finite() && st.blur_sigma >= 0.0) {
            return invalid(format!("stack.blur_sigma {} must be >= 0", st.blur_sigma));
        }
        if st.rows == 0 || st.cols == 0 {
            return invalid(format!("stack grid {}x{} must not be empty", st.rows, st.cols));
        }
        if st.measure_downscale == 0 {
            return invalid("stack.measure_downscale must be > 0".into());
        }
        for (name, value) in [
            ("background_threshold", st.background_threshold),
            ("cover_threshold", st.cover_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("stack.{} {} must be >= 0", name, value));
            }
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parse and validate a JSON document
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as TOML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    /// Save configuration to TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
