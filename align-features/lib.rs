//! Default feature extraction for alignment: FAST-12 corners with
//! intensity-centroid orientation, described by steered BRIEF on a
//! Gaussian-smoothed copy, matched by brute-force Hamming k-NN.

pub mod brief;
pub mod detector;
pub mod error;
pub mod matcher;

pub use brief::{BriefGenerator, DESCRIPTOR_BITS};
pub use detector::FastDetector;
pub use error::{FeatureError, FeatureResult};
pub use matcher::FeatureSet;

use align_core::FeatureConfig;
use image::GrayImage;

/// Turns a grayscale image into keypoints with binary descriptors.
///
/// Implementations are shared across worker threads.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &GrayImage) -> FeatureResult<FeatureSet>;
}

/// FAST + steered BRIEF extractor
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    detector: FastDetector,
    brief: BriefGenerator,
    blur_sigma: f32,
}

impl OrbExtractor {
    pub fn new(cfg: FeatureConfig) -> FeatureResult<Self> {
        if !cfg.blur_sigma.is_finite() || cfg.blur_sigma < 0.0 {
            return Err(FeatureError::InvalidBlurSigma(cfg.blur_sigma));
        }
        let blur_sigma = cfg.blur_sigma;
        let brief = BriefGenerator::new(cfg.patch_size);
        let detector = FastDetector::new(cfg)?;
        Ok(Self {
            detector,
            brief,
            blur_sigma,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        self.detector.config()
    }
}

impl FeatureExtractor for OrbExtractor {
    fn extract(&self, image: &GrayImage) -> FeatureResult<FeatureSet> {
        let keypoints = self.detector.detect(image)?;

        // Sigma 0 disables smoothing
        let descriptors = if self.blur_sigma > 0.0 {
            let smoothed = imageproc::filter::gaussian_blur_f32(image, self.blur_sigma);
            self.brief.generate_descriptors(&smoothed, &keypoints)
        } else {
            self.brief.generate_descriptors(image, &keypoints)
        };

        Ok(FeatureSet::new(keypoints, descriptors))
    }
}
