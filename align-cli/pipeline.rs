use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use align_core::RansacConfig;
use align_features::{FeatureExtractor, FeatureSet};
use align_geometry::{
    filter_candidates, warp_dynamic, GeometryError, Homography, HomographyEstimator, MIN_SAMPLE,
};
use image::DynamicImage;
use rayon::prelude::*;

use crate::config::{AlignConfig, Canvas};
use crate::error::{AlignError, PipelineError};
use crate::report::{AlignmentReport, ImageOutcome, Stage};
use crate::store::ImageStore;

/// An image resampled into the reference frame
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    pub image: DynamicImage,
    /// Source-to-reference transform that produced `image`
    pub homography: Homography,
    pub inliers: usize,
    pub correspondences: usize,
}

/// Reference features and geometry, shared read-only by every worker
#[derive(Debug, Clone)]
pub struct ReferenceFrame {
    pub name: String,
    pub features: FeatureSet,
    pub width: u32,
    pub height: u32,
}

/// Aligns every image of a store onto its first image
pub struct Aligner<S, E> {
    store: S,
    extractor: E,
    config: AlignConfig,
    cancel: Arc<AtomicBool>,
}

impl<S: ImageStore, E: FeatureExtractor> Aligner<S, E> {
    pub fn new(store: S, extractor: E, config: AlignConfig) -> Self {
        Self {
            store,
            extractor,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Raising this flag abandons unfinished images; persisted ones are kept.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Run the whole stack. Only a missing or unusable reference (or a failed
    /// listing) is an error; per-image failures end up in the report.
    pub fn run(&self) -> Result<AlignmentReport, PipelineError> {
        let names = self.store.names()?;
        let Some((reference_name, others)) = names.split_first() else {
            return Err(PipelineError::NoImages);
        };
        tracing::info!(images = names.len(), reference = %reference_name, "aligning stack");

        let reference = self
            .prepare_reference(reference_name)
            .map_err(|source| PipelineError::Reference {
                name: reference_name.clone(),
                source,
            })?;

        let mut reference_outcome = ImageOutcome::new(reference_name.as_str());
        reference_outcome.stage = Stage::Persisted;
        reference_outcome.homography = Some(Homography::identity().to_array());

        let outcomes: Vec<ImageOutcome> = others
            .par_iter()
            .enumerate()
            .map(|(i, name)| self.process(i + 1, name, &reference))
            .collect();

        let mut images = Vec::with_capacity(names.len());
        images.push(reference_outcome);
        images.extend(outcomes);
        let report = AlignmentReport { images };

        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "alignment finished"
        );
        Ok(report)
    }

    /// Load the reference, extract its features and persist it unchanged
    pub fn prepare_reference(&self, name: &str) -> Result<ReferenceFrame, AlignError> {
        let image = self.store.load(name)?;
        let features = self.extractor.extract(&image.to_luma8())?;
        tracing::debug!(name, keypoints = features.len(), "reference features");
        self.store.save(name, &image)?;
        Ok(ReferenceFrame {
            name: name.to_string(),
            features,
            width: image.width(),
            height: image.height(),
        })
    }

    /// Align and persist one image, never propagating its failure
    fn process(&self, index: usize, name: &str, reference: &ReferenceFrame) -> ImageOutcome {
        let mut outcome = ImageOutcome::new(name);
        let mut stage = Stage::Matched;

        let result = self.check_cancelled().and_then(|_| {
            let image = self.store.load(name)?;
            let aligned = self.align_image(index, &image, reference, &mut stage)?;
            outcome.correspondences = aligned.correspondences;
            outcome.inliers = aligned.inliers;
            outcome.homography = Some(aligned.homography.to_array());

            stage = Stage::Persisted;
            self.check_cancelled()?;
            self.store.save(name, &aligned.image)?;
            Ok(())
        });

        match result {
            Ok(()) => {
                outcome.stage = Stage::Persisted;
                tracing::info!(name, inliers = outcome.inliers, "aligned");
            }
            Err(err) => {
                outcome.fail(stage, &err);
                tracing::warn!(name, kind = %err.kind(), error = %err, "image not aligned");
            }
        }
        outcome
    }

    /// Match, filter, estimate and warp one image. `stage` tracks the step in
    /// progress so a failure can be attributed to it.
    pub fn align_image(
        &self,
        index: usize,
        image: &DynamicImage,
        reference: &ReferenceFrame,
        stage: &mut Stage,
    ) -> Result<AlignmentResult, AlignError> {
        *stage = Stage::Matched;
        let features = self.extractor.extract(&image.to_luma8())?;
        let candidates = features.knn_match(&reference.features);
        tracing::debug!(index, keypoints = features.len(), candidates = candidates.len(), "matched");
        self.check_cancelled()?;

        *stage = Stage::Filtered;
        let correspondences = filter_candidates(&candidates, &self.config.filter);
        if correspondences.len() < MIN_SAMPLE {
            return Err(GeometryError::InsufficientCorrespondences {
                found: correspondences.len(),
                required: MIN_SAMPLE,
            }
            .into());
        }
        self.check_cancelled()?;

        *stage = Stage::Estimated;
        let estimator = HomographyEstimator::new(self.ransac_config(index));
        let estimate = estimator.estimate(&correspondences)?;
        tracing::debug!(
            index,
            inliers = estimate.inliers.len(),
            correspondences = correspondences.len(),
            "homography estimated"
        );
        self.check_cancelled()?;

        *stage = Stage::Warped;
        let (width, height) = match self.config.canvas {
            Canvas::Source => (image.width(), image.height()),
            Canvas::Reference => (reference.width, reference.height),
        };
        let warped = warp_dynamic(image, &estimate.homography, width, height)?;

        Ok(AlignmentResult {
            image: warped,
            homography: estimate.homography,
            inliers: estimate.inliers.len(),
            correspondences: correspondences.len(),
        })
    }

    /// Per-image seed keeps parallel runs reproducible
    fn ransac_config(&self, index: usize) -> RansacConfig {
        RansacConfig {
            seed: self
                .config
                .ransac
                .seed
                .map(|seed| seed.wrapping_add(index as u64)),
            ..self.config.ransac.clone()
        }
    }

    fn check_cancelled(&self) -> Result<(), AlignError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(AlignError::Cancelled)
        } else {
            Ok(())
        }
    }
}
