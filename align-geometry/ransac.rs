//! RANSAC (Random Sample Consensus) for robust homography estimation.
//!
//! Each iteration draws four correspondences, solves the exact transform
//! through them and counts how many of all correspondences it explains.
//! The best hypothesis is then refit by least squares over its inliers.

use align_core::{Correspondence, Point2, RansacConfig};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::error::{GeometryError, GeometryResult};
use crate::homography::Homography;

/// Correspondences in a minimal sample
pub const MIN_SAMPLE: usize = 4;

// Sine of the smallest angle accepted between two sides of a sample triangle
const COLLINEAR_TOLERANCE: f64 = 1e-3;

/// Result of RANSAC estimation.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Final (refit) transform.
    pub homography: Homography,
    /// Indices of inlier correspondences under the final transform.
    pub inliers: Vec<usize>,
    /// Number of iterations performed.
    pub iterations: usize,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    homography: Homography,
    inliers: Vec<usize>,
    residual: f64,
}

impl Hypothesis {
    fn beats(&self, other: &Hypothesis) -> bool {
        self.inliers.len() > other.inliers.len()
            || (self.inliers.len() == other.inliers.len() && self.residual < other.residual)
    }
}

/// RANSAC estimator for source -> reference homographies.
pub struct HomographyEstimator {
    config: RansacConfig,
}

impl HomographyEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Estimate with a generator seeded from the configuration.
    pub fn estimate(&self, correspondences: &[Correspondence]) -> GeometryResult<RansacResult> {
        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        self.estimate_with_rng(correspondences, &mut rng)
    }

    /// Estimate drawing samples from the supplied random source.
    pub fn estimate_with_rng<R: Rng>(
        &self,
        correspondences: &[Correspondence],
        rng: &mut R,
    ) -> GeometryResult<RansacResult> {
        let n = correspondences.len();
        if n < MIN_SAMPLE {
            return Err(GeometryError::InsufficientCorrespondences {
                found: n,
                required: MIN_SAMPLE,
            });
        }

        let threshold = self.config.inlier_threshold;
        let mut best: Option<Hypothesis> = None;
        let mut indices: Vec<usize> = Vec::with_capacity(MIN_SAMPLE);
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;

            let Some(homography) = self.draw_hypothesis(correspondences, rng, &mut indices) else {
                continue;
            };

            let (inliers, residual) = score(correspondences, &homography, threshold);
            let candidate = Hypothesis {
                homography,
                inliers,
                residual,
            };
            let improved = match &best {
                Some(b) => candidate.beats(b),
                None => true,
            };
            if improved {
                best = Some(candidate);
            }
        }

        let Some(best) = best else {
            return Err(GeometryError::DegenerateSample);
        };
        if best.inliers.len() < MIN_SAMPLE {
            return Err(GeometryError::EstimationFailed {
                inliers: best.inliers.len(),
                required: MIN_SAMPLE,
            });
        }

        let winner = refine(correspondences, &best, threshold);
        tracing::debug!(
            correspondences = n,
            sample_inliers = best.inliers.len(),
            final_inliers = winner.inliers.len(),
            iterations,
            "ransac finished"
        );

        if winner.inliers.len() < MIN_SAMPLE {
            return Err(GeometryError::EstimationFailed {
                inliers: winner.inliers.len(),
                required: MIN_SAMPLE,
            });
        }
        // Final models must be usable by the resampler.
        winner.homography.inverse()?;

        Ok(RansacResult {
            homography: winner.homography,
            inliers: winner.inliers,
            iterations,
        })
    }

    /// Draw minimal samples until one is non-degenerate and solvable.
    fn draw_hypothesis<R: Rng>(
        &self,
        correspondences: &[Correspondence],
        rng: &mut R,
        indices: &mut Vec<usize>,
    ) -> Option<Homography> {
        for _ in 0..self.config.max_sample_attempts.max(1) {
            random_sample_into(rng, correspondences.len(), MIN_SAMPLE, indices);
            let src = [0, 1, 2, 3].map(|i| correspondences[indices[i]].source);
            let dst = [0, 1, 2, 3].map(|i| correspondences[indices[i]].reference);
            if is_degenerate_sample(&src, &dst) {
                continue;
            }
            if let Some(h) = Homography::from_four_points(&src, &dst) {
                return Some(h);
            }
        }
        None
    }
}

/// Least-squares refit over the inliers; falls back to the minimal model
/// when the refit explains fewer correspondences.
fn refine(correspondences: &[Correspondence], best: &Hypothesis, threshold: f64) -> Hypothesis {
    let (src, dst): (Vec<Point2>, Vec<Point2>) = best
        .inliers
        .iter()
        .map(|&i| (correspondences[i].source, correspondences[i].reference))
        .unzip();

    match Homography::fit_least_squares(&src, &dst) {
        Some(homography) => {
            let (inliers, residual) = score(correspondences, &homography, threshold);
            if inliers.len() >= best.inliers.len() {
                Hypothesis {
                    homography,
                    inliers,
                    residual,
                }
            } else {
                best.clone()
            }
        }
        None => best.clone(),
    }
}

/// Inlier indices (reprojection error strictly below `threshold`) and their summed error.
fn score(
    correspondences: &[Correspondence],
    homography: &Homography,
    threshold: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut residual = 0.0;
    for (i, c) in correspondences.iter().enumerate() {
        let err = homography.reprojection_error(c);
        if err < threshold {
            inliers.push(i);
            residual += err;
        }
    }
    (inliers, residual)
}

/// Random sampling without replacement into a pre-allocated buffer.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "Cannot sample {} indices from {}", k, n);
    buffer.clear();

    if k <= n / 2 {
        // Floyd's algorithm
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}

/// A sample is unusable when three of its points are collinear on either side,
/// or when only some of its triangles flip orientation between source and
/// reference. A consistent flip of all four is a reflection and is kept.
pub fn is_degenerate_sample(src: &[Point2; 4], dst: &[Point2; 4]) -> bool {
    const TRIANGLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];

    let mut flipped = 0;
    for &(i, j, k) in &TRIANGLES {
        let s = cross(src[i], src[j], src[k]);
        let d = cross(dst[i], dst[j], dst[k]);
        if is_collinear(src[i], src[j], src[k], s) || is_collinear(dst[i], dst[j], dst[k], d) {
            return true;
        }
        if s.signum() != d.signum() {
            flipped += 1;
        }
    }
    flipped > 0 && flipped < TRIANGLES.len()
}

#[inline]
fn cross(a: Point2, b: Point2, c: Point2) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

#[inline]
fn is_collinear(a: Point2, b: Point2, c: Point2, cross: f64) -> bool {
    cross.abs() <= COLLINEAR_TOLERANCE * a.distance(&b) * a.distance(&c)
}
