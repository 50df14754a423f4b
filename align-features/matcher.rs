use align_core::{hamming_distance, CandidateMatch, Descriptor, Keypoint, Neighbor};
use rayon::prelude::*;

/// Keypoints of one image with their descriptors, index-aligned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    /// Pairs keypoints with descriptors; extra entries on either side are dropped.
    pub fn new(mut keypoints: Vec<Keypoint>, mut descriptors: Vec<Descriptor>) -> Self {
        let n = keypoints.len().min(descriptors.len());
        keypoints.truncate(n);
        descriptors.truncate(n);
        Self {
            keypoints,
            descriptors,
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Brute-force k=2 nearest-neighbor search by Hamming distance.
    ///
    /// Every keypoint of `self` is a query against `reference`; queries are
    /// skipped when the reference has fewer than two descriptors. Output is in
    /// query order.
    pub fn knn_match(&self, reference: &FeatureSet) -> Vec<CandidateMatch> {
        if reference.len() < 2 {
            return Vec::new();
        }

        self.keypoints
            .par_iter()
            .zip(self.descriptors.par_iter())
            .map(|(kp, desc)| {
                let ((i1, d1), (i2, d2)) = two_nearest(desc, &reference.descriptors);
                CandidateMatch {
                    source: kp.point(),
                    nearest: Neighbor {
                        point: reference.keypoints[i1].point(),
                        distance: d1 as f32,
                    },
                    second: Neighbor {
                        point: reference.keypoints[i2].point(),
                        distance: d2 as f32,
                    },
                }
            })
            .collect()
    }
}

/// Indices and distances of the two closest descriptors; `candidates.len() >= 2`.
/// Ties keep the lower index first.
fn two_nearest(query: &Descriptor, candidates: &[Descriptor]) -> ((usize, u32), (usize, u32)) {
    let mut best = (0, u32::MAX);
    let mut second = (0, u32::MAX);
    for (i, c) in candidates.iter().enumerate() {
        let d = hamming_distance(query, c);
        if d < best.1 {
            second = best;
            best = (i, d);
        } else if d < second.1 {
            second = (i, d);
        }
    }
    (best, second)
}
