use align_core::{CandidateMatch, Correspondence, FilterConfig};

/// Ratio test: the nearest neighbor must be clearly better than the second one.
///
/// Compared as a quotient so a ratio of exactly `ratio` is rejected.
#[inline]
pub fn passes_ratio_test(candidate: &CandidateMatch, ratio: f32) -> bool {
    let second = candidate.second.distance;
    if !(second > 0.0) {
        return false;
    }
    candidate.nearest.distance / second < ratio
}

/// Turn raw k=2 candidates into the ranked correspondence list fed to RANSAC.
pub fn filter_candidates(candidates: &[CandidateMatch], config: &FilterConfig) -> Vec<Correspondence> {
    let mut kept: Vec<Correspondence> = candidates
        .iter()
        .filter(|c| passes_ratio_test(c, config.ratio))
        .map(|c| Correspondence::new(c.source, c.nearest.point, c.nearest.distance))
        .collect();

    kept.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    kept.truncate(config.max_correspondences);

    tracing::debug!(
        candidates = candidates.len(),
        kept = kept.len(),
        "ratio test and truncation"
    );
    kept
}
