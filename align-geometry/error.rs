use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("insufficient correspondences: found {found}, need at least {required}")]
    InsufficientCorrespondences { found: usize, required: usize },
    #[error("no non-degenerate sample could be drawn from the correspondences")]
    DegenerateSample,
    #[error("no consensus model: best hypothesis has {inliers} inliers, need at least {required}")]
    EstimationFailed { inliers: usize, required: usize },
    #[error("homography is singular or not finite")]
    SingularHomography,
    #[error("invalid output dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

pub type GeometryResult<T> = Result<T, GeometryError>;
