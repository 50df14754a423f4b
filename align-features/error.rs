use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("invalid image dimensions: {width}x{height} (must be > 0)")]
    InvalidImageSize { width: u32, height: u32 },
    #[error("image {width}x{height} too small (minimum {min_size}x{min_size})")]
    ImageTooSmall { width: u32, height: u32, min_size: u32 },
    #[error("invalid threshold: {0} (must be 1-127)")]
    InvalidThreshold(u8),
    #[error("invalid patch size {0} (must be odd and at least 7)")]
    InvalidPatchSize(usize),
    #[error("invalid blur sigma {0} (must be finite and >= 0)")]
    InvalidBlurSigma(f32),
}

pub type FeatureResult<T> = Result<T, FeatureError>;
