//! Geometric core of the alignment pipeline: correspondence filtering,
//! robust homography estimation and inverse-mapping bilinear warping.

pub mod error;
pub mod filter;
pub mod homography;
pub mod ransac;
pub mod warp;

pub use error::{GeometryError, GeometryResult};
pub use filter::{filter_candidates, passes_ratio_test};
pub use homography::Homography;
pub use ransac::{HomographyEstimator, RansacResult, MIN_SAMPLE};
pub use warp::{warp_dynamic, warp_image, warp_into, BACKGROUND};
