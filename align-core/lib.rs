mod config;

pub use config::{FeatureConfig, FilterConfig, RansacConfig};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pixel-space location in `f64`, used throughout the geometry code
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        self.distance_squared(other).sqrt()
    }

    pub fn distance_squared(&self, other: &Point2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Key-point ≙ corner location (subpixel) + orientation (radians) + response
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub response: f32,
}

impl Keypoint {
    pub fn point(&self) -> Point2 {
        Point2::new(self.x as f64, self.y as f64)
    }
}

/// 256-bit binary descriptor = 32 bytes
pub type Descriptor = [u8; 32];

/// Hamming distance between two binary descriptors
#[inline]
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// One reference-side neighbor of a query keypoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub point: Point2,
    pub distance: f32,
}

/// A source keypoint with its two nearest reference neighbors, nearest first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateMatch {
    pub source: Point2,
    pub nearest: Neighbor,
    pub second: Neighbor,
}

/// Source/reference point pair with the descriptor distance that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Correspondence {
    pub source: Point2,
    pub reference: Point2,
    pub distance: f32,
}

impl Correspondence {
    pub fn new(source: Point2, reference: Point2, distance: f32) -> Self {
        Self {
            source,
            reference,
            distance,
        }
    }
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}

/// Number of worker threads used when the configuration does not say otherwise
pub fn default_threads() -> usize {
    num_cpus::get().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_distance() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        assert_eq!(hamming_distance(&a, &b), 0);

        b[0] = 0b1010_0001;
        b[31] = 0xFF;
        assert_eq!(hamming_distance(&a, &b), 11);
        assert_eq!(hamming_distance(&b, &a), 11);
    }

    #[test]
    fn test_point_distance() {
        let a = Point2::new(1.0, 2.0);
        let b = Point2::new(4.0, 6.0);
        assert_eq!(a.distance_squared(&b), 25.0);
        assert_eq!(a.distance(&b), 5.0);
    }
}
