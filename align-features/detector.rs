use align_core::{FeatureConfig, Keypoint};
use image::GrayImage;
use rayon::prelude::*;

use crate::error::{FeatureError, FeatureResult};

/// Bresenham circle of radius 3 around the candidate pixel
pub const FAST_OFFSETS: [(i32, i32); 16] = [
    (0, -3), (1, -3), (2, -2), (3, -1),
    (3, 0), (3, 1), (2, 2), (1, 3),
    (0, 3), (-1, 3), (-2, 2), (-3, 1),
    (-3, 0), (-3, -1), (-2, -2), (-1, -3),
];

/// Contiguous arc length required by the segment test (FAST-12)
pub const ARC_LENGTH: u32 = 12;

const MIN_PATCH_SIZE: usize = 7;

/// FAST-12 corner detector with response scoring, NMS and orientation
#[derive(Debug, Clone)]
pub struct FastDetector {
    cfg: FeatureConfig,
}

impl FastDetector {
    /// Creates a new detector with validation
    pub fn new(cfg: FeatureConfig) -> FeatureResult<Self> {
        // 0 would accept every pixel, >127 overflows the signed comparison window
        if cfg.threshold == 0 || cfg.threshold > 127 {
            return Err(FeatureError::InvalidThreshold(cfg.threshold));
        }
        if cfg.patch_size % 2 == 0 || cfg.patch_size < MIN_PATCH_SIZE {
            return Err(FeatureError::InvalidPatchSize(cfg.patch_size));
        }
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.cfg
    }

    /// Keypoints closer than this to the image edge are discarded so that
    /// the whole descriptor patch stays inside the image.
    pub fn border(&self) -> u32 {
        (self.cfg.patch_size / 2 + 1) as u32
    }

    /// Detect up to `max_features` oriented corners, strongest first
    pub fn detect(&self, img: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(FeatureError::InvalidImageSize { width, height });
        }
        let min_size = self.cfg.patch_size as u32;
        if width < min_size || height < min_size {
            return Err(FeatureError::ImageTooSmall {
                width,
                height,
                min_size,
            });
        }

        let corners = self.detect_corners(img);
        let count = corners.len();
        let mut keypoints = non_maximum_suppression(
            corners,
            self.cfg.nms_distance,
            self.cfg.max_features,
        );
        for kp in keypoints.iter_mut() {
            kp.angle = compute_orientation(img, kp.x as u32, kp.y as u32, self.cfg.patch_size / 2);
        }

        tracing::debug!(corners = count, kept = keypoints.len(), "FAST detection");
        Ok(keypoints)
    }

    /// Segment test over every pixel outside the border, rows in parallel
    fn detect_corners(&self, img: &GrayImage) -> Vec<Keypoint> {
        let (width, height) = img.dimensions();
        let border = self.border();
        if width <= 2 * border || height <= 2 * border {
            return Vec::new();
        }
        let threshold = self.cfg.threshold;

        (border..height - border)
            .into_par_iter()
            .flat_map_iter(|y| {
                (border..width - border).filter_map(move |x| {
                    let center = img.get_pixel(x, y)[0];
                    if !is_fast_corner(img, x, y, center, threshold) {
                        return None;
                    }
                    Some(Keypoint {
                        x: x as f32,
                        y: y as f32,
                        angle: 0.0,
                        response: corner_response(img, x, y, center, threshold),
                    })
                })
            })
            .collect()
    }
}

#[inline]
fn circle_pixel(img: &GrayImage, x: u32, y: u32, offset: (i32, i32)) -> i32 {
    let px = (x as i32 + offset.0) as u32;
    let py = (y as i32 + offset.1) as u32;
    img.get_pixel(px, py)[0] as i32
}

/// Segment test: `ARC_LENGTH` contiguous circle pixels all brighter than
/// `center + threshold` or all darker than `center - threshold`.
pub fn is_fast_corner(img: &GrayImage, x: u32, y: u32, center: u8, threshold: u8) -> bool {
    let center = center as i32;
    let threshold = threshold as i32;

    // Cardinal pixels: a 12-arc covers at least three of the four
    let mut bright_cardinal = 0;
    let mut dark_cardinal = 0;
    for i in [0usize, 4, 8, 12] {
        let p = circle_pixel(img, x, y, FAST_OFFSETS[i]);
        if p > center + threshold {
            bright_cardinal += 1;
        } else if p < center - threshold {
            dark_cardinal += 1;
        }
    }
    if bright_cardinal < 3 && dark_cardinal < 3 {
        return false;
    }

    let mut brighter = 0u16;
    let mut darker = 0u16;
    for (i, &offset) in FAST_OFFSETS.iter().enumerate() {
        let p = circle_pixel(img, x, y, offset);
        if p > center + threshold {
            brighter |= 1 << i;
        } else if p < center - threshold {
            darker |= 1 << i;
        }
    }
    has_contiguous_arc(brighter, ARC_LENGTH) || has_contiguous_arc(darker, ARC_LENGTH)
}

/// True when the circular 16-bit mask holds a run of at least `len` set bits
#[inline]
fn has_contiguous_arc(mask: u16, len: u32) -> bool {
    if mask.count_ones() < len {
        return false;
    }
    let wrapped = mask as u32 | ((mask as u32) << 16);
    let mut run = 0;
    for i in 0..32 {
        if wrapped >> i & 1 == 1 {
            run += 1;
            if run >= len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Mean squared intensity difference over the circle pixels beyond threshold
fn corner_response(img: &GrayImage, x: u32, y: u32, center: u8, threshold: u8) -> f32 {
    let center = center as f32;
    let mut sum = 0.0f32;
    let mut count = 0;
    for &offset in FAST_OFFSETS.iter() {
        let diff = (circle_pixel(img, x, y, offset) as f32 - center).abs();
        if diff > threshold as f32 {
            sum += diff * diff;
            count += 1;
        }
    }
    if count > 0 {
        sum / count as f32
    } else {
        0.0
    }
}

/// Greedy suppression in order of decreasing response, stopping at `limit`
pub fn non_maximum_suppression(
    mut keypoints: Vec<Keypoint>,
    min_distance: f32,
    limit: usize,
) -> Vec<Keypoint> {
    keypoints.sort_by(|a, b| {
        b.response
            .total_cmp(&a.response)
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    });

    let min_distance_sq = min_distance * min_distance;
    let mut kept: Vec<Keypoint> = Vec::new();
    for candidate in keypoints {
        if kept.len() >= limit {
            break;
        }
        let is_local_max = kept.iter().all(|existing| {
            let dx = candidate.x - existing.x;
            let dy = candidate.y - existing.y;
            dx * dx + dy * dy >= min_distance_sq
        });
        if is_local_max {
            kept.push(candidate);
        }
    }
    kept
}

/// Orientation by intensity centroid over a disc of radius `half`.
///
/// The caller guarantees the disc lies inside the image.
pub fn compute_orientation(img: &GrayImage, x: u32, y: u32, half: usize) -> f32 {
    let half = half as i32;
    let radius_sq = half * half;
    let mut m10 = 0i64;
    let mut m01 = 0i64;

    for dy in -half..=half {
        for dx in -half..=half {
            if dx * dx + dy * dy > radius_sq {
                continue;
            }
            let v = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }

    if m10 == 0 && m01 == 0 {
        0.0
    } else {
        (m01 as f32).atan2(m10 as f32)
    }
}
