use align_core::{Descriptor, Keypoint};
use image::GrayImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Number of intensity comparisons, one bit each
pub const DESCRIPTOR_BITS: usize = 256;

// Fixed so descriptors stay comparable across runs and processes
const PATTERN_SEED: u64 = 0x0B21_EF5E_ED00_2566;

/// Steered BRIEF: a fixed random pattern of point pairs, rotated by the
/// keypoint orientation and compared on a smoothed image.
#[derive(Debug, Clone)]
pub struct BriefGenerator {
    pairs: Vec<[(f32, f32); 2]>,
    radius: i32,
}

impl BriefGenerator {
    /// Pattern points are drawn uniformly from a disc of radius `patch_size / 2`,
    /// so any rotation keeps them inside the patch.
    pub fn new(patch_size: usize) -> Self {
        let radius = (patch_size / 2).max(1) as i32;
        let mut rng = ChaCha8Rng::seed_from_u64(PATTERN_SEED);
        let mut point = || loop {
            let dx = rng.random_range(-radius..=radius);
            let dy = rng.random_range(-radius..=radius);
            if dx * dx + dy * dy <= radius * radius {
                return (dx as f32, dy as f32);
            }
        };

        let pairs = (0..DESCRIPTOR_BITS)
            .map(|_| loop {
                let a = point();
                let b = point();
                if a != b {
                    break [a, b];
                }
            })
            .collect();

        Self { pairs, radius }
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// Describe every keypoint on the (already smoothed) image
    pub fn generate_descriptors(&self, smoothed: &GrayImage, kps: &[Keypoint]) -> Vec<Descriptor> {
        kps.par_iter().map(|kp| self.describe(smoothed, kp)).collect()
    }

    pub fn describe(&self, smoothed: &GrayImage, kp: &Keypoint) -> Descriptor {
        let (s, c) = kp.angle.sin_cos();
        let rotate = |(dx, dy): (f32, f32)| (kp.x + c * dx - s * dy, kp.y + s * dx + c * dy);

        let mut d = [0u8; 32];
        for (i, pair) in self.pairs.iter().enumerate() {
            let (x1, y1) = rotate(pair[0]);
            let (x2, y2) = rotate(pair[1]);
            let bit = (bilinear_sample(smoothed, x1, y1) < bilinear_sample(smoothed, x2, y2)) as u8;
            d[i / 8] |= bit << (i % 8);
        }
        d
    }
}

/// Bilinear interpolation, clamped to the nearest pixel outside the image
fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();

    if x0 < 0.0 || y0 < 0.0 || x0 + 1.0 >= w as f32 || y0 + 1.0 >= h as f32 {
        let cx = x.round().clamp(0.0, (w - 1) as f32) as u32;
        let cy = y.round().clamp(0.0, (h - 1) as f32) as u32;
        return img.get_pixel(cx, cy)[0] as f32;
    }

    let dx = x - x0;
    let dy = y - y0;
    let (xi, yi) = (x0 as u32, y0 as u32);

    let p00 = img.get_pixel(xi, yi)[0] as f32;
    let p10 = img.get_pixel(xi + 1, yi)[0] as f32;
    let p01 = img.get_pixel(xi, yi + 1)[0] as f32;
    let p11 = img.get_pixel(xi + 1, yi + 1)[0] as f32;

    let top = p00 * (1.0 - dx) + p10 * dx;
    let bottom = p01 * (1.0 - dx) + p11 * dx;
    top * (1.0 - dy) + bottom * dy
}
