use image::{DynamicImage, ImageBuffer, Pixel};
use rayon::prelude::*;

use crate::error::{GeometryError, GeometryResult};
use crate::homography::Homography;

/// Value written where the mapped sample falls outside the source
pub const BACKGROUND: u8 = 0;

/// Warp `src` into the reference frame, keeping the source's dimensions.
pub fn warp_image<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    homography: &Homography,
) -> GeometryResult<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = src.dimensions();
    warp_into(src, homography, w, h)
}

/// Warp `src` into an output canvas of `width` x `height` reference pixels.
///
/// `homography` maps source coordinates to reference coordinates; every output
/// pixel is sampled from the source at the inverse-mapped location.
pub fn warp_into<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    homography: &Homography,
    width: u32,
    height: u32,
) -> GeometryResult<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    if width == 0 || height == 0 {
        return Err(GeometryError::InvalidDimensions { width, height });
    }
    let inverse = homography.inverse()?;

    let channels = P::CHANNEL_COUNT as usize;
    let (sw, sh) = (src.width() as usize, src.height() as usize);
    let raw: &[u8] = src.as_raw();

    let mut out: ImageBuffer<P, Vec<u8>> = ImageBuffer::new(width, height);
    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(width as usize * channels)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(channels).enumerate() {
                let mapped = inverse.apply_xy(x as f64, y as f64);
                let sampled = match mapped {
                    Some((sx, sy)) => sample_bilinear(raw, sw, sh, channels, sx, sy, px),
                    None => false,
                };
                if !sampled {
                    px.fill(BACKGROUND);
                }
            }
        });

    Ok(out)
}

/// Warp any `DynamicImage`, preserving 8-bit layouts; other formats become RGBA8.
pub fn warp_dynamic(
    src: &DynamicImage,
    homography: &Homography,
    width: u32,
    height: u32,
) -> GeometryResult<DynamicImage> {
    Ok(match src {
        DynamicImage::ImageLuma8(img) => {
            DynamicImage::ImageLuma8(warp_into(img, homography, width, height)?)
        }
        DynamicImage::ImageLumaA8(img) => {
            DynamicImage::ImageLumaA8(warp_into(img, homography, width, height)?)
        }
        DynamicImage::ImageRgb8(img) => {
            DynamicImage::ImageRgb8(warp_into(img, homography, width, height)?)
        }
        DynamicImage::ImageRgba8(img) => {
            DynamicImage::ImageRgba8(warp_into(img, homography, width, height)?)
        }
        other => DynamicImage::ImageRgba8(warp_into(&other.to_rgba8(), homography, width, height)?),
    })
}

/// Bilinear interpolation of all channels at (x, y); false when out of bounds.
#[inline]
fn sample_bilinear(
    raw: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    x: f64,
    y: f64,
    out: &mut [u8],
) -> bool {
    if width == 0 || height == 0 {
        return false;
    }
    if !(x >= 0.0 && y >= 0.0 && x <= (width - 1) as f64 && y <= (height - 1) as f64) {
        return false;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let i00 = (y0 * width + x0) * channels;
    let i10 = (y0 * width + x1) * channels;
    let i01 = (y1 * width + x0) * channels;
    let i11 = (y1 * width + x1) * channels;

    for (c, o) in out.iter_mut().enumerate() {
        let top = raw[i00 + c] as f64 * (1.0 - fx) + raw[i10 + c] as f64 * fx;
        let bottom = raw[i01 + c] as f64 * (1.0 - fx) + raw[i11 + c] as f64 * fx;
        *o = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    true
}
