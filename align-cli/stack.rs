//! Focus stacking over an aligned image stack.
//!
//! Two compositors are provided. [`laplacian_stack`] takes every pixel from
//! the image whose smoothed Laplacian is strongest there. [`generalized_stack`]
//! works on a grid of cells: it measures the focus of every cell in every
//! image, separates background cells from foreground ones, picks a small set of
//! images covering all sharp foreground cells, and copies whole cells from them.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::filter::{gaussian_blur_f32, laplacian_filter};
use rayon::prelude::*;

use crate::config::{StackConfig, StackMethod};
use crate::error::StackError;
use crate::report::AlignmentReport;
use crate::store::ImageStore;

/// Cell-wise composite and the selection that produced it
#[derive(Debug, Clone)]
pub struct BlockStack {
    pub image: RgbImage,
    pub rows: u32,
    pub cols: u32,
    /// Stack index chosen for each cell, row-major
    pub cells: Vec<usize>,
    /// Stack indices contributing to the composite, ascending
    pub used: Vec<usize>,
}

/// Absolute Laplacian of the smoothed grayscale image, saturated to 8 bits
pub fn focus_map(image: &DynamicImage, blur_sigma: f32) -> GrayImage {
    let gray = image.to_luma8();
    let smoothed = if blur_sigma > 0.0 {
        gaussian_blur_f32(&gray, blur_sigma)
    } else {
        gray
    };
    let laplace = laplacian_filter(&smoothed);
    GrayImage::from_fn(laplace.width(), laplace.height(), |x, y| {
        let v = laplace.get_pixel(x, y)[0].unsigned_abs();
        image::Luma([v.min(u8::MAX as u16) as u8])
    })
}

/// Per pixel, the index of the map with the largest value; ties keep the lower index.
pub fn sharpest_indices(maps: &[GrayImage]) -> Vec<usize> {
    let Some(first) = maps.first() else {
        return Vec::new();
    };
    let len = first.as_raw().len();
    (0..len)
        .into_par_iter()
        .map(|p| {
            let mut best = 0;
            for (i, map) in maps.iter().enumerate().skip(1) {
                if map.as_raw()[p] > maps[best].as_raw()[p] {
                    best = i;
                }
            }
            best
        })
        .collect()
}

fn common_dimensions(images: &[DynamicImage], names: &[String]) -> Result<(u32, u32), StackError> {
    let first = images.first().ok_or(StackError::Empty)?;
    let expected = (first.width(), first.height());
    for (i, image) in images.iter().enumerate() {
        let found = (image.width(), image.height());
        if found != expected {
            return Err(StackError::DimensionMismatch {
                name: names.get(i).cloned().unwrap_or_else(|| format!("#{}", i)),
                expected,
                found,
            });
        }
    }
    Ok(expected)
}

fn anonymous(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("#{}", i)).collect()
}

/// Pixel-wise focus stack of equally sized images
pub fn laplacian_stack(images: &[DynamicImage], blur_sigma: f32) -> Result<RgbImage, StackError> {
    let (width, height) = common_dimensions(images, &anonymous(images.len()))?;

    let maps: Vec<GrayImage> = images
        .par_iter()
        .map(|image| focus_map(image, blur_sigma))
        .collect();
    let choice = sharpest_indices(&maps);
    let sources: Vec<RgbImage> = images.par_iter().map(|i| i.to_rgb8()).collect();

    let mut out = RgbImage::new(width, height);
    let row_len = width as usize * 3;
    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let p = y * width as usize + x;
                let src = sources[choice[p]].as_raw();
                px.copy_from_slice(&src[p * 3..p * 3 + 3]);
            }
        });
    tracing::debug!(images = images.len(), width, height, "laplacian stack composed");
    Ok(out)
}

/// Split `len` pixels into `parts` contiguous spans; entry `i` is the span of pixel `i`.
fn span_index(len: u32, parts: u32) -> Vec<usize> {
    let mut index = vec![0; len as usize];
    for part in 0..parts {
        let start = (part as u64 * len as u64 / parts as u64) as usize;
        let end = ((part as u64 + 1) * len as u64 / parts as u64) as usize;
        index[start..end].fill(part as usize);
    }
    index
}

/// Mean absolute second difference, horizontal plus vertical, over each cell
pub fn cell_focus_measures(gray: &GrayImage, rows: u32, cols: u32) -> Vec<f64> {
    let (w, h) = gray.dimensions();
    let mut sums = vec![0.0; (rows * cols) as usize];
    let mut counts = vec![0usize; sums.len()];
    let row_of = span_index(h, rows);
    let col_of = span_index(w, cols);
    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;

    for y in 0..h {
        for x in 0..w {
            let cell = row_of[y as usize] * cols as usize + col_of[x as usize];
            counts[cell] += 1;
            // Only neighbours inside the same cell contribute
            if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
                continue;
            }
            let same = |nx: u32, ny: u32| {
                row_of[ny as usize] * cols as usize + col_of[nx as usize] == cell
            };
            if !(same(x - 1, y) && same(x + 1, y) && same(x, y - 1) && same(x, y + 1)) {
                continue;
            }
            let c = 2.0 * px(x, y);
            sums[cell] += (c - px(x - 1, y) - px(x + 1, y)).abs()
                + (c - px(x, y - 1) - px(x, y + 1)).abs();
        }
    }

    sums.iter()
        .zip(&counts)
        .map(|(&s, &n)| if n == 0 { 0.0 } else { s / n as f64 })
        .collect()
}

/// Index of the largest value among `candidates`; ties keep the earlier candidate.
fn argmax_among(values: impl Fn(usize) -> f64, candidates: &[usize]) -> usize {
    let mut best = candidates[0];
    for &i in &candidates[1..] {
        if values(i) > values(best) {
            best = i;
        }
    }
    best
}

/// Most frequent entry, ties to the lowest index
fn most_frequent(choices: impl Iterator<Item = usize>, n: usize) -> Option<usize> {
    let mut counts = vec![0usize; n];
    for c in choices {
        counts[c] += 1;
    }
    let best = counts.iter().copied().max().filter(|&m| m > 0)?;
    counts.iter().position(|&c| c == best)
}

/// Smallest ordered set of images covering every foreground cell.
///
/// A cell is sharp over a contiguous run of the stack, so covering reduces to
/// stabbing intervals: when the run of some pending cell ends, the image just
/// before the end is taken and every pending cell is resolved by it.
pub fn select_covering(cover: &[Vec<bool>], foreground: &[bool]) -> Vec<usize> {
    let cells = foreground.len();
    let n = cover.len();
    let mut active = vec![false; cells];
    let mut processed = vec![false; cells];
    let mut selected = Vec::new();

    for i in 0..=n {
        let sharp: Vec<bool> = (0..cells)
            .map(|c| i < n && foreground[c] && cover[i][c] && !processed[c])
            .collect();
        if (0..cells).any(|c| active[c] && !sharp[c]) {
            let pick = i - 1;
            selected.push(pick);
            for c in 0..cells {
                if active[c] || (foreground[c] && cover[pick][c]) {
                    processed[c] = true;
                }
                active[c] = false;
            }
        }
        for c in 0..cells {
            if sharp[c] && !processed[c] {
                active[c] = true;
            }
        }
    }
    selected
}

/// Cell-wise focus stack of equally sized images
pub fn generalized_stack(
    images: &[DynamicImage],
    config: &StackConfig,
) -> Result<BlockStack, StackError> {
    let (width, height) = common_dimensions(images, &anonymous(images.len()))?;
    let (rows, cols) = (config.rows.max(1), config.cols.max(1));
    let factor = config.measure_downscale.max(1);
    let cells = (rows * cols) as usize;
    let n = images.len();

    let measures: Vec<Vec<f64>> = images
        .par_iter()
        .map(|image| {
            let gray = image.to_luma8();
            let gray = if factor > 1 {
                image::imageops::resize(
                    &gray,
                    width.div_ceil(factor),
                    height.div_ceil(factor),
                    FilterType::Triangle,
                )
            } else {
                gray
            };
            cell_focus_measures(&gray, rows, cols)
        })
        .collect();

    let all: Vec<usize> = (0..n).collect();
    let best: Vec<usize> = (0..cells)
        .map(|c| argmax_among(|i| measures[i][c], &all))
        .collect();

    let cover: Vec<Vec<bool>> = measures
        .iter()
        .map(|m| {
            (0..cells)
                .map(|c| (m[c] - measures[best[c]][c]).abs() <= config.cover_threshold)
                .collect()
        })
        .collect();

    let foreground: Vec<bool> = (0..cells)
        .map(|c| {
            let mean = measures.iter().map(|m| m[c]).sum::<f64>() / n as f64;
            let spread = measures
                .iter()
                .map(|m| (m[c] - mean).abs())
                .fold(0.0, f64::max);
            spread >= config.background_threshold
        })
        .collect();

    let mut used = select_covering(&cover, &foreground);
    if used.is_empty() {
        used.extend(most_frequent(best.iter().copied(), n));
    }

    let mut chosen: Vec<usize> = (0..cells)
        .map(|c| argmax_among(|i| measures[i][c], &used))
        .collect();
    let fg_choices = (0..cells).filter(|&c| foreground[c]).map(|c| chosen[c]);
    let background = most_frequent(fg_choices, n).unwrap_or(used[0]);
    for c in 0..cells {
        if !foreground[c] {
            chosen[c] = background;
        }
    }
    used.retain(|i| chosen.contains(i));
    tracing::info!(
        images = n,
        used = used.len(),
        foreground = foreground.iter().filter(|&&f| f).count(),
        cells,
        "generalized stack selection"
    );

    let sources: Vec<RgbImage> = images.par_iter().map(|i| i.to_rgb8()).collect();
    let row_of = span_index(height, rows);
    let col_of = span_index(width, cols);
    let mut out = RgbImage::new(width, height);
    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let cell = row_of[y] * cols as usize + col_of[x];
                let p = (y * width as usize + x) * 3;
                px.copy_from_slice(&sources[chosen[cell]].as_raw()[p..p + 3]);
            }
        });

    Ok(BlockStack {
        image: out,
        rows,
        cols,
        cells: chosen,
        used,
    })
}

/// Composite the images a run persisted, in report order.
pub fn stack_persisted<S: ImageStore>(
    store: &S,
    report: &AlignmentReport,
    config: &StackConfig,
    method: StackMethod,
) -> Result<RgbImage, StackError> {
    let names: Vec<String> = report
        .images
        .iter()
        .filter(|o| o.succeeded())
        .map(|o| o.name.clone())
        .collect();
    let images = names
        .iter()
        .map(|name| store.load_output(name))
        .collect::<Result<Vec<_>, _>>()?;
    common_dimensions(&images, &names)?;

    tracing::info!(images = images.len(), ?method, "focus stacking");
    match method {
        StackMethod::Laplacian => laplacian_stack(&images, config.blur_sigma),
        StackMethod::Generalized => generalized_stack(&images, config).map(|b| b.image),
    }
}

/// `<dir><suffix>.jpg` next to the output directory
pub fn composite_path(output_dir: &Path, method: StackMethod) -> PathBuf {
    match output_dir.file_name() {
        Some(name) => output_dir.with_file_name(format!(
            "{}{}.jpg",
            name.to_string_lossy(),
            method.suffix()
        )),
        None => output_dir.join(format!("stack{}.jpg", method.suffix())),
    }
}

/// Write a composite as JPEG
pub fn save_composite(image: &RgbImage, path: &Path) -> Result<(), StackError> {
    tracing::info!(path = %path.display(), "writing composite");
    image.save(path).map_err(|source| StackError::Write {
        path: path.to_path_buf(),
        source,
    })
}
