use align_core::{Correspondence, Point2, RansacConfig};
use align_geometry::{warp_image, Homography, HomographyEstimator};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgb, RgbImage};

/// Grid correspondences under a mild perspective, with every `outlier_every`-th pair scrambled
fn create_correspondences(count: usize, outlier_every: usize) -> Vec<Correspondence> {
    let h = Homography::from_array([1.01, 0.02, 3.0, -0.01, 0.99, -4.0, 1e-5, 2e-5, 1.0]).unwrap();
    let side = (count as f64).sqrt().ceil() as usize;
    (0..count)
        .map(|i| {
            let p = Point2::new((i % side) as f64 * 17.0 + 5.0, (i / side) as f64 * 13.0 + 7.0);
            let q = if outlier_every > 0 && i % outlier_every == 0 {
                Point2::new(p.y * 1.7, p.x * 0.6 + 40.0)
            } else {
                h.apply(p).unwrap()
            };
            Correspondence::new(p, q, i as f32)
        })
        .collect()
}

fn bench_ransac(c: &mut Criterion) {
    let mut group = c.benchmark_group("ransac");

    for &count in &[16usize, 64, 128] {
        for &outlier_every in &[0usize, 3] {
            let correspondences = create_correspondences(count, outlier_every);
            let estimator = HomographyEstimator::new(RansacConfig::default());
            group.bench_with_input(
                BenchmarkId::new(format!("{}_pairs", count), format!("outlier_every_{}", outlier_every)),
                &correspondences,
                |b, correspondences| {
                    b.iter(|| black_box(estimator.estimate(black_box(correspondences)).unwrap()))
                },
            );
        }
    }

    group.finish();
}

fn bench_warp(c: &mut Criterion) {
    let mut group = c.benchmark_group("warp");
    let h = Homography::from_array([1.0, 0.01, 2.5, -0.01, 1.0, 1.5, 1e-6, 0.0, 1.0]).unwrap();

    for &(width, height) in &[(256u32, 256u32), (1024, 768)] {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
        });
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &img,
            |b, img| b.iter(|| black_box(warp_image(black_box(img), &h).unwrap())),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_ransac, bench_warp);
criterion_main!(benches);
