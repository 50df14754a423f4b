use align_cli::align_core::{FeatureConfig, Keypoint, Point2};
use align_cli::align_features::{FeatureExtractor, FeatureResult, FeatureSet, OrbExtractor};
use align_cli::align_geometry::Homography;
use align_cli::{
    stack_persisted, AlignConfig, Aligner, AlignmentReport, Canvas, FailureKind, ImageOutcome,
    ImageStore, MemoryImageStore, PipelineError, StackConfig, StackError, StackMethod, Stage,
};
use image::{DynamicImage, GrayImage, Luma};

/// Every non-zero pixel is a keypoint whose descriptor encodes its value,
/// so equal values match at Hamming distance 0.
struct MarkerExtractor;

impl FeatureExtractor for MarkerExtractor {
    fn extract(&self, image: &GrayImage) -> FeatureResult<FeatureSet> {
        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();
        for (x, y, p) in image.enumerate_pixels() {
            if p[0] != 0 {
                keypoints.push(Keypoint {
                    x: x as f32,
                    y: y as f32,
                    angle: 0.0,
                    response: p[0] as f32,
                });
                descriptors.push([p[0]; 32]);
            }
        }
        Ok(FeatureSet::new(keypoints, descriptors))
    }
}

/// Marker positions in reference coordinates, value = index + 1 scaled
const MARKERS: [(u32, u32); 10] = [
    (8, 7),
    (50, 9),
    (31, 22),
    (12, 38),
    (55, 40),
    (22, 13),
    (41, 31),
    (17, 27),
    (47, 18),
    (35, 41),
];

fn marker_value(i: usize) -> u8 {
    (i as u8 + 1) * 20
}

fn marker_image(width: u32, height: u32, markers: &[(usize, (u32, u32))]) -> DynamicImage {
    let mut img = GrayImage::new(width, height);
    for &(i, (x, y)) in markers {
        img.put_pixel(x, y, Luma([marker_value(i)]));
    }
    DynamicImage::ImageLuma8(img)
}

fn reference() -> DynamicImage {
    let markers: Vec<_> = MARKERS.iter().copied().enumerate().collect();
    marker_image(64, 48, &markers)
}

/// Reference content moved by (dx, dy)
fn shifted(width: u32, height: u32, dx: u32, dy: u32) -> DynamicImage {
    let markers: Vec<_> = MARKERS
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| (i, (x + dx, y + dy)))
        .collect();
    marker_image(width, height, &markers)
}

fn test_config() -> AlignConfig {
    AlignConfig {
        threads: 2,
        ..AlignConfig::default()
    }
}

fn assert_maps_within(h: &[f64; 9], src: Point2, expected: Point2, tol: f64) {
    let h = Homography::from_array(*h).unwrap();
    let mapped = h.apply(src).unwrap();
    assert!(
        mapped.distance(&expected) < tol,
        "{:?} mapped to {:?}, expected {:?}",
        src,
        mapped,
        expected
    );
}

#[test]
fn test_reference_and_shifted_image() {
    let store = MemoryImageStore::new()
        .with_image("a.png", reference())
        .with_image("b.png", shifted(64, 48, 5, 3));
    let aligner = Aligner::new(store, MarkerExtractor, test_config());
    let report = aligner.run().unwrap();

    assert_eq!(report.images.len(), 2);
    assert_eq!(report.succeeded(), 2);

    // Reference is persisted unchanged
    let out_a = aligner.store().output("a.png").unwrap();
    assert_eq!(out_a.as_bytes(), reference().as_bytes());

    let b = report.get("b.png").unwrap();
    assert_eq!(b.stage, Stage::Persisted);
    assert_eq!(b.correspondences, MARKERS.len());
    assert_eq!(b.inliers, MARKERS.len());
    let h = b.homography.unwrap();
    for &(x, y) in MARKERS.iter() {
        assert_maps_within(
            &h,
            Point2::new((x + 5) as f64, (y + 3) as f64),
            Point2::new(x as f64, y as f64),
            2.0,
        );
    }

    // Markers land back on their reference positions
    let out_b = aligner.store().output("b.png").unwrap().to_luma8();
    assert_eq!(out_b.dimensions(), (64, 48));
    for (i, &(x, y)) in MARKERS.iter().enumerate() {
        if x >= 5 && y >= 3 {
            assert_eq!(out_b.get_pixel(x, y)[0], marker_value(i), "marker {}", i);
        }
    }
}

#[test]
fn test_failed_image_does_not_stop_the_next() {
    let store = MemoryImageStore::new()
        .with_image("1.png", reference())
        .with_image("2.png", DynamicImage::ImageLuma8(GrayImage::new(64, 48)))
        .with_image("3.png", shifted(64, 48, 2, 1));
    let aligner = Aligner::new(store, MarkerExtractor, test_config());
    let report = aligner.run().unwrap();

    let names: Vec<&str> = report.images.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["1.png", "2.png", "3.png"]);

    let blank = report.get("2.png").unwrap();
    assert_eq!(blank.stage, Stage::Failed);
    assert_eq!(blank.failed_at, Some(Stage::Filtered));
    assert_eq!(blank.kind, Some(FailureKind::InsufficientCorrespondences));
    assert!(blank.homography.is_none());

    assert_eq!(report.get("3.png").unwrap().stage, Stage::Persisted);
    assert_eq!(aligner.store().output_names(), vec!["1.png", "3.png"]);
}

#[test]
fn test_three_correspondences_are_insufficient() {
    let few: Vec<_> = MARKERS.iter().copied().enumerate().take(3).collect();
    let store = MemoryImageStore::new()
        .with_image("a.png", reference())
        .with_image("b.png", marker_image(64, 48, &few));
    let aligner = Aligner::new(store, MarkerExtractor, test_config());
    let report = aligner.run().unwrap();

    let b = report.get("b.png").unwrap();
    assert_eq!(b.kind, Some(FailureKind::InsufficientCorrespondences));
    assert_eq!(b.correspondences, 0);
}

#[test]
fn test_collinear_markers_are_degenerate() {
    let line: Vec<_> = (0..6).map(|i| (i, (6 + 8 * i as u32, 20))).collect();
    let store = MemoryImageStore::new()
        .with_image("a.png", reference())
        .with_image("b.png", marker_image(64, 48, &line));
    let aligner = Aligner::new(store, MarkerExtractor, test_config());
    let report = aligner.run().unwrap();

    let b = report.get("b.png").unwrap();
    assert_eq!(b.stage, Stage::Failed);
    assert_eq!(b.failed_at, Some(Stage::Estimated));
    assert_eq!(b.kind, Some(FailureKind::DegenerateSample));
    assert!(aligner.store().output("b.png").is_none());
}

#[test]
fn test_reference_canvas() {
    let store = MemoryImageStore::new()
        .with_image("a.png", reference())
        .with_image("b.png", shifted(80, 60, 5, 3));

    let aligner = Aligner::new(store, MarkerExtractor, test_config());
    aligner.run().unwrap();
    let out = aligner.store().output("b.png").unwrap();
    assert_eq!((out.width(), out.height()), (80, 60));

    let store = MemoryImageStore::new()
        .with_image("a.png", reference())
        .with_image("b.png", shifted(80, 60, 5, 3));
    let config = AlignConfig {
        canvas: Canvas::Reference,
        ..test_config()
    };
    let aligner = Aligner::new(store, MarkerExtractor, config);
    aligner.run().unwrap();
    let out = aligner.store().output("b.png").unwrap();
    assert_eq!((out.width(), out.height()), (64, 48));
}

#[test]
fn test_runs_are_deterministic() {
    let build = || {
        MemoryImageStore::new()
            .with_image("a.png", reference())
            .with_image("b.png", shifted(64, 48, 5, 3))
            .with_image("c.png", shifted(64, 48, 1, 4))
    };
    let first = Aligner::new(build(), MarkerExtractor, test_config()).run().unwrap();
    let second = Aligner::new(build(), MarkerExtractor, test_config()).run().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_unusable_reference_aborts() {
    struct Failing;
    impl ImageStore for Failing {
        fn names(&self) -> Result<Vec<String>, align_cli::StoreError> {
            Ok(vec!["gone.png".to_string()])
        }
        fn load(&self, name: &str) -> Result<DynamicImage, align_cli::StoreError> {
            Err(align_cli::StoreError::NotFound(name.to_string()))
        }
        fn save(&self, _: &str, _: &DynamicImage) -> Result<(), align_cli::StoreError> {
            Ok(())
        }
        fn load_output(&self, name: &str) -> Result<DynamicImage, align_cli::StoreError> {
            Err(align_cli::StoreError::NotFound(name.to_string()))
        }
    }

    let aligner = Aligner::new(Failing, MarkerExtractor, test_config());
    match aligner.run() {
        Err(PipelineError::Reference { name, source }) => {
            assert_eq!(name, "gone.png");
            assert_eq!(source.kind(), FailureKind::IoFailure);
        }
        other => panic!("unexpected {:?}", other.map(|r| r.images.len())),
    }
}

/// Dark ramp with scattered 3x3 blobs, content moved by (dx, dy)
fn blob_scene(dx: i64, dy: i64) -> DynamicImage {
    let (width, height) = (320u32, 240u32);
    let blobs: Vec<(i64, i64, u8)> = (0..40i64)
        .map(|i| {
            let x = 40 + (i * 53) % 240;
            let y = 40 + (i * 97 + i * i * 13) % 160;
            (x, y, 140 + ((i * 29) % 110) as u8)
        })
        .collect();
    DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
        let (sx, sy) = (x as i64 - dx, y as i64 - dy);
        for &(bx, by, v) in &blobs {
            if (sx - bx).abs() <= 1 && (sy - by).abs() <= 1 {
                return Luma([v]);
            }
        }
        Luma([10 + (sx.max(0) / 8).min(50) as u8])
    }))
}

#[test]
fn test_orb_pipeline_recovers_shift() {
    let store = MemoryImageStore::new()
        .with_image("a.png", blob_scene(0, 0))
        .with_image("b.png", blob_scene(7, -4));
    let extractor = OrbExtractor::new(FeatureConfig::default()).unwrap();
    let aligner = Aligner::new(store, extractor, test_config());
    let report = aligner.run().unwrap();

    let b = report.get("b.png").unwrap();
    assert_eq!(b.stage, Stage::Persisted, "{:?}", b.error);
    let h = b.homography.unwrap();
    for (x, y) in [(60.0, 60.0), (160.0, 120.0), (260.0, 180.0)] {
        assert_maps_within(&h, Point2::new(x + 7.0, y - 4.0), Point2::new(x, y), 2.0);
    }
}

/// Noise texture where `sharp(x)` holds, flat grey elsewhere
fn half_textured(width: u32, height: u32, sharp: impl Fn(u32) -> bool) -> DynamicImage {
    DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
        let v = if sharp(x) {
            let mut n = x.wrapping_mul(0x9E37_79B9) ^ y.wrapping_mul(0x85EB_CA6B);
            n ^= n >> 13;
            (n.wrapping_mul(0xC2B2_AE35) >> 24) as u8
        } else {
            128
        };
        image::Rgb([v, v, v])
    }))
}

#[test]
fn test_stack_persisted_images() {
    let (w, h) = (96, 64);
    let left = half_textured(w, h, |x| x < w / 2);
    let right = half_textured(w, h, |x| x >= w / 2);

    let store = MemoryImageStore::new();
    store.save("a.png", &left).unwrap();
    store.save("b.png", &right).unwrap();

    let mut report = AlignmentReport::default();
    for name in ["a.png", "b.png", "c.png"] {
        let mut outcome = ImageOutcome::new(name);
        outcome.stage = if name == "c.png" { Stage::Failed } else { Stage::Persisted };
        report.images.push(outcome);
    }

    let config = StackConfig {
        rows: 2,
        cols: 2,
        measure_downscale: 1,
        ..StackConfig::default()
    };
    let composite = stack_persisted(&store, &report, &config, StackMethod::Generalized).unwrap();
    assert_eq!(composite.dimensions(), (w, h));
    let (left, right) = (left.to_rgb8(), right.to_rgb8());
    for (x, y, px) in composite.enumerate_pixels() {
        let expected = if x < w / 2 { &left } else { &right };
        assert_eq!(px, expected.get_pixel(x, y), "at ({}, {})", x, y);
    }

    let composite = stack_persisted(&store, &report, &config, StackMethod::Laplacian).unwrap();
    assert_eq!(composite.dimensions(), (w, h));
    let agree = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|&(x, _)| x.abs_diff(w / 2) > 4)
        .filter(|&(x, y)| {
            let expected = if x < w / 2 { &left } else { &right };
            composite.get_pixel(x, y) == expected.get_pixel(x, y)
        })
        .count() as u32;
    let total = h * (w - 9);
    assert!(agree * 100 >= total * 95, "{} of {}", agree, total);
}

#[test]
fn test_stack_needs_equal_sizes() {
    let store = MemoryImageStore::new()
        .with_image("a.png", reference())
        .with_image("b.png", shifted(80, 60, 5, 3));
    let aligner = Aligner::new(store, MarkerExtractor, test_config());
    let report = aligner.run().unwrap();

    let err = stack_persisted(
        aligner.store(),
        &report,
        &StackConfig::default(),
        StackMethod::Laplacian,
    )
    .unwrap_err();
    assert!(matches!(err, StackError::DimensionMismatch { found: (80, 60), .. }));

    let empty = stack_persisted(
        aligner.store(),
        &AlignmentReport::default(),
        &StackConfig::default(),
        StackMethod::Laplacian,
    );
    assert!(matches!(empty, Err(StackError::Empty)));
}
