use std::collections::HashSet;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use storyface::ingest::{decode_rgb, encode_image, normalize};
use storyface::region::extract_region;
use storyface::{
    BlendMode, BoundingBox, Compositor, FaceData, FaceDetector, OutputFormat, Personalizer,
    StoryfaceError, StyleMode, StyleSettings, Stylizer,
};

/// Mock detector returning fixed faces, scaled to whatever image it is given.
struct MockDetector {
    faces: Vec<BoundingBox>,
    reference: (u32, u32),
}

impl MockDetector {
    fn new(reference: (u32, u32), faces: Vec<BoundingBox>) -> Self {
        Self { faces, reference }
    }
}

impl FaceDetector for MockDetector {
    fn detect(&self, image: &RgbImage) -> Vec<FaceData> {
        let scale = image.width() as f32 / self.reference.0 as f32;
        self.faces
            .iter()
            .map(|bbox| FaceData::from_bbox(bbox.scale(scale), 0.95))
            .collect()
    }
}

fn portrait(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width) as u8,
            (y * 255 / height) as u8,
            ((x + y) % 200) as u8 + 30,
        ])
    })
}

fn png(image: &RgbImage) -> Vec<u8> {
    encode_image(image, OutputFormat::Png, 1.0).unwrap()
}

fn palette(image: &RgbImage) -> usize {
    image.pixels().map(|p| p.0).collect::<HashSet<_>>().len()
}

#[test]
fn personalize_square_portrait() {
    let photo = png(&portrait(400, 400));
    let template = png(&RgbImage::from_pixel(400, 400, Rgb([240, 230, 200])));
    let detector = MockDetector::new((400, 400), vec![BoundingBox::new(100.0, 100.0, 200.0, 200.0)]);

    let result = Personalizer::new()
        .seed(7)
        .face_detector(Arc::new(detector))
        .personalize(&photo, &template)
        .unwrap();

    assert_eq!(result.image.dimensions(), (400, 400));
    assert_eq!(result.coords, BoundingBox::new(90.0, 90.0, 210.0, 210.0));
    assert_eq!(result.blend, BlendMode::Alpha);
    // Outside the face slot the template is untouched.
    assert_eq!(result.image.get_pixel(10, 10), &Rgb([240, 230, 200]));
    assert_eq!(result.image.get_pixel(300, 300), &Rgb([240, 230, 200]));
    assert_ne!(result.image.get_pixel(150, 150), &Rgb([240, 230, 200]));
}

#[test]
fn largest_face_is_used() {
    let photo = png(&portrait(400, 400));
    let template = png(&portrait(400, 400));
    let detector = MockDetector::new(
        (400, 400),
        vec![
            BoundingBox::new(10.0, 10.0, 40.0, 40.0),
            BoundingBox::new(200.0, 200.0, 300.0, 300.0),
        ],
    );

    let result = Personalizer::new()
        .seed(1)
        .face_detector(Arc::new(detector))
        .personalize(&photo, &template)
        .unwrap();

    assert_eq!(result.coords, BoundingBox::new(190.0, 190.0, 310.0, 310.0));
}

#[test]
fn no_face_reports_error() {
    let photo = png(&portrait(120, 120));
    let detector = MockDetector::new((120, 120), Vec::new());
    let result = Personalizer::new()
        .face_detector(Arc::new(detector))
        .personalize(&photo, &photo);
    assert!(matches!(result, Err(StoryfaceError::NoFaceDetected)));
}

#[test]
fn identity_full_alpha_copies_face_into_slot() {
    let source = portrait(200, 200);
    let template = png(&RgbImage::from_pixel(200, 200, Rgb([0, 0, 0])));
    let detector = MockDetector::new((200, 200), vec![BoundingBox::new(50.0, 50.0, 150.0, 150.0)]);

    let result = Personalizer::new()
        .padding(0.0)
        .style_mode(StyleMode::Identity)
        .alpha(1.0)
        .face_detector(Arc::new(detector))
        .personalize(&png(&source), &template)
        .unwrap();

    assert_eq!(result.coords, BoundingBox::new(50.0, 50.0, 150.0, 150.0));
    for (x, y) in [(50, 50), (100, 100), (149, 120), (75, 149)] {
        let expected = source.get_pixel(x, y).0;
        let actual = result.image.get_pixel(x, y).0;
        for c in 0..3 {
            assert!(
                (expected[c] as i16 - actual[c] as i16).abs() <= 2,
                "pixel ({x}, {y}): {expected:?} vs {actual:?}"
            );
        }
    }
}

#[test]
fn large_uploads_are_bounded() {
    let photo = png(&portrait(1600, 1200));
    let template = png(&RgbImage::from_pixel(2048, 1024, Rgb([90, 90, 90])));
    let detector = MockDetector::new((1600, 1200), vec![BoundingBox::new(600.0, 400.0, 1000.0, 800.0)]);

    let result = Personalizer::new()
        .seed(2)
        .face_detector(Arc::new(detector))
        .personalize(&photo, &template)
        .unwrap();

    assert_eq!(result.image.dimensions(), (1024, 512));
    let (w, h) = result.image.dimensions();
    assert!(result.coords.x2 <= w as f32 && result.coords.y2 <= h as f32);
}

#[test]
fn every_blend_mode_produces_illustration_sized_output() {
    let photo = png(&portrait(160, 160));
    let template = png(&RgbImage::from_pixel(240, 180, Rgb([200, 180, 160])));
    for mode in [BlendMode::Alpha, BlendMode::Feathered, BlendMode::Seamless] {
        let detector = MockDetector::new((160, 160), vec![BoundingBox::new(40.0, 40.0, 120.0, 120.0)]);
        let result = Personalizer::new()
            .seed(4)
            .blend_mode(mode)
            .face_detector(Arc::new(detector))
            .personalize(&photo, &template)
            .unwrap();
        assert_eq!(result.image.dimensions(), (240, 180), "{mode:?}");
        assert_eq!(result.blend, mode);
    }
}

#[test]
fn seamless_into_empty_slot_falls_back() {
    let template = RgbImage::from_pixel(100, 100, Rgb([50, 60, 70]));
    let face = portrait(20, 20);
    let compositor = Compositor::new(
        storyface::BlendSettings {
            mode: BlendMode::Seamless,
            ..Default::default()
        },
        1024,
    );

    let result = compositor
        .composite(template.clone(), &face, &BoundingBox::new(40.0, 40.0, 40.0, 80.0))
        .unwrap();

    assert_eq!(result.blend, BlendMode::Alpha);
    assert_eq!(result.image, template);
}

#[test]
fn stylizer_flattens_palette() {
    let region = extract_region(portrait(300, 300), &BoundingBox::new(80.0, 80.0, 220.0, 220.0), 1024, 0.1).unwrap();
    assert_eq!(region.image.dimensions(), (168, 168));

    for clusters in 5..=8 {
        let stylized = Stylizer::new(StyleSettings {
            clusters,
            seed: Some(21),
            kmeans_attempts: 2,
            ..StyleSettings::default()
        })
        .stylize(&region.image)
        .unwrap();
        assert_eq!(stylized.dimensions(), region.image.dimensions());
        assert!(palette(&stylized) <= clusters);
    }
}

#[test]
fn normalized_upload_decodes() {
    let upload = png(&portrait(1500, 500));
    let normalized = normalize(&upload, 1024, 0.9).unwrap();
    let decoded = decode_rgb(&normalized.data).unwrap();
    assert_eq!(decoded.dimensions(), (1024, 341));
    assert_eq!((normalized.width, normalized.height), (1024, 341));
}
