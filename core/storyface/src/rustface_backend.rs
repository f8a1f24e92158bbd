use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::RgbImage;

use crate::error::StoryfaceError;
use crate::face_detector::{BoundingBox, FaceData, FaceDetector};

/// Face detector backed by the `rustface` crate (SeetaFace engine).
///
/// SeetaFace only yields boxes and scores: landmarks, embedding, age and
/// gender stay empty.
pub struct RustfaceDetector {
    model: rustface::Model,
    min_face_size: u32,
}

impl RustfaceDetector {
    /// Load the SeetaFace frontal model (`seeta_fd_frontal_v1.0.bin`) from disk.
    #[tracing::instrument(name = "Load SeetaFace model", err)]
    pub fn from_path(path: &Path) -> Result<Self, StoryfaceError> {
        let file = File::open(path)
            .map_err(|e| StoryfaceError::Detector(format!("{}: {e}", path.display())))?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|e| StoryfaceError::Detector(e.to_string()))?;
        Ok(Self {
            model,
            min_face_size: 20,
        })
    }

    /// Smallest face edge, in pixels, the detector searches for (default: 20).
    pub fn min_face_size(mut self, size: u32) -> Self {
        self.min_face_size = size;
        self
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, image: &RgbImage) -> Vec<FaceData> {
        let gray = image::imageops::grayscale(image);
        let (width, height) = gray.dimensions();

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                let (x, y) = (bbox.x() as f32, bbox.y() as f32);
                FaceData::from_bbox(
                    BoundingBox::new(x, y, x + bbox.width() as f32, y + bbox.height() as f32),
                    face.score() as f32,
                )
            })
            .collect()
    }
}
