use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned face rectangle in pixel space, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
}

impl BoundingBox {
    /// Create a box from its corner coordinates.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width of the box (negative for inverted boxes).
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Height of the box (negative for inverted boxes).
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area of the box, zero when it is degenerate.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Multiply every coordinate by `factor`.
    pub fn scale(&self, factor: f32) -> Self {
        Self::new(
            self.x1 * factor,
            self.y1 * factor,
            self.x2 * factor,
            self.y2 * factor,
        )
    }

    /// Grow the box by `pad` pixels on every side.
    pub fn pad(&self, pad: f32) -> Self {
        Self::new(self.x1 - pad, self.y1 - pad, self.x2 + pad, self.y2 + pad)
    }

    /// Clamp the box to `[0, width] × [0, height]`.
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }

    /// Truncate to whole pixels as `(x, y, width, height)`.
    ///
    /// Returns `None` when the box is non-finite or covers no pixel.
    pub fn to_pixels(&self) -> Option<(u32, u32, u32, u32)> {
        if ![self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
        {
            return None;
        }
        let (x1, y1, x2, y2) = (
            self.x1 as u32,
            self.y1 as u32,
            self.x2 as u32,
            self.y2 as u32,
        );
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Estimated gender reported by detectors that provide one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Female.
    Female,
    /// Male.
    Male,
}

/// A single detection result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    /// Face rectangle in the coordinates of the image passed to the detector.
    pub bbox: BoundingBox,
    /// Landmark points (eyes, nose, mouth corners), if the backend provides them.
    pub landmarks: Option<Vec<(f32, f32)>>,
    /// Identity embedding; empty for backends that don't compute one.
    pub embedding: Vec<f32>,
    /// Age estimate in years.
    pub age: Option<f32>,
    /// Gender estimate.
    pub gender: Option<Gender>,
    /// Detection confidence score.
    pub confidence: f32,
}

impl FaceData {
    /// A detection carrying only a bounding box and confidence.
    pub fn from_bbox(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            landmarks: None,
            embedding: Vec::new(),
            age: None,
            gender: None,
            confidence,
        }
    }
}

/// Pluggable face detection backend.
///
/// Implement this trait to plug in InsightFace over ONNX, dlib, or any other
/// engine, then pass it to [`crate::Personalizer::face_detector`].
pub trait FaceDetector: Send + Sync {
    /// Detect every face in `image`.
    fn detect(&self, image: &RgbImage) -> Vec<FaceData>;
}

/// Pick the face with the largest bounding-box area.
pub fn largest_face(faces: &[FaceData]) -> Option<&FaceData> {
    faces.iter().max_by(|a, b| {
        a.bbox
            .area()
            .partial_cmp(&b.bbox.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}
