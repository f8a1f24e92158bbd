use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoryfaceError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("no face detected")]
    NoFaceDetected,

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("blend failed: {0}")]
    BlendFailure(String),

    #[error("pipeline exceeded its {0:?} budget")]
    Timeout(std::time::Duration),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("no face detector configured")]
    MissingDetector,

    #[error("face detector backend failed: {0}")]
    Detector(String),
}
