//! HTTP service around [`storyface`]: upload a photo and an illustration,
//! get back the illustration with the stylized face blended in.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod upload;

pub use config::AppConfig;
pub use error::ApiError;
pub use routes::app;
pub use state::{AppState, DetectorSlot};
