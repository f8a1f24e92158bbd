//! The personalization pipeline as an explicit, linear state machine.
//!
//! ```text
//! Idle → Detecting → Extracting → Stylizing → Compositing → Done
//!   └──────────┴────────────┴───────────┴────────────┴──→ Failed
//! ```
//!
//! A run is one-shot: once it reaches `Done` or `Failed` it never moves again.

use std::fmt;
use std::time::{Duration, Instant};

use crate::composite::{Composite, Compositor};
use crate::error::StoryfaceError;
use crate::face_detector::{largest_face, FaceDetector};
use crate::ingest::decode_rgb;
use crate::region::{downscale_to_fit, extract_region};
use crate::settings::Settings;
use crate::stylize::Stylizer;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Created, not started.
    Idle,
    /// Decoding the photo and looking for faces.
    Detecting,
    /// Cutting out the padded face region.
    Extracting,
    /// Running the filter chain.
    Stylizing,
    /// Decoding the illustration and blending the face in.
    Compositing,
    /// Finished with a composite.
    Done,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Detecting => "detecting",
            Stage::Extracting => "extracting",
            Stage::Stylizing => "stylizing",
            Stage::Compositing => "compositing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configured pipeline, reusable across runs. Holds no per-run state.
pub struct Pipeline<'a> {
    settings: &'a Settings,
    detector: &'a dyn FaceDetector,
}

impl<'a> Pipeline<'a> {
    /// Settings are expected to be validated already.
    pub fn new(settings: &'a Settings, detector: &'a dyn FaceDetector) -> Self {
        Self { settings, detector }
    }

    /// Start a fresh run in `Idle`.
    pub fn start(&self) -> PipelineRun<'_, 'a> {
        PipelineRun {
            pipeline: self,
            stage: Stage::Idle,
            failed_during: None,
            started: Instant::now(),
        }
    }

    /// Run photo → composite in one call.
    pub fn run(&self, photo: &[u8], illustration: &[u8]) -> Result<Composite, StoryfaceError> {
        self.start().execute(photo, illustration)
    }
}

/// A single execution of a [`Pipeline`].
pub struct PipelineRun<'p, 'a> {
    pipeline: &'p Pipeline<'a>,
    stage: Stage,
    failed_during: Option<Stage>,
    started: Instant,
}

impl PipelineRun<'_, '_> {
    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The stage that was active when the run failed.
    pub fn failed_during(&self) -> Option<Stage> {
        self.failed_during
    }

    fn timeout(&self) -> Option<Duration> {
        self.pipeline.settings.timeout_ms.map(Duration::from_millis)
    }

    fn advance(&mut self, next: Stage) -> Result<(), StoryfaceError> {
        if let Some(budget) = self.timeout() {
            if self.started.elapsed() > budget {
                return Err(StoryfaceError::Timeout(budget));
            }
        }
        tracing::debug!(from = %self.stage, to = %next, "pipeline transition");
        self.stage = next;
        Ok(())
    }

    fn fail(&mut self, err: StoryfaceError) -> StoryfaceError {
        tracing::warn!(stage = %self.stage, error = %err, "pipeline failed");
        self.failed_during = Some(self.stage);
        self.stage = Stage::Failed;
        err
    }

    /// Drive the run to `Done`, or to `Failed` on the first error.
    ///
    /// Calling this on a run that already finished is an error.
    #[tracing::instrument(name = "Personalize illustration", skip_all, fields(photo_bytes = photo.len(), illustration_bytes = illustration.len()))]
    pub fn execute(
        &mut self,
        photo: &[u8],
        illustration: &[u8],
    ) -> Result<Composite, StoryfaceError> {
        if self.stage != Stage::Idle {
            return Err(StoryfaceError::InvalidSettings(format!(
                "run already {}",
                self.stage
            )));
        }
        self.steps(photo, illustration).map_err(|err| self.fail(err))
    }

    fn steps(&mut self, photo: &[u8], illustration: &[u8]) -> Result<Composite, StoryfaceError> {
        let settings = self.pipeline.settings;

        self.advance(Stage::Detecting)?;
        let (photo, _) = downscale_to_fit(decode_rgb(photo)?, settings.max_edge);
        let faces = self.pipeline.detector.detect(&photo);
        tracing::info!(count = faces.len(), "faces detected");
        let face = largest_face(&faces).ok_or(StoryfaceError::NoFaceDetected)?;

        self.advance(Stage::Extracting)?;
        let region = extract_region(photo, &face.bbox, settings.max_edge, settings.padding)?;

        self.advance(Stage::Stylizing)?;
        let stylized = Stylizer::new(settings.style.clone()).stylize(&region.image)?;

        self.advance(Stage::Compositing)?;
        let base = decode_rgb(illustration)?;
        let target = settings.blend.target.unwrap_or(region.bbox);
        let composite =
            Compositor::new(settings.blend.clone(), settings.max_edge).composite(base, &stylized, &target)?;

        self.advance(Stage::Done)?;
        tracing::info!(elapsed_ms = self.started.elapsed().as_millis() as u64, "personalization completed");
        Ok(composite)
    }
}
