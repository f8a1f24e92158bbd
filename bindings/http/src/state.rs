use std::sync::Arc;
use std::time::Duration;

use storyface::{FaceDetector, StoryfaceError};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::error::ApiError;

/// The detector once it has loaded; `None` until then.
pub type DetectorSlot = Option<Arc<dyn FaceDetector>>;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    detector: watch::Receiver<DetectorSlot>,
    permits: Arc<Semaphore>,
}

impl AppState {
    /// State with no detector yet; publish it through the returned sender.
    pub fn new(config: AppConfig) -> (Self, watch::Sender<DetectorSlot>) {
        let (ready, detector) = watch::channel(None);
        let permits = Arc::new(Semaphore::new(config.workers));
        let state = Self {
            config: Arc::new(config),
            detector,
            permits,
        };
        (state, ready)
    }

    /// State whose detector is available immediately.
    pub fn with_detector(config: AppConfig, detector: Arc<dyn FaceDetector>) -> Self {
        let (state, ready) = Self::new(config);
        ready.send_replace(Some(detector));
        state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.detector.borrow().is_some()
    }

    /// The loaded detector, waiting up to `ready_wait_ms` for it.
    pub async fn detector(&self) -> Result<Arc<dyn FaceDetector>, ApiError> {
        let mut detector = self.detector.clone();
        let wait = Duration::from_millis(self.config.ready_wait_ms);
        let loaded = match tokio::time::timeout(wait, detector.wait_for(Option::is_some)).await {
            Ok(Ok(slot)) => slot.clone(),
            _ => None,
        };
        loaded.ok_or(ApiError::NotReady)
    }

    /// When a request starting now must have finished.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.budget()
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    /// Run `job` on the blocking pool, at most `workers` at a time. Waiting
    /// for a worker counts against `deadline`, which every step of one
    /// request shares.
    pub async fn run_blocking<T, F>(&self, deadline: Instant, job: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Result<T, StoryfaceError> + Send + 'static,
        T: Send + 'static,
    {
        let budget = self.budget();
        let permit = tokio::time::timeout_at(deadline, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|_| ApiError::Timeout(budget))?
            .map_err(|_| ApiError::NotReady)?;

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        match tokio::time::timeout_at(deadline, task).await {
            Ok(joined) => Ok(joined??),
            Err(_) => {
                tracing::warn!(?budget, "pipeline run abandoned");
                Err(ApiError::Timeout(budget))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;
    use storyface::FaceData;

    use super::*;

    struct NoFaces;

    impl FaceDetector for NoFaces {
        fn detect(&self, _image: &RgbImage) -> Vec<FaceData> {
            Vec::new()
        }
    }

    fn quick_config() -> AppConfig {
        AppConfig {
            ready_wait_ms: 10,
            request_timeout_ms: 50,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn detector_unavailable_until_published() {
        let (state, ready) = AppState::new(quick_config());
        assert!(!state.is_ready());
        assert!(matches!(state.detector().await, Err(ApiError::NotReady)));

        ready.send_replace(Some(Arc::new(NoFaces)));
        assert!(state.is_ready());
        assert!(state.detector().await.is_ok());
    }

    #[tokio::test]
    async fn blocking_job_result_is_returned() {
        let state = AppState::with_detector(quick_config(), Arc::new(NoFaces));
        assert_eq!(state.run_blocking(state.deadline(), || Ok(7)).await.unwrap(), 7);

        let err = state
            .run_blocking(state.deadline(), || Err::<(), _>(StoryfaceError::NoFaceDetected))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Pipeline(StoryfaceError::NoFaceDetected)));
    }

    #[tokio::test]
    async fn slow_job_times_out() {
        let state = AppState::with_detector(quick_config(), Arc::new(NoFaces));
        let err = state
            .run_blocking(state.deadline(), || {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }

    #[tokio::test]
    async fn steps_of_one_request_share_the_deadline() {
        let config = AppConfig {
            request_timeout_ms: 300,
            ..quick_config()
        };
        let state = AppState::with_detector(config, Arc::new(NoFaces));
        let deadline = state.deadline();
        let step = || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        };

        // Each step fits the 300 ms budget alone, but not both together.
        state.run_blocking(deadline, step).await.unwrap();
        let err = state.run_blocking(deadline, step).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }
}
