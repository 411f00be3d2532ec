use crate::classifier::{ClassifierAdapter, InferenceError, ModelLoadError};
use crate::config::{RefreshRate, ScreeningConfig, WindowCapacity};
use crate::emotion::{Aggregator, Assessment};
use crate::frame::{Camera, Frame};
use crate::preprocess::{preprocess, PreprocessError};
use crate::session::{Reading, SessionController, SessionError, SessionState, TickOutcome};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

const LOG_TARGET: &str = "pipeline";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub aggregator: Aggregator,
    pub window: WindowCapacity,
    pub refresh: RefreshRate,
}

impl PipelineConfig {
    pub fn from_screening(cfg: &ScreeningConfig) -> Self {
        Self {
            aggregator: Aggregator::new(cfg.weights, cfg.threshold, cfg.policy),
            window: cfg.window,
            refresh: cfg.refresh,
        }
    }

    pub fn session<C: Camera + 'static>(
        &self,
        camera: C,
        classifier: ClassifierAdapter,
    ) -> SessionController {
        SessionController::new(camera, classifier, self.aggregator, self.window)
    }
}

/// Scores one photo. No smoothing and no camera involved.
pub async fn analyze_still(
    classifier: &ClassifierAdapter,
    aggregator: &Aggregator,
    frame: &Frame,
) -> Result<Assessment, PipelineError> {
    classifier.load().await?;
    let tensor = preprocess(&frame.image)?;
    let distribution = classifier.predict(tensor).await?;
    let assessment = aggregator.assess(&distribution);

    tracing::info!(
        target: LOG_TARGET,
        score = assessment.score.get(),
        dominant = %assessment.dominant,
        "still image assessed"
    );
    Ok(assessment)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveSummary {
    pub published: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last: Option<Reading>,
}

/// Starts `controller` and ticks it once per refresh period.
///
/// Returns once the session leaves `Running` (for example through
/// [`SessionController::stop`] from another task) or `limit` elapses. The
/// session is stopped on return.
pub async fn run_live(
    controller: &SessionController,
    refresh: RefreshRate,
    limit: Option<Duration>,
) -> Result<LiveSummary, PipelineError> {
    controller.start().await?;

    let mut interval = tokio::time::interval(refresh.period());
    // Refreshes that elapse during a slow inference are dropped, not replayed.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = limit.map(|d| Instant::now() + d);
    let mut summary = LiveSummary::default();

    loop {
        interval.tick().await;
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!(target: LOG_TARGET, "live run time limit reached");
            break;
        }

        match controller.tick().await {
            TickOutcome::Published(reading) => {
                summary.published += 1;
                summary.last = Some(reading);
            }
            TickOutcome::Skipped | TickOutcome::NoFrame => summary.skipped += 1,
            TickOutcome::FrameFailed => summary.failed += 1,
            TickOutcome::Discarded | TickOutcome::Inactive => {}
        }

        if controller.state() != SessionState::Running {
            break;
        }
    }

    controller.stop();
    tracing::info!(
        target: LOG_TARGET,
        published = summary.published,
        skipped = summary.skipped,
        failed = summary.failed,
        "live run finished"
    );
    Ok(summary)
}
