//! Live capture session lifecycle.
//!
//! `Idle -> Loading -> Running -> Stopped`, with `Loading -> Failed` when the
//! model or camera cannot be acquired. An external scheduler calls
//! [`SessionController::tick`] once per display refresh; each tick re-reads the
//! state, so a `stop` between ticks always ends the loop.

use crate::classifier::{ClassifierAdapter, ModelLoadError};
use crate::config::WindowCapacity;
use crate::emotion::{Aggregator, DominantEmotion, FrameScore};
use crate::frame::{Camera, CameraError, Frame, StreamGuard};
use crate::preprocess::preprocess;
use crate::smoothing::ScoreSmoother;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

const LOG_TARGET: &str = "session";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Running,
    Stopped,
    Failed,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("session is already active ({0:?})")]
    AlreadyActive(SessionState),
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    CameraAccess(#[from] CameraError),
}

/// One published live result.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reading {
    pub sequence: u64,
    pub frame_score: FrameScore,
    pub smoothed: FrameScore,
    pub dominant: DominantEmotion,
}

impl Reading {
    pub fn displayed_score(&self) -> FrameScore {
        self.smoothed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session is not running.
    Inactive,
    /// A previous inference is still outstanding; this frame is dropped.
    Skipped,
    NoFrame,
    /// Capture, preprocessing or inference failed for this frame only.
    FrameFailed,
    /// The session stopped while inference was in flight.
    Discarded,
    Published(Reading),
}

struct LiveResources {
    stream: Option<StreamGuard>,
    smoother: ScoreSmoother,
}

struct Shared {
    camera: Arc<dyn Camera>,
    classifier: ClassifierAdapter,
    aggregator: Aggregator,
    state: watch::Sender<SessionState>,
    /// Bumped on every start claim and every stop. Only written while the
    /// `state` sender is locked, so it always pairs with the state it was read with.
    epoch: AtomicU64,
    /// Held across `Camera::open` so at most one stream is live at a time.
    camera_gate: tokio::sync::Mutex<()>,
    readings: watch::Sender<Option<Reading>>,
    live: Mutex<LiveResources>,
    in_flight: AtomicBool,
}

impl Shared {
    fn lock_live(&self) -> MutexGuard<'_, LiveResources> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64, expected: SessionState) -> bool {
        let state = self.state.borrow();
        *state == expected && self.epoch.load(Ordering::Acquire) == epoch
    }

    fn running_epoch(&self) -> Option<u64> {
        let state = self.state.borrow();
        (*state == SessionState::Running).then(|| self.epoch.load(Ordering::Acquire))
    }

    fn transition(&self, epoch: u64, from: SessionState, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from && self.epoch.load(Ordering::Acquire) == epoch {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Hands a checked-out stream back to the session, or releases it when the
    /// session it was taken from has ended.
    fn return_stream(&self, epoch: u64, stream: StreamGuard) -> bool {
        let mut live = self.lock_live();
        if live.stream.is_none() && self.is_current(epoch, SessionState::Running) {
            live.stream = Some(stream);
            return true;
        }
        drop(live);
        drop(stream);
        false
    }
}

/// Marks an inference as outstanding until dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cloneable handle to one live session.
///
/// The camera stream is owned exclusively by the session and released on
/// `stop`, on a failed start, and when the last handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new<C: Camera + 'static>(
        camera: C,
        classifier: ClassifierAdapter,
        aggregator: Aggregator,
        window: WindowCapacity,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (readings, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                camera: Arc::new(camera),
                classifier,
                aggregator,
                state,
                epoch: AtomicU64::new(0),
                camera_gate: tokio::sync::Mutex::new(()),
                readings,
                live: Mutex::new(LiveResources {
                    stream: None,
                    smoother: ScoreSmoother::new(window),
                }),
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_readings(&self) -> watch::Receiver<Option<Reading>> {
        self.shared.readings.subscribe()
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        let mut previous = SessionState::Idle;
        let mut epoch = 0;
        let claimed = self.shared.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                SessionState::Idle | SessionState::Stopped | SessionState::Failed => {
                    *state = SessionState::Loading;
                    epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                    true
                }
                SessionState::Loading | SessionState::Running => false,
            }
        });
        if !claimed {
            return Err(SessionError::AlreadyActive(previous));
        }
        tracing::info!(target: LOG_TARGET, epoch, "session loading");

        if let Err(e) = self.shared.classifier.load().await {
            self.shared
                .transition(epoch, SessionState::Loading, SessionState::Failed);
            tracing::error!(target: LOG_TARGET, epoch, error = %e, "session failed: model load");
            return Err(e.into());
        }

        // An earlier start may still be opening the device; wait for it to
        // settle so two streams are never live together.
        let _gate = self.shared.camera_gate.lock().await;
        if !self.shared.is_current(epoch, SessionState::Loading) {
            tracing::info!(target: LOG_TARGET, epoch, "session stopped while loading");
            return Ok(());
        }

        let stream = match self.shared.camera.open().await {
            Ok(stream) => StreamGuard::new(stream),
            Err(e) => {
                self.shared
                    .transition(epoch, SessionState::Loading, SessionState::Failed);
                tracing::error!(target: LOG_TARGET, epoch, error = %e, "session failed: camera access");
                return Err(e.into());
            }
        };

        self.shared.readings.send_replace(None);
        let mut live = self.shared.lock_live();
        if !self
            .shared
            .transition(epoch, SessionState::Loading, SessionState::Running)
        {
            drop(live);
            drop(stream);
            tracing::info!(target: LOG_TARGET, epoch, "session stopped while opening camera");
            return Ok(());
        }
        live.smoother.reset();
        live.stream = Some(stream);
        drop(live);

        tracing::info!(target: LOG_TARGET, epoch, "session running");
        Ok(())
    }

    /// Stops the session and releases the camera. A no-op unless loading or running.
    pub fn stop(&self) {
        let stopped = self.shared.state.send_if_modified(|state| match *state {
            SessionState::Loading | SessionState::Running => {
                *state = SessionState::Stopped;
                self.shared.epoch.fetch_add(1, Ordering::AcqRel);
                true
            }
            _ => false,
        });

        // A stream checked out by an in-flight tick is released when it comes back.
        let stream = self.shared.lock_live().stream.take();
        if let Some(mut stream) = stream {
            stream.release();
        }

        if stopped {
            tracing::info!(target: LOG_TARGET, "session stopped");
        }
    }

    /// Runs one capture -> preprocess -> classify -> score pass.
    pub async fn tick(&self) -> TickOutcome {
        let Some(epoch) = self.shared.running_epoch() else {
            return TickOutcome::Inactive;
        };
        let Some(_in_flight) = InFlight::try_acquire(&self.shared.in_flight) else {
            tracing::trace!(target: LOG_TARGET, "inference outstanding, dropping frame");
            return TickOutcome::Skipped;
        };

        let frame = match self.capture(epoch).await {
            Ok(frame) => frame,
            Err(outcome) => return outcome,
        };
        let sequence = frame.sequence;

        let tensor = match preprocess(&frame.image) {
            Ok(tensor) => tensor,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, sequence, error = %e, "preprocessing failed");
                return TickOutcome::FrameFailed;
            }
        };
        drop(frame);

        let distribution = match self.shared.classifier.predict(tensor).await {
            Ok(distribution) => distribution,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, sequence, error = %e, "inference failed");
                return TickOutcome::FrameFailed;
            }
        };

        let assessment = self.shared.aggregator.assess(&distribution);
        match self.publish(epoch, sequence, assessment.score, assessment.dominant) {
            Some(reading) => TickOutcome::Published(reading),
            None => {
                tracing::debug!(target: LOG_TARGET, sequence, "session left running, result discarded");
                TickOutcome::Discarded
            }
        }
    }

    /// Reads the newest frame with the stream checked out of the session, so
    /// a slow device or decode never blocks `stop`.
    async fn capture(&self, epoch: u64) -> Result<Frame, TickOutcome> {
        let checked_out = self.shared.lock_live().stream.take();
        let Some(mut stream) = checked_out else {
            return Err(TickOutcome::Inactive);
        };

        let read = tokio::task::spawn_blocking(move || {
            let frame = stream.latest_frame();
            (stream, frame)
        })
        .await;
        let (stream, frame) = match read {
            Ok(read) => read,
            Err(e) => {
                // The stream was dropped, and so released, with the task.
                self.shared
                    .transition(epoch, SessionState::Running, SessionState::Failed);
                tracing::error!(target: LOG_TARGET, error = %e, "frame capture task failed");
                return Err(TickOutcome::FrameFailed);
            }
        };

        if !self.shared.return_stream(epoch, stream) {
            tracing::debug!(target: LOG_TARGET, "session left running during capture");
            return Err(TickOutcome::Discarded);
        }
        match frame {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(TickOutcome::NoFrame),
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "frame capture failed");
                Err(TickOutcome::FrameFailed)
            }
        }
    }

    fn publish(
        &self,
        epoch: u64,
        sequence: u64,
        frame_score: FrameScore,
        dominant: DominantEmotion,
    ) -> Option<Reading> {
        let mut live = self.shared.lock_live();
        if !self.shared.is_current(epoch, SessionState::Running) {
            return None;
        }
        live.smoother.push(frame_score);
        let reading = Reading {
            sequence,
            frame_score,
            smoothed: live.smoother.current_smoothed().unwrap_or(frame_score),
            dominant,
        };
        drop(live);

        tracing::debug!(
            target: LOG_TARGET,
            sequence,
            score = reading.frame_score.get(),
            smoothed = reading.smoothed.get(),
            dominant = %reading.dominant,
            "reading published"
        );
        self.shared.readings.send_replace(Some(reading));
        Some(reading)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierLoader, EmotionClassifier, InferenceError};
    use crate::emotion::{EmotionDistribution, EmotionLabel};
    use crate::frame::FrameStream;
    use crate::preprocess::{FaceTensor, INPUT_SHAPE};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    struct CameraProbe {
        attempts: Arc<AtomicUsize>,
        opens: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        max_live: Arc<AtomicUsize>,
    }

    struct FakeCamera {
        probe: CameraProbe,
        deny: bool,
        open_gate: Option<Arc<Notify>>,
    }

    struct FakeStream {
        probe: CameraProbe,
        sequence: u64,
    }

    impl Camera for FakeCamera {
        fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameStream>, CameraError>> {
            async move {
                self.probe.attempts.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.open_gate {
                    gate.notified().await;
                }
                if self.deny {
                    return Err(CameraError::PermissionDenied("user declined".to_owned()));
                }
                self.probe.opens.fetch_add(1, Ordering::SeqCst);
                let live = self.probe.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.probe.max_live.fetch_max(live, Ordering::SeqCst);
                Ok(Box::new(FakeStream {
                    probe: self.probe.clone(),
                    sequence: 0,
                }) as Box<dyn FrameStream>)
            }
            .boxed()
        }
    }

    impl FrameStream for FakeStream {
        fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            self.sequence += 1;
            let image = ImageBuffer::from_fn(64, 64, |x, y| Rgb([x as u8, y as u8, 0]));
            Ok(Some(Frame::new(self.sequence, DynamicImage::ImageRgb8(image))))
        }

        fn release(&mut self) {
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
            self.probe.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Pops scripted results in order; falls back to `Sad 0.9` when exhausted.
    struct ScriptedClassifier {
        script: Mutex<VecDeque<Result<EmotionDistribution, InferenceError>>>,
        gate: Option<Arc<Notify>>,
    }

    impl EmotionClassifier for ScriptedClassifier {
        fn input_shape(&self) -> &[usize] {
            &INPUT_SHAPE
        }

        fn predict(
            &self,
            _tensor: FaceTensor,
        ) -> BoxFuture<'_, Result<EmotionDistribution, InferenceError>> {
            async move {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                let next = self
                    .script
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                next.unwrap_or_else(|| Ok(sad(0.9)))
            }
            .boxed()
        }
    }

    struct ScriptedLoader {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
        classifier: Arc<ScriptedClassifier>,
    }

    impl ClassifierLoader for ScriptedLoader {
        fn load(&self) -> BoxFuture<'_, Result<Arc<dyn EmotionClassifier>, ModelLoadError>> {
            async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                if n < self.fail_first {
                    return Err(ModelLoadError::Missing("model.onnx".into()));
                }
                Ok(self.classifier.clone() as Arc<dyn EmotionClassifier>)
            }
            .boxed()
        }
    }

    fn sad(value: f32) -> EmotionDistribution {
        EmotionDistribution::new([0.0, 0.0, 0.0, 0.0, 0.0, value, 0.0]).expect("valid")
    }

    struct Harness {
        controller: SessionController,
        probe: CameraProbe,
        loads: Arc<AtomicUsize>,
    }

    fn harness_with(
        script: Vec<Result<EmotionDistribution, InferenceError>>,
        gate: Option<Arc<Notify>>,
        fail_first: usize,
        deny: bool,
    ) -> Harness {
        build_harness(script, gate, fail_first, deny, None)
    }

    fn build_harness(
        script: Vec<Result<EmotionDistribution, InferenceError>>,
        gate: Option<Arc<Notify>>,
        fail_first: usize,
        deny: bool,
        open_gate: Option<Arc<Notify>>,
    ) -> Harness {
        let probe = CameraProbe::default();
        let loads = Arc::new(AtomicUsize::new(0));
        let adapter = ClassifierAdapter::new(ScriptedLoader {
            calls: loads.clone(),
            fail_first,
            classifier: Arc::new(ScriptedClassifier {
                script: Mutex::new(script.into()),
                gate,
            }),
        });
        let controller = SessionController::new(
            FakeCamera {
                probe: probe.clone(),
                deny,
                open_gate,
            },
            adapter,
            Aggregator::default(),
            WindowCapacity::default(),
        );
        Harness {
            controller,
            probe,
            loads,
        }
    }

    fn harness() -> Harness {
        harness_with(Vec::new(), None, 0, false)
    }

    fn published(outcome: TickOutcome) -> Reading {
        match outcome {
            TickOutcome::Published(reading) => reading,
            other => panic!("expected a published reading, got {other:?}"),
        }
    }

    #[test]
    fn stop_before_start_is_noop() {
        let h = harness();
        h.controller.stop();
        h.controller.stop();
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.probe.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_twice_releases_camera_once() {
        let h = harness();
        h.controller.start().await.expect("starts");
        assert_eq!(h.controller.state(), SessionState::Running);

        h.controller.stop();
        h.controller.stop();
        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert_eq!(h.probe.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_publishes_scored_reading() {
        let h = harness();
        let mut readings = h.controller.subscribe_readings();
        h.controller.start().await.expect("starts");

        let reading = published(h.controller.tick().await);
        assert_eq!(reading.sequence, 1);
        assert_eq!(reading.frame_score.get(), 90);
        assert_eq!(reading.dominant, DominantEmotion::Label(EmotionLabel::Sad));

        readings.changed().await.expect("sender alive");
        assert_eq!(*readings.borrow(), Some(reading));
    }

    #[tokio::test]
    async fn readings_are_smoothed_over_window() {
        let h = harness_with(vec![Ok(sad(0.9)), Ok(sad(0.5))], None, 0, false);
        h.controller.start().await.expect("starts");

        let first = published(h.controller.tick().await);
        assert_eq!(first.displayed_score().get(), 90);
        let second = published(h.controller.tick().await);
        assert_eq!(second.frame_score.get(), 50);
        assert_eq!(second.displayed_score().get(), 70);
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn tick_is_inactive_unless_running() {
        let h = harness();
        assert_eq!(h.controller.tick().await, TickOutcome::Inactive);
        h.controller.start().await.expect("starts");
        h.controller.stop();
        assert_eq!(h.controller.tick().await, TickOutcome::Inactive);
    }

    #[tokio::test]
    async fn inference_error_skips_frame_but_keeps_running() {
        let h = harness_with(
            vec![Err(InferenceError::Backend("boom".to_owned()))],
            None,
            0,
            false,
        );
        h.controller.start().await.expect("starts");

        assert_eq!(h.controller.tick().await, TickOutcome::FrameFailed);
        assert_eq!(h.controller.state(), SessionState::Running);
        published(h.controller.tick().await);
    }

    #[tokio::test]
    async fn model_load_failure_then_retry() {
        let h = harness_with(Vec::new(), None, 1, false);

        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(err, SessionError::ModelLoad(_)));
        assert_eq!(h.controller.state(), SessionState::Failed);
        assert_eq!(h.probe.opens.load(Ordering::SeqCst), 0);

        h.controller.start().await.expect("retry succeeds");
        assert_eq!(h.controller.state(), SessionState::Running);
        assert_eq!(h.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn camera_denied_fails_start() {
        let h = harness_with(Vec::new(), None, 0, true);
        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::CameraAccess(CameraError::PermissionDenied(_))
        ));
        assert_eq!(h.controller.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn stop_while_loading_skips_camera() {
        let h = harness();
        let (started, ()) = tokio::join!(h.controller.start(), async {
            h.controller.stop();
        });

        started.expect("start returns cleanly");
        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert_eq!(h.probe.opens.load(Ordering::SeqCst), 0);
        assert_eq!(h.controller.tick().await, TickOutcome::Inactive);
    }

    #[tokio::test]
    async fn start_while_running_is_rejected() {
        let h = harness();
        h.controller.start().await.expect("starts");
        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::AlreadyActive(SessionState::Running)
        ));
        assert_eq!(h.probe.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_after_stop_reopens_camera() {
        let h = harness();
        h.controller.start().await.expect("starts");
        h.controller.stop();
        h.controller.start().await.expect("restarts");
        assert_eq!(h.controller.state(), SessionState::Running);
        assert_eq!(h.probe.opens.load(Ordering::SeqCst), 2);
        assert_eq!(h.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_during_camera_open_keeps_one_stream_live() {
        let open_gate = Arc::new(Notify::new());
        let h = build_harness(Vec::new(), None, 0, false, Some(open_gate.clone()));

        let first = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.start().await }
        });
        while h.probe.attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        h.controller.stop();
        let second = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.start().await }
        });
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        // The restart waits until the earlier open has settled.
        assert_eq!(h.probe.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.state(), SessionState::Loading);

        open_gate.notify_one();
        first.await.expect("joins").expect("stale start returns cleanly");
        assert_eq!(h.probe.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.state(), SessionState::Loading);

        open_gate.notify_one();
        second.await.expect("joins").expect("restart succeeds");
        assert_eq!(h.controller.state(), SessionState::Running);
        assert_eq!(h.probe.opens.load(Ordering::SeqCst), 2);
        assert_eq!(h.probe.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(h.probe.live.load(Ordering::SeqCst), 1);

        published(h.controller.tick().await);
    }

    #[tokio::test]
    async fn stale_camera_failure_does_not_fail_restart() {
        let open_gate = Arc::new(Notify::new());
        let h = build_harness(Vec::new(), None, 0, true, Some(open_gate.clone()));

        let first = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.start().await }
        });
        while h.probe.attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        h.controller.stop();
        let second = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.start().await }
        });
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        open_gate.notify_one();
        assert!(first.await.expect("joins").is_err());
        // The failed open belonged to the stopped attempt.
        assert_eq!(h.controller.state(), SessionState::Loading);

        open_gate.notify_one();
        assert!(second.await.expect("joins").is_err());
        assert_eq!(h.controller.state(), SessionState::Failed);
    }

    /// Parks inside `latest_frame` until the test lets it continue.
    struct HeldCamera {
        probe: CameraProbe,
        barrier: Arc<Barrier>,
    }

    struct HeldStream {
        probe: CameraProbe,
        barrier: Arc<Barrier>,
    }

    impl Camera for HeldCamera {
        fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameStream>, CameraError>> {
            async move {
                self.probe.opens.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(HeldStream {
                    probe: self.probe.clone(),
                    barrier: self.barrier.clone(),
                }) as Box<dyn FrameStream>)
            }
            .boxed()
        }
    }

    impl FrameStream for HeldStream {
        fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            self.barrier.wait();
            self.barrier.wait();
            Ok(Some(Frame::new(1, DynamicImage::new_rgb8(8, 8))))
        }

        fn release(&mut self) {
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_does_not_wait_for_frame_read() {
        let probe = CameraProbe::default();
        let barrier = Arc::new(Barrier::new(2));
        let adapter = ClassifierAdapter::new(ScriptedLoader {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_first: 0,
            classifier: Arc::new(ScriptedClassifier {
                script: Mutex::new(VecDeque::new()),
                gate: None,
            }),
        });
        let controller = SessionController::new(
            HeldCamera {
                probe: probe.clone(),
                barrier: barrier.clone(),
            },
            adapter,
            Aggregator::default(),
            WindowCapacity::default(),
        );
        controller.start().await.expect("starts");

        let tick = tokio::spawn({
            let controller = controller.clone();
            async move { controller.tick().await }
        });
        let entered = barrier.clone();
        tokio::task::spawn_blocking(move || entered.wait())
            .await
            .expect("read started");

        controller.stop();
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(probe.releases.load(Ordering::SeqCst), 0);

        let resume = barrier.clone();
        tokio::task::spawn_blocking(move || resume.wait())
            .await
            .expect("read resumed");
        assert_eq!(tick.await.expect("joins"), TickOutcome::Discarded);
        assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(Vec::new(), Some(gate.clone()), 0, false);
        h.controller.start().await.expect("starts");

        let (first, second) = tokio::join!(h.controller.tick(), async {
            let outcome = h.controller.tick().await;
            gate.notify_one();
            outcome
        });

        published(first);
        assert_eq!(second, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn stop_during_inference_discards_result() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(Vec::new(), Some(gate.clone()), 0, false);
        let readings = h.controller.subscribe_readings();
        h.controller.start().await.expect("starts");

        let (outcome, ()) = tokio::join!(h.controller.tick(), async {
            h.controller.stop();
            gate.notify_one();
        });

        assert_eq!(outcome, TickOutcome::Discarded);
        assert_eq!(*readings.borrow(), None);
        assert_eq!(h.probe.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_last_handle_releases_camera() {
        let h = harness();
        h.controller.start().await.expect("starts");
        let probe = h.probe.clone();
        drop(h);
        assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parallel_sessions_share_one_model_load() {
        let h = harness();
        let probe = CameraProbe::default();
        let other = SessionController::new(
            FakeCamera {
                probe: probe.clone(),
                deny: false,
                open_gate: None,
            },
            h.controller.shared.classifier.clone(),
            Aggregator::default(),
            WindowCapacity::default(),
        );

        let (a, b) = tokio::join!(h.controller.start(), other.start());
        a.expect("first starts");
        b.expect("second starts");
        assert_eq!(h.loads.load(Ordering::SeqCst), 1);
    }
}
