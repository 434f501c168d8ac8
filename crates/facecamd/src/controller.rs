//! Capture session controller: start, periodic detect-and-render tick, stop.
//!
//! All mutable state lives in one [`SessionState`] behind a mutex that is
//! never held across an `.await` and never held while the camera is touched.
//! Opening the camera and grabbing frames run on tokio's blocking pool
//! against a per-session [`Track`]; every tick carries its session id and
//! re-checks it after capture and detection, so a result from a stopped or
//! replaced session is dropped.

use chrono::{DateTime, Utc};
use facecam_core::{render, Detector, DetectionSettings, DetectorError, DrawingSurface, Outputs};
use facecam_hw::{CameraProvider, CaptureError, Frame, StreamConstraints, VideoSource};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Fixed period between detection ticks.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum StartError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("detector initialization failed: {0}")]
    DetectorInit(#[from] DetectorError),
}

impl From<CaptureError> for StartError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied(msg) => StartError::PermissionDenied(msg),
            other => StartError::DeviceUnavailable(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum TickError {
    #[error("frame capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("capture task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// What a tick did when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session was not running when the tick fired.
    Inactive,
    /// The session stopped while detection was pending; result dropped.
    Discarded,
    Applied { faces: usize },
}

/// Enabled state of the start/stop controls. Exactly one is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            start_enabled: true,
            stop_enabled: false,
        }
    }
}

impl Controls {
    fn running() -> Self {
        Self {
            start_enabled: false,
            stop_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Native stream resolution; the drawing surface is sized to match.
    pub width: u32,
    pub height: u32,
}

/// Snapshot reported over IPC.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub running: bool,
    pub session: Option<SessionInfo>,
    pub settings: DetectionSettings,
    pub outputs: Outputs,
    pub controls: Controls,
}

/// A video source that stops its tracks when the last handle goes away.
///
/// The session and an in-flight capture each hold a handle, so stopping a
/// session never waits on a capture; the camera is released as soon as that
/// capture returns.
struct Track(Box<dyn VideoSource>);

impl Drop for Track {
    fn drop(&mut self) {
        self.0.stop_tracks();
    }
}

type SharedTrack = Arc<Mutex<Track>>;

/// One live camera-to-detection binding.
///
/// Dropping it releases the camera and cancels the tick task, whichever
/// path tears it down.
struct Session {
    info: SessionInfo,
    track: Option<SharedTrack>,
    ticker: Option<JoinHandle<()>>,
    running: bool,
}

impl Session {
    fn release(&mut self) {
        self.running = false;
        self.track = None;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

/// Everything the tick loop and the control surface share.
pub struct SessionState<S> {
    pub settings: DetectionSettings,
    pub outputs: Outputs,
    pub controls: Controls,
    pub surface: S,
    /// Frame behind the current overlay, kept for snapshots.
    pub last_frame: Option<Frame>,
    session: Option<Session>,
}

impl<S: DrawingSurface> SessionState<S> {
    pub fn new(surface: S, settings: DetectionSettings) -> Self {
        Self {
            settings,
            outputs: Outputs::default(),
            controls: Controls::default(),
            surface,
            last_frame: None,
            session: None,
        }
    }

    fn running_session_id(&self) -> Option<Uuid> {
        self.session
            .as_ref()
            .filter(|s| s.running)
            .map(|s| s.info.id)
    }

    fn running_session(&self, id: Uuid) -> Option<&Session> {
        self.session
            .as_ref()
            .filter(|s| s.running && s.info.id == id)
    }
}

/// Lock ignoring poisoning: every writer leaves the state consistent.
fn lock_state<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clone-safe handle to the capture session state.
pub struct Controller<S> {
    state: Arc<Mutex<SessionState<S>>>,
    detector: Arc<dyn Detector>,
    camera: Arc<dyn CameraProvider>,
    period: Duration,
}

impl<S> Clone for Controller<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            detector: Arc::clone(&self.detector),
            camera: Arc::clone(&self.camera),
            period: self.period,
        }
    }
}

impl<S: DrawingSurface + 'static> Controller<S> {
    pub fn new(
        surface: S,
        settings: DetectionSettings,
        detector: Arc<dyn Detector>,
        camera: Arc<dyn CameraProvider>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::new(surface, settings))),
            detector,
            camera,
            period: TICK_PERIOD,
        }
    }

    #[cfg(test)]
    fn with_tick_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<S>> {
        lock_state(&self.state)
    }

    /// Start a session: load the detector, acquire the camera, begin ticking.
    ///
    /// Returns the running session's id unchanged if one is already active.
    pub async fn start(&self) -> Result<Uuid, StartError> {
        let existing = self.lock().running_session_id();
        if let Some(id) = existing {
            tracing::debug!(session = %id, "start: session already running");
            return Ok(id);
        }

        if let Err(e) = self.detector.initialize().await {
            tracing::error!(error = %e, "detector initialization failed; session not started");
            return Err(e.into());
        }

        let camera = Arc::clone(&self.camera);
        let constraints = StreamConstraints::default();
        let acquired = tokio::task::spawn_blocking(move || camera.acquire(&constraints))
            .await
            .map_err(|e| StartError::DeviceUnavailable(format!("camera open task failed: {e}")))?;
        let video = acquired.map_err(|e| {
            tracing::error!(error = %e, "camera acquisition failed; session not started");
            StartError::from(e)
        })?;
        let (width, height) = video.resolution();
        let track = Track(video);

        let mut state = self.lock();
        // Another start may have completed while the camera was opening;
        // dropping `track` releases the second stream.
        if let Some(id) = state.running_session_id() {
            return Ok(id);
        }

        let info = SessionInfo {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            width,
            height,
        };
        let id = info.id;

        state.surface.resize(width, height);
        state.controls = Controls::running();
        let ticker = tokio::spawn(self.clone().run_ticks(id));
        state.session = Some(Session {
            info,
            track: Some(Arc::new(Mutex::new(track))),
            ticker: Some(ticker),
            running: true,
        });

        tracing::info!(
            session = %id,
            width,
            height,
            period_ms = self.period.as_millis() as u64,
            "session started"
        );
        Ok(id)
    }

    /// Tick loop for one session. The first firing is one period after start.
    async fn run_ticks(self, id: Uuid) {
        let first = tokio::time::Instant::now() + self.period;
        let mut interval = tokio::time::interval_at(first, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match self.tick(id).await {
                Ok(TickOutcome::Applied { faces }) => {
                    tracing::trace!(session = %id, faces, "tick applied");
                }
                Ok(TickOutcome::Inactive) | Ok(TickOutcome::Discarded) => break,
                Err(e) => {
                    tracing::warn!(session = %id, error = %e, "tick failed; continuing");
                }
            }
        }
        tracing::debug!(session = %id, "tick loop exited");
    }

    /// One detect-and-render step for session `id`.
    ///
    /// The state lock is only taken to look up the session and to apply the
    /// result; capture and detection run without it.
    pub async fn tick(&self, id: Uuid) -> Result<TickOutcome, TickError> {
        let (track, settings) = {
            let state = self.lock();
            let Some(track) = state.running_session(id).and_then(|s| s.track.clone()) else {
                return Ok(TickOutcome::Inactive);
            };
            (track, state.settings)
        };

        let frame = tokio::task::spawn_blocking(move || {
            let mut guard = lock_state(&track);
            guard.0.capture_frame()
        })
        .await??;

        if self.lock().running_session(id).is_none() {
            tracing::debug!(session = %id, "session stopped during capture; frame dropped");
            return Ok(TickOutcome::Discarded);
        }

        let result = self
            .detector
            .analyze(&frame.data, frame.width, frame.height, &settings)
            .await?;

        let mut state = self.lock();
        if state.running_session(id).is_none() {
            tracing::debug!(session = %id, "session stopped during detection; result discarded");
            return Ok(TickOutcome::Discarded);
        }

        let SessionState {
            surface,
            outputs,
            last_frame,
            ..
        } = &mut *state;
        surface.clear();
        render::apply(surface, outputs, &result);
        *last_frame = Some(frame);
        Ok(TickOutcome::Applied {
            faces: result.len(),
        })
    }

    /// Stop the active session, if any. Idempotent.
    pub fn stop(&self) {
        let mut state = self.lock();
        let Some(mut session) = state.session.take() else {
            tracing::debug!("stop: no active session");
            return;
        };
        session.release();

        state.surface.clear();
        state.last_frame = None;
        state.outputs.reset();
        state.controls = Controls::default();
        tracing::info!(session = %session.info.id, "session stopped");
    }

    pub fn set_scale_factor(&self, scale_factor: f32) {
        self.lock().settings.scale_factor = scale_factor;
        tracing::debug!(scale_factor, "scale factor updated");
    }

    pub fn set_min_neighbors(&self, min_neighbors: u32) {
        self.lock().settings.min_neighbors = min_neighbors;
        tracing::debug!(min_neighbors, "min neighbors updated");
    }

    pub fn status(&self) -> Status {
        let state = self.lock();
        let session = state
            .session
            .as_ref()
            .filter(|s| s.running)
            .map(|s| s.info.clone());
        Status {
            running: session.is_some(),
            session,
            settings: state.settings,
            outputs: state.outputs.clone(),
            controls: state.controls,
        }
    }

    /// Run `f` against the drawing surface.
    pub fn with_surface<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock().surface)
    }

    /// Run `f` against the whole state, e.g. to compose a snapshot. Keep `f`
    /// short: ticks and IPC calls wait on it.
    pub fn with_state<R>(&self, f: impl FnOnce(&SessionState<S>) -> R) -> R {
        f(&self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use facecam_core::{BoundingBox, Detection, DisplayList, FrameResult};
    use facecam_hw::Frame;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const WIDTH: u32 = 32;
    const HEIGHT: u32 = 24;

    struct MockVideo {
        live: Arc<AtomicBool>,
        fail_capture: Arc<AtomicBool>,
        capture_delay: Duration,
        capturing: Arc<Notify>,
    }

    impl VideoSource for MockVideo {
        fn resolution(&self) -> (u32, u32) {
            (WIDTH, HEIGHT)
        }

        fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
            self.capturing.notify_one();
            std::thread::sleep(self.capture_delay);
            if !self.live.load(Ordering::SeqCst) {
                return Err(CaptureError::Stopped);
            }
            if self.fail_capture.load(Ordering::SeqCst) {
                return Err(CaptureError::CaptureFailed("dequeue timeout".into()));
            }
            Ok(Frame {
                data: vec![0; (WIDTH * HEIGHT) as usize],
                width: WIDTH,
                height: HEIGHT,
                timestamp: std::time::Instant::now(),
                sequence: 0,
            })
        }

        fn stop_tracks(&mut self) {
            self.live.store(false, Ordering::SeqCst);
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct MockCamera {
        deny: bool,
        acquired: AtomicUsize,
        live: Arc<AtomicBool>,
        fail_capture: Arc<AtomicBool>,
        capture_delay: Duration,
        capturing: Arc<Notify>,
    }

    impl CameraProvider for MockCamera {
        fn acquire(
            &self,
            constraints: &StreamConstraints,
        ) -> Result<Box<dyn VideoSource>, CaptureError> {
            assert_eq!(constraints.ideal_width, 640);
            assert_eq!(constraints.ideal_height, 480);
            self.acquired.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                return Err(CaptureError::PermissionDenied("user dismissed prompt".into()));
            }
            self.live.store(true, Ordering::SeqCst);
            Ok(Box::new(MockVideo {
                live: Arc::clone(&self.live),
                fail_capture: Arc::clone(&self.fail_capture),
                capture_delay: self.capture_delay,
                capturing: Arc::clone(&self.capturing),
            }))
        }
    }

    /// Returns queued results first, then `fallback` forever.
    #[derive(Default)]
    struct ScriptedDetector {
        init_fails: bool,
        queue: Mutex<VecDeque<Result<FrameResult, String>>>,
        fallback: FrameResult,
        calls: AtomicUsize,
        seen: Mutex<Vec<DetectionSettings>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl Detector for ScriptedDetector {
        async fn initialize(&self) -> Result<(), DetectorError> {
            if self.init_fails {
                return Err(DetectorError::ModelNotFound("seeta_fd_frontal_v1.0.bin".into()));
            }
            Ok(())
        }

        async fn analyze(
            &self,
            _gray: &[u8],
            _width: u32,
            _height: u32,
            settings: &DetectionSettings,
        ) -> Result<FrameResult, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(*settings);
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(msg)) => Err(DetectorError::AnalysisFailed(msg)),
                None => Ok(self.fallback.clone()),
            }
        }
    }

    fn face(expression: &str, score: f32, age: f32) -> Detection {
        Detection {
            bbox: BoundingBox {
                x: 4.0,
                y: 6.0,
                width: 10.0,
                height: 12.0,
            },
            expressions: [(expression, score)].into_iter().collect(),
            age: Some(age),
            age_group: None,
        }
    }

    fn two_faces() -> FrameResult {
        vec![
            Detection {
                expressions: [("happy", 0.9), ("neutral", 0.1)].into_iter().collect(),
                ..face("happy", 0.9, 10.0)
            },
            face("sad", 0.8, 40.0),
        ]
    }

    fn controller(
        detector: Arc<ScriptedDetector>,
        camera: Arc<MockCamera>,
    ) -> Controller<DisplayList> {
        Controller::new(DisplayList::new(), DetectionSettings::default(), detector, camera)
    }

    /// Controller whose timer never fires during a test; ticks are driven by hand.
    fn manual_controller(
        detector: Arc<ScriptedDetector>,
        camera: Arc<MockCamera>,
    ) -> Controller<DisplayList> {
        controller(detector, camera).with_tick_period(Duration::from_secs(3600))
    }

    fn surface_ops(c: &Controller<DisplayList>) -> usize {
        c.with_surface(|s| s.ops().len())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_permission_denied_stays_idle() {
        let detector = Arc::new(ScriptedDetector::default());
        let camera = Arc::new(MockCamera {
            deny: true,
            ..Default::default()
        });
        let c = controller(detector.clone(), camera.clone());

        let err = c.start().await.unwrap_err();
        assert!(matches!(err, StartError::PermissionDenied(_)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = c.status();
        assert!(!status.running);
        assert!(status.session.is_none());
        assert_eq!(status.controls, Controls::default());
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_init_failure_never_acquires_camera() {
        let detector = Arc::new(ScriptedDetector {
            init_fails: true,
            ..Default::default()
        });
        let camera = Arc::new(MockCamera::default());
        let c = controller(detector, camera.clone());

        assert!(matches!(c.start().await, Err(StartError::DetectorInit(_))));
        assert_eq!(camera.acquired.load(Ordering::SeqCst), 0);
        assert!(c.status().controls.start_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_session_ticks_and_renders() {
        let detector = Arc::new(ScriptedDetector {
            fallback: two_faces(),
            ..Default::default()
        });
        let camera = Arc::new(MockCamera::default());
        let c = controller(detector.clone(), camera.clone());

        let id = c.start().await.unwrap();
        let status = c.status();
        assert!(status.running);
        assert_eq!(status.session.as_ref().map(|s| s.id), Some(id));
        assert_eq!(
            status.controls,
            Controls {
                start_enabled: false,
                stop_enabled: true
            }
        );
        assert_eq!(c.with_surface(|s| s.size()), (WIDTH, HEIGHT));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(detector.calls.load(Ordering::SeqCst) >= 3);

        let outputs = c.status().outputs;
        assert_eq!(outputs.faces, "2");
        assert_eq!(outputs.expression, "Sad");
        assert_eq!(outputs.age, "40 years");
        // Cleared before each redraw: one frame's worth of ops, not an accumulation.
        assert_eq!(surface_ops(&c), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_before_first_period() {
        let detector = Arc::new(ScriptedDetector::default());
        let c = controller(detector.clone(), Arc::new(MockCamera::default()));
        c.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop() {
        let camera = Arc::new(MockCamera::default());
        let c = controller(Arc::new(ScriptedDetector::default()), camera.clone());

        let first = c.start().await.unwrap();
        let second = c.start().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(camera.acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_releases_camera() {
        let detector = Arc::new(ScriptedDetector {
            fallback: two_faces(),
            ..Default::default()
        });
        let camera = Arc::new(MockCamera::default());
        let c = controller(detector.clone(), camera.clone());

        c.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(c.status().outputs.faces, "2");

        c.stop();
        let once = c.status();
        assert!(!camera.live.load(Ordering::SeqCst));
        assert!(!once.running);
        assert_eq!(once.outputs, Outputs::default());
        assert_eq!(once.controls, Controls::default());
        assert_eq!(surface_ops(&c), 0);

        c.stop();
        let twice = c.status();
        assert_eq!(twice.outputs, once.outputs);
        assert_eq!(twice.controls, once.controls);
        assert!(!twice.running);

        let calls = detector.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(detector.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_stop_on_idle_controller() {
        let c = controller(Arc::new(ScriptedDetector::default()), Arc::new(MockCamera::default()));
        c.stop();
        assert_eq!(c.status().outputs, Outputs::default());
        assert!(c.status().controls.start_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_failure_keeps_loop_running() {
        let detector = Arc::new(ScriptedDetector {
            queue: Mutex::new(VecDeque::from(vec![
                Ok(vec![face("happy", 0.7, 30.0)]),
                Err("tensor shape mismatch".to_string()),
            ])),
            fallback: two_faces(),
            ..Default::default()
        });
        let c = controller(detector.clone(), Arc::new(MockCamera::default()));
        c.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(c.status().outputs.expression, "Happy");

        // Second tick fails: outputs untouched.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
        let outputs = c.status().outputs;
        assert_eq!(outputs.expression, "Happy");
        assert_eq!(outputs.age, "30 years");
        assert_eq!(outputs.faces, "1");

        // Third tick fires on schedule and succeeds.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(detector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(c.status().outputs.expression, "Sad");
        assert!(c.status().running);
    }

    #[tokio::test]
    async fn test_tick_reports_typed_errors() {
        let detector = Arc::new(ScriptedDetector {
            queue: Mutex::new(VecDeque::from(vec![Err("bad frame".to_string())])),
            ..Default::default()
        });
        let camera = Arc::new(MockCamera::default());
        let c = manual_controller(detector, camera.clone());
        let id = c.start().await.unwrap();

        assert!(matches!(c.tick(id).await, Err(TickError::Detection(_))));

        camera.fail_capture.store(true, Ordering::SeqCst);
        assert!(matches!(c.tick(id).await, Err(TickError::Capture(_))));

        camera.fail_capture.store(false, Ordering::SeqCst);
        assert_eq!(c.tick(id).await.unwrap(), TickOutcome::Applied { faces: 0 });
        assert!(c.status().running);
    }

    #[tokio::test]
    async fn test_tick_for_stopped_or_unknown_session_is_inactive() {
        let detector = Arc::new(ScriptedDetector::default());
        let c = manual_controller(detector.clone(), Arc::new(MockCamera::default()));
        let id = c.start().await.unwrap();

        assert_eq!(c.tick(Uuid::new_v4()).await.unwrap(), TickOutcome::Inactive);
        c.stop();
        assert_eq!(c.tick(id).await.unwrap(), TickOutcome::Inactive);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_capture_does_not_block_control_surface() {
        let camera = Arc::new(MockCamera {
            capture_delay: Duration::from_millis(400),
            ..Default::default()
        });
        let detector = Arc::new(ScriptedDetector {
            fallback: two_faces(),
            ..Default::default()
        });
        let c = manual_controller(detector, camera.clone());
        let id = c.start().await.unwrap();

        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.tick(id).await })
        };
        camera.capturing.notified().await;

        let started = std::time::Instant::now();
        let status = c.status();
        c.set_min_neighbors(7);
        assert!(status.running);
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "control calls waited {:?} behind a capture",
            started.elapsed()
        );

        assert_eq!(pending.await.unwrap().unwrap(), TickOutcome::Applied { faces: 2 });
        assert_eq!(c.status().outputs.faces, "2");
    }

    #[tokio::test]
    async fn test_stop_during_capture_releases_camera_when_capture_returns() {
        let camera = Arc::new(MockCamera {
            capture_delay: Duration::from_millis(300),
            ..Default::default()
        });
        let detector = Arc::new(ScriptedDetector::default());
        let c = manual_controller(detector.clone(), camera.clone());
        let id = c.start().await.unwrap();

        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.tick(id).await })
        };
        camera.capturing.notified().await;

        let started = std::time::Instant::now();
        c.stop();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!c.status().running);

        assert_eq!(pending.await.unwrap().unwrap(), TickOutcome::Discarded);
        assert!(!camera.live.load(Ordering::SeqCst));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_last_frame_kept_for_snapshots() {
        let detector = Arc::new(ScriptedDetector {
            fallback: two_faces(),
            ..Default::default()
        });
        let c = manual_controller(detector, Arc::new(MockCamera::default()));
        let id = c.start().await.unwrap();
        assert!(c.with_state(|s| s.last_frame.is_none()));

        c.tick(id).await.unwrap();
        let dims = c.with_state(|s| s.last_frame.as_ref().map(|f| (f.width, f.height)));
        assert_eq!(dims, Some((WIDTH, HEIGHT)));

        c.stop();
        assert!(c.with_state(|s| s.last_frame.is_none()));
    }

    #[tokio::test]
    async fn test_stop_while_detection_pending_discards_result() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let detector = Arc::new(ScriptedDetector {
            fallback: two_faces(),
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let c = manual_controller(detector, Arc::new(MockCamera::default()));
        let id = c.start().await.unwrap();

        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.tick(id).await })
        };
        entered.notified().await;
        c.stop();
        release.notify_one();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, TickOutcome::Discarded);
        assert_eq!(c.status().outputs, Outputs::default());
        assert_eq!(surface_ops(&c), 0);
    }

    #[tokio::test]
    async fn test_restart_does_not_apply_previous_session_result() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let detector = Arc::new(ScriptedDetector {
            fallback: two_faces(),
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let c = manual_controller(detector, Arc::new(MockCamera::default()));
        let old = c.start().await.unwrap();

        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.tick(old).await })
        };
        entered.notified().await;
        c.stop();
        let new = c.start().await.unwrap();
        assert_ne!(old, new);
        release.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), TickOutcome::Discarded);
        assert_eq!(c.status().outputs, Outputs::default());
    }

    #[tokio::test]
    async fn test_settings_read_fresh_each_tick() {
        let detector = Arc::new(ScriptedDetector::default());
        let c = manual_controller(detector.clone(), Arc::new(MockCamera::default()));
        let id = c.start().await.unwrap();

        c.tick(id).await.unwrap();
        c.set_scale_factor(1.3);
        c.set_min_neighbors(8);
        c.tick(id).await.unwrap();

        let seen = detector.seen.lock().unwrap().clone();
        assert_eq!(seen[0], DetectionSettings::default());
        assert_eq!(
            seen[1],
            DetectionSettings {
                scale_factor: 1.3,
                min_neighbors: 8
            }
        );
        assert_eq!(c.status().settings.min_neighbors, 8);
    }

    #[test]
    fn test_dropping_session_releases_camera() {
        let live = Arc::new(AtomicBool::new(true));
        let session = Session {
            info: SessionInfo {
                id: Uuid::new_v4(),
                started_at: Utc::now(),
                width: WIDTH,
                height: HEIGHT,
            },
            track: Some(Arc::new(Mutex::new(Track(Box::new(MockVideo {
                live: live.clone(),
                fail_capture: Arc::new(AtomicBool::new(false)),
                capture_delay: Duration::ZERO,
                capturing: Arc::new(Notify::new()),
            }))))),
            ticker: None,
            running: true,
        };
        drop(session);
        assert!(!live.load(Ordering::SeqCst));
    }

    #[test]
    fn test_capture_error_maps_to_start_error() {
        assert!(matches!(
            StartError::from(CaptureError::PermissionDenied("x".into())),
            StartError::PermissionDenied(_)
        ));
        assert!(matches!(
            StartError::from(CaptureError::DeviceUnavailable("x".into())),
            StartError::DeviceUnavailable(_)
        ));
        assert!(matches!(
            StartError::from(CaptureError::FormatNegotiationFailed("x".into())),
            StartError::DeviceUnavailable(_)
        ));
    }
}
