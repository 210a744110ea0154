//! Capture session lifecycle.
//!
//! `SessionManager` owns at most one active session: an open video source and
//! the single background worker that reads, processes and publishes frames.
//!
//! States: `Idle -> Connecting -> Running -> (Stopping -> Idle | Failed -> Idle)`.
//!
//! - `connect` always stops the previous session first, joining its worker, so
//!   two producers never write to the published state at once.
//! - The worker absorbs transient read failures with a short backoff. Past
//!   `max_consecutive_failures` it marks the session `Failed` with
//!   "connection lost", releases the source and exits.
//! - `disconnect` is cooperative: it clears the running flag, waits a bounded
//!   time for the worker, then releases the source. A worker that does not
//!   exit in time is detached and its handle reported as leaked.
//!
//! HTTP handlers only ever read the published `FrameResult` and the status
//! fields; they never wait on the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::classify::ClassifiedDetection;
use crate::detect::{ModelLoader, SharedDetector};
use crate::error::SessionError;
use crate::frame::{FrameCell, FrameResult};
use crate::ingest::{FrameSource, SourceOpener};
use crate::pipeline::FramePipeline;

type SourceSlot = Arc<Mutex<Option<Box<dyn FrameSource>>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Connecting,
    Running,
    Stopping,
    Failed,
}

/// Snapshot of the session for status endpoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub is_running: bool,
    pub last_error: Option<String>,
    pub frame_count: u64,
    pub source_url: Option<String>,
    pub controller_address: Option<String>,
    pub model_loaded: bool,
    pub has_frame: bool,
    pub detection_count: usize,
}

/// Capture loop tuning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Consecutive read failures tolerated before the stream counts as lost.
    pub max_consecutive_failures: u32,
    pub retry_backoff_ms: u64,
    /// Bound on how long `disconnect` waits for the worker to exit.
    pub stop_timeout_ms: u64,
    /// Pause between opening a source and the validating read.
    pub open_settle_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 30,
            retry_backoff_ms: 10,
            stop_timeout_ms: 2_000,
            open_settle_ms: 500,
        }
    }
}

#[derive(Debug)]
struct SessionShared {
    state: SessionState,
    last_error: Option<String>,
    frame_count: u64,
    source_url: Option<String>,
    controller_address: Option<String>,
}

struct ActiveSession {
    running: Arc<AtomicBool>,
    source: SourceSlot,
    done: mpsc::Receiver<()>,
    join: JoinHandle<()>,
}

pub struct SessionManager {
    opener: Arc<dyn SourceOpener>,
    models: ModelLoader,
    pipeline: Arc<FramePipeline>,
    settings: CaptureSettings,
    shared: Arc<Mutex<SessionShared>>,
    cell: Arc<FrameCell>,
    /// Held for the whole of connect/disconnect, serializing lifecycle changes.
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        models: ModelLoader,
        pipeline: FramePipeline,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            opener,
            models,
            pipeline: Arc::new(pipeline),
            settings,
            shared: Arc::new(Mutex::new(SessionShared {
                state: SessionState::Idle,
                last_error: None,
                frame_count: 0,
                source_url: None,
                controller_address: None,
            })),
            cell: Arc::new(FrameCell::new()),
            active: Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// Stop any current session, then open `source_url` and start capturing.
    ///
    /// Fails when the model cannot be loaded, the source cannot be opened, or
    /// the source opens but does not deliver a first frame. On failure the
    /// session is left `Failed` with `last_error` set.
    pub fn connect(&self, source_url: &str, controller_address: &str) -> Result<(), SessionError> {
        let mut active = lock(&self.active);
        self.stop_locked(&mut active);

        {
            let mut shared = lock(&self.shared);
            shared.state = SessionState::Connecting;
            shared.last_error = None;
            shared.frame_count = 0;
            shared.source_url = Some(source_url.to_string());
            shared.controller_address = Some(controller_address.to_string());
        }
        log::info!("connecting to {} (controller {})", source_url, controller_address);

        match self.start(source_url) {
            Ok(session) => {
                *active = Some(session);
                log::info!("session running: {}", source_url);
                Ok(())
            }
            Err(err) => {
                log::warn!("connect failed: {}", err);
                let mut shared = lock(&self.shared);
                shared.state = SessionState::Failed;
                shared.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Stop the current session. Safe to call when already idle.
    pub fn disconnect(&self) {
        let mut active = lock(&self.active);
        self.stop_locked(&mut active);
    }

    /// Latest published result, image and detections together.
    pub fn latest_frame(&self) -> Option<Arc<FrameResult>> {
        self.cell.latest()
    }

    /// Convenience accessor for the latest annotated image.
    pub fn latest_image(&self) -> Option<RgbImage> {
        self.cell.latest().map(|result| result.image.clone())
    }

    pub fn latest_detections(&self) -> Vec<ClassifiedDetection> {
        self.cell
            .latest()
            .map(|result| result.detections.clone())
            .unwrap_or_default()
    }

    pub fn status(&self) -> SessionStatus {
        let latest = self.cell.latest();
        let shared = lock(&self.shared);
        SessionStatus {
            state: shared.state,
            is_running: shared.state == SessionState::Running,
            last_error: shared.last_error.clone(),
            frame_count: shared.frame_count,
            source_url: shared.source_url.clone(),
            controller_address: shared.controller_address.clone(),
            model_loaded: self.models.is_loaded(),
            has_frame: latest.is_some(),
            detection_count: latest.map(|r| r.detections.len()).unwrap_or(0),
        }
    }

    /// Controller address from the most recent connect request.
    pub fn controller_address(&self) -> Option<String> {
        lock(&self.shared).controller_address.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared).last_error.clone()
    }

    fn start(&self, source_url: &str) -> Result<ActiveSession, SessionError> {
        let detector = self
            .models
            .get_or_load()
            .map_err(|err| SessionError::ModelLoad(format!("{:#}", err)))?;

        let mut source =
            self.opener
                .open(source_url)
                .map_err(|err| SessionError::SourceUnavailable {
                    url: source_url.to_string(),
                    reason: format!("{:#}", err),
                })?;

        if self.settings.open_settle_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.settings.open_settle_ms));
        }
        match source.read_frame() {
            Ok(frame) => log::info!(
                "stream connected: {} ({}x{})",
                source.describe(),
                frame.width(),
                frame.height()
            ),
            Err(err) => {
                source.release();
                return Err(SessionError::SourceUnreadable {
                    url: source_url.to_string(),
                    reason: format!("{:#}", err),
                });
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let source: SourceSlot = Arc::new(Mutex::new(Some(source)));
        let (done_tx, done_rx) = mpsc::channel();
        let worker = CaptureWorker {
            running: running.clone(),
            source: source.clone(),
            shared: self.shared.clone(),
            cell: self.cell.clone(),
            detector,
            pipeline: self.pipeline.clone(),
            settings: self.settings.clone(),
            done: done_tx,
        };

        lock(&self.shared).state = SessionState::Running;
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || worker.run());
        let join = match join {
            Ok(join) => join,
            Err(err) => {
                if let Some(mut source) = lock(&source).take() {
                    source.release();
                }
                return Err(SessionError::WorkerSpawn(err.to_string()));
            }
        };

        Ok(ActiveSession {
            running,
            source,
            done: done_rx,
            join,
        })
    }

    fn stop_locked(&self, active: &mut Option<ActiveSession>) {
        let Some(session) = active.take() else {
            let mut shared = lock(&self.shared);
            if shared.state != SessionState::Idle {
                log::info!("session {:?} -> Idle", shared.state);
                shared.state = SessionState::Idle;
            }
            drop(shared);
            self.cell.clear();
            return;
        };

        session.running.store(false, Ordering::SeqCst);
        {
            let mut shared = lock(&self.shared);
            if shared.state == SessionState::Running {
                shared.state = SessionState::Stopping;
            }
        }

        let timeout = Duration::from_millis(self.settings.stop_timeout_ms);
        match session.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if session.join.join().is_err() {
                    log::warn!("capture worker panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "capture worker did not exit within {:?}; detaching it",
                    timeout
                );
            }
        }

        match session.source.try_lock() {
            Ok(mut slot) => release_slot(&mut slot),
            Err(TryLockError::Poisoned(poisoned)) => release_slot(&mut poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                log::warn!("video source still held by detached worker; handle leaked");
            }
        }

        self.cell.clear();
        lock(&self.shared).state = SessionState::Idle;
        log::info!("session stopped");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if active.is_some() {
            self.stop_locked(&mut active);
        }
    }
}

// ----------------------------------------------------------------------------
// Capture worker
// ----------------------------------------------------------------------------

struct CaptureWorker {
    running: Arc<AtomicBool>,
    source: SourceSlot,
    shared: Arc<Mutex<SessionShared>>,
    cell: Arc<FrameCell>,
    detector: SharedDetector,
    pipeline: Arc<FramePipeline>,
    settings: CaptureSettings,
    done: mpsc::Sender<()>,
}

impl CaptureWorker {
    fn run(self) {
        let backoff = Duration::from_millis(self.settings.retry_backoff_ms);
        let mut failures = 0u32;

        while self.running.load(Ordering::SeqCst) {
            let read = {
                let mut slot = lock(&self.source);
                match slot.as_mut() {
                    Some(source) => source.read_frame(),
                    None => break,
                }
            };

            let frame = match read {
                Ok(frame) => frame,
                Err(err) => {
                    failures += 1;
                    if failures > self.settings.max_consecutive_failures {
                        self.fail(failures);
                        break;
                    }
                    log::debug!("frame read failed ({} consecutive): {:#}", failures, err);
                    std::thread::sleep(backoff);
                    continue;
                }
            };
            failures = 0;

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let frame_index = {
                let mut shared = lock(&self.shared);
                shared.frame_count += 1;
                shared.frame_count
            };

            let result = {
                let mut detector = lock(&self.detector);
                self.pipeline.process(&mut **detector, frame, frame_index)
            };

            // A detached worker must not publish into a newer session.
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.cell.publish(result);
        }

        let _ = self.done.send(());
    }

    fn fail(&self, failures: u32) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::error!(
            "{} consecutive frame read failures; stream lost",
            failures
        );
        {
            let mut shared = lock(&self.shared);
            shared.state = SessionState::Failed;
            shared.last_error = Some(SessionError::StreamLost.to_string());
        }
        release_slot(&mut lock(&self.source));
        self.cell.clear();
    }
}

fn release_slot(slot: &mut Option<Box<dyn FrameSource>>) {
    if let Some(mut source) = slot.take() {
        log::info!("releasing video source {}", source.describe());
        source.release();
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
