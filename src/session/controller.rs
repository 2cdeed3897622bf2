//! Capture controller: owns the camera session and the still capture.
//!
//! # Session epochs
//!
//! Every bind and every teardown moves the controller to a new epoch,
//! published on a `watch` channel. A capture remembers the epoch it started
//! in; if the epoch moves while it is pending, the result is discarded with
//! [`CaptureError::SessionClosed`].
//!
//! # Frame release
//!
//! Acquire, decode and release run as one job on the blocking pool. A
//! capture never completes before that job has finished, so by the time any
//! result or error reaches the caller the frame is back with the hardware,
//! even when the capture was interrupted by teardown or by its timeout.
//!
//! # Teardown
//!
//! Unbinding never waits on the hardware. The epoch moves and the preview
//! stops on the calling thread; closing the backend happens on the blocking
//! pool once any pending acquisition lets go of it.

use super::lease::DeviceLease;
use super::lifecycle::LifecycleHandle;
use super::preview::{self, PreviewPump, PreviewSurface};
use crate::capture::{decode, CameraBackend, CaptureConfig, CapturedImage, PreviewConfig};
use crate::error::{CaptureError, CaptureErrorKind};
use crate::permission::CameraAccess;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub(crate) type SharedBackend = Arc<Mutex<Box<dyn CameraBackend>>>;

pub(crate) fn lock_backend(
    backend: &SharedBackend,
) -> Result<MutexGuard<'_, Box<dyn CameraBackend>>, CaptureError> {
    backend
        .lock()
        .map_err(|_| CaptureError::HardwareCaptureFailure("camera backend lock poisoned".into()))
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No session; capture is unavailable.
    Unbound,
    /// Bound and ready for a capture.
    Idle,
    /// Bound with a capture in flight.
    Capturing,
}

/// Point-in-time capture counters.
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    /// Whether a session is currently bound.
    pub bound: bool,
    /// Hardware sessions opened over the controller's life.
    pub sessions_opened: u64,
    /// Stills delivered to callers.
    pub captures_delivered: u64,
    /// Failed attempts by kind. Teardown discards are not included.
    pub failures: HashMap<CaptureErrorKind, u64>,
    /// Results discarded because their session was torn down.
    pub dropped: u64,
    /// Preview frames rendered.
    pub preview_frames: u64,
    /// Duration of the most recent successful capture.
    pub last_capture: Option<Duration>,
}

impl CaptureStats {
    /// Total failures across all kinds.
    pub fn total_failures(&self) -> u64 {
        self.failures.values().sum()
    }
}

#[derive(Debug, Default)]
struct Counters {
    sessions_opened: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    preview_frames: Arc<AtomicU64>,
    failures: Mutex<HashMap<CaptureErrorKind, u64>>,
    last_capture_micros: AtomicU64,
}

/// Where teardown closes the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Close {
    /// On the calling thread, which is about to reopen the hardware anyway.
    Inline,
    /// On the blocking pool, so the caller never waits on a pending acquire.
    Background,
}

struct Session {
    handle: LifecycleHandle,
    surface: Option<Arc<dyn PreviewSurface>>,
    preview_task: Option<JoinHandle<()>>,
    _lease: DeviceLease,
}

struct Inner {
    capture: CaptureConfig,
    preview: PreviewConfig,
    backend: SharedBackend,
    session: Mutex<Option<Session>>,
    epoch: watch::Sender<u64>,
    /// `epoch + 1` of the capture in flight, 0 when none.
    in_flight: AtomicU64,
    counters: Counters,
    _access: CameraAccess,
}

impl Inner {
    fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    fn teardown(&self, mut session: Session, close: Close) {
        // Epoch first: pending captures must see the teardown before the
        // hardware goes away.
        self.epoch.send_modify(|epoch| *epoch += 1);
        let epoch = self.epoch();

        if let Some(task) = session.preview_task.take() {
            task.abort();
        }
        if let Some(surface) = session.surface.take() {
            surface.on_detached();
        }

        let runtime = match close {
            Close::Background => tokio::runtime::Handle::try_current().ok(),
            Close::Inline => None,
        };
        match runtime {
            Some(runtime) => {
                let backend = Arc::clone(&self.backend);
                let epoch_rx = self.epoch.subscribe();
                runtime.spawn_blocking(move || {
                    close_backend(&backend, || *epoch_rx.borrow() == epoch)
                });
            }
            None => close_backend(&self.backend, || true),
        }

        tracing::info!(
            handle = session.handle.id(),
            device_id = self.capture.device_id,
            epoch,
            "Capture session unbound"
        );
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = match self.session.get_mut() {
            Ok(session) => session.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(session) = session {
            self.teardown(session, Close::Background);
        }
    }
}

/// Closes the backend unless a newer session has reopened it meanwhile.
///
/// `still_current` is evaluated under the backend lock; `bind` moves the
/// epoch under the same lock, so the check cannot interleave with a reopen.
fn close_backend(backend: &SharedBackend, still_current: impl FnOnce() -> bool) {
    let mut backend = backend.lock().unwrap_or_else(PoisonError::into_inner);
    if still_current() {
        backend.close();
    } else {
        tracing::debug!("Backend reopened before close ran; close skipped");
    }
}

/// Resets the in-flight marker when a capture ends, however it ends.
struct InFlight<'a> {
    slot: &'a AtomicU64,
    marker: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.marker, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Owns the camera hardware session and performs single-shot captures.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct CaptureController {
    inner: Arc<Inner>,
}

impl CaptureController {
    /// Configures a controller for still capture.
    ///
    /// Requires a [`CameraAccess`] grant; the backend is not opened until
    /// [`bind`](Self::bind).
    pub fn new(
        access: CameraAccess,
        backend: Box<dyn CameraBackend>,
        capture: CaptureConfig,
        preview: PreviewConfig,
    ) -> Result<Self, CaptureError> {
        capture.validate()?;
        preview.validate()?;

        let (epoch, _) = watch::channel(0);
        tracing::debug!(
            device_id = capture.device_id,
            use_case = ?capture.use_case,
            width = capture.width,
            height = capture.height,
            "Capture controller configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                capture,
                preview,
                backend: Arc::new(Mutex::new(backend)),
                session: Mutex::new(None),
                epoch,
                in_flight: AtomicU64::new(0),
                counters: Counters::default(),
                _access: access,
            }),
        })
    }

    /// Binds the hardware session to a UI lifetime and preview surface.
    ///
    /// Binding the handle that is already bound does not touch the
    /// hardware; a different surface is simply swapped in. Binding a new
    /// handle tears the previous session down first.
    pub fn bind(
        &self,
        handle: LifecycleHandle,
        surface: Option<Arc<dyn PreviewSurface>>,
    ) -> Result<(), CaptureError> {
        let mut slot = self.lock_session()?;

        if let Some(current) = slot.as_mut() {
            if current.handle == handle {
                if same_surface(&current.surface, &surface) {
                    tracing::debug!(handle = handle.id(), "Already bound");
                    return Ok(());
                }
                if let Some(task) = current.preview_task.take() {
                    task.abort();
                }
                if let Some(old) = current.surface.take() {
                    old.on_detached();
                }
                current.preview_task = self.start_preview(surface.clone(), self.inner.epoch());
                current.surface = surface;
                tracing::debug!(handle = handle.id(), "Preview surface replaced");
                return Ok(());
            }
        }

        if let Some(previous) = slot.take() {
            self.inner.teardown(previous, Close::Inline);
        }

        let lease = DeviceLease::acquire(self.inner.capture.device_id)?;
        let epoch = {
            let mut backend = lock_backend(&self.inner.backend)?;
            backend.open(&self.inner.capture, &self.inner.preview)?;
            self.inner.epoch.send_modify(|epoch| *epoch += 1);
            self.inner.epoch()
        };
        self.inner
            .counters
            .sessions_opened
            .fetch_add(1, Ordering::Relaxed);

        *slot = Some(Session {
            handle,
            preview_task: self.start_preview(surface.clone(), epoch),
            surface,
            _lease: lease,
        });

        tracing::info!(
            handle = handle.id(),
            device_id = self.inner.capture.device_id,
            epoch,
            "Capture session bound"
        );
        Ok(())
    }

    /// Tears down the current session, if any.
    pub fn unbind(&self) {
        let session = match self.lock_session() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(session) = session {
            self.inner.teardown(session, Close::Background);
        }
    }

    /// Tears down the session only if it belongs to `handle`.
    ///
    /// Returns true if a session was torn down.
    pub fn unbind_handle(&self, handle: LifecycleHandle) -> bool {
        let session = match self.lock_session() {
            Ok(mut slot) => {
                let owned = slot.as_ref().is_some_and(|s| s.handle == handle);
                if owned {
                    slot.take()
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        match session {
            Some(session) => {
                self.inner.teardown(session, Close::Background);
                true
            }
            None => false,
        }
    }

    /// Captures one still image.
    ///
    /// Acquisition and decode run on the blocking pool; the result is
    /// returned to the awaiting task. Fails immediately with
    /// [`CaptureError::BindingUnavailable`] when unbound and with
    /// [`CaptureError::Busy`] when another capture is in flight.
    ///
    /// A capture that outlives `capture_timeout_ms` fails with
    /// [`CaptureError::HardwareCaptureFailure`], but only once the hardware
    /// has handed its frame back; until then the controller stays
    /// [`ControllerState::Capturing`].
    pub async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        let started = Instant::now();
        let result = self.run_capture().await;

        let counters = &self.inner.counters;
        match &result {
            Ok(image) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                let elapsed = started.elapsed();
                counters
                    .last_capture_micros
                    .store(elapsed.as_micros() as u64, Ordering::Relaxed);
                tracing::debug!(
                    width = image.width(),
                    height = image.height(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Still captured"
                );
            }
            Err(CaptureError::SessionClosed) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Capture discarded after teardown");
            }
            Err(e) => {
                if let Ok(mut failures) = counters.failures.lock() {
                    *failures.entry(e.kind()).or_insert(0) += 1;
                }
                tracing::debug!(error = %e, "Capture failed");
            }
        }

        result
    }

    async fn run_capture(&self) -> Result<CapturedImage, CaptureError> {
        let epoch = self.inner.epoch();
        if self.lock_session()?.is_none() {
            return Err(CaptureError::BindingUnavailable);
        }

        let marker = epoch + 1;
        let current = self.inner.in_flight.load(Ordering::SeqCst);
        if current == marker
            || self
                .inner
                .in_flight
                .compare_exchange(current, marker, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(CaptureError::Busy);
        }
        let _in_flight = InFlight {
            slot: &self.inner.in_flight,
            marker,
        };

        let mut epoch_rx = self.inner.epoch.subscribe();
        let backend = Arc::clone(&self.inner.backend);
        let apply_rotation = self.inner.capture.apply_rotation;
        let timeout = self.inner.capture.capture_timeout();
        let mut pipeline =
            tokio::task::spawn_blocking(move || still_pipeline(&backend, apply_rotation));
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let finished = tokio::select! {
            joined = &mut pipeline => Ok(joined),
            _ = preview::torn_down(&mut epoch_rx, epoch) => Err(CaptureError::SessionClosed),
            _ = &mut deadline => Err(CaptureError::HardwareCaptureFailure(format!(
                "no frame within {} ms",
                timeout.as_millis()
            ))),
        };

        let result = match finished {
            Ok(joined) => joined.unwrap_or_else(|e| {
                Err(CaptureError::HardwareCaptureFailure(format!(
                    "capture worker failed: {e}"
                )))
            }),
            Err(interrupted) => {
                // The acquisition is still running; its frame goes back
                // before the caller or the next capture hears anything.
                let _ = pipeline.await;
                Err(interrupted)
            }
        };

        if self.inner.epoch() != epoch {
            return Err(CaptureError::SessionClosed);
        }
        result
    }

    /// Current state of the session state machine.
    pub fn state(&self) -> ControllerState {
        let bound = self.lock_session().map(|s| s.is_some()).unwrap_or(false);
        if !bound {
            return ControllerState::Unbound;
        }
        if self.inner.in_flight.load(Ordering::SeqCst) == self.inner.epoch() + 1 {
            ControllerState::Capturing
        } else {
            ControllerState::Idle
        }
    }

    /// Current session epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch()
    }

    /// Lifetime the controller is bound to, if any.
    pub fn bound_handle(&self) -> Option<LifecycleHandle> {
        self.lock_session()
            .ok()
            .and_then(|slot| slot.as_ref().map(|s| s.handle))
    }

    /// The configuration the controller was built with.
    pub fn config(&self) -> &CaptureConfig {
        &self.inner.capture
    }

    /// Snapshot of capture counters.
    pub fn stats(&self) -> CaptureStats {
        let counters = &self.inner.counters;
        let last = counters.last_capture_micros.load(Ordering::Relaxed);
        CaptureStats {
            bound: self.state() != ControllerState::Unbound,
            sessions_opened: counters.sessions_opened.load(Ordering::Relaxed),
            captures_delivered: counters.delivered.load(Ordering::Relaxed),
            failures: counters
                .failures
                .lock()
                .map(|f| f.clone())
                .unwrap_or_default(),
            dropped: counters.dropped.load(Ordering::Relaxed),
            preview_frames: counters.preview_frames.load(Ordering::Relaxed),
            last_capture: (last > 0).then(|| Duration::from_micros(last)),
        }
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<Session>>, CaptureError> {
        self.inner
            .session
            .lock()
            .map_err(|_| CaptureError::HardwareCaptureFailure("session lock poisoned".into()))
    }

    fn start_preview(
        &self,
        surface: Option<Arc<dyn PreviewSurface>>,
        epoch: u64,
    ) -> Option<JoinHandle<()>> {
        let surface = surface?;
        if !self.inner.preview.enabled {
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; preview disabled for this session");
            return None;
        };

        let pump = PreviewPump {
            backend: Arc::clone(&self.inner.backend),
            surface,
            interval: self.inner.preview.frame_interval(),
            apply_rotation: self.inner.capture.apply_rotation,
            epoch,
            epoch_rx: self.inner.epoch.subscribe(),
            rendered: Arc::clone(&self.inner.counters.preview_frames),
        };
        Some(runtime.spawn(pump.run()))
    }
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("device_id", &self.inner.capture.device_id)
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish()
    }
}

fn same_surface(a: &Option<Arc<dyn PreviewSurface>>, b: &Option<Arc<dyn PreviewSurface>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Acquire, decode, release. Runs on the blocking pool.
///
/// The frame is released on every path out of here, including when the
/// awaiting capture has already given up on the result.
fn still_pipeline(
    backend: &SharedBackend,
    apply_rotation: bool,
) -> Result<CapturedImage, CaptureError> {
    let frame = lock_backend(backend)?.acquire_still()?;
    let decoded = decode(&frame, apply_rotation);
    frame.release();
    Ok(decoded?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MockCamera;
    use crate::session::testing::{granted_access, settle, test_configs, CountingSurface};

    fn controller() -> (CaptureController, crate::capture::MockControl) {
        let camera = MockCamera::new();
        let control = camera.control();
        let (capture, preview) = test_configs();
        let controller =
            CaptureController::new(granted_access(), Box::new(camera), capture, preview).unwrap();
        (controller, control)
    }

    #[tokio::test]
    async fn test_capture_while_unbound_fails_fast() {
        let (controller, control) = controller();
        assert_eq!(controller.state(), ControllerState::Unbound);

        let result = controller.capture().await;
        assert!(matches!(result, Err(CaptureError::BindingUnavailable)));
        assert_eq!(control.still_count(), 0);
        assert_eq!(controller.state(), ControllerState::Unbound);
    }

    #[tokio::test]
    async fn test_capture_success_releases_frame() {
        let (controller, control) = controller();
        controller.bind(LifecycleHandle::new(), None).unwrap();

        let image = controller.capture().await.unwrap();
        assert!(image.width() > 0 && image.height() > 0);
        assert!(image.is_valid());

        assert_eq!(control.ledger().acquired(), 1);
        assert_eq!(control.ledger().released(), 1);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.stats().captures_delivered, 1);
    }

    #[tokio::test]
    async fn test_hardware_failure_returns_to_idle() {
        let (controller, control) = controller();
        controller.bind(LifecycleHandle::new(), None).unwrap();

        control.fail_next_capture();
        let result = controller.capture().await;
        assert!(matches!(
            result,
            Err(CaptureError::HardwareCaptureFailure(_))
        ));
        assert_eq!(controller.state(), ControllerState::Idle);

        assert!(controller.capture().await.is_ok());
        let stats = controller.stats();
        assert_eq!(
            stats.failures.get(&CaptureErrorKind::HardwareCaptureFailure),
            Some(&1)
        );
        assert_eq!(stats.captures_delivered, 1);
    }

    #[tokio::test]
    async fn test_decode_failure_still_releases_frame() {
        let (controller, control) = controller();
        controller.bind(LifecycleHandle::new(), None).unwrap();

        control.corrupt_next_capture();
        let result = controller.capture().await;
        assert!(matches!(result, Err(CaptureError::DecodeFailure(_))));
        assert_eq!(control.ledger().outstanding(), 0);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_bind_same_handle_is_idempotent() {
        let (controller, control) = controller();
        let handle = LifecycleHandle::new();
        let surface: Arc<dyn PreviewSurface> = Arc::new(CountingSurface::default());

        controller.bind(handle, Some(surface.clone())).unwrap();
        let epoch = controller.epoch();
        controller.bind(handle, Some(surface)).unwrap();

        assert_eq!(control.open_count(), 1);
        assert_eq!(controller.epoch(), epoch);
        assert_eq!(controller.stats().sessions_opened, 1);
        assert_eq!(controller.bound_handle(), Some(handle));
    }

    #[tokio::test]
    async fn test_bind_new_handle_replaces_session() {
        let (controller, control) = controller();
        let first = LifecycleHandle::new();
        let second = LifecycleHandle::new();

        controller.bind(first, None).unwrap();
        controller.bind(second, None).unwrap();

        assert_eq!(control.open_count(), 2);
        assert_eq!(control.close_count(), 1);
        assert_eq!(controller.bound_handle(), Some(second));
        assert!(!controller.unbind_handle(first));
        assert!(controller.unbind_handle(second));
        assert_eq!(controller.state(), ControllerState::Unbound);
        settle(|| control.close_count() == 2).await;
        assert_eq!(control.close_count(), 2);
    }

    #[tokio::test]
    async fn test_bind_same_handle_swaps_surface() {
        let (controller, control) = controller();
        let handle = LifecycleHandle::new();
        let first = Arc::new(CountingSurface::default());
        let second = Arc::new(CountingSurface::default());

        controller
            .bind(handle, Some(first.clone() as Arc<dyn PreviewSurface>))
            .unwrap();
        settle(|| first.rendered() >= 2).await;
        assert!(first.rendered() >= 2);

        controller
            .bind(handle, Some(second.clone() as Arc<dyn PreviewSurface>))
            .unwrap();
        assert_eq!(first.detached(), 1);
        assert_eq!(control.open_count(), 1);
        assert_eq!(control.close_count(), 0);
        let first_frames = first.rendered();

        settle(|| second.rendered() >= 2).await;
        assert!(second.rendered() >= 2);
        assert_eq!(first.rendered(), first_frames);
        assert_eq!(second.detached(), 0);
        assert_eq!(controller.stats().sessions_opened, 1);
    }

    #[tokio::test]
    async fn test_overlapping_capture_is_rejected() {
        let (controller, control) = controller();
        controller.bind(LifecycleHandle::new(), None).unwrap();
        control.set_latency(Duration::from_millis(50));

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.capture().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.state(), ControllerState::Capturing);

        let second = controller.capture().await;
        assert!(matches!(second, Err(CaptureError::Busy)));

        assert!(first.await.unwrap().is_ok());
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(control.still_count(), 1);
    }

    fn slow_controller(timeout_ms: u64) -> (CaptureController, crate::capture::MockControl) {
        let camera = MockCamera::new();
        let control = camera.control();
        let (mut capture, preview) = test_configs();
        capture.capture_timeout_ms = timeout_ms;
        let controller =
            CaptureController::new(granted_access(), Box::new(camera), capture, preview).unwrap();
        (controller, control)
    }

    #[tokio::test]
    async fn test_capture_timeout_reports_after_frame_release() {
        let (controller, control) = slow_controller(10);
        controller.bind(LifecycleHandle::new(), None).unwrap();
        control.set_latency(Duration::from_millis(200));

        let result = controller.capture().await;
        assert!(matches!(
            result,
            Err(CaptureError::HardwareCaptureFailure(_))
        ));

        // Checked the moment the error arrives, without waiting.
        assert_eq!(control.still_count(), 1);
        assert_eq!(control.ledger().acquired(), control.still_count());
        assert_eq!(control.ledger().released(), 1);
        assert_eq!(control.ledger().outstanding(), 0);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_timed_out_capture_stays_busy_until_hardware_returns() {
        let (controller, control) = slow_controller(10);
        controller.bind(LifecycleHandle::new(), None).unwrap();
        control.set_latency(Duration::from_millis(150));

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.capture().await }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(controller.state(), ControllerState::Capturing);
        assert!(matches!(controller.capture().await, Err(CaptureError::Busy)));

        assert!(matches!(
            pending.await.unwrap(),
            Err(CaptureError::HardwareCaptureFailure(_))
        ));
        assert_eq!(control.ledger().outstanding(), 0);
        assert_eq!(control.still_count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_discards_pending_capture() {
        let (controller, control) = controller();
        controller.bind(LifecycleHandle::new(), None).unwrap();
        control.set_latency(Duration::from_millis(50));

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.capture().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.unbind();

        assert!(matches!(
            pending.await.unwrap(),
            Err(CaptureError::SessionClosed)
        ));
        assert_eq!(controller.stats().dropped, 1);
        assert_eq!(control.ledger().acquired(), 1);
        assert_eq!(control.ledger().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_unbind_does_not_wait_for_pending_acquire() {
        let (controller, control) = controller();
        controller.bind(LifecycleHandle::new(), None).unwrap();
        control.set_latency(Duration::from_millis(300));

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.capture().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        controller.unbind();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(controller.state(), ControllerState::Unbound);

        assert!(matches!(
            pending.await.unwrap(),
            Err(CaptureError::SessionClosed)
        ));
        assert_eq!(control.ledger().outstanding(), 0);
        settle(|| control.close_count() == 1).await;
        assert_eq!(control.close_count(), 1);
    }

    #[tokio::test]
    async fn test_rebind_before_background_close_keeps_session_open() {
        let (controller, control) = controller();
        let handle = LifecycleHandle::new();
        controller.bind(handle, None).unwrap();
        control.set_latency(Duration::from_millis(100));

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.capture().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Whichever of the queued close and the rebind gets the backend
        // first, the new session must end up open.
        controller.unbind();
        let _ = pending.await;
        controller.bind(handle, None).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        control.set_latency(Duration::ZERO);
        assert!(controller.capture().await.is_ok());
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_second_controller_cannot_bind_same_device() {
        let (capture, preview) = test_configs();
        let first = CaptureController::new(
            granted_access(),
            Box::new(MockCamera::new()),
            capture.clone(),
            preview.clone(),
        )
        .unwrap();
        let second =
            CaptureController::new(granted_access(), Box::new(MockCamera::new()), capture, preview)
                .unwrap();

        first.bind(LifecycleHandle::new(), None).unwrap();
        assert!(matches!(
            second.bind(LifecycleHandle::new(), None),
            Err(CaptureError::DeviceInUse { .. })
        ));

        first.unbind();
        assert!(second.bind(LifecycleHandle::new(), None).is_ok());
    }

    #[tokio::test]
    async fn test_dropping_controller_closes_hardware() {
        let (controller, control) = controller();
        controller.bind(LifecycleHandle::new(), None).unwrap();
        drop(controller);
        settle(|| control.close_count() == 1).await;
        assert_eq!(control.close_count(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (mut capture, preview) = test_configs();
        capture.width = 0;
        let result =
            CaptureController::new(granted_access(), Box::new(MockCamera::new()), capture, preview);
        assert!(matches!(result, Err(CaptureError::Config(_))));
    }
}
