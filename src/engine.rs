//! # Poll Engine
//!
//! [`JoystickHandler`] owns the background poll thread and the shared pad
//! records the host reads.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ──> init(max_connect) ──> running ──> close() ──> stopped
//!                                    │                       │
//!                                    └─────── init() <───────┘
//! ```
//!
//! ## Cycle
//!
//! 1. Refresh the registry (open new devices, drop vanished ones)
//! 2. Pick the slots to read: every connected slot, or for the legacy
//!    joystick backend the slots that became readable within
//!    `read_timeout_ms`
//! 3. Read up to `max_events_per_cycle` events per slot, decode, publish
//! 4. Sleep `poll_interval_ms` if anything is connected, otherwise
//!    `idle_poll_interval_ms`
//!
//! Stopping is cooperative: the thread checks the `active` flag once per
//! cycle, so [`JoystickHandler::close`] waits at most one cycle plus one
//! readiness wait before the thread reports itself `dead`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::{BackendKind, Config, EngineConfig};
use crate::decoder::EventDecoder;
use crate::device::{create_backend, Backend};
use crate::error::{JoystickError, Result};
use crate::pad::{PadInfo, PadLayout, PadState};
use crate::registry::DeviceRegistry;

/// Name of the background poll thread
pub const POLL_THREAD_NAME: &str = "joystick-poller";

/// Sleep between cycles: short while any slot is connected, long otherwise.
pub fn poll_cadence(connected: usize, engine: &EngineConfig) -> Duration {
    if connected > 0 {
        Duration::from_millis(engine.poll_interval_ms)
    } else {
        Duration::from_millis(engine.idle_poll_interval_ms)
    }
}

/// Joystick polling engine
///
/// Call [`init`](Self::init) to start polling and [`close`](Self::close) to
/// stop. Pad records are replaced on every `init`; hosts that keep
/// [`shared_pads`](Self::shared_pads) across restarts must fetch them again.
///
/// # Examples
///
/// ```no_run
/// use joystick_poller::config::Config;
/// use joystick_poller::engine::JoystickHandler;
///
/// fn main() -> anyhow::Result<()> {
///     let mut handler = JoystickHandler::new(Config::default());
///     handler.init(1)?;
///
///     if let Some(pad) = handler.pad(0) {
///         println!("Connected: {}", pad.is_connected());
///     }
///
///     handler.close();
///     Ok(())
/// }
/// ```
pub struct JoystickHandler {
    config: Config,
    backend: Arc<dyn Backend>,
    layout: Arc<PadLayout>,
    pads: Arc<[PadState]>,
    info: Arc<PadInfo>,
    active: Arc<AtomicBool>,
    dead: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for JoystickHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoystickHandler")
            .field("backend", &self.backend.kind())
            .field("slots", &self.pads.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl JoystickHandler {
    /// Create a handler using the backend selected in `config`.
    pub fn new(config: Config) -> Self {
        let backend = create_backend(&config.backend);
        Self::with_backend(config, backend)
    }

    /// Create a handler on top of an explicit backend.
    pub fn with_backend(config: Config, backend: Arc<dyn Backend>) -> Self {
        let layout = Arc::new(PadLayout::from_config(&config.mapping));
        Self {
            config,
            backend,
            layout,
            pads: Arc::from(Vec::new()),
            info: Arc::new(PadInfo::default()),
            active: Arc::new(AtomicBool::new(false)),
            dead: Arc::new(AtomicBool::new(true)),
            thread: None,
        }
    }

    /// Build the slots, connect whatever is already plugged in, and start
    /// the poll thread.
    ///
    /// `max_connect` is clamped to `engine.max_slots`.
    ///
    /// # Errors
    ///
    /// - `JoystickError::AlreadyRunning` if the poll thread was started and
    ///   not closed
    /// - `JoystickError::Spawn` if the thread could not be created
    pub fn init(&mut self, max_connect: usize) -> Result<()> {
        if self.thread.is_some() {
            return Err(JoystickError::AlreadyRunning);
        }

        let slots = max_connect.min(self.config.engine.max_slots);
        if slots < max_connect {
            debug!("Clamped requested {} slot(s) to {}", max_connect, slots);
        }

        let pads: Arc<[PadState]> = (0..slots).map(|_| PadState::new(&self.layout)).collect();
        self.pads = Arc::clone(&pads);
        self.info.set_max_connect(slots);

        let paths = self.backend.resolve_paths(slots);
        for (slot, path) in paths.iter().enumerate() {
            match path {
                Some(path) => debug!(slot, path = path.as_str(), "Joystick #{} assigned to {}", slot, path),
                None => debug!(slot, "No joystick path for slot #{}", slot),
            }
        }

        let mut registry = DeviceRegistry::new(Arc::clone(&self.backend), paths);
        let connected = registry.refresh(&pads);
        self.info.set_now_connect(connected);

        // A thread detached by a timed-out close keeps its old flags
        let active = Arc::new(AtomicBool::new(true));
        let dead = Arc::new(AtomicBool::new(false));

        let poll_loop = PollLoop {
            registry,
            decoder: EventDecoder::new(Arc::clone(&self.layout)),
            pads,
            info: Arc::clone(&self.info),
            engine: self.config.engine.clone(),
            wait_for_input: self.backend.kind() == BackendKind::Joystick,
            active: Arc::clone(&active),
        };
        let thread_dead = Arc::clone(&dead);

        let handle = thread::Builder::new()
            .name(POLL_THREAD_NAME.into())
            .spawn(move || {
                let _dead = DeadOnExit(thread_dead);
                poll_loop.run();
            })
            .map_err(JoystickError::Spawn)?;

        self.active = active;
        self.dead = dead;
        self.thread = Some(handle);

        info!(
            "Joystick handler started: {} slot(s), {} connected, {:?} backend",
            slots,
            connected,
            self.backend.kind()
        );
        Ok(())
    }

    /// Stop the poll thread and release every device.
    ///
    /// Waits up to `engine.shutdown_timeout_ms` for the thread to finish.
    /// On timeout the thread is detached and an error is logged; it stops on
    /// its own at the end of its current cycle. Calling `close` on a handler
    /// that is not running does nothing.
    pub fn close(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        self.active.store(false, Ordering::Release);

        let timeout = Duration::from_millis(self.config.engine.shutdown_timeout_ms);
        let deadline = Instant::now() + timeout;
        while !self.dead.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                error!("Joystick poll thread did not stop within {:?}", timeout);
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }

        if handle.join().is_err() {
            error!("Joystick poll thread panicked");
        }
        info!("Joystick handler closed");
    }

    /// Whether the poll thread is running.
    ///
    /// False once `close` returns, including after a timed-out close whose
    /// detached thread may still be finishing its last cycle.
    pub fn is_running(&self) -> bool {
        self.thread.is_some() && !self.dead.load(Ordering::Acquire)
    }

    /// Pad records, indexed by slot. Empty before the first `init`.
    pub fn pads(&self) -> &[PadState] {
        &self.pads
    }

    pub fn pad(&self, slot: usize) -> Option<&PadState> {
        self.pads.get(slot)
    }

    /// Shared handle to the pad records for readers on other threads.
    pub fn shared_pads(&self) -> Arc<[PadState]> {
        Arc::clone(&self.pads)
    }

    pub fn info(&self) -> &PadInfo {
        &self.info
    }

    pub fn layout(&self) -> &PadLayout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for JoystickHandler {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sets `dead` when the poll thread exits, including by panic
struct DeadOnExit(Arc<AtomicBool>);

impl Drop for DeadOnExit {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// State owned by the poll thread
struct PollLoop {
    registry: DeviceRegistry,
    decoder: EventDecoder,
    pads: Arc<[PadState]>,
    info: Arc<PadInfo>,
    engine: EngineConfig,
    wait_for_input: bool,
    active: Arc<AtomicBool>,
}

impl PollLoop {
    fn run(mut self) {
        debug!("Joystick poll loop started");

        while self.active.load(Ordering::Acquire) {
            let connected = self.cycle();
            thread::sleep(poll_cadence(connected, &self.engine));
        }

        let released = self.registry.release_all();
        debug!(released, "Joystick poll loop stopped");
    }

    /// One refresh-read-publish pass. Returns the connected slot count.
    fn cycle(&mut self) -> usize {
        let connected = self.registry.refresh(&self.pads);
        self.info.set_now_connect(connected);
        if connected == 0 {
            return 0;
        }

        let slots = if self.wait_for_input {
            self.registry
                .wait_readable(Duration::from_millis(self.engine.read_timeout_ms))
        } else {
            self.registry.connected_slots()
        };

        for slot in slots {
            self.poll_slot(slot);
        }
        connected
    }

    fn poll_slot(&mut self, slot: usize) {
        let Some(pad) = self.pads.get(slot) else {
            return;
        };

        for _ in 0..self.engine.max_events_per_cycle {
            let Some(device) = self.registry.device_mut(slot) else {
                return;
            };

            let event = match device.read() {
                Ok(event) => event,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!(
                        slot,
                        path = device.path(),
                        errno = e.raw_os_error(),
                        "Failed to read joystick #{}: {}",
                        slot,
                        e
                    );
                    if self.engine.disconnect_on_read_error {
                        self.registry.disconnect(slot, pad);
                    }
                    return;
                }
            };

            if let Some(update) = self.decoder.decode(slot, device.mapping(), event).into_update() {
                pad.apply(update);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mocks::FakeBackend;
    use crate::device::{MockBackend, RawEvent};
    use crate::pad::{LogicalButton, LogicalStick, STATUS_ASSIGN_CHANGES, STATUS_CONNECTED};

    const PAD0: &str = "/dev/input/by-id/usb-Pad0-event-joystick";
    const JS0: &str = "/dev/input/js0";

    fn test_config() -> Config {
        let mut config = Config::default();
        config.engine.max_slots = 2;
        config.engine.poll_interval_ms = 1;
        config.engine.idle_poll_interval_ms = 2;
        config.engine.read_timeout_ms = 1;
        config
    }

    fn make_handler(config: Config, backend: &FakeBackend) -> JoystickHandler {
        JoystickHandler::with_backend(config, Arc::new(backend.clone()))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..2000 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn cross(handler: &JoystickHandler) -> Option<(bool, u8)> {
        handler.pad(0)?.snapshot().button(LogicalButton::Cross)
    }

    // ==================== Cadence Tests ====================

    #[test]
    fn test_poll_cadence() {
        let engine = EngineConfig::default();
        assert_eq!(poll_cadence(1, &engine), Duration::from_millis(engine.poll_interval_ms));
        assert_eq!(poll_cadence(3, &engine), Duration::from_millis(engine.poll_interval_ms));
        assert_eq!(poll_cadence(0, &engine), Duration::from_millis(engine.idle_poll_interval_ms));
        assert!(poll_cadence(0, &engine) > poll_cadence(1, &engine));
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn test_init_and_close() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        let mut handler = make_handler(test_config(), &backend);
        assert!(handler.pads().is_empty());
        assert!(!handler.is_running());

        handler.init(1).unwrap();
        assert!(handler.is_running());
        assert_eq!(handler.pads().len(), 1);
        assert_eq!(handler.info().max_connect(), 1);

        handler.close();
        assert!(!handler.is_running());

        // Second close is a no-op
        handler.close();
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();

        assert!(matches!(handler.init(1), Err(JoystickError::AlreadyRunning)));
        handler.close();

        // Restart after close
        handler.init(1).unwrap();
        assert!(handler.is_running());
    }

    #[test]
    fn test_max_connect_is_clamped() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        let mut handler = make_handler(test_config(), &backend);

        handler.init(5).unwrap();
        assert_eq!(handler.pads().len(), 2);
        assert_eq!(handler.info().max_connect(), 2);
        assert_eq!(handler.pads()[0].buttons().len(), 16);
        assert_eq!(handler.pads()[0].sticks().len(), 4);
    }

    #[test]
    fn test_init_connects_before_returning() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        backend.plug(PAD0);
        let mut handler = make_handler(test_config(), &backend);

        handler.init(1).unwrap();
        assert_eq!(handler.pads()[0].status() & STATUS_CONNECTED, STATUS_CONNECTED);
        assert_eq!(handler.info().now_connect(), 1);
    }

    #[test]
    fn test_close_releases_handles_and_stops_reads() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        backend.plug(PAD0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();
        assert!(wait_until(|| backend.reads() > 0));

        handler.close();
        assert_eq!(backend.open_handles(), 0);

        let reads = backend.reads();
        backend.push_event(PAD0, RawEvent::Button { code: 0x130, pressed: true });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.reads(), reads);
        assert_eq!(backend.pending(PAD0), 1);
    }

    #[test]
    fn test_close_times_out_on_stuck_thread() {
        let stall = Arc::new(AtomicBool::new(false));
        let mut backend = MockBackend::new();
        backend.expect_kind().return_const(BackendKind::Evdev);
        backend
            .expect_resolve_paths()
            .returning(|slots| vec![Some(PAD0.to_string()); slots]);
        let stalled = Arc::clone(&stall);
        backend.expect_path_exists().returning(move |_| {
            if stalled.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(400));
            }
            false
        });

        let mut config = test_config();
        config.engine.shutdown_timeout_ms = 50;
        let mut handler = JoystickHandler::with_backend(config, Arc::new(backend));
        handler.init(1).unwrap();

        // Next refresh blocks inside the backend
        stall.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        handler.close();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(300));
        assert!(!handler.is_running());

        // The detached thread keeps its own flags; a new one can start
        stall.store(false, Ordering::SeqCst);
        handler.init(1).unwrap();
        assert!(handler.is_running());
        handler.close();
        assert!(!handler.is_running());
    }

    #[test]
    fn test_close_keeps_status() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        backend.plug(PAD0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();
        let pads = handler.shared_pads();

        handler.close();
        assert!(pads[0].is_connected());
    }

    #[test]
    fn test_drop_closes_handler() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        backend.plug(PAD0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();
        assert_eq!(backend.open_handles(), 1);

        drop(handler);
        assert_eq!(backend.open_handles(), 0);
    }

    // ==================== Scenario Tests ====================

    #[test]
    fn test_cross_press_release_legacy_backend() {
        let backend = FakeBackend::new(BackendKind::Joystick, &[JS0]);
        backend.plug(JS0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();

        backend.push_event(JS0, RawEvent::Button { code: 2, pressed: true });
        assert!(wait_until(|| cross(&handler) == Some((true, 255))));

        backend.push_event(JS0, RawEvent::Button { code: 2, pressed: false });
        assert!(wait_until(|| cross(&handler) == Some((false, 0))));
    }

    #[test]
    fn test_cross_press_release_evdev_backend() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        backend.plug(PAD0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();

        // BTN_C is probed third, key code 2
        backend.push_event(PAD0, RawEvent::Button { code: 0x132, pressed: true });
        backend.push_event(PAD0, RawEvent::Report);
        assert!(wait_until(|| cross(&handler) == Some((true, 255))));

        backend.push_event(PAD0, RawEvent::Button { code: 0x132, pressed: false });
        assert!(wait_until(|| cross(&handler) == Some((false, 0))));
    }

    #[test]
    fn test_release_lost_in_dropped_backlog_is_restored() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        backend.plug(PAD0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();

        backend.push_event(PAD0, RawEvent::Button { code: 0x132, pressed: true });
        backend.push_event(PAD0, RawEvent::Report);
        assert!(wait_until(|| cross(&handler) == Some((true, 255))));

        // The release only exists inside the dropped block
        backend.push_event(PAD0, RawEvent::Dropped);
        backend.push_event(PAD0, RawEvent::Button { code: 0x132, pressed: false });
        backend.push_event(PAD0, RawEvent::Report);
        assert!(wait_until(|| backend.pending(PAD0) == 0));
        assert!(wait_until(|| cross(&handler) == Some((false, 0))));
        assert!(handler.pad(0).unwrap().is_connected());
    }

    #[test]
    fn test_stick_updates() {
        let backend = FakeBackend::new(BackendKind::Joystick, &[JS0]);
        backend.plug(JS0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();

        assert_eq!(handler.pads()[0].snapshot().stick(LogicalStick::RightY), Some(128));
        backend.push_event(JS0, RawEvent::Axis { code: 3, value: -32768 });
        assert!(wait_until(|| {
            handler.pads()[0].snapshot().stick(LogicalStick::RightY) == Some(0)
        }));
    }

    #[test]
    fn test_disappear_and_reappear() {
        let backend = FakeBackend::new(BackendKind::Evdev, &[PAD0]);
        backend.plug(PAD0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();
        let pads = handler.shared_pads();
        pads[0].acknowledge();

        backend.unplug(PAD0);
        assert!(wait_until(|| !pads[0].is_connected()));
        assert_eq!(pads[0].status(), STATUS_ASSIGN_CHANGES);
        assert!(wait_until(|| handler.info().now_connect() == 0));
        pads[0].acknowledge();

        // Skipped while absent
        let reads = backend.reads();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.reads(), reads);
        assert_eq!(pads[0].status(), 0);

        backend.plug(PAD0);
        assert!(wait_until(|| pads[0].is_connected()));
        assert_eq!(pads[0].status(), STATUS_CONNECTED | STATUS_ASSIGN_CHANGES);
        assert_eq!(backend.opens(), 2);
    }

    #[test]
    fn test_read_error_keeps_slot_connected() {
        let backend = FakeBackend::new(BackendKind::Joystick, &[JS0]);
        backend.plug(JS0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();
        handler.pads()[0].acknowledge();

        backend.push_error(JS0, io::ErrorKind::Other);
        backend.push_event(JS0, RawEvent::Button { code: 2, pressed: true });
        assert!(wait_until(|| cross(&handler) == Some((true, 255))));

        assert_eq!(handler.pads()[0].status(), STATUS_CONNECTED);
        assert_eq!(backend.opens(), 1);
    }

    #[test]
    fn test_read_error_disconnects_when_configured() {
        let backend = FakeBackend::new(BackendKind::Joystick, &[JS0]);
        backend.plug(JS0);
        let mut config = test_config();
        config.engine.disconnect_on_read_error = true;
        let mut handler = make_handler(config, &backend);
        handler.init(1).unwrap();
        handler.pads()[0].acknowledge();

        backend.push_error(JS0, io::ErrorKind::Other);

        // Dropped, then reopened on the next refresh since the path remains
        assert!(wait_until(|| backend.opens() == 2));
        assert!(wait_until(|| handler.pads()[0].is_connected()));
        assert!(handler.pads()[0].assign_changed());
    }

    #[test]
    fn test_bad_events_do_not_stop_the_loop() {
        let backend = FakeBackend::new(BackendKind::Joystick, &[JS0]);
        backend.plug(JS0);
        let mut handler = make_handler(test_config(), &backend);
        handler.init(1).unwrap();

        backend.push_event(JS0, RawEvent::Other { kind: 4, code: 4 });
        backend.push_event(JS0, RawEvent::Button { code: 99, pressed: true });
        backend.push_event(JS0, RawEvent::Axis { code: 6, value: 0 });
        backend.push_event(JS0, RawEvent::Button { code: 2, pressed: true });

        assert!(wait_until(|| cross(&handler) == Some((true, 255))));
        assert!(handler.is_running());
    }

    #[test]
    fn test_one_event_per_cycle() {
        let backend = FakeBackend::new(BackendKind::Joystick, &[JS0]);
        backend.plug(JS0);
        let mut config = test_config();
        config.engine.poll_interval_ms = 50;
        let mut handler = make_handler(config, &backend);
        handler.init(1).unwrap();

        for pressed in [true, false, true] {
            backend.push_event(JS0, RawEvent::Button { code: 2, pressed });
        }
        assert!(wait_until(|| backend.pending(JS0) < 3));

        // The remaining events wait for later cycles
        assert!(backend.pending(JS0) > 0);
        assert!(wait_until(|| backend.pending(JS0) == 0));
        assert!(wait_until(|| cross(&handler) == Some((true, 255))));
    }
}
