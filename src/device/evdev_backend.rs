//! # evdev Backend
//!
//! Opens `/dev/input/event*` nodes (usually through their `by-id` symlinks)
//! using the Linux evdev interface, probes the buttons the device reports,
//! and reads its events without blocking.
//!
//! ## Button Numbering
//!
//! Every key code the device reports from `BTN_JOYSTICK` (0x120) up to
//! `KEY_MAX` is numbered in ascending order. A typical gamepad reporting
//! `BTN_SOUTH`..`BTN_THUMBR` therefore gets buttons 0..=14, and the mapping
//! configuration binds logical buttons to those numbers.
//!
//! ## Axes
//!
//! `ABS_HAT0X`..`ABS_HAT3Y` feed the stick list by position; no probing is
//! needed.
//!
//! ## Dropped Events
//!
//! When the kernel buffer overflows it reports `SYN_DROPPED`. The rest of
//! that block is discarded, the key and axis state is read back with
//! `EVIOCGKEY`/`EVIOCGABS`, and whatever differs from what this reader
//! already handed out is queued ahead of newer events.

use evdev::raw_stream::RawDevice;
use evdev::{InputEvent, InputEventKind};
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use tracing::debug;

use super::{
    discovery, Backend, DeliveredState, DeviceMapping, EventSource, OpenDevice, RawEvent, ReadFlag,
    SYN_DROPPED,
};
use crate::config::{BackendConfig, BackendKind};
use crate::error::OpenError;

/// Capability-probing evdev backend
#[derive(Debug, Clone)]
pub struct EvdevBackend {
    config: BackendConfig,
}

impl EvdevBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

impl Backend for EvdevBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Evdev
    }

    fn resolve_paths(&self, slots: usize) -> Vec<Option<String>> {
        discovery::resolve_paths(&self.config, slots)
    }

    fn path_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn open(&self, path: &str) -> Result<OpenDevice, OpenError> {
        EvdevDevice::open(path)
    }
}

/// An open evdev node
///
/// `RawDevice` reads events in batches; they are queued in `pending` and
/// handed out one at a time.
pub struct EvdevDevice {
    device: RawDevice,
    name: String,
    pending: VecDeque<RawEvent>,
    delivered: DeliveredState,
    /// Inside a dropped block whose closing `SYN_REPORT` has not arrived
    draining: bool,
}

impl EvdevDevice {
    /// Open and probe the evdev node at `path`
    ///
    /// evdev asks for read-write access and falls back to read-only when
    /// that is refused; nothing is ever written to the node. The descriptor
    /// is switched to non-blocking mode before any read.
    ///
    /// # Errors
    ///
    /// - `OpenError::Open`: the node is missing or cannot be read
    /// - `OpenError::Init`: the node is not an evdev device, or the
    ///   descriptor could not be made non-blocking
    pub fn open(path: &str) -> Result<OpenDevice, OpenError> {
        File::open(path).map_err(|source| OpenError::Open {
            path: path.to_string(),
            source,
        })?;

        let device = RawDevice::open(path).map_err(|source| OpenError::Init {
            path: path.to_string(),
            source,
        })?;

        set_nonblocking(device.as_raw_fd()).map_err(|source| OpenError::Init {
            path: path.to_string(),
            source,
        })?;

        let mapping = DeviceMapping::probed(
            device
                .supported_keys()
                .map(|keys| keys.iter().map(|key| key.code()).collect::<Vec<_>>())
                .unwrap_or_default(),
        );

        let name = device.name().unwrap_or("Unknown").to_string();
        debug!("Probed {} ({}) with {} button(s)", path, name, mapping.probed_buttons().len());

        let source = EvdevDevice {
            device,
            name,
            pending: VecDeque::new(),
            delivered: DeliveredState::new(),
            draining: false,
        };
        Ok(OpenDevice::new(path, Box::new(source), mapping))
    }

    /// Pull whatever the kernel has buffered into `pending`
    fn fill(&mut self) -> io::Result<()> {
        let before = self.pending.len();
        let events = self.device.fetch_events()?;
        self.pending.extend(events.map(|event| convert_event(&event)));

        if self.pending.len() == before {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(())
    }

    /// Skip the rest of a dropped block, then queue the catch-up events
    ///
    /// A block cut short by `WouldBlock` leaves `draining` set, so the next
    /// read picks up where this one stopped.
    fn resync(&mut self) -> io::Result<()> {
        loop {
            while let Some(event) = self.pending.pop_front() {
                if event == RawEvent::Report {
                    self.draining = false;
                    for event in self.catch_up()?.into_iter().rev() {
                        self.pending.push_front(event);
                    }
                    return Ok(());
                }
            }
            self.fill()?;
        }
    }

    /// Differences between the kernel's key/axis state and what was delivered
    fn catch_up(&self) -> io::Result<Vec<RawEvent>> {
        let keys = self.device.get_key_state()?;
        let absolutes = self.device.get_abs_state()?;

        let buttons = self
            .device
            .supported_keys()
            .into_iter()
            .flat_map(|supported| supported.iter())
            .map(|key| (key.code(), keys.contains(key)));
        let axes = self
            .device
            .supported_absolute_axes()
            .into_iter()
            .flat_map(|supported| supported.iter())
            .map(|axis| (axis.0, absolutes[usize::from(axis.0)].value));

        let events = self.delivered.catch_up(buttons, axes);
        debug!("Resynced {} after dropped events: {} change(s)", self.name, events.len() - 1);
        Ok(events)
    }
}

impl EventSource for EvdevDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.device.as_raw_fd())
    }

    fn next_event(&mut self, flag: ReadFlag) -> io::Result<RawEvent> {
        if flag == ReadFlag::Sync {
            self.draining = true;
        }
        if self.draining {
            self.resync()?;
        }

        if self.pending.is_empty() {
            self.fill()?;
        }

        let event = self
            .pending
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        self.delivered.record(event);
        Ok(event)
    }
}

/// Translate an evdev event into the backend-neutral form
pub fn convert_event(event: &InputEvent) -> RawEvent {
    match event.kind() {
        InputEventKind::Key(key) => RawEvent::Button {
            code: key.code(),
            // 2 is autorepeat, still held
            pressed: event.value() != 0,
        },
        InputEventKind::AbsAxis(axis) => RawEvent::Axis {
            code: axis.0,
            value: event.value(),
        },
        InputEventKind::Synchronization(_) if event.code() == SYN_DROPPED => RawEvent::Dropped,
        InputEventKind::Synchronization(_) => RawEvent::Report,
        _ => RawEvent::Other {
            kind: event.event_type().0,
            code: event.code(),
        },
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
