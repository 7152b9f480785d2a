//! # Device Module
//!
//! Backend-neutral view of a joystick device.
//!
//! This module handles:
//! - The [`Backend`] interface implemented by the evdev and legacy joystick backends
//! - Raw events as read from a device ([`RawEvent`])
//! - Per-connection physical code tables ([`DeviceMapping`])
//! - Catching a reader up after the driver drops events ([`DeliveredState`])
//! - Waiting for readiness across several device descriptors
//!
//! ## Code Space
//!
//! | Constant | Value | Meaning |
//! |----------|-------|---------|
//! | [`BTN_MISC`] | 0x100 | Key codes below this are not buttons |
//! | [`BTN_JOYSTICK`] | 0x120 | First code probed on connect |
//! | [`KEY_MAX`] | 0x2ff | End of the probed key range |
//! | [`ABS_HAT0X`] | 0x10 | First axis code that feeds a stick |
//! | [`ABS_HAT3Y`] | 0x17 | Last axis code that feeds a stick |

pub mod discovery;
pub mod evdev_backend;
pub mod joystick_backend;

#[cfg(test)]
pub mod mocks;

use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendConfig, BackendKind, AXIS_BAND};
use crate::error::OpenError;

pub use evdev_backend::EvdevBackend;
pub use joystick_backend::JoystickBackend;

/// Lowest key code treated as a button.
pub const BTN_MISC: u16 = 0x100;
/// First key code enumerated when probing a device's buttons.
pub const BTN_JOYSTICK: u16 = 0x120;
/// End (exclusive) of the probed key code range.
pub const KEY_MAX: u16 = 0x2ff;
/// First hat/axis code mapped onto the stick list.
pub const ABS_HAT0X: u16 = 0x10;
/// Last hat/axis code mapped onto the stick list.
pub const ABS_HAT3Y: u16 = 0x17;
/// `SYN_REPORT` code within the synchronization event type.
pub const SYN_REPORT: u16 = 0;
/// `SYN_DROPPED` code within the synchronization event type.
pub const SYN_DROPPED: u16 = 3;

/// One event as read from a device, before mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    /// Key or button state change
    Button { code: u16, pressed: bool },
    /// Absolute axis position
    Axis { code: u16, value: i32 },
    /// End of an event frame
    Report,
    /// The driver overflowed its buffer and dropped events
    Dropped,
    /// Anything else the device emits
    Other { kind: u16, code: u16 },
}

/// How the next event should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFlag {
    Normal,
    /// Discard the stale backlog up to the next frame boundary, then report
    /// whatever differs between the device's current state and what was
    /// already delivered
    Sync,
}

/// Button and axis values a reader has been handed so far.
///
/// After a dropped backlog the device is asked for its real state and only
/// the differences are replayed, so a release lost in the backlog still
/// reaches the pad.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveredState {
    buttons: BTreeMap<u16, bool>,
    axes: BTreeMap<u16, i32>,
}

impl DeliveredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes an event that is about to be handed out.
    pub fn record(&mut self, event: RawEvent) {
        match event {
            RawEvent::Button { code, pressed } => {
                self.buttons.insert(code, pressed);
            }
            RawEvent::Axis { code, value } => {
                self.axes.insert(code, value);
            }
            _ => {}
        }
    }

    /// Events that bring a reader from the delivered state to `buttons` and
    /// `axes`, closed by a [`RawEvent::Report`].
    ///
    /// Buttons never delivered count as released. Axes never delivered are
    /// always reported.
    ///
    /// # Examples
    ///
    /// ```
    /// use joystick_poller::device::{DeliveredState, RawEvent};
    ///
    /// let mut delivered = DeliveredState::new();
    /// delivered.record(RawEvent::Button { code: 0x130, pressed: true });
    ///
    /// let events = delivered.catch_up([(0x130, false), (0x131, false)], std::iter::empty());
    /// assert_eq!(
    ///     events,
    ///     vec![RawEvent::Button { code: 0x130, pressed: false }, RawEvent::Report]
    /// );
    /// ```
    pub fn catch_up(
        &self,
        buttons: impl IntoIterator<Item = (u16, bool)>,
        axes: impl IntoIterator<Item = (u16, i32)>,
    ) -> Vec<RawEvent> {
        let mut events: Vec<RawEvent> = buttons
            .into_iter()
            .filter(|&(code, pressed)| self.buttons.get(&code).copied().unwrap_or(false) != pressed)
            .map(|(code, pressed)| RawEvent::Button { code, pressed })
            .collect();

        events.extend(
            axes.into_iter()
                .filter(|&(code, value)| self.axes.get(&code) != Some(&value))
                .map(|(code, value)| RawEvent::Axis { code, value }),
        );

        events.push(RawEvent::Report);
        events
    }
}

/// An open device that yields raw events.
///
/// Reads never block: when nothing is pending, `next_event` fails with
/// [`io::ErrorKind::WouldBlock`]. A source that reports
/// [`RawEvent::Dropped`] must honour [`ReadFlag::Sync`] on the following read.
pub trait EventSource: Send {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Descriptor usable with `poll(2)`, if the source has one.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Reads the next pending event.
    fn next_event(&mut self, flag: ReadFlag) -> io::Result<RawEvent>;
}

/// Result of looking up a physical button code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonLookup {
    /// Below the button floor; a keyboard-style key, not a button
    NotAButton,
    /// A button code the device did not report at connect time
    Unmapped,
    /// The key code the layout binds logical buttons to
    Mapped(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ButtonMap {
    /// `table[code - BTN_MISC]` holds the discovery index of the button
    Probed(Vec<Option<u16>>),
    /// Button numbers are already key codes
    Passthrough,
}

/// Physical to logical code table for one connection.
///
/// Built when a device is opened and dropped with it. Different devices
/// report different code ranges, so nothing here outlives the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    buttons: ButtonMap,
    first_axis: u16,
}

impl DeviceMapping {
    /// Builds a table from the key codes a device reports.
    ///
    /// Codes in `[BTN_JOYSTICK, KEY_MAX)` are numbered in ascending order,
    /// starting at 0; everything else stays unmapped.
    ///
    /// # Examples
    ///
    /// ```
    /// use joystick_poller::device::{ButtonLookup, DeviceMapping};
    ///
    /// let mapping = DeviceMapping::probed([0x130, 0x131, 0x133]);
    /// assert_eq!(mapping.button(0x131), ButtonLookup::Mapped(1));
    /// assert_eq!(mapping.button(0x132), ButtonLookup::Unmapped);
    /// ```
    pub fn probed(codes: impl IntoIterator<Item = u16>) -> Self {
        let mut codes: Vec<u16> = codes
            .into_iter()
            .filter(|&code| (BTN_JOYSTICK..KEY_MAX).contains(&code))
            .collect();
        codes.sort_unstable();
        codes.dedup();

        let mut table = vec![None; usize::from(KEY_MAX - BTN_MISC)];
        for (index, code) in codes.into_iter().enumerate() {
            table[usize::from(code - BTN_MISC)] = Some(index as u16);
        }

        Self {
            buttons: ButtonMap::Probed(table),
            first_axis: ABS_HAT0X,
        }
    }

    /// Identity table: button and axis numbers are used as reported.
    pub fn passthrough() -> Self {
        Self {
            buttons: ButtonMap::Passthrough,
            first_axis: 0,
        }
    }

    /// Looks up a physical button code.
    pub fn button(&self, code: u16) -> ButtonLookup {
        match &self.buttons {
            ButtonMap::Passthrough => ButtonLookup::Mapped(code),
            ButtonMap::Probed(_) if code < BTN_MISC => ButtonLookup::NotAButton,
            ButtonMap::Probed(table) => table
                .get(usize::from(code - BTN_MISC))
                .copied()
                .flatten()
                .map_or(ButtonLookup::Unmapped, ButtonLookup::Mapped),
        }
    }

    /// Axis index (0-based within the stick band) for a physical axis code,
    /// or `None` when the code is outside the band.
    pub fn axis(&self, code: u16) -> Option<u16> {
        code.checked_sub(self.first_axis)
            .filter(|&axis| axis < AXIS_BAND)
    }

    /// Probed `(physical code, key code)` pairs in discovery order.
    pub fn probed_buttons(&self) -> Vec<(u16, u16)> {
        match &self.buttons {
            ButtonMap::Passthrough => Vec::new(),
            ButtonMap::Probed(table) => table
                .iter()
                .enumerate()
                .filter_map(|(offset, index)| index.map(|i| (BTN_MISC + offset as u16, i)))
                .collect(),
        }
    }
}

/// A device that passed open and probe, owned by exactly one slot.
///
/// Dropping it closes the underlying descriptor.
pub struct OpenDevice {
    path: String,
    source: Box<dyn EventSource>,
    mapping: DeviceMapping,
}

impl std::fmt::Debug for OpenDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenDevice")
            .field("path", &self.path)
            .field("name", &self.source.name())
            .finish_non_exhaustive()
    }
}

impl OpenDevice {
    pub fn new(path: impl Into<String>, source: Box<dyn EventSource>, mapping: DeviceMapping) -> Self {
        Self {
            path: path.into(),
            source,
            mapping,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.source.raw_fd()
    }

    pub fn mapping(&self) -> &DeviceMapping {
        &self.mapping
    }

    /// Reads the next event. A dropped-event backlog is replaced by the
    /// events that catch the reader up with the device.
    pub fn read(&mut self) -> io::Result<RawEvent> {
        match self.source.next_event(ReadFlag::Normal)? {
            RawEvent::Dropped => self.source.next_event(ReadFlag::Sync),
            event => Ok(event),
        }
    }
}

/// A device interface: path resolution plus open/probe.
#[cfg_attr(test, mockall::automock)]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Resolves one path per slot; `None` where no device could be assigned.
    fn resolve_paths(&self, slots: usize) -> Vec<Option<String>>;

    /// Whether `path` currently resolves to a device node.
    fn path_exists(&self, path: &str) -> bool;

    /// Opens and probes the device at `path` without blocking.
    fn open(&self, path: &str) -> Result<OpenDevice, OpenError>;
}

/// Creates the backend selected by configuration.
pub fn create_backend(config: &BackendConfig) -> Arc<dyn Backend> {
    match config.kind {
        BackendKind::Evdev => Arc::new(EvdevBackend::new(config.clone())),
        BackendKind::Joystick => Arc::new(JoystickBackend::new(config.clone())),
    }
}

/// Waits until at least one descriptor is readable or `timeout` passes.
///
/// Returns one flag per descriptor. An interrupted wait reports nothing ready.
pub fn wait_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<bool>> {
    if fds.is_empty() {
        return Ok(Vec::new());
    }

    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let result = unsafe {
        libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms)
    };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(vec![false; fds.len()]);
        }
        return Err(err);
    }

    // POLLERR/POLLHUP count as ready so the read surfaces the error.
    Ok(pollfds.iter().map(|p| p.revents != 0).collect())
}
