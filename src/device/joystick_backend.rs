//! # Legacy Joystick Backend
//!
//! Reads the kernel joystick API (`/dev/input/jsN`). Each read returns one
//! fixed-size `js_event`:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | timestamp (ms) |
//! | 4 | 2 | value (i16) |
//! | 6 | 1 | type |
//! | 7 | 1 | number |
//!
//! Button and axis numbers are already dense, so no capability probe is
//! needed and the mapping is passthrough.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use super::{discovery, Backend, DeviceMapping, EventSource, OpenDevice, RawEvent, ReadFlag};
use crate::config::{BackendConfig, BackendKind};
use crate::error::OpenError;

/// Button pressed or released
pub const JS_EVENT_BUTTON: u8 = 0x01;
/// Axis moved
pub const JS_EVENT_AXIS: u8 = 0x02;
/// Synthetic event describing initial state
pub const JS_EVENT_INIT: u8 = 0x80;
/// Size of `struct js_event`
pub const JS_EVENT_SIZE: usize = 8;

const NAME_BUFFER_LEN: usize = 128;

/// Legacy joystick-event backend
#[derive(Debug, Clone)]
pub struct JoystickBackend {
    config: BackendConfig,
}

impl JoystickBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

impl Backend for JoystickBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Joystick
    }

    fn resolve_paths(&self, slots: usize) -> Vec<Option<String>> {
        discovery::resolve_paths(&self.config, slots)
    }

    fn path_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn open(&self, path: &str) -> Result<OpenDevice, OpenError> {
        JoystickDevice::open(path)
    }
}

/// An open `/dev/input/jsN` node
pub struct JoystickDevice {
    file: File,
    name: String,
}

impl JoystickDevice {
    /// Open the node read-only and non-blocking
    pub fn open(path: &str) -> Result<OpenDevice, OpenError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| OpenError::Open {
                path: path.to_string(),
                source,
            })?;

        let name = query_name(file.as_raw_fd()).unwrap_or_else(|| "Unknown".to_string());
        let source = JoystickDevice { file, name };
        Ok(OpenDevice::new(path, Box::new(source), DeviceMapping::passthrough()))
    }
}

impl EventSource for JoystickDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    // The joystick API has no dropped-event marker; both flags read alike.
    fn next_event(&mut self, _flag: ReadFlag) -> io::Result<RawEvent> {
        let mut buf = [0u8; JS_EVENT_SIZE];
        let read = self.file.read(&mut buf)?;
        if read != JS_EVENT_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short joystick event read ({} bytes)", read),
            ));
        }
        Ok(parse_js_event(&buf))
    }
}

/// Decode one `struct js_event`
pub fn parse_js_event(buf: &[u8; JS_EVENT_SIZE]) -> RawEvent {
    let value = i16::from_ne_bytes([buf[4], buf[5]]);
    let kind = buf[6];
    let number = u16::from(buf[7]);

    match kind & !JS_EVENT_INIT {
        JS_EVENT_BUTTON => RawEvent::Button {
            code: number,
            pressed: value != 0,
        },
        JS_EVENT_AXIS => RawEvent::Axis {
            code: number,
            value: i32::from(value),
        },
        _ => RawEvent::Other {
            kind: u16::from(kind),
            code: number,
        },
    }
}

/// `JSIOCGNAME(len)`
fn jsiocgname(len: usize) -> u32 {
    const IOC_READ: u32 = 2;
    (IOC_READ << 30) | ((len as u32) << 16) | ((b'j' as u32) << 8) | 0x13
}

fn query_name(fd: RawFd) -> Option<String> {
    let mut buf = [0u8; NAME_BUFFER_LEN];
    let result = unsafe { libc::ioctl(fd, jsiocgname(buf.len()) as _, buf.as_mut_ptr()) };
    if result < 0 {
        return None;
    }

    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..end]).to_string())
}
