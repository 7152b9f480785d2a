//! # Device Registry
//!
//! Owns one path and zero-or-one open device per slot and keeps each slot's
//! connection bit in step with what is actually plugged in.
//!
//! ## Refresh Rules
//!
//! | Path resolves | Slot connected | Action |
//! |---------------|----------------|--------|
//! | no | yes | release device, mark disconnected, log error |
//! | no | no | nothing |
//! | yes | yes | nothing |
//! | yes | no | open; mark connected and log notice, or log error and retry next refresh |
//!
//! A slot without a resolved path stays disconnected for the lifetime of
//! the registry.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::device::{self, Backend, OpenDevice};
use crate::error::OpenError;
use crate::pad::PadState;

/// Per-slot device bookkeeping
#[derive(Debug, Default)]
struct Slot {
    path: Option<String>,
    device: Option<OpenDevice>,
    /// Last open failure, kept so repeats are logged quietly
    last_failure: Option<OpenError>,
}

/// Tracks which slots have an open device
pub struct DeviceRegistry {
    backend: Arc<dyn Backend>,
    slots: Vec<Slot>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("kind", &self.backend.kind())
            .field("slots", &self.slots)
            .finish()
    }
}

impl DeviceRegistry {
    /// Create a registry with one slot per entry of `paths`.
    ///
    /// No device is opened until the first [`refresh`](Self::refresh).
    pub fn new(backend: Arc<dyn Backend>, paths: Vec<Option<String>>) -> Self {
        let slots = paths
            .into_iter()
            .map(|path| Slot {
                path,
                ..Slot::default()
            })
            .collect();
        Self { backend, slots }
    }

    pub fn path(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot)?.path.as_deref()
    }

    /// Bring every slot in line with its device path.
    ///
    /// `pads` is indexed by slot. Returns the number of connected slots.
    pub fn refresh(&mut self, pads: &[PadState]) -> usize {
        for (index, (slot, pad)) in self.slots.iter_mut().zip(pads).enumerate() {
            let Some(path) = slot.path.as_deref() else {
                continue;
            };

            if !self.backend.path_exists(path) {
                if slot.device.take().is_some() {
                    let previous = pad.status();
                    pad.mark_disconnected();
                    error!(
                        slot = index,
                        path,
                        status = previous,
                        "Joystick #{} disconnected from {} (status was {:#x})",
                        index,
                        path,
                        previous
                    );
                }
                continue;
            }

            if slot.device.is_some() {
                continue;
            }

            match self.backend.open(path) {
                Ok(device) => {
                    pad.mark_connected();
                    info!(
                        slot = index,
                        path,
                        "Joystick #{} connected: {} at {}",
                        index,
                        device.name(),
                        path
                    );
                    slot.device = Some(device);
                    slot.last_failure = None;
                }
                Err(err) => {
                    let repeated = slot
                        .last_failure
                        .as_ref()
                        .is_some_and(|last| last.same_failure(&err));
                    if repeated {
                        debug!(slot = index, path, "Joystick #{} still unavailable: {}", index, err);
                    } else {
                        error!(
                            slot = index,
                            path,
                            errno = err.errno(),
                            "Failed to open joystick #{}: {}",
                            index,
                            err
                        );
                    }
                    slot.last_failure = Some(err);
                }
            }
        }

        self.open_handles()
    }

    /// Slots that currently hold an open device, ascending.
    pub fn connected_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.device.is_some())
            .map(|(index, _)| index)
            .collect()
    }

    pub fn device_mut(&mut self, slot: usize) -> Option<&mut OpenDevice> {
        self.slots.get_mut(slot)?.device.as_mut()
    }

    /// Close the slot's device and mark it disconnected.
    ///
    /// Used when a read error is treated as a disconnect; the next refresh
    /// reopens the device if its path still resolves.
    pub fn disconnect(&mut self, slot: usize, pad: &PadState) {
        let Some(entry) = self.slots.get_mut(slot) else {
            return;
        };
        if let Some(device) = entry.device.take() {
            let previous = pad.status();
            pad.mark_disconnected();
            error!(
                slot,
                path = device.path(),
                status = previous,
                "Joystick #{} dropped after read error (status was {:#x})",
                slot,
                previous
            );
        }
    }

    /// Close every open device. Status bits are left untouched.
    ///
    /// Returns how many devices were released.
    pub fn release_all(&mut self) -> usize {
        let released = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.device.take())
            .count();
        if released > 0 {
            debug!("Released {} joystick device(s)", released);
        }
        released
    }

    /// Number of devices currently held open.
    pub fn open_handles(&self) -> usize {
        self.slots.iter().filter(|slot| slot.device.is_some()).count()
    }

    /// Wait up to `timeout` for any connected slot to become readable.
    ///
    /// Sources without a descriptor are always reported ready, and their
    /// presence turns the wait into a non-blocking check.
    pub fn wait_readable(&self, timeout: Duration) -> Vec<usize> {
        let mut ready = Vec::new();
        let mut polled: Vec<(usize, RawFd)> = Vec::new();

        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(device) = &slot.device {
                match device.raw_fd() {
                    Some(fd) => polled.push((index, fd)),
                    None => ready.push(index),
                }
            }
        }

        if polled.is_empty() {
            return ready;
        }

        let timeout = if ready.is_empty() { timeout } else { Duration::ZERO };
        let fds: Vec<RawFd> = polled.iter().map(|&(_, fd)| fd).collect();
        match device::wait_readable(&fds, timeout) {
            Ok(flags) => {
                ready.extend(
                    polled
                        .iter()
                        .zip(flags)
                        .filter(|(_, is_ready)| *is_ready)
                        .map(|(&(index, _), _)| index),
                );
                ready.sort_unstable();
            }
            Err(e) => error!(errno = e.raw_os_error(), "Failed to wait for joystick input: {}", e),
        }
        ready
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}
