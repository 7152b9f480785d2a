//! # Event Decoder
//!
//! Turns a [`RawEvent`] from one slot's device into an [`Update`] for that
//! slot's pad, or discards it.
//!
//! ## Outcomes
//!
//! | Event | Condition | Outcome | Log |
//! |-------|-----------|---------|-----|
//! | Button | code below `BTN_MISC` | skipped | notice |
//! | Button | code not probed on this device | rejected | error |
//! | Button | no logical button bound to the key code | rejected | error |
//! | Button | mapped | pressed + 255, or released + 0 | - |
//! | Axis | code outside the hat/axis band | skipped | - |
//! | Axis | no logical stick fed by the axis | rejected | error |
//! | Axis | mapped | `(value + 32768) >> 8` | - |
//! | Frame marker / dropped | always | skipped | - |
//! | Anything else | always | rejected | error |
//!
//! Nothing here fails: every outcome is an update or a discarded event.

use std::sync::Arc;
use tracing::{error, info, trace};

use crate::device::{ButtonLookup, DeviceMapping, RawEvent};
use crate::pad::{PadLayout, Update, BUTTON_PRESSED_VALUE, BUTTON_RELEASED_VALUE};

/// Why an event was dropped without touching the pad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// `SYN_REPORT` and friends
    FrameMarker,
    /// A dropped-event marker that survived the resync read
    Dropped,
    /// Key event below the button floor
    NonButtonKey { code: u16 },
    /// Axis outside the hat/axis band; devices often report extra axes
    AxisOutOfBand { code: u16 },
}

/// Why an event could not be mapped onto the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The device did not report this button code when it was opened
    UnmappedButton { code: u16 },
    /// The code maps to a key code no logical button is bound to
    UnboundButton { code: u16, key_code: u16 },
    /// No logical stick is fed by this axis
    UnboundAxis { code: u16, axis: u16 },
    /// Event type the decoder has no use for
    UnknownEvent { kind: u16, code: u16 },
}

/// Outcome of decoding one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Update(Update),
    Skipped(Skip),
    Rejected(Rejection),
}

impl Decoded {
    pub fn into_update(self) -> Option<Update> {
        match self {
            Decoded::Update(update) => Some(update),
            _ => None,
        }
    }
}

/// Convert a signed 16-bit axis position to the pad's 0-255 range.
///
/// Values outside the i16 range are clamped first.
///
/// # Examples
///
/// ```
/// use joystick_poller::decoder::convert_axis;
///
/// assert_eq!(convert_axis(-32768), 0);
/// assert_eq!(convert_axis(0), 128);
/// assert_eq!(convert_axis(32767), 255);
/// ```
pub fn convert_axis(value: i32) -> u8 {
    let value = value.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
    ((value + 32768) >> 8) as u8
}

/// Maps raw events onto the logical layout.
///
/// Stateless apart from the shared layout; the per-device code table is
/// passed in with each event.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    layout: Arc<PadLayout>,
}

impl EventDecoder {
    pub fn new(layout: Arc<PadLayout>) -> Self {
        Self { layout }
    }

    /// Decode one event from the device in `slot`, logging anything discarded.
    pub fn decode(&self, slot: usize, mapping: &DeviceMapping, event: RawEvent) -> Decoded {
        let decoded = self.classify(mapping, event);
        match decoded {
            Decoded::Update(update) => trace!(slot, ?update, "Decoded joystick event"),
            Decoded::Skipped(Skip::NonButtonKey { code }) => {
                info!(slot, code, "Joystick #{} sent non-button key event {}", slot, code);
            }
            Decoded::Skipped(_) => {}
            Decoded::Rejected(rejection) => log_rejection(slot, rejection),
        }
        decoded
    }

    fn classify(&self, mapping: &DeviceMapping, event: RawEvent) -> Decoded {
        match event {
            RawEvent::Button { code, pressed } => self.decode_button(mapping, code, pressed),
            RawEvent::Axis { code, value } => self.decode_axis(mapping, code, value),
            RawEvent::Report => Decoded::Skipped(Skip::FrameMarker),
            RawEvent::Dropped => Decoded::Skipped(Skip::Dropped),
            RawEvent::Other { kind, code } => {
                Decoded::Rejected(Rejection::UnknownEvent { kind, code })
            }
        }
    }

    fn decode_button(&self, mapping: &DeviceMapping, code: u16, pressed: bool) -> Decoded {
        let key_code = match mapping.button(code) {
            ButtonLookup::NotAButton => return Decoded::Skipped(Skip::NonButtonKey { code }),
            ButtonLookup::Unmapped => {
                return Decoded::Rejected(Rejection::UnmappedButton { code })
            }
            ButtonLookup::Mapped(key_code) => key_code,
        };

        match self.layout.button_position(key_code) {
            Some(index) => Decoded::Update(Update::Button {
                index,
                pressed,
                value: if pressed {
                    BUTTON_PRESSED_VALUE
                } else {
                    BUTTON_RELEASED_VALUE
                },
            }),
            None => Decoded::Rejected(Rejection::UnboundButton { code, key_code }),
        }
    }

    fn decode_axis(&self, mapping: &DeviceMapping, code: u16, value: i32) -> Decoded {
        let Some(axis) = mapping.axis(code) else {
            return Decoded::Skipped(Skip::AxisOutOfBand { code });
        };

        match self.layout.stick_position(axis) {
            Some(index) => Decoded::Update(Update::Stick {
                index,
                value: convert_axis(value),
            }),
            None => Decoded::Rejected(Rejection::UnboundAxis { code, axis }),
        }
    }
}

fn log_rejection(slot: usize, rejection: Rejection) {
    match rejection {
        Rejection::UnmappedButton { code } => {
            error!(slot, code, "Joystick #{} sent invalid button code {}", slot, code);
        }
        Rejection::UnboundButton { code, key_code } => {
            error!(
                slot,
                code,
                key_code,
                "Joystick #{} sent button event for invalid button {}",
                slot,
                code
            );
        }
        Rejection::UnboundAxis { code, axis } => {
            error!(slot, code, axis, "Joystick #{} sent axis event for invalid axis {}", slot, axis);
        }
        Rejection::UnknownEvent { kind, code } => {
            error!(slot, kind, code, "Unknown joystick #{} event {}", slot, kind);
        }
    }
}
