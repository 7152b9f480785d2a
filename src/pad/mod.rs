//! # Shared Pad State
//!
//! One [`PadState`] per controller slot. The poll thread is the only writer;
//! the host reads concurrently. Every field is an atomic and is published
//! field by field, so a reader never observes a torn record, only a record
//! that is partway through a cycle's updates.
//!
//! ## Status Bits
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | [`STATUS_CONNECTED`] | A device is open for this slot |
//! | [`STATUS_ASSIGN_CHANGES`] | Connection changed since the host last acknowledged |

pub mod layout;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

pub use layout::PadLayout;

/// A device is open for this slot.
pub const STATUS_CONNECTED: u32 = 0x1;
/// One-shot: connection status changed and should be re-read.
pub const STATUS_ASSIGN_CHANGES: u32 = 0x2;

/// Analog value reported for a pressed digital button.
pub const BUTTON_PRESSED_VALUE: u8 = 255;
/// Analog value reported for a released digital button.
pub const BUTTON_RELEASED_VALUE: u8 = 0;
/// Resting value of a stick before the device reports its position.
pub const STICK_CENTER: u8 = 128;

/// Digital buttons of the logical controller, in layout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalButton {
    Triangle,
    Circle,
    Cross,
    Square,
    L2,
    R2,
    L1,
    R1,
    Start,
    Select,
    L3,
    R3,
    Up,
    Down,
    Left,
    Right,
}

/// Analog sticks of the logical controller, in layout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalStick {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

/// Live state of one logical button.
#[derive(Debug)]
pub struct ButtonState {
    button: LogicalButton,
    pressed: AtomicBool,
    value: AtomicU8,
}

impl ButtonState {
    fn new(button: LogicalButton) -> Self {
        Self {
            button,
            pressed: AtomicBool::new(false),
            value: AtomicU8::new(BUTTON_RELEASED_VALUE),
        }
    }

    pub fn button(&self) -> LogicalButton {
        self.button
    }

    pub fn pressed(&self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }

    pub fn value(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Live state of one logical stick.
#[derive(Debug)]
pub struct StickState {
    stick: LogicalStick,
    value: AtomicU8,
}

impl StickState {
    fn new(stick: LogicalStick) -> Self {
        Self {
            stick,
            value: AtomicU8::new(STICK_CENTER),
        }
    }

    pub fn stick(&self) -> LogicalStick {
        self.stick
    }

    pub fn value(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A value change for one slot, produced by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Set the button at `index` in the slot's button list
    Button { index: usize, pressed: bool, value: u8 },
    /// Set the stick at `index` in the slot's stick list
    Stick { index: usize, value: u8 },
}

/// Controller-state record for one slot.
///
/// The button and stick lists are fixed at construction; only their values
/// and the status bits change afterwards.
#[derive(Debug)]
pub struct PadState {
    status: AtomicU32,
    buttons: Box<[ButtonState]>,
    sticks: Box<[StickState]>,
}

impl PadState {
    /// Creates a disconnected pad with the layout's buttons and sticks.
    pub fn new(layout: &PadLayout) -> Self {
        Self {
            status: AtomicU32::new(0),
            buttons: layout.buttons().map(ButtonState::new).collect(),
            sticks: layout.sticks().map(StickState::new).collect(),
        }
    }

    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.status() & STATUS_CONNECTED != 0
    }

    pub fn assign_changed(&self) -> bool {
        self.status() & STATUS_ASSIGN_CHANGES != 0
    }

    pub fn buttons(&self) -> &[ButtonState] {
        &self.buttons
    }

    pub fn sticks(&self) -> &[StickState] {
        &self.sticks
    }

    /// Clears the assign-changed bit and returns the status seen before.
    pub fn acknowledge(&self) -> u32 {
        self.status.fetch_and(!STATUS_ASSIGN_CHANGES, Ordering::AcqRel)
    }

    /// Records a transition to connected. Returns `false` if already connected.
    pub(crate) fn mark_connected(&self) -> bool {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |status| {
                (status & STATUS_CONNECTED == 0)
                    .then_some(status | STATUS_CONNECTED | STATUS_ASSIGN_CHANGES)
            })
            .is_ok()
    }

    /// Records a transition to disconnected. Returns `false` if already disconnected.
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |status| {
                (status & STATUS_CONNECTED != 0)
                    .then_some((status & !STATUS_CONNECTED) | STATUS_ASSIGN_CHANGES)
            })
            .is_ok()
    }

    /// Publishes a decoded update. Out-of-range indices are ignored.
    pub fn apply(&self, update: Update) {
        match update {
            Update::Button { index, pressed, value } => {
                if let Some(state) = self.buttons.get(index) {
                    state.value.store(value, Ordering::Relaxed);
                    state.pressed.store(pressed, Ordering::Release);
                }
            }
            Update::Stick { index, value } => {
                if let Some(state) = self.sticks.get(index) {
                    state.value.store(value, Ordering::Release);
                }
            }
        }
    }

    /// Owned copy of the current record.
    pub fn snapshot(&self) -> PadSnapshot {
        PadSnapshot {
            status: self.status(),
            buttons: self
                .buttons
                .iter()
                .map(|b| (b.button, b.pressed(), b.value()))
                .collect(),
            sticks: self.sticks.iter().map(|s| (s.stick, s.value())).collect(),
        }
    }
}

/// Point-in-time copy of a [`PadState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadSnapshot {
    pub status: u32,
    pub buttons: Vec<(LogicalButton, bool, u8)>,
    pub sticks: Vec<(LogicalStick, u8)>,
}

impl PadSnapshot {
    pub fn button(&self, button: LogicalButton) -> Option<(bool, u8)> {
        self.buttons
            .iter()
            .find(|(b, _, _)| *b == button)
            .map(|&(_, pressed, value)| (pressed, value))
    }

    pub fn stick(&self, stick: LogicalStick) -> Option<u8> {
        self.sticks
            .iter()
            .find(|(s, _)| *s == stick)
            .map(|&(_, value)| value)
    }

    pub fn any_button_pressed(&self) -> bool {
        self.buttons.iter().any(|&(_, pressed, _)| pressed)
    }
}

/// Slot counts shared with the host.
#[derive(Debug, Default)]
pub struct PadInfo {
    max_connect: AtomicUsize,
    now_connect: AtomicUsize,
}

impl PadInfo {
    pub fn max_connect(&self) -> usize {
        self.max_connect.load(Ordering::Acquire)
    }

    pub fn now_connect(&self) -> usize {
        self.now_connect.load(Ordering::Acquire)
    }

    pub(crate) fn set_max_connect(&self, value: usize) {
        self.max_connect.store(value, Ordering::Release);
    }

    pub(crate) fn set_now_connect(&self, value: usize) {
        self.now_connect.store(value, Ordering::Release);
    }
}
