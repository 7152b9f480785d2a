//! # Pad Layout
//!
//! The resolved logical layout: which key code drives which button and
//! which device axis drives which stick. Built once from the mapping
//! configuration, shared read-only by every slot.

use std::collections::HashMap;

use super::{LogicalButton, LogicalStick};
use crate::config::MappingConfig;

/// Logical layout plus the lookup tables the decoder needs.
///
/// `button_index` and `stick_index` map a configured code straight to the
/// position in the pad's button/stick list, so decoding an event never
/// scans the list.
#[derive(Debug, Clone)]
pub struct PadLayout {
    buttons: Vec<(LogicalButton, u16)>,
    sticks: Vec<(LogicalStick, u16)>,
    button_index: HashMap<u16, usize>,
    stick_index: HashMap<u16, usize>,
}

impl PadLayout {
    /// Builds the layout from mapping configuration.
    ///
    /// If the same code is bound twice the first binding in layout order
    /// wins; [`Config::validate`](crate::config::Config::validate) rejects
    /// such configurations before they get here.
    pub fn from_config(mapping: &MappingConfig) -> Self {
        let buttons = mapping.buttons.entries().to_vec();
        let sticks = mapping.sticks.entries().to_vec();

        let mut button_index = HashMap::with_capacity(buttons.len());
        for (position, &(_, code)) in buttons.iter().enumerate() {
            button_index.entry(code).or_insert(position);
        }

        let mut stick_index = HashMap::with_capacity(sticks.len());
        for (position, &(_, axis)) in sticks.iter().enumerate() {
            stick_index.entry(axis).or_insert(position);
        }

        Self {
            buttons,
            sticks,
            button_index,
            stick_index,
        }
    }

    /// Logical buttons in list order.
    pub fn buttons(&self) -> impl Iterator<Item = LogicalButton> + '_ {
        self.buttons.iter().map(|&(button, _)| button)
    }

    /// Logical sticks in list order.
    pub fn sticks(&self) -> impl Iterator<Item = LogicalStick> + '_ {
        self.sticks.iter().map(|&(stick, _)| stick)
    }

    pub fn button_count(&self) -> usize {
        self.buttons.len()
    }

    pub fn stick_count(&self) -> usize {
        self.sticks.len()
    }

    /// Position in the button list of the button bound to `key_code`.
    pub fn button_position(&self, key_code: u16) -> Option<usize> {
        self.button_index.get(&key_code).copied()
    }

    /// Position in the stick list of the stick fed by device axis `axis`.
    pub fn stick_position(&self, axis: u16) -> Option<usize> {
        self.stick_index.get(&axis).copied()
    }

    /// Key code bound to a logical button.
    pub fn key_code(&self, button: LogicalButton) -> Option<u16> {
        self.buttons
            .iter()
            .find(|(b, _)| *b == button)
            .map(|&(_, code)| code)
    }
}
