//! # Joystick Poller Library
//!
//! Background polling engine for Linux joysticks.
//!
//! This library discovers joystick devices, tracks their connect/disconnect
//! state, maps device button and axis codes onto a fixed logical controller
//! layout, and keeps one shared pad record per slot up to date for a host
//! input subsystem to read.

pub mod config;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod error;
pub mod pad;
pub mod registry;
