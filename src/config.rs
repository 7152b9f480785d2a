//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all, via
//! [`Config::default`]) yields a working configuration. The loaded value is
//! immutable afterwards and is handed to the handler by value.

use serde::de::Error;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{JoystickError, Result};
use crate::pad::{LogicalButton, LogicalStick};

/// Highest number of controller slots a host may ask for.
pub const MAX_SUPPORTED_SLOTS: usize = 7;

/// Number of device axes that can feed a logical stick.
pub const AXIS_BAND: u16 = 8;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub backend: BackendConfig,
    pub mapping: MappingConfig,
    pub logging: LoggingConfig,
}

/// Poll loop timing and slot limits
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub max_slots: usize,
    pub poll_interval_ms: u64,
    pub idle_poll_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub max_events_per_cycle: usize,
    pub disconnect_on_read_error: bool,
}

/// Which device interface to poll
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `/dev/input/event*` nodes, capabilities probed at connect time
    #[default]
    Evdev,
    /// Legacy `/dev/input/js*` nodes, button numbers used as-is
    Joystick,
}

/// Device backend selection and path resolution
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Explicit per-slot paths; skips discovery when non-empty
    pub device_paths: Vec<String>,
    pub by_id_dir: String,
    pub name_suffix: String,
    pub joystick_path_prefix: String,
}

/// Logical layout bindings
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MappingConfig {
    pub buttons: ButtonMapping,
    pub sticks: StickMapping,
}

/// Logical button to key code.
///
/// For the evdev backend the key code is the button's discovery index on
/// the device; for the joystick backend it is the button number the driver
/// reports.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ButtonMapping {
    pub triangle: u16,
    pub circle: u16,
    pub cross: u16,
    pub square: u16,
    pub l2: u16,
    pub r2: u16,
    pub l1: u16,
    pub r1: u16,
    pub start: u16,
    pub select: u16,
    pub l3: u16,
    pub r3: u16,
    pub up: u16,
    pub down: u16,
    pub left: u16,
    pub right: u16,
}

/// Logical stick to device axis index.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StickMapping {
    pub left_x: u16,
    pub left_y: u16,
    pub right_x: u16,
    pub right_y: u16,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

// Default value functions
fn default_max_slots() -> usize { 1 }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_idle_poll_interval_ms() -> u64 { 100 }
fn default_read_timeout_ms() -> u64 { 10 }
fn default_shutdown_timeout_ms() -> u64 { 1000 }
fn default_max_events_per_cycle() -> usize { 1 }

fn default_by_id_dir() -> String { "/dev/input/by-id".to_string() }
fn default_name_suffix() -> String { "event-joystick".to_string() }
fn default_joystick_path_prefix() -> String { "/dev/input/js".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_slots: default_max_slots(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_events_per_cycle: default_max_events_per_cycle(),
            disconnect_on_read_error: false,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            device_paths: Vec::new(),
            by_id_dir: default_by_id_dir(),
            name_suffix: default_name_suffix(),
            joystick_path_prefix: default_joystick_path_prefix(),
        }
    }
}

impl Default for ButtonMapping {
    fn default() -> Self {
        Self {
            triangle: 0,
            circle: 1,
            cross: 2,
            square: 3,
            l2: 4,
            r2: 5,
            l1: 6,
            r1: 7,
            select: 8,
            start: 9,
            l3: 10,
            r3: 11,
            up: 12,
            down: 13,
            left: 14,
            right: 15,
        }
    }
}

impl Default for StickMapping {
    fn default() -> Self {
        Self {
            left_x: 0,
            left_y: 1,
            right_x: 2,
            right_y: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ButtonMapping {
    /// Bindings in logical layout order.
    pub fn entries(&self) -> [(LogicalButton, u16); 16] {
        [
            (LogicalButton::Triangle, self.triangle),
            (LogicalButton::Circle, self.circle),
            (LogicalButton::Cross, self.cross),
            (LogicalButton::Square, self.square),
            (LogicalButton::L2, self.l2),
            (LogicalButton::R2, self.r2),
            (LogicalButton::L1, self.l1),
            (LogicalButton::R1, self.r1),
            (LogicalButton::Start, self.start),
            (LogicalButton::Select, self.select),
            (LogicalButton::L3, self.l3),
            (LogicalButton::R3, self.r3),
            (LogicalButton::Up, self.up),
            (LogicalButton::Down, self.down),
            (LogicalButton::Left, self.left),
            (LogicalButton::Right, self.right),
        ]
    }
}

impl StickMapping {
    /// Bindings in logical layout order.
    pub fn entries(&self) -> [(LogicalStick, u16); 4] {
        [
            (LogicalStick::LeftX, self.left_x),
            (LogicalStick::LeftY, self.left_y),
            (LogicalStick::RightX, self.right_x),
            (LogicalStick::RightY, self.right_y),
        ]
    }
}

fn invalid(msg: impl std::fmt::Display) -> JoystickError {
    JoystickError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use joystick_poller::config::Config;
    ///
    /// let config = Config::load("joystick.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;

        if engine.max_slots == 0 || engine.max_slots > MAX_SUPPORTED_SLOTS {
            return Err(invalid(format!(
                "max_slots must be between 1 and {}",
                MAX_SUPPORTED_SLOTS
            )));
        }

        for (name, value, max) in [
            ("poll_interval_ms", engine.poll_interval_ms, 1000),
            ("idle_poll_interval_ms", engine.idle_poll_interval_ms, 10000),
            ("read_timeout_ms", engine.read_timeout_ms, 1000),
            ("shutdown_timeout_ms", engine.shutdown_timeout_ms, 60000),
        ] {
            if value == 0 || value > max {
                return Err(invalid(format!("{} must be between 1 and {}", name, max)));
            }
        }

        if engine.idle_poll_interval_ms < engine.poll_interval_ms {
            return Err(invalid(
                "idle_poll_interval_ms must not be shorter than poll_interval_ms",
            ));
        }

        if engine.max_events_per_cycle == 0 {
            return Err(invalid("max_events_per_cycle must be greater than 0"));
        }

        if self.backend.device_paths.iter().any(|p| p.is_empty()) {
            return Err(invalid("device_paths entries cannot be empty"));
        }

        match self.backend.kind {
            BackendKind::Evdev if self.backend.device_paths.is_empty() => {
                if self.backend.by_id_dir.is_empty() || self.backend.name_suffix.is_empty() {
                    return Err(invalid(
                        "by_id_dir and name_suffix are required for evdev discovery",
                    ));
                }
            }
            BackendKind::Joystick if self.backend.device_paths.is_empty() => {
                if self.backend.joystick_path_prefix.is_empty() {
                    return Err(invalid("joystick_path_prefix cannot be empty"));
                }
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        for (button, code) in self.mapping.buttons.entries() {
            if !seen.insert(code) {
                return Err(invalid(format!(
                    "button code {} for {:?} is already bound to another button",
                    code, button
                )));
            }
        }

        let mut seen = HashSet::new();
        for (stick, axis) in self.mapping.sticks.entries() {
            if axis >= AXIS_BAND {
                return Err(invalid(format!(
                    "axis {} for {:?} is out of range (must be 0-{})",
                    axis,
                    stick,
                    AXIS_BAND - 1
                )));
            }
            if !seen.insert(axis) {
                return Err(invalid(format!(
                    "axis {} for {:?} is already bound to another stick",
                    axis, stick
                )));
            }
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid(
                "log level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}
