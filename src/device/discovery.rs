//! # Device Path Discovery
//!
//! Resolves one stable device path per slot, once, at handler init.
//!
//! - evdev: persistent `by-id` symlinks whose name ends with the joystick
//!   suffix (e.g. `usb-Sony_Wireless_Controller-event-joystick`), sorted for
//!   deterministic slot assignment
//! - joystick: fixed numbered nodes `/dev/input/js0`, `/dev/input/js1`, ...
//!
//! An explicit `device_paths` list in the configuration overrides both.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::{BackendConfig, BackendKind};

/// Resolves a path for each of `slots` slots.
///
/// Slots beyond the number of discovered devices get `None` and stay
/// disconnected for the lifetime of the handler.
pub fn resolve_paths(config: &BackendConfig, slots: usize) -> Vec<Option<String>> {
    let candidates = if !config.device_paths.is_empty() {
        config.device_paths.clone()
    } else {
        match config.kind {
            BackendKind::Evdev => scan_by_id(Path::new(&config.by_id_dir), &config.name_suffix),
            BackendKind::Joystick => (0..slots)
                .map(|slot| format!("{}{}", config.joystick_path_prefix, slot))
                .collect(),
        }
    };

    (0..slots).map(|slot| candidates.get(slot).cloned()).collect()
}

/// Lists entries of `dir` whose file name ends with `suffix`, sorted.
pub fn scan_by_id(dir: &Path, suffix: &str) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to scan {} for joysticks: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut paths: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        .map(|entry| entry.path().to_string_lossy().to_string())
        .collect();
    paths.sort();

    debug!("Found {} joystick node(s) in {}", paths.len(), dir.display());
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn evdev_config(dir: &Path) -> BackendConfig {
        BackendConfig {
            by_id_dir: dir.to_string_lossy().to_string(),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn test_scan_matches_suffix_only() {
        let dir = TempDir::new().unwrap();
        for name in [
            "usb-Sony_Controller-event-joystick",
            "usb-Sony_Controller-joystick",
            "usb-Logitech_Mouse-event-mouse",
            "usb-8BitDo_Pro-event-joystick",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let paths = scan_by_id(dir.path(), "event-joystick");
        assert_eq!(paths.len(), 2);
        // Sorted for deterministic slot order
        assert!(paths[0].ends_with("usb-8BitDo_Pro-event-joystick"));
        assert!(paths[1].ends_with("usb-Sony_Controller-event-joystick"));
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        assert!(scan_by_id(Path::new("/nonexistent/by-id"), "event-joystick").is_empty());
    }

    #[test]
    fn test_resolve_evdev_more_slots_than_devices() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("usb-Pad-event-joystick")).unwrap();

        let paths = resolve_paths(&evdev_config(dir.path()), 2);
        assert_eq!(paths.len(), 2);
        assert!(paths[0].as_deref().unwrap().ends_with("usb-Pad-event-joystick"));
        assert_eq!(paths[1], None);
    }

    #[test]
    fn test_resolve_evdev_fewer_slots_than_devices() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("a-event-joystick")).unwrap();
        File::create(dir.path().join("b-event-joystick")).unwrap();

        let paths = resolve_paths(&evdev_config(dir.path()), 1);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].as_deref().unwrap().ends_with("a-event-joystick"));
    }

    #[test]
    fn test_resolve_joystick_numbered_paths() {
        let config = BackendConfig {
            kind: BackendKind::Joystick,
            ..BackendConfig::default()
        };
        let paths = resolve_paths(&config, 2);
        assert_eq!(
            paths,
            vec![
                Some("/dev/input/js0".to_string()),
                Some("/dev/input/js1".to_string())
            ]
        );
    }

    #[test]
    fn test_explicit_paths_override_discovery() {
        let config = BackendConfig {
            kind: BackendKind::Joystick,
            device_paths: vec!["/dev/input/js3".to_string()],
            ..BackendConfig::default()
        };
        assert_eq!(
            resolve_paths(&config, 2),
            vec![Some("/dev/input/js3".to_string()), None]
        );
    }
}
