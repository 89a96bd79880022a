//! Daemon settings, loaded once at startup from a TOML file.
//!
//! Every field has a default so a missing file (the common case on a
//! fresh install) yields a fully usable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pulse the rear display awake while a migrated session sits on it.
    pub keep_rear_awake: bool,
    /// Keep the charging overlay up until power disconnects instead of
    /// auto-dismissing.
    pub charging_always_on: bool,
    /// Seconds before a notification overlay dismisses itself.
    pub notification_auto_dismiss_secs: u64,
    /// Pull the migrated session back to the primary display when the
    /// proximity sensor reports the rear display covered.
    pub proximity_pullback: bool,
    /// Package of the stock rear-display home surface.
    pub rear_home_package: String,
    /// Full component launched to bring the rear home surface back.
    pub rear_home_component: String,
    /// Component of the charging overlay surface.
    pub charging_component: String,
    /// Component of the notification overlay surface.
    pub notification_component: String,
    /// Component substrings identifying our own overlay and placeholder
    /// surfaces in stack dumps. A foreground match against any of these
    /// is never treated as a foreign occupant.
    pub overlay_markers: Vec<String>,
    /// Directory rear-display screenshots are written to.
    pub snapshot_dir: String,
    /// Directory rear-display recordings are written to.
    pub recording_dir: String,
    /// Elevation command prefix for the shell broker, e.g. `su -c`.
    /// Empty means the broker already runs privileged.
    pub elevation_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keep_rear_awake: true,
            charging_always_on: false,
            notification_auto_dismiss_secs: 10,
            proximity_pullback: true,
            rear_home_package: "com.xiaomi.subscreencenter".to_string(),
            rear_home_component: "com.xiaomi.subscreencenter/.SubScreenLauncher".to_string(),
            charging_component: "com.rearshift.surfaces/.ChargingOverlayActivity".to_string(),
            notification_component: "com.rearshift.surfaces/.NotificationOverlayActivity"
                .to_string(),
            overlay_markers: vec![
                "ChargingOverlay".to_string(),
                "NotificationOverlay".to_string(),
                "PlaceholderActivity".to_string(),
            ],
            snapshot_dir: "/sdcard/Pictures/RearShots".to_string(),
            recording_dir: "/sdcard/Movies".to_string(),
            elevation_prefix: String::new(),
        }
    }
}

impl Settings {
    /// Load from `path`. A missing file yields the defaults; a present
    /// but malformed file is an error (silently ignoring a typo'd config
    /// is worse than refusing to start).
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// True if `component` names one of our own overlay surfaces.
    pub fn is_overlay_component(&self, component: &str) -> bool {
        self.overlay_markers.iter().any(|m| component.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!(s.keep_rear_awake);
        assert!(!s.charging_always_on);
        assert_eq!(s.notification_auto_dismiss_secs, 10);
        assert!(s.proximity_pullback);
        assert!(s.elevation_prefix.is_empty());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "keep_rear_awake = false").unwrap();
        writeln!(f, "notification_auto_dismiss_secs = 30").unwrap();
        drop(f);

        let s = Settings::load(&path).unwrap();
        assert!(!s.keep_rear_awake);
        assert_eq!(s.notification_auto_dismiss_secs, 30);
        // Untouched fields keep their defaults.
        assert_eq!(s.rear_home_package, "com.xiaomi.subscreencenter");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "keep_rear_awake = \"maybe\"").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn overlay_component_matching() {
        let s = Settings::default();
        assert!(s.is_overlay_component("com.rearshift/.ChargingOverlayActivity"));
        assert!(s.is_overlay_component("com.rearshift/.PlaceholderActivity"));
        assert!(!s.is_overlay_component("com.example.game/.MainActivity"));
    }
}
