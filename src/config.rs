//! Bot settings stored as JSON next to the routines.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::ConfigError;

pub const MAX_PETS: u32 = 3;

/// Settings shared between the control loop and the UI.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Missing fields take their defaults; unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub bindings: KeyBindings,
    pub pets: PetSettings,
    pub capture: CaptureSettings,
    pub hotkeys: HotkeySettings,
}

/// Keys the core itself presses, independent of the command book.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyBindings {
    pub interact: String,
    pub feed_pet: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            interact: "y".to_string(),
            feed_pet: "9".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PetSettings {
    pub auto_feed: bool,
    /// Feeding interval is divided by this count.
    pub num_pets: u32,
}

impl Default for PetSettings {
    fn default() -> Self {
        Self {
            auto_feed: false,
            num_pets: 1,
        }
    }
}

/// Environment window on screen, and the grabber cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureSettings {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    pub interval_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            left: 0,
            top: 0,
            width: 1366,
            height: 768,
            interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HotkeySettings {
    /// Line typed on the console to flip `enabled`.
    pub toggle: String,
}

impl Default for HotkeySettings {
    fn default() -> Self {
        Self {
            toggle: "insert".to_string(),
        }
    }
}

impl Settings {
    /// Load settings. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.normalize();
        Ok(settings)
    }

    /// Write settings through a temp file so a crash never leaves half a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut buf = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        buf.push('\n');

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, buf).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }

    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    fn normalize(&mut self) {
        self.pets.num_pets = self.pets.num_pets.clamp(1, MAX_PETS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&temp.path().join("settings.json")).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.bindings.interact, "y");
        assert_eq!(settings.bindings.feed_pet, "9");
    }

    #[test]
    fn partial_file_is_filled_and_clamped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        fs::write(&path, r#"{ "pets": { "auto_feed": true, "num_pets": 7 }, "theme": "dark" }"#).unwrap();

        let settings = Settings::load(&path).expect("load");
        assert!(settings.pets.auto_feed);
        assert_eq!(settings.pets.num_pets, 3);
        assert_eq!(settings.capture, CaptureSettings::default());
    }

    #[test]
    fn saved_settings_load_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.bindings.interact = "space".to_string();
        settings.save(&path).expect("save");
        assert_eq!(Settings::load(&path).expect("load"), settings);
    }
}
