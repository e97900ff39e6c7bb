//! Key and mouse injection seam.
//!
//! The real injection primitives live outside this crate. Key symbols are
//! plain names (`"left"`, `"y"`, `"f1"`); a chord is written with `+`
//! (`"down+space"`) and is pressed and released together.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::error::EnvironmentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MouseButton {
    Left,
    Right,
}

/// Environment-absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

pub trait InputInjector: Send + Sync {
    fn press_key(&self, key: &str, hold: Duration) -> Result<(), EnvironmentError>;
    fn click(&self, at: ScreenPoint, button: MouseButton) -> Result<(), EnvironmentError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InputRecord {
    Press { key: String, hold: Duration },
    Click { at: ScreenPoint, button: MouseButton },
}

/// Injector that only records and logs what it was asked to do.
/// Used for dry runs and by the test suite.
#[derive(Debug, Default)]
pub struct RecordingInjector {
    log: Mutex<Vec<InputRecord>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<InputRecord> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn pressed_keys(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                InputRecord::Press { key, .. } => Some(key),
                InputRecord::Click { .. } => None,
            })
            .collect()
    }

    pub fn clicks(&self) -> Vec<(ScreenPoint, MouseButton)> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                InputRecord::Click { at, button } => Some((at, button)),
                InputRecord::Press { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl InputInjector for RecordingInjector {
    fn press_key(&self, key: &str, hold: Duration) -> Result<(), EnvironmentError> {
        debug!("press '{}' for {:?}", key, hold);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(InputRecord::Press {
                key: key.to_string(),
                hold,
            });
        Ok(())
    }

    fn click(&self, at: ScreenPoint, button: MouseButton) -> Result<(), EnvironmentError> {
        debug!("{:?} click at ({}, {})", button, at.x, at.y);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(InputRecord::Click { at, button });
        Ok(())
    }
}
