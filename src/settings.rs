//! Live tap settings
//!
//! Changes made through the setters apply to the next modifier transition
//! without restarting the recognizer.

use std::sync::{PoisonError, RwLock};

use crate::config::TapConfig;
use crate::tap::thresholds::{TapSettingsSource, TapThresholds, TrackingMode};

#[derive(Debug, Clone, Copy)]
struct Values {
    min_duration_ms: u32,
    max_duration_ms: u32,
    debounce_ms: u32,
    mode: TrackingMode,
}

/// Thread-safe settings store read by the recognizer
#[derive(Debug)]
pub struct SettingsStore {
    values: RwLock<Values>,
}

impl SettingsStore {
    /// Seed from the `[tap]` config section
    #[must_use]
    pub fn from_config(config: &TapConfig) -> Self {
        Self {
            values: RwLock::new(Values {
                min_duration_ms: config.min_duration_ms.max(1),
                max_duration_ms: config.max_duration_ms.max(1),
                debounce_ms: config.debounce_ms,
                mode: config.mode,
            }),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut Values)) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut values);
    }

    fn read(&self) -> Values {
        *self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the minimum tap duration; values below 1 are stored as 1
    pub fn set_min_duration_ms(&self, value: u32) {
        self.update(|v| v.min_duration_ms = value.max(1));
    }

    /// Set the maximum tap duration; values below 1 are stored as 1
    pub fn set_max_duration_ms(&self, value: u32) {
        self.update(|v| v.max_duration_ms = value.max(1));
    }

    /// Set the debounce window
    pub fn set_debounce_ms(&self, value: u32) {
        self.update(|v| v.debounce_ms = value);
    }

    /// Switch the tracked side
    pub fn set_mode(&self, mode: TrackingMode) {
        self.update(|v| v.mode = mode);
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::from_config(&TapConfig::default())
    }
}

impl TapSettingsSource for SettingsStore {
    fn thresholds(&self) -> TapThresholds {
        let values = self.read();
        TapThresholds::new(
            values.min_duration_ms,
            values.max_duration_ms,
            values.debounce_ms,
        )
    }

    fn tracking_mode(&self) -> TrackingMode {
        self.read().mode
    }
}
