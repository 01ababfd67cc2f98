//! Modifier tap recognition

/// Interception hook decisions
pub mod intercept;
/// Per-side modifier state reconciliation
pub mod reconcile;
/// Recognizer orchestration
pub mod recognizer;
/// Thresholds, timestamps and the settings interface
pub mod thresholds;
/// Tap gesture validation
pub mod validator;

pub use recognizer::{RecognizerError, RecognizerOptions, TapRecognizer};
pub use thresholds::{TapSettingsSource, TapThresholds, Timestamp, TrackingMode};
pub use validator::TapGestureValidator;
