//! Modifier Tap - detects brief taps of a single modifier key on macOS
//!
//! This library exports core modules for the binary and integration tests.

/// Configuration management
pub mod config;
/// Primary execution context
pub mod dispatch;
/// Input handling (event taps, key codes)
pub mod input;
/// macOS permission checks
pub mod permissions;
/// Caller session state machine
pub mod session;
/// Live tap settings
pub mod settings;
/// Tap recognition
pub mod tap;
/// Telemetry and logging
pub mod telemetry;
