//! Timing thresholds, tracking mode and the settings read interface

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::input::keys::ModifierSide;

/// Default minimum tap duration (ms)
pub const DEFAULT_MIN_DURATION_MS: u32 = 20;
/// Default maximum tap duration (ms)
pub const DEFAULT_MAX_DURATION_MS: u32 = 450;
/// Default debounce window between accepted taps (ms)
pub const DEFAULT_DEBOUNCE_MS: u32 = 250;

/// Monotonic instant, measured from an arbitrary origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Timestamp at `elapsed` past the origin
    #[must_use]
    pub const fn from_duration(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Timestamp at `millis` past the origin
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Timestamp at `secs` past the origin; negative or NaN saturates to zero
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }

    /// Current time relative to a process-wide origin
    #[must_use]
    pub fn now() -> Self {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        Self(ORIGIN.get_or_init(Instant::now).elapsed())
    }

    /// Elapsed time since the origin
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is later
    ///
    /// Computed from integer nanoseconds so whole-millisecond gaps are exact.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // sub-nanosecond precision is irrelevant here
    pub fn millis_since(self, earlier: Self) -> f64 {
        self.0.saturating_sub(earlier.0).as_nanos() as f64 / 1_000_000.0
    }
}

/// Timing window for a tap, read fresh for every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapThresholds {
    /// Shortest accepted hold (ms, at least 1)
    pub min_duration_ms: u32,
    /// Longest accepted hold (ms, never below `min_duration_ms` once normalized)
    pub max_duration_ms: u32,
    /// Minimum gap between the releases of two accepted taps (ms)
    pub debounce_ms: u32,
}

impl TapThresholds {
    /// Build thresholds, clamping `min >= 1` and `max >= min`
    #[must_use]
    pub fn new(min_duration_ms: u32, max_duration_ms: u32, debounce_ms: u32) -> Self {
        let min_duration_ms = min_duration_ms.max(1);
        Self {
            min_duration_ms,
            max_duration_ms: max_duration_ms.max(min_duration_ms),
            debounce_ms,
        }
    }

    /// Upper bound actually applied, never below the minimum
    #[must_use]
    pub fn effective_max_ms(&self) -> u32 {
        self.max_duration_ms.max(self.min_duration_ms)
    }
}

impl Default for TapThresholds {
    fn default() -> Self {
        Self::new(
            DEFAULT_MIN_DURATION_MS,
            DEFAULT_MAX_DURATION_MS,
            DEFAULT_DEBOUNCE_MS,
        )
    }
}

/// Which physical side(s) count as the tracked modifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Either side
    #[default]
    Either,
    /// Left side only
    Left,
    /// Right side only
    Right,
}

impl TrackingMode {
    /// The single side this mode tracks, `None` for `Either`
    #[must_use]
    pub const fn side(self) -> Option<ModifierSide> {
        match self {
            Self::Either => None,
            Self::Left => Some(ModifierSide::Left),
            Self::Right => Some(ModifierSide::Right),
        }
    }
}

/// Live configuration read by the recognizer
///
/// Both reads must be side-effect free and cheap; the recognizer calls them
/// once per modifier transition, on the primary execution context.
pub trait TapSettingsSource: Send + Sync {
    /// Current timing thresholds
    fn thresholds(&self) -> TapThresholds;

    /// Current tracking mode
    fn tracking_mode(&self) -> TrackingMode;
}
