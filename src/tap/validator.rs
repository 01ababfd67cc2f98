//! Timing state machine for a single tracked modifier

use super::thresholds::{TapThresholds, Timestamp};

/// Decides whether a down/up pair of the tracked modifier is a valid tap
///
/// Duration and debounce are only evaluated on release. Disqualification is
/// latched for the rest of the current hold and cleared on the next press.
#[derive(Debug, Clone, Default)]
pub struct TapGestureValidator {
    /// `Some` exactly while the modifier is held
    down_at: Option<Timestamp>,
    invalidated: bool,
    last_valid_tap_at: Option<Timestamp>,
}

impl TapGestureValidator {
    /// Fresh validator: not held, nothing invalidated, no previous tap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the validator currently considers the modifier held
    #[must_use]
    pub const fn is_down(&self) -> bool {
        self.down_at.is_some()
    }

    /// Whether the current hold has been disqualified
    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Feed a modifier transition; returns `true` when a valid tap completes
    ///
    /// A tap never completes on a press. A repeated press while already held
    /// can only add disqualification; a release while already up is ignored.
    pub fn register_transition(
        &mut self,
        is_down: bool,
        has_disallowed_modifiers: bool,
        at: Timestamp,
        thresholds: TapThresholds,
    ) -> bool {
        if is_down {
            if self.down_at.is_none() {
                self.down_at = Some(at);
                self.invalidated = has_disallowed_modifiers;
            } else if has_disallowed_modifiers {
                self.invalidated = true;
            }
            return false;
        }

        let Some(down_at) = self.down_at.take() else {
            return false;
        };
        let invalidated = std::mem::take(&mut self.invalidated);

        if invalidated || has_disallowed_modifiers {
            tracing::debug!(invalidated, has_disallowed_modifiers, "tap rejected: disqualified");
            return false;
        }

        let duration_ms = at.millis_since(down_at);
        if duration_ms < f64::from(thresholds.min_duration_ms)
            || duration_ms > f64::from(thresholds.effective_max_ms())
        {
            tracing::debug!(
                duration_ms,
                min_ms = thresholds.min_duration_ms,
                max_ms = thresholds.effective_max_ms(),
                "tap rejected: outside duration window"
            );
            return false;
        }

        if let Some(last) = self.last_valid_tap_at {
            let since_last_ms = at.millis_since(last);
            if since_last_ms < f64::from(thresholds.debounce_ms) {
                tracing::debug!(
                    since_last_ms,
                    debounce_ms = thresholds.debounce_ms,
                    "tap rejected: debounced"
                );
                return false;
            }
        }

        self.last_valid_tap_at = Some(at);
        true
    }

    /// Disqualify the current hold, if any
    ///
    /// Used for unrelated key presses during the hold and for explicit
    /// cancellation by the caller.
    pub fn register_disqualifying_key_down(&mut self) {
        if self.is_down() {
            self.invalidated = true;
        }
    }
}
