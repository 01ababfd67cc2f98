//! Per-side state reconciliation
//!
//! The OS reports only the combined state of a modifier family. Each
//! transition event names the physical key that produced it, and a separate
//! key-state query reports each side individually, but neither source is
//! reliable on its own: events can be missed, and the query is known to
//! report the right-hand key for either side on some hardware. [`reconcile`]
//! merges both into a best-effort [`SideState`].

use crate::input::keys::ModifierSide;

use super::thresholds::TrackingMode;

/// Held state of each side of the tracked family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideState {
    /// Left key is held
    pub left: bool,
    /// Right key is held
    pub right: bool,
}

impl SideState {
    /// Build from both sides
    #[must_use]
    pub const fn new(left: bool, right: bool) -> Self {
        Self { left, right }
    }

    /// Whether `side` is held
    #[must_use]
    pub const fn is_down(self, side: ModifierSide) -> bool {
        match side {
            ModifierSide::Left => self.left,
            ModifierSide::Right => self.right,
        }
    }

    fn set(&mut self, side: ModifierSide, down: bool) {
        match side {
            ModifierSide::Left => self.left = down,
            ModifierSide::Right => self.right = down,
        }
    }

    /// The side that is held when exactly one is
    #[must_use]
    pub const fn sole_side(self) -> Option<ModifierSide> {
        match (self.left, self.right) {
            (true, false) => Some(ModifierSide::Left),
            (false, true) => Some(ModifierSide::Right),
            _ => None,
        }
    }

    /// Neither side held
    #[must_use]
    pub const fn is_released(self) -> bool {
        !self.left && !self.right
    }

    /// Whether the modifier counts as held under `mode`
    #[must_use]
    pub const fn is_down_for(self, mode: TrackingMode) -> bool {
        match mode.side() {
            None => self.left || self.right,
            Some(side) => self.is_down(side),
        }
    }

    /// Whether the side `mode` does not track is held
    ///
    /// Always `false` for [`TrackingMode::Either`].
    #[must_use]
    pub const fn has_untracked_down(self, mode: TrackingMode) -> bool {
        match mode.side() {
            None => false,
            Some(side) => self.is_down(side.opposite()),
        }
    }
}

/// Merge an event and a key-state sample into the next side state
///
/// `family_down` is the combined flag from the event and `event_side` the
/// side its key code identifies. `sampled` is the per-side key state taken
/// when the event was received; it is ignored while the family is released.
#[must_use]
pub fn reconcile(
    previous: SideState,
    family_down: bool,
    event_side: Option<ModifierSide>,
    sampled: SideState,
) -> SideState {
    if !family_down {
        return SideState::default();
    }

    let mut resolved = previous;
    if let Some(side) = event_side {
        resolved.set(side, !previous.is_down(side));
    }

    // The family is down, so "nothing held" cannot be right.
    if resolved.is_released() {
        if let Some(side) = event_side {
            resolved.set(side, true);
        }
    }

    match sampled.sole_side() {
        Some(sampled_side) => {
            let adopt = match event_side {
                Some(side) if side == sampled_side => true,
                // Disagreement: only trust the sample if it names the side we
                // were already tracking (a missed release of the event side).
                Some(_) => previous.is_down(sampled_side),
                None => true,
            };
            if adopt {
                resolved = sampled;
            }
        }
        None if sampled.is_released() && resolved.is_released() => {
            resolved = previous;
        }
        None => {}
    }

    resolved
}
