//! Key codes and modifier-flag state
//!
//! Key codes are macOS virtual key codes (`kVK_*`). Other platforms map their
//! native codes onto these before handing events to the recognizer.

use serde::Deserialize;

/// Hardware-independent virtual key code
pub type KeyCode = u16;

/// Virtual key codes used by the recognizer
pub mod codes {
    use super::KeyCode;

    /// Escape
    pub const ESCAPE: KeyCode = 0x35;
    /// Left Command
    pub const COMMAND: KeyCode = 0x37;
    /// Right Command
    pub const RIGHT_COMMAND: KeyCode = 0x36;
    /// Left Shift
    pub const SHIFT: KeyCode = 0x38;
    /// Right Shift
    pub const RIGHT_SHIFT: KeyCode = 0x3C;
    /// Caps Lock
    pub const CAPS_LOCK: KeyCode = 0x39;
    /// Left Option
    pub const OPTION: KeyCode = 0x3A;
    /// Right Option
    pub const RIGHT_OPTION: KeyCode = 0x3D;
    /// Left Control
    pub const CONTROL: KeyCode = 0x3B;
    /// Right Control
    pub const RIGHT_CONTROL: KeyCode = 0x3E;
    /// Function (fn)
    pub const FUNCTION: KeyCode = 0x3F;
}

/// Physical side of a two-sided modifier key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierSide {
    /// Left-hand key
    Left,
    /// Right-hand key
    Right,
}

impl ModifierSide {
    /// The other side
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// A logical modifier made of a left and a right physical key
///
/// The OS reports the family as a single combined flag; the two sides are
/// only distinguishable through the key code of each transition event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierFamily {
    /// Option / Alt
    #[default]
    Option,
    /// Command / Super
    Command,
    /// Control
    Control,
    /// Shift
    Shift,
}

impl ModifierFamily {
    /// Key code of the given side of this family
    #[must_use]
    pub const fn key_code(self, side: ModifierSide) -> KeyCode {
        match (self, side) {
            (Self::Option, ModifierSide::Left) => codes::OPTION,
            (Self::Option, ModifierSide::Right) => codes::RIGHT_OPTION,
            (Self::Command, ModifierSide::Left) => codes::COMMAND,
            (Self::Command, ModifierSide::Right) => codes::RIGHT_COMMAND,
            (Self::Control, ModifierSide::Left) => codes::CONTROL,
            (Self::Control, ModifierSide::Right) => codes::RIGHT_CONTROL,
            (Self::Shift, ModifierSide::Left) => codes::SHIFT,
            (Self::Shift, ModifierSide::Right) => codes::RIGHT_SHIFT,
        }
    }

    /// Which side of this family produced `key_code`, if any
    #[must_use]
    pub const fn side_of(self, key_code: KeyCode) -> Option<ModifierSide> {
        if key_code == self.key_code(ModifierSide::Left) {
            Some(ModifierSide::Left)
        } else if key_code == self.key_code(ModifierSide::Right) {
            Some(ModifierSide::Right)
        } else {
            None
        }
    }
}

/// Combined modifier flags as reported with a flags-changed event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    /// Shift is held
    pub shift: bool,
    /// Control is held
    pub control: bool,
    /// Option/Alt is held
    pub option: bool,
    /// Command is held
    pub command: bool,
    /// Caps Lock is engaged
    pub caps_lock: bool,
    /// Function (fn) is held
    pub function: bool,
}

impl ModifierState {
    /// Whether the combined flag for `family` is set
    #[must_use]
    pub const fn contains(&self, family: ModifierFamily) -> bool {
        match family {
            ModifierFamily::Option => self.option,
            ModifierFamily::Command => self.command,
            ModifierFamily::Control => self.control,
            ModifierFamily::Shift => self.shift,
        }
    }

    /// Whether any modifier other than `family` is active
    ///
    /// Caps Lock and fn always count as disallowed.
    #[must_use]
    pub const fn has_disallowed(&self, family: ModifierFamily) -> bool {
        let others = match family {
            ModifierFamily::Option => self.shift || self.control || self.command,
            ModifierFamily::Command => self.shift || self.control || self.option,
            ModifierFamily::Control => self.shift || self.option || self.command,
            ModifierFamily::Shift => self.control || self.option || self.command,
        };
        others || self.caps_lock || self.function
    }

    /// Only the given family's flag is set
    #[must_use]
    pub fn only(family: ModifierFamily) -> Self {
        let mut state = Self::default();
        match family {
            ModifierFamily::Option => state.option = true,
            ModifierFamily::Command => state.command = true,
            ModifierFamily::Control => state.control = true,
            ModifierFamily::Shift => state.shift = true,
        }
        state
    }
}
