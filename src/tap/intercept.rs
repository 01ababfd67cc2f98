//! Decision logic for the privileged interception hook

use crate::input::keys::KeyCode;

/// Event observed by the interception hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// A key went down
    KeyDown(KeyCode),
    /// The OS disabled the hook because a callback took too long
    DisabledByTimeout,
    /// The OS disabled the hook in response to user input
    DisabledByUserInput,
}

/// What the backend must do with the event that reached the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Deliver the event unchanged
    PassThrough,
    /// Swallow the event so no other consumer sees it
    Consume,
    /// Re-enable the hook, then deliver the event unchanged
    Reenable,
}

/// Decide how the hook handles `event`
#[must_use]
pub fn respond(event: HookEvent, designated_key: KeyCode, enabled: bool) -> HookAction {
    match event {
        HookEvent::DisabledByTimeout | HookEvent::DisabledByUserInput => HookAction::Reenable,
        HookEvent::KeyDown(code) if code == designated_key && enabled => HookAction::Consume,
        HookEvent::KeyDown(_) => HookAction::PassThrough,
    }
}
