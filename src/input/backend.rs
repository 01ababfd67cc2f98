//! Platform capability interface for global keyboard input
//!
//! The recognizer holds no ambient OS state: everything it needs from the
//! platform goes through an [`InputBackend`], which tests replace with fakes.

use std::sync::Arc;
use thiserror::Error;

use super::keys::{KeyCode, ModifierState};
use crate::tap::intercept::{HookAction, HookEvent};
use crate::tap::thresholds::Timestamp;

/// Raw modifier transition delivered by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierEvent {
    /// Key whose transition produced this event
    pub key_code: KeyCode,
    /// Combined modifier flags after the transition
    pub modifiers: ModifierState,
    /// When the transition happened
    pub timestamp: Timestamp,
}

/// Receives modifier transitions; called from backend threads
pub type ModifierSink = Arc<dyn Fn(ModifierEvent) + Send + Sync>;

/// Receives non-modifier key presses; called from backend threads
pub type KeyDownSink = Arc<dyn Fn(KeyCode) + Send + Sync>;

/// Decides the fate of each event seen by the interception hook
///
/// Runs on the hook's callback thread and must return quickly.
pub type HookHandler = Arc<dyn Fn(HookEvent) -> HookAction + Send + Sync>;

/// Backend failures
#[derive(Debug, Error)]
pub enum BackendError {
    /// The OS refused to create an event tap (usually missing permission)
    #[error("failed to create {0} event tap - check Input Monitoring and Accessibility permissions")]
    TapCreation(&'static str),

    /// The tap could not be attached to a run loop
    #[error("failed to attach {0} event tap to a run loop")]
    RunLoopSource(&'static str),

    /// The thread hosting a tap could not be started
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread name
        name: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The tap thread exited before reporting its status
    #[error("{0} event tap thread exited during setup")]
    SetupAborted(&'static str),

    /// No implementation for this platform
    #[error("global keyboard monitoring is not supported on this platform")]
    Unsupported,
}

/// Global keyboard capabilities used by the tap recognizer
///
/// Installation calls are made from the primary execution context only.
/// `subscribe_*` and `install_interception` replace nothing when already
/// installed and return `Ok(())`; `unsubscribe_*` and `remove_interception`
/// are no-ops when nothing is installed. `is_key_down` may be called from
/// any thread.
pub trait InputBackend: Send + Sync {
    /// Start delivering modifier transitions to `sink`
    ///
    /// # Errors
    /// Returns error if the OS subscription cannot be created.
    fn subscribe_modifiers(&self, sink: ModifierSink) -> Result<(), BackendError>;

    /// Stop delivering modifier transitions
    fn unsubscribe_modifiers(&self);

    /// Start delivering every non-modifier key press to `sink`
    ///
    /// # Errors
    /// Returns error if the OS subscription cannot be created.
    fn subscribe_key_downs(&self, sink: KeyDownSink) -> Result<(), BackendError>;

    /// Stop delivering key presses
    fn unsubscribe_key_downs(&self);

    /// Install the privileged hook that can swallow key-down events
    ///
    /// # Errors
    /// Returns error if the hook cannot be created.
    fn install_interception(&self, handler: HookHandler) -> Result<(), BackendError>;

    /// Remove the privileged hook
    fn remove_interception(&self);

    /// Synchronously query whether `key_code` is physically down
    fn is_key_down(&self, key_code: KeyCode) -> bool;
}

/// Backend for platforms without a global keyboard implementation
///
/// Every subscription fails with [`BackendError::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl InputBackend for UnsupportedBackend {
    fn subscribe_modifiers(&self, _sink: ModifierSink) -> Result<(), BackendError> {
        Err(BackendError::Unsupported)
    }

    fn unsubscribe_modifiers(&self) {}

    fn subscribe_key_downs(&self, _sink: KeyDownSink) -> Result<(), BackendError> {
        Err(BackendError::Unsupported)
    }

    fn unsubscribe_key_downs(&self) {}

    fn install_interception(&self, _handler: HookHandler) -> Result<(), BackendError> {
        Err(BackendError::Unsupported)
    }

    fn remove_interception(&self) {}

    fn is_key_down(&self, _key_code: KeyCode) -> bool {
        false
    }
}

/// The backend for the current platform
#[must_use]
pub fn platform_backend() -> Arc<dyn InputBackend> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(super::cgevent::CgEventBackend::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(UnsupportedBackend)
    }
}
