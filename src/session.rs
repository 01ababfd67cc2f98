use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Application state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Waiting for a tap
    Idle,
    /// Capturing until the next tap, a stop request or Escape
    Recording,
    /// Finishing up a completed capture
    Processing,
}

/// Caller-side session driven by the recognizer callbacks
///
/// Every handler returns the state the session settled in, so the caller can
/// keep escape interception and stop-on-press in step with `Recording`.
#[derive(Debug)]
pub struct Session {
    state: Mutex<AppState>,
}

impl Session {
    /// Create an idle session
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(AppState::Idle),
        }
    }

    /// Get current state
    pub fn state(&self) -> AppState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the session is recording
    pub fn is_recording(&self) -> bool {
        self.state() == AppState::Recording
    }

    /// Handle a valid modifier tap
    pub fn on_valid_tap(&self) -> AppState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            AppState::Idle => {
                info!("tap: Idle → Recording");
                *state = AppState::Recording;
            }
            AppState::Recording => Self::finish(&mut state, "tap"),
            AppState::Processing => debug!("tap while processing (ignored)"),
        }
        *state
    }

    /// Handle a stop request from a modifier press
    pub fn on_stop_requested(&self) -> AppState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == AppState::Recording {
            Self::finish(&mut state, "stop request");
        } else {
            debug!(state = ?*state, "stop request outside recording (ignored)");
        }
        *state
    }

    /// Handle the intercepted Escape key
    pub fn on_escape(&self) -> AppState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == AppState::Recording {
            info!("escape: Recording → Idle (aborted)");
            *state = AppState::Idle;
        } else {
            debug!(state = ?*state, "escape outside recording (ignored)");
        }
        *state
    }

    fn finish(state: &mut AppState, trigger: &str) {
        info!("{trigger}: Recording → Processing");
        *state = AppState::Processing;
        // Nothing to process yet
        info!("processing complete: Processing → Idle");
        *state = AppState::Idle;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
