/// Event tap access as far as it can be probed without installing a tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTapAccess {
    /// Listen-only taps (Input Monitoring) look usable
    pub listen: bool,
    /// Filtering taps that can swallow events (Accessibility) look usable
    pub intercept: bool,
}

impl EventTapAccess {
    /// Both kinds of tap look usable
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.listen && self.intercept
    }
}

/// Check whether the event taps the recognizer installs are likely to work
///
/// Missing access is not an error: subscriptions simply stay inactive.
#[must_use]
pub fn check_event_tap_access() -> EventTapAccess {
    tracing::info!("checking event tap access");

    #[cfg(target_os = "macos")]
    {
        use core_graphics::event::CGEvent;
        use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

        // HIDSystemState sources need Input Monitoring
        let listen = CGEventSource::new(CGEventSourceStateID::HIDSystemState).is_ok();

        // Creating a keyboard event from a session source exercises the same
        // access a filtering tap needs
        let intercept = CGEventSource::new(CGEventSourceStateID::CombinedSessionState)
            .ok()
            .and_then(|source| CGEvent::new_keyboard_event(source, 0, true).ok())
            .is_some();

        let access = EventTapAccess { listen, intercept };
        if !access.listen {
            tracing::warn!(
                "Input Monitoring permission missing - enable in System Settings → Privacy & Security → Input Monitoring"
            );
        }
        if !access.intercept {
            tracing::warn!(
                "Accessibility permission missing - enable in System Settings → Privacy & Security → Accessibility"
            );
        }
        access
    }

    #[cfg(not(target_os = "macos"))]
    {
        tracing::warn!("global keyboard monitoring is not supported on this platform");
        EventTapAccess {
            listen: false,
            intercept: false,
        }
    }
}
