//! Modifier Tap binary

use anyhow::{Context, Result};
use std::sync::{Arc, Weak};

use modifier_tap::config::Config;
use modifier_tap::dispatch::MainQueue;
use modifier_tap::input::backend::platform_backend;
use modifier_tap::permissions;
use modifier_tap::session::{AppState, Session};
use modifier_tap::settings::SettingsStore;
use modifier_tap::tap::{RecognizerOptions, TapRecognizer};
use modifier_tap::telemetry;

/// Keep the hook and stop-on-press in step with the session
fn sync_recording(recognizer: &Weak<TapRecognizer>, state: AppState) {
    if let Some(recognizer) = recognizer.upgrade() {
        let recording = state == AppState::Recording;
        recognizer.set_escape_interception_enabled(recording);
        recognizer.set_stop_on_modifier_press_enabled(recording);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize telemetry
    telemetry::init(config.telemetry.enabled, &config.telemetry.log_path)?;
    tracing::info!("modifier-tap starting");
    tracing::info!("config loaded from ~/.modifier-tap.toml");

    // Missing permissions only leave subscriptions inactive
    let access = permissions::check_event_tap_access();
    if access.is_complete() {
        tracing::info!("event tap access OK");
    }

    let (queue, main) = MainQueue::new();
    let settings = Arc::new(SettingsStore::from_config(&config.tap));
    let options = RecognizerOptions {
        family: config.tap.family,
        intercept_key: config.tap.intercept_key_code,
    };
    let recognizer = Arc::new(
        TapRecognizer::new(platform_backend(), settings, main, options)
            .context("failed to create tap recognizer")?,
    );
    let session = Arc::new(Session::new());

    {
        let session = Arc::clone(&session);
        let weak = Arc::downgrade(&recognizer);
        recognizer.on_valid_tap(move || sync_recording(&weak, session.on_valid_tap()));
    }
    {
        let session = Arc::clone(&session);
        let weak = Arc::downgrade(&recognizer);
        recognizer.on_stop_requested(move || sync_recording(&weak, session.on_stop_requested()));
    }
    {
        let session = Arc::clone(&session);
        let weak = Arc::downgrade(&recognizer);
        recognizer.on_escape_key_down(move || sync_recording(&weak, session.on_escape()));
    }

    recognizer.start();
    if recognizer.is_monitoring() {
        tracing::info!(
            family = ?config.tap.family,
            mode = ?config.tap.mode,
            "tap the modifier to toggle recording (press Ctrl+C to exit)"
        );
    } else {
        tracing::warn!("monitoring inactive; running until Ctrl+C");
    }

    queue
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await;

    tracing::info!("shutdown signal received");
    recognizer.stop();
    Ok(())
}
