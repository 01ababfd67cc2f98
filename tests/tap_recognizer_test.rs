//! End-to-end recognizer behaviour against a scripted input backend
//!
//! The fake backend records every subscription the recognizer makes and
//! lets each test drive modifier transitions, key presses and interception
//! hook events by hand. Callbacks land on a primary context running on its
//! own thread; `flush` waits for the worker and then for that context.

use mockall::mock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use modifier_tap::dispatch::{MainHandle, MainQueue};
use modifier_tap::input::backend::{
    BackendError, HookHandler, InputBackend, KeyDownSink, ModifierEvent, ModifierSink,
    UnsupportedBackend,
};
use modifier_tap::input::keys::{codes, KeyCode, ModifierFamily, ModifierState};
use modifier_tap::settings::SettingsStore;
use modifier_tap::tap::intercept::{HookAction, HookEvent};
use modifier_tap::tap::reconcile::SideState;
use modifier_tap::tap::{
    RecognizerOptions, TapRecognizer, TapSettingsSource, TapThresholds, Timestamp, TrackingMode,
};

mock! {
    Settings {}

    impl TapSettingsSource for Settings {
        fn thresholds(&self) -> TapThresholds;
        fn tracking_mode(&self) -> TrackingMode;
    }
}

fn settings(mode: TrackingMode) -> Arc<MockSettings> {
    let mut mock = MockSettings::new();
    mock.expect_thresholds()
        .returning(|| TapThresholds::new(20, 450, 250));
    mock.expect_tracking_mode().return_const(mode);
    Arc::new(mock)
}

#[derive(Default)]
struct FakeBackend {
    modifier_sink: Mutex<Option<ModifierSink>>,
    key_sink: Mutex<Option<KeyDownSink>>,
    hook: Mutex<Option<HookHandler>>,
    keys_down: Mutex<HashSet<KeyCode>>,
    modifier_subscriptions: AtomicUsize,
    key_subscriptions: AtomicUsize,
    /// Report either Option key as the right one, like some keyboards do
    right_biased: AtomicBool,
}

impl FakeBackend {
    fn set_key_state(&self, key_code: KeyCode, down: bool) {
        let mut keys = self.keys_down.lock().unwrap();
        if down {
            keys.insert(key_code);
        } else {
            keys.remove(&key_code);
        }
    }

    /// Deliver a flags-changed event if subscribed
    fn emit(&self, key_code: KeyCode, modifiers: ModifierState, at_ms: u64) {
        let sink = self.modifier_sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(ModifierEvent {
                key_code,
                modifiers,
                timestamp: Timestamp::from_millis(at_ms),
            });
        }
    }

    fn press(&self, key_code: KeyCode, at_ms: u64) {
        self.set_key_state(key_code, true);
        self.emit(key_code, ModifierState::only(ModifierFamily::Option), at_ms);
    }

    fn release(&self, key_code: KeyCode, at_ms: u64) {
        self.set_key_state(key_code, false);
        self.emit(key_code, ModifierState::default(), at_ms);
    }

    fn tap(&self, key_code: KeyCode, down_ms: u64, up_ms: u64) {
        self.press(key_code, down_ms);
        self.release(key_code, up_ms);
    }

    fn type_key(&self, key_code: KeyCode) {
        let sink = self.key_sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(key_code);
        }
    }

    fn hook_event(&self, event: HookEvent) -> Option<HookAction> {
        let hook = self.hook.lock().unwrap().clone();
        hook.map(|handler| handler(event))
    }

    fn is_subscribed(&self) -> bool {
        self.modifier_sink.lock().unwrap().is_some()
    }

    fn is_watching_keys(&self) -> bool {
        self.key_sink.lock().unwrap().is_some()
    }

    fn has_hook(&self) -> bool {
        self.hook.lock().unwrap().is_some()
    }
}

impl InputBackend for FakeBackend {
    fn subscribe_modifiers(&self, sink: ModifierSink) -> Result<(), BackendError> {
        let mut slot = self.modifier_sink.lock().unwrap();
        if slot.is_none() {
            self.modifier_subscriptions.fetch_add(1, Ordering::SeqCst);
            *slot = Some(sink);
        }
        Ok(())
    }

    fn unsubscribe_modifiers(&self) {
        self.modifier_sink.lock().unwrap().take();
    }

    fn subscribe_key_downs(&self, sink: KeyDownSink) -> Result<(), BackendError> {
        let mut slot = self.key_sink.lock().unwrap();
        if slot.is_none() {
            self.key_subscriptions.fetch_add(1, Ordering::SeqCst);
            *slot = Some(sink);
        }
        Ok(())
    }

    fn unsubscribe_key_downs(&self) {
        self.key_sink.lock().unwrap().take();
    }

    fn install_interception(&self, handler: HookHandler) -> Result<(), BackendError> {
        let mut slot = self.hook.lock().unwrap();
        if slot.is_none() {
            *slot = Some(handler);
        }
        Ok(())
    }

    fn remove_interception(&self) {
        self.hook.lock().unwrap().take();
    }

    fn is_key_down(&self, key_code: KeyCode) -> bool {
        let keys = self.keys_down.lock().unwrap();
        if self.right_biased.load(Ordering::SeqCst) {
            let any = keys.contains(&codes::OPTION) || keys.contains(&codes::RIGHT_OPTION);
            return key_code == codes::RIGHT_OPTION && any;
        }
        keys.contains(&key_code)
    }
}

#[derive(Default)]
struct Counters {
    taps: AtomicUsize,
    stops: AtomicUsize,
    escapes: AtomicUsize,
}

impl Counters {
    fn taps(&self) -> usize {
        self.taps.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn escapes(&self) -> usize {
        self.escapes.load(Ordering::SeqCst)
    }
}

struct Harness {
    backend: Arc<FakeBackend>,
    recognizer: TapRecognizer,
    main: MainHandle,
    counters: Arc<Counters>,
}

impl Harness {
    fn new(settings: Arc<dyn TapSettingsSource>) -> Self {
        let backend = Arc::new(FakeBackend::default());
        let main = MainQueue::spawn("test-primary").unwrap();
        let recognizer = TapRecognizer::new(
            Arc::clone(&backend) as Arc<dyn InputBackend>,
            settings,
            main.clone(),
            RecognizerOptions::default(),
        )
        .unwrap();

        let counters = Arc::new(Counters::default());
        let c = Arc::clone(&counters);
        recognizer.on_valid_tap(move || {
            c.taps.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&counters);
        recognizer.on_stop_requested(move || {
            c.stops.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&counters);
        recognizer.on_escape_key_down(move || {
            c.escapes.fetch_add(1, Ordering::SeqCst);
        });

        Self {
            backend,
            recognizer,
            main,
            counters,
        }
    }

    fn started(mode: TrackingMode) -> Self {
        let harness = Self::new(settings(mode));
        harness.recognizer.start();
        harness
    }

    /// Wait for queued events and the callbacks they posted
    fn flush(&self) {
        self.recognizer.barrier();
        self.main.run_sync(|| ()).unwrap();
    }
}

#[test]
fn test_either_mode_accepts_both_sides() {
    let h = Harness::started(TrackingMode::Either);
    h.backend.tap(codes::OPTION, 1_000, 1_120);
    h.backend.tap(codes::RIGHT_OPTION, 2_000, 2_120);
    h.flush();
    assert_eq!(h.counters.taps(), 2);
}

#[test]
fn test_left_mode_ignores_right_side() {
    let h = Harness::started(TrackingMode::Left);
    h.backend.tap(codes::RIGHT_OPTION, 1_000, 1_120);
    h.flush();
    assert_eq!(h.counters.taps(), 0);

    h.backend.tap(codes::OPTION, 2_000, 2_120);
    h.flush();
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_right_mode_accepts_right_side() {
    let h = Harness::started(TrackingMode::Right);
    h.backend.tap(codes::OPTION, 1_000, 1_120);
    h.backend.tap(codes::RIGHT_OPTION, 2_000, 2_120);
    h.flush();
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_hold_too_long_is_not_a_tap() {
    let h = Harness::started(TrackingMode::Either);
    h.backend.tap(codes::OPTION, 1_000, 1_600);
    h.flush();
    assert_eq!(h.counters.taps(), 0);
}

#[test]
fn test_second_tap_inside_debounce_ignored() {
    let h = Harness::started(TrackingMode::Either);
    h.backend.tap(codes::OPTION, 1_000, 1_100);
    h.backend.tap(codes::OPTION, 1_150, 1_250);
    h.backend.tap(codes::OPTION, 1_500, 1_600);
    h.flush();
    assert_eq!(h.counters.taps(), 2);
}

#[test]
fn test_other_modifier_disqualifies_tap() {
    let h = Harness::started(TrackingMode::Either);
    h.backend.set_key_state(codes::OPTION, true);
    let chord = ModifierState {
        option: true,
        command: true,
        ..ModifierState::default()
    };
    h.backend.emit(codes::OPTION, chord, 1_000);
    h.backend.release(codes::OPTION, 1_100);
    h.flush();
    assert_eq!(h.counters.taps(), 0);
}

#[test]
fn test_key_typed_while_held_disqualifies_tap() {
    let h = Harness::started(TrackingMode::Either);
    h.backend.press(codes::OPTION, 1_000);
    h.flush();
    assert!(h.backend.is_watching_keys());

    h.backend.type_key(0x00);
    h.backend.release(codes::OPTION, 1_100);
    h.flush();
    assert_eq!(h.counters.taps(), 0);
}

#[test]
fn test_key_watch_only_while_held() {
    let h = Harness::started(TrackingMode::Either);
    h.flush();
    assert!(!h.backend.is_watching_keys());

    h.backend.press(codes::RIGHT_OPTION, 1_000);
    h.flush();
    assert!(h.backend.is_watching_keys());

    h.backend.release(codes::RIGHT_OPTION, 1_100);
    h.flush();
    assert!(!h.backend.is_watching_keys());
    assert_eq!(h.backend.key_subscriptions.load(Ordering::SeqCst), 1);
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_missed_release_reconciled_from_key_state() {
    let h = Harness::started(TrackingMode::Either);
    h.backend.press(codes::OPTION, 1_000);
    // Left release is never delivered
    h.backend.set_key_state(codes::OPTION, false);
    h.backend.press(codes::RIGHT_OPTION, 1_200);
    h.flush();
    assert_eq!(h.recognizer.side_state(), SideState::new(false, true));
}

#[test]
fn test_right_mode_tap_after_missed_left_release() {
    let h = Harness::started(TrackingMode::Right);
    h.backend.press(codes::OPTION, 1_000);
    h.backend.set_key_state(codes::OPTION, false);
    h.backend.press(codes::RIGHT_OPTION, 1_200);
    h.backend.release(codes::RIGHT_OPTION, 1_320);
    h.flush();
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_right_mode_ignores_left_tap_with_right_biased_key_state() {
    let h = Harness::started(TrackingMode::Right);
    h.backend.right_biased.store(true, Ordering::SeqCst);

    h.backend.tap(codes::OPTION, 1_000, 1_120);
    h.flush();
    assert_eq!(h.counters.taps(), 0);

    h.backend.tap(codes::RIGHT_OPTION, 2_000, 2_120);
    h.flush();
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_opposite_side_held_disqualifies_tracked_tap() {
    let h = Harness::started(TrackingMode::Left);
    h.backend.press(codes::RIGHT_OPTION, 1_000);
    h.backend.tap(codes::OPTION, 1_050, 1_150);
    h.backend.release(codes::RIGHT_OPTION, 1_200);
    h.flush();
    assert_eq!(h.counters.taps(), 0);
}

#[test]
fn test_stop_on_press_fires_once_and_suppresses_tap() {
    let h = Harness::started(TrackingMode::Either);
    h.recognizer.set_stop_on_modifier_press_enabled(true);
    h.backend.tap(codes::OPTION, 1_000, 1_100);
    h.flush();
    assert_eq!(h.counters.stops(), 1);
    assert_eq!(h.counters.taps(), 0);

    h.recognizer.set_stop_on_modifier_press_enabled(false);
    h.backend.tap(codes::OPTION, 2_000, 2_100);
    h.flush();
    assert_eq!(h.counters.stops(), 1);
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_stop_on_press_ignores_chords() {
    let h = Harness::started(TrackingMode::Either);
    h.recognizer.set_stop_on_modifier_press_enabled(true);
    h.backend.set_key_state(codes::OPTION, true);
    let chord = ModifierState {
        option: true,
        shift: true,
        ..ModifierState::default()
    };
    h.backend.emit(codes::OPTION, chord, 1_000);
    h.flush();
    assert_eq!(h.counters.stops(), 0);
}

#[test]
fn test_start_clears_stop_on_press_enabled_beforehand() {
    let h = Harness::new(settings(TrackingMode::Either));
    h.recognizer.set_stop_on_modifier_press_enabled(true);
    h.recognizer.start();
    h.backend.tap(codes::OPTION, 1_000, 1_100);
    h.flush();
    assert_eq!(h.counters.stops(), 0);
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_cancel_gesture_discards_hold() {
    let h = Harness::started(TrackingMode::Either);
    h.backend.press(codes::OPTION, 1_000);
    h.recognizer.cancel_gesture();
    h.backend.release(codes::OPTION, 1_100);
    h.flush();
    assert_eq!(h.counters.taps(), 0);
}

#[test]
fn test_live_settings_apply_to_next_transition() {
    let store = Arc::new(SettingsStore::default());
    let h = Harness::new(Arc::clone(&store) as Arc<dyn TapSettingsSource>);
    h.recognizer.start();

    h.backend.tap(codes::RIGHT_OPTION, 1_000, 1_100);
    h.flush();
    assert_eq!(h.counters.taps(), 1);

    store.set_mode(TrackingMode::Left);
    h.backend.tap(codes::RIGHT_OPTION, 2_000, 2_100);
    h.flush();
    assert_eq!(h.counters.taps(), 1);

    store.set_max_duration_ms(50);
    h.backend.tap(codes::OPTION, 3_000, 3_100);
    h.flush();
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_start_is_idempotent() {
    let h = Harness::started(TrackingMode::Either);
    h.recognizer.start();
    assert!(h.recognizer.is_monitoring());
    assert_eq!(h.backend.modifier_subscriptions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_removes_everything() {
    let h = Harness::started(TrackingMode::Either);
    h.recognizer.set_escape_interception_enabled(true);
    h.backend.press(codes::OPTION, 1_000);
    h.flush();
    assert!(h.backend.has_hook());

    h.recognizer.stop();
    h.flush();
    assert!(!h.recognizer.is_monitoring());
    assert!(!h.recognizer.is_escape_interception_enabled());
    assert!(!h.backend.is_subscribed());
    assert!(!h.backend.is_watching_keys());
    assert!(!h.backend.has_hook());

    // Safe to repeat
    h.recognizer.stop();
    assert!(!h.recognizer.is_monitoring());
}

#[test]
fn test_restart_resets_gesture_state() {
    let h = Harness::started(TrackingMode::Either);
    h.recognizer.set_stop_on_modifier_press_enabled(true);
    h.backend.press(codes::OPTION, 1_000);
    h.flush();
    assert_eq!(h.counters.stops(), 1);

    h.recognizer.stop();
    h.backend.set_key_state(codes::OPTION, false);
    h.recognizer.start();
    h.flush();
    assert_eq!(h.recognizer.side_state(), SideState::default());

    // Release of the pre-restart hold is not a tap
    h.backend.release(codes::OPTION, 1_100);
    // Stop-on-press was cleared by stop
    h.backend.tap(codes::OPTION, 2_000, 2_100);
    h.flush();
    assert_eq!(h.counters.stops(), 1);
    assert_eq!(h.counters.taps(), 1);
}

#[test]
fn test_escape_consumed_only_while_enabled() {
    let h = Harness::started(TrackingMode::Either);
    assert!(!h.backend.has_hook());

    h.recognizer.set_escape_interception_enabled(true);
    h.flush();
    assert!(h.recognizer.is_escape_interception_enabled());
    assert_eq!(
        h.backend.hook_event(HookEvent::KeyDown(codes::ESCAPE)),
        Some(HookAction::Consume)
    );
    assert_eq!(
        h.backend.hook_event(HookEvent::KeyDown(0x00)),
        Some(HookAction::PassThrough)
    );
    h.flush();
    assert_eq!(h.counters.escapes(), 1);

    h.recognizer.set_escape_interception_enabled(false);
    h.flush();
    assert!(!h.backend.has_hook());
}

#[test]
fn test_stale_hook_passes_escape_after_disable() {
    let h = Harness::started(TrackingMode::Either);
    h.recognizer.set_escape_interception_enabled(true);
    h.flush();
    let handler = h.backend.hook.lock().unwrap().clone().unwrap();

    h.recognizer.set_escape_interception_enabled(false);
    assert_eq!(
        handler(HookEvent::KeyDown(codes::ESCAPE)),
        HookAction::PassThrough
    );
    h.flush();
    assert_eq!(h.counters.escapes(), 0);
}

#[test]
fn test_disabled_hook_requests_reenable() {
    let h = Harness::started(TrackingMode::Either);
    h.recognizer.set_escape_interception_enabled(true);
    h.flush();
    assert_eq!(
        h.backend.hook_event(HookEvent::DisabledByTimeout),
        Some(HookAction::Reenable)
    );
    assert_eq!(
        h.backend.hook_event(HookEvent::DisabledByUserInput),
        Some(HookAction::Reenable)
    );
}

#[test]
fn test_events_before_start_are_ignored() {
    let h = Harness::new(settings(TrackingMode::Either));
    h.backend.tap(codes::OPTION, 1_000, 1_100);
    h.flush();
    assert!(!h.recognizer.is_monitoring());
    assert_eq!(h.counters.taps(), 0);
}

#[test]
fn test_unsupported_backend_stays_inactive() {
    let main = MainQueue::spawn("test-primary-unsupported").unwrap();
    let recognizer = TapRecognizer::new(
        Arc::new(UnsupportedBackend),
        settings(TrackingMode::Either),
        main.clone(),
        RecognizerOptions::default(),
    )
    .unwrap();

    recognizer.start();
    assert!(!recognizer.is_monitoring());
    recognizer.set_escape_interception_enabled(true);
    recognizer.set_stop_on_modifier_press_enabled(true);
    recognizer.barrier();
    main.run_sync(|| ()).unwrap();
    recognizer.stop();
    assert!(!recognizer.is_escape_interception_enabled());
}
