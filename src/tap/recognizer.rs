//! Modifier tap recognizer
//!
//! Raw events arrive on backend threads and are forwarded, without any
//! processing, to a private worker thread that owns all gesture state. The
//! worker reconciles side state, applies the tracking mode, runs the
//! validator and posts callbacks to the primary context. Subscription
//! changes always run on the primary context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::intercept::{self, HookAction, HookEvent};
use super::reconcile::{reconcile, SideState};
use super::thresholds::{TapSettingsSource, TapThresholds, TrackingMode};
use super::validator::TapGestureValidator;
use crate::dispatch::MainHandle;
use crate::input::backend::{HookHandler, InputBackend, KeyDownSink, ModifierEvent, ModifierSink};
use crate::input::keys::{codes, KeyCode, ModifierFamily, ModifierSide};

/// Zero-argument callback delivered on the primary context
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Recognizer construction errors
#[derive(Debug, Error)]
pub enum RecognizerError {
    /// The event processing thread could not be started
    #[error("failed to spawn tap recognizer worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Fixed per-instance options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognizerOptions {
    /// Modifier whose taps are recognized
    pub family: ModifierFamily,
    /// Key swallowed by the interception hook while enabled
    pub intercept_key: KeyCode,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            family: ModifierFamily::Option,
            intercept_key: codes::ESCAPE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    ValidTap,
    StopRequested,
    EscapeKeyDown,
}

#[derive(Default)]
struct Callbacks {
    valid_tap: Mutex<Option<Callback>>,
    stop_requested: Mutex<Option<Callback>>,
    escape_key_down: Mutex<Option<Callback>>,
}

impl Callbacks {
    fn slot(&self, signal: Signal) -> &Mutex<Option<Callback>> {
        match signal {
            Signal::ValidTap => &self.valid_tap,
            Signal::StopRequested => &self.stop_requested,
            Signal::EscapeKeyDown => &self.escape_key_down,
        }
    }

    fn set(&self, signal: Signal, callback: Callback) {
        *self
            .slot(signal)
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn get(&self, signal: Signal) -> Option<Callback> {
        self.slot(signal)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

enum Command {
    /// Transition plus the per-side key state sampled on arrival
    Modifier(ModifierEvent, SideState),
    KeyDown,
    Cancel,
    SetStopOnPress(bool),
    Reset { stopped: bool },
    Barrier(std_mpsc::SyncSender<()>),
    Inspect(std_mpsc::SyncSender<SideState>),
}

/// State shared between the public handle, the worker and backend callbacks
struct Shared {
    backend: Arc<dyn InputBackend>,
    settings: Arc<dyn TapSettingsSource>,
    main: MainHandle,
    options: RecognizerOptions,
    callbacks: Callbacks,
    /// Read from the hook callback thread; never routed through the worker
    escape_interception: AtomicBool,
    /// Mutated only on the primary context
    monitoring: AtomicBool,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Shared {
    fn enqueue(&self, command: Command) {
        match self.commands.upgrade() {
            Some(tx) => {
                if tx.send(command).is_err() {
                    debug!("tap recognizer worker gone, event dropped");
                }
            }
            None => debug!("tap recognizer released, event dropped"),
        }
    }

    fn fire(self: &Arc<Self>, signal: Signal) {
        let shared = Arc::clone(self);
        let posted = self.main.post(move || {
            if let Some(callback) = shared.callbacks.get(signal) {
                callback();
            }
        });
        if posted.is_err() {
            debug!(?signal, "primary context closed, callback dropped");
        }
    }

    fn thresholds(&self) -> TapThresholds {
        let settings = Arc::clone(&self.settings);
        self.main
            .run_sync(move || settings.thresholds())
            .unwrap_or_else(|e| {
                warn!(error = %e, "reading thresholds off the primary context");
                self.settings.thresholds()
            })
    }

    fn tracking_mode(&self) -> TrackingMode {
        let settings = Arc::clone(&self.settings);
        self.main
            .run_sync(move || settings.tracking_mode())
            .unwrap_or_else(|e| {
                warn!(error = %e, "reading tracking mode off the primary context");
                self.settings.tracking_mode()
            })
    }

    /// Sampled on the backend thread so the worker's lag cannot skew it
    fn modifier_sink(&self) -> ModifierSink {
        let commands = self.commands.clone();
        let backend = Arc::clone(&self.backend);
        let family = self.options.family;
        Arc::new(move |event| {
            let sampled = sample_sides(backend.as_ref(), family);
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Modifier(event, sampled));
            }
        })
    }

    fn key_down_sink(&self) -> KeyDownSink {
        let commands = self.commands.clone();
        Arc::new(move |_key_code| {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::KeyDown);
            }
        })
    }

    fn handle_hook_event(self: &Arc<Self>, event: HookEvent) -> HookAction {
        let enabled = self.escape_interception.load(Ordering::SeqCst);
        let action = intercept::respond(event, self.options.intercept_key, enabled);
        match action {
            HookAction::Consume => self.fire(Signal::EscapeKeyDown),
            HookAction::Reenable => warn!(?event, "interception hook disabled by the OS"),
            HookAction::PassThrough => {}
        }
        action
    }

    /// Install or remove the hook to match the current flag (primary context)
    fn apply_interception(self: &Arc<Self>) {
        if !self.escape_interception.load(Ordering::SeqCst) {
            self.backend.remove_interception();
            return;
        }
        let shared = Arc::clone(self);
        let handler: HookHandler = Arc::new(move |event| shared.handle_hook_event(event));
        match self.backend.install_interception(handler) {
            Ok(()) => debug!("interception hook installed"),
            Err(e) => debug!(error = %e, "interception hook unavailable"),
        }
    }

    /// Install the modifier subscription (primary context)
    fn install_monitors(&self) -> bool {
        if self.monitoring.load(Ordering::SeqCst) {
            return false;
        }
        // Queued ahead of the first event from the new subscription.
        self.enqueue(Command::Reset { stopped: false });
        self.backend.unsubscribe_key_downs();
        match self.backend.subscribe_modifiers(self.modifier_sink()) {
            Ok(()) => {
                info!(family = ?self.options.family, "modifier tap monitoring started");
                self.monitoring.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(error = %e, "modifier subscription failed, taps will not be detected");
                false
            }
        }
    }

    /// Remove every subscription and the hook (primary context)
    fn remove_monitors(&self) {
        self.escape_interception.store(false, Ordering::SeqCst);
        self.backend.unsubscribe_modifiers();
        self.backend.unsubscribe_key_downs();
        self.backend.remove_interception();
        if self.monitoring.swap(false, Ordering::SeqCst) {
            info!("modifier tap monitoring stopped");
        }
        self.enqueue(Command::Reset { stopped: true });
    }

    fn set_key_watch(&self, active: bool) {
        let backend = Arc::clone(&self.backend);
        let sink = active.then(|| self.key_down_sink());
        let result = self.main.run_sync(move || match sink {
            Some(sink) => backend.subscribe_key_downs(sink),
            None => {
                backend.unsubscribe_key_downs();
                Ok(())
            }
        });
        match result {
            Ok(Ok(())) => debug!(active, "key watch updated"),
            Ok(Err(e)) => debug!(error = %e, "key watch unavailable"),
            Err(e) => warn!(error = %e, "key watch update not applied"),
        }
    }
}

/// Gesture state, owned by the worker thread
#[derive(Default)]
struct Processor {
    validator: TapGestureValidator,
    sides: SideState,
    stop_on_press: bool,
    key_watch_active: bool,
}

impl Processor {
    fn handle(&mut self, shared: &Arc<Shared>, command: Command) {
        match command {
            Command::Modifier(event, sampled) => self.on_modifier(shared, event, sampled),
            Command::KeyDown | Command::Cancel => self.validator.register_disqualifying_key_down(),
            Command::SetStopOnPress(enabled) => self.stop_on_press = enabled,
            Command::Reset { stopped } => self.reset(shared, stopped),
            Command::Barrier(reply) => {
                let _ = reply.send(());
            }
            Command::Inspect(reply) => {
                let _ = reply.send(self.sides);
            }
        }
    }

    fn on_modifier(&mut self, shared: &Arc<Shared>, event: ModifierEvent, sampled: SideState) {
        let family = shared.options.family;
        let mode = shared.tracking_mode();
        let was_down = self.sides.is_down_for(mode);

        self.sides = reconcile(
            self.sides,
            event.modifiers.contains(family),
            family.side_of(event.key_code),
            sampled,
        );

        let is_down = self.sides.is_down_for(mode);
        let has_disallowed =
            event.modifiers.has_disallowed(family) || self.sides.has_untracked_down(mode);
        let valid = self.validator.register_transition(
            is_down,
            has_disallowed,
            event.timestamp,
            shared.thresholds(),
        );
        debug!(
            key_code = event.key_code,
            ?mode,
            left = self.sides.left,
            right = self.sides.right,
            is_down,
            has_disallowed,
            "modifier transition"
        );

        if is_down && !was_down {
            self.set_key_watch_active(shared, true);
            if self.stop_on_press && !has_disallowed {
                self.validator.register_disqualifying_key_down();
                info!("modifier pressed: stop requested");
                shared.fire(Signal::StopRequested);
            }
        } else if !is_down && was_down {
            self.set_key_watch_active(shared, false);
        }

        if valid {
            info!("valid modifier tap");
            shared.fire(Signal::ValidTap);
        }
    }

    fn set_key_watch_active(&mut self, shared: &Shared, active: bool) {
        if self.key_watch_active == active {
            return;
        }
        self.key_watch_active = active;
        shared.set_key_watch(active);
    }

    fn reset(&mut self, shared: &Shared, stopped: bool) {
        // A press processed just before stop may have re-armed the watch.
        if stopped && self.key_watch_active {
            let backend = Arc::clone(&shared.backend);
            let _ = shared.main.post(move || backend.unsubscribe_key_downs());
        }
        self.stop_on_press = false;
        self.validator = TapGestureValidator::new();
        self.sides = SideState::default();
        self.key_watch_active = false;
    }
}

fn sample_sides(backend: &dyn InputBackend, family: ModifierFamily) -> SideState {
    SideState::new(
        backend.is_key_down(family.key_code(ModifierSide::Left)),
        backend.is_key_down(family.key_code(ModifierSide::Right)),
    )
}

fn run_worker(shared: &Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut processor = Processor::default();
    while let Some(command) = commands.blocking_recv() {
        processor.handle(shared, command);
    }
    debug!("tap recognizer worker exiting");
}

/// Recognizes brief, unmodified taps of one side of a modifier key
///
/// All methods are safe to call from any thread. Callbacks run on the
/// primary context supplied at construction.
pub struct TapRecognizer {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl TapRecognizer {
    /// Create a stopped recognizer
    ///
    /// # Errors
    /// Returns error if the event processing thread cannot be spawned.
    pub fn new(
        backend: Arc<dyn InputBackend>,
        settings: Arc<dyn TapSettingsSource>,
        main: MainHandle,
        options: RecognizerOptions,
    ) -> Result<Self, RecognizerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            backend,
            settings,
            main,
            options,
            callbacks: Callbacks::default(),
            escape_interception: AtomicBool::new(false),
            monitoring: AtomicBool::new(false),
            commands: tx.downgrade(),
        });

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name("tap-recognizer-events".to_owned())
            .spawn(move || run_worker(&worker, rx))?;

        Ok(Self {
            shared,
            commands: tx,
        })
    }

    /// Called on the primary context after each valid tap
    pub fn on_valid_tap(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks.set(Signal::ValidTap, Arc::new(callback));
    }

    /// Called on the primary context when a press requests a stop
    pub fn on_stop_requested(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared
            .callbacks
            .set(Signal::StopRequested, Arc::new(callback));
    }

    /// Called on the primary context when the intercepted key is swallowed
    pub fn on_escape_key_down(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared
            .callbacks
            .set(Signal::EscapeKeyDown, Arc::new(callback));
    }

    /// Start monitoring; no-op when already monitoring
    ///
    /// Starting clears gesture state and stop-on-press.
    ///
    /// Blocks until the subscription has been installed on the primary context.
    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        if let Err(e) = self.shared.main.run_sync(move || shared.install_monitors()) {
            warn!(error = %e, "start not applied");
        }
    }

    /// Stop monitoring, remove the hook and reset all gesture state
    ///
    /// Safe to call at any time, any number of times.
    pub fn stop(&self) {
        self.shared.escape_interception.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        if let Err(e) = self.shared.main.run_sync(move || shared.remove_monitors()) {
            warn!(error = %e, "stop not applied");
        }
    }

    /// Whether the modifier subscription is installed
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::SeqCst)
    }

    /// Enable or disable swallowing of the designated key
    ///
    /// Never blocks on hook installation; failures leave interception off.
    pub fn set_escape_interception_enabled(&self, enabled: bool) {
        self.shared
            .escape_interception
            .store(enabled, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        if self.shared.main.is_current() {
            shared.apply_interception();
        } else if self.shared.main.post(move || shared.apply_interception()).is_err() {
            debug!("primary context closed, interception change dropped");
        }
    }

    /// Whether the designated key is currently being swallowed
    #[must_use]
    pub fn is_escape_interception_enabled(&self) -> bool {
        self.shared.escape_interception.load(Ordering::SeqCst)
    }

    /// Fire a stop request on the press of the modifier instead of a tap
    pub fn set_stop_on_modifier_press_enabled(&self, enabled: bool) {
        self.send(Command::SetStopOnPress(enabled));
    }

    /// Abort the gesture in progress so its release cannot count as a tap
    pub fn cancel_gesture(&self) {
        self.send(Command::Cancel);
    }

    /// Block until every event queued before this call has been processed
    ///
    /// Returns immediately when called on the primary context, which the
    /// worker may itself be waiting on.
    pub fn barrier(&self) {
        if self.shared.main.is_current() {
            warn!("barrier called on the primary context, skipped");
            return;
        }
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.send(Command::Barrier(tx));
        let _ = rx.recv();
    }

    /// Snapshot of the reconciled per-side state
    ///
    /// Reports both sides released when called on the primary context.
    #[must_use]
    pub fn side_state(&self) -> SideState {
        if self.shared.main.is_current() {
            warn!("side state requested on the primary context, skipped");
            return SideState::default();
        }
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.send(Command::Inspect(tx));
        rx.recv().unwrap_or_default()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("tap recognizer worker is not running");
        }
    }
}

impl Drop for TapRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}
