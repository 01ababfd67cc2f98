//! macOS input backend built on Core Graphics event taps
//!
//! Every subscription is one `CGEventTap` hosted on its own thread with its
//! own `CFRunLoop`. Modifier and key-down taps are listen-only; the
//! interception tap sits at the head of the session stream and can drop
//! events. Any tap the OS disables is re-enabled from its own callback.

#![allow(unsafe_code)] // CGEventTapEnable / CGEventSourceKeyState have no safe wrapper

use core_foundation::base::TCFType;
use core_foundation::mach_port::CFMachPortRef;
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, CallbackResult, EventField,
};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backend::{
    BackendError, HookHandler, InputBackend, KeyDownSink, ModifierEvent, ModifierSink,
};
use super::keys::{KeyCode, ModifierState};
use crate::tap::intercept::{HookAction, HookEvent};
use crate::tap::thresholds::Timestamp;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    fn CGEventSourceKeyState(state_id: i32, key: u16) -> bool;
    fn CGEventGetTimestamp(event: *const c_void) -> u64;
}

#[repr(C)]
#[derive(Default)]
struct MachTimebaseInfo {
    numer: u32,
    denom: u32,
}

extern "C" {
    fn mach_absolute_time() -> u64;
    fn mach_timebase_info(info: *mut MachTimebaseInfo) -> i32;
}

/// `kCGEventSourceStateCombinedSessionState`
const COMBINED_SESSION_STATE: i32 = 0;

/// How often a tap thread checks its stop flag
const RUN_LOOP_SLICE: Duration = Duration::from_millis(250);

/// Event ages beyond this are treated as a bogus event clock
const MAX_EVENT_AGE: Duration = Duration::from_secs(1);

impl ModifierState {
    /// Decode `CGEventFlags`
    #[must_use]
    pub fn from_flags(flags: CGEventFlags) -> Self {
        Self {
            shift: flags.contains(CGEventFlags::CGEventFlagShift),
            control: flags.contains(CGEventFlags::CGEventFlagControl),
            option: flags.contains(CGEventFlags::CGEventFlagAlternate),
            command: flags.contains(CGEventFlags::CGEventFlagCommand),
            caps_lock: flags.contains(CGEventFlags::CGEventFlagAlphaShift),
            function: flags.contains(CGEventFlags::CGEventFlagSecondaryFn),
        }
    }
}

fn key_code_of(event: &CGEvent) -> KeyCode {
    let raw = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
    KeyCode::try_from(raw).unwrap_or(KeyCode::MAX)
}

fn timebase() -> (u32, u32) {
    static TIMEBASE: OnceLock<(u32, u32)> = OnceLock::new();
    *TIMEBASE.get_or_init(|| {
        let mut info = MachTimebaseInfo::default();
        // SAFETY: `info` is a valid, writable MachTimebaseInfo.
        let status = unsafe { mach_timebase_info(&mut info) };
        if status == 0 && info.denom != 0 {
            (info.numer, info.denom)
        } else {
            (1, 1)
        }
    })
}

/// Place an event on the `Timestamp` clock using its own host-time stamp
///
/// `event_ticks` and `host_ticks` are mach host time; the difference is the
/// delivery delay, which is subtracted from `now`. Stamps from the future or
/// older than `MAX_EVENT_AGE` fall back to `now`.
fn backdate(now: Timestamp, event_ticks: u64, host_ticks: u64, timebase: (u32, u32)) -> Timestamp {
    let Some(age_ticks) = host_ticks.checked_sub(event_ticks) else {
        return now;
    };
    let (numer, denom) = timebase;
    let nanos = u128::from(age_ticks) * u128::from(numer) / u128::from(denom.max(1));
    let age = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
    if age > MAX_EVENT_AGE {
        return now;
    }
    Timestamp::from_duration(now.as_duration().saturating_sub(age))
}

fn event_timestamp(event: &CGEvent) -> Timestamp {
    let now = Timestamp::now();
    let raw = std::ptr::from_ref(&**event).cast::<c_void>();
    // SAFETY: `raw` points at the live event handed to the tap callback, and
    // mach_absolute_time has no preconditions.
    let (event_ticks, host_ticks) = unsafe { (CGEventGetTimestamp(raw), mach_absolute_time()) };
    backdate(now, event_ticks, host_ticks, timebase())
}

const fn disabled_event(event_type: CGEventType) -> Option<HookEvent> {
    match event_type {
        CGEventType::TapDisabledByTimeout => Some(HookEvent::DisabledByTimeout),
        CGEventType::TapDisabledByUserInput => Some(HookEvent::DisabledByUserInput),
        _ => None,
    }
}

/// Thread running one event tap
struct TapThread {
    name: &'static str,
    run_loop: CFRunLoop,
    stopping: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TapThread {
    /// Create a tap on a new thread and wait until it is live
    fn spawn<F>(
        name: &'static str,
        options: CGEventTapOptions,
        events: Vec<CGEventType>,
        decide: F,
    ) -> Result<Self, BackendError>
    where
        F: Fn(CGEventType, &CGEvent) -> HookAction + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let stopping = Arc::new(AtomicBool::new(false));
        let thread_stopping = Arc::clone(&stopping);

        let handle = thread::Builder::new()
            .name(format!("{name}-event-tap"))
            .spawn(move || {
                let port: Arc<AtomicPtr<c_void>> = Arc::new(AtomicPtr::default());
                let callback_port = Arc::clone(&port);
                let callback = move |_proxy: CGEventTapProxy, event_type: CGEventType, event: &CGEvent| {
                    match decide(event_type, event) {
                        HookAction::PassThrough => CallbackResult::Keep,
                        HookAction::Consume => CallbackResult::Drop,
                        HookAction::Reenable => {
                            let raw = callback_port.load(Ordering::SeqCst);
                            if !raw.is_null() {
                                // SAFETY: the pointer is the mach port of the tap
                                // that is invoking this callback, so it is alive.
                                unsafe { CGEventTapEnable(raw.cast(), true) };
                                info!(tap = name, "event tap re-enabled");
                            }
                            CallbackResult::Keep
                        }
                    }
                };

                let Ok(tap) = CGEventTap::new(
                    CGEventTapLocation::Session,
                    CGEventTapPlacement::HeadInsertEventTap,
                    options,
                    events,
                    callback,
                ) else {
                    let _ = ready_tx.send(Err(BackendError::TapCreation(name)));
                    return;
                };
                port.store(
                    tap.mach_port().as_concrete_TypeRef().cast(),
                    Ordering::SeqCst,
                );

                let Ok(source) = tap.mach_port().create_runloop_source(0) else {
                    let _ = ready_tx.send(Err(BackendError::RunLoopSource(name)));
                    return;
                };
                let run_loop = CFRunLoop::get_current();
                // SAFETY: kCFRunLoopCommonModes is an immutable CoreFoundation constant.
                unsafe {
                    run_loop.add_source(&source, kCFRunLoopCommonModes);
                }
                tap.enable();

                if ready_tx.send(Ok(run_loop)).is_err() {
                    return;
                }
                debug!(tap = name, "event tap running");

                while !thread_stopping.load(Ordering::SeqCst) {
                    // SAFETY: kCFRunLoopDefaultMode is an immutable CoreFoundation constant.
                    unsafe {
                        CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, false);
                    }
                }
                debug!(tap = name, "event tap thread exiting");
            })
            .map_err(|source| BackendError::ThreadSpawn { name, source })?;

        match ready_rx.recv() {
            Ok(Ok(run_loop)) => Ok(Self {
                name,
                run_loop,
                stopping,
                handle,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(BackendError::SetupAborted(name))
            }
        }
    }

    fn stop(self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.run_loop.stop();
        if self.handle.join().is_err() {
            error!(tap = self.name, "event tap thread panicked");
        }
    }
}

fn replace_slot(slot: &Mutex<Option<TapThread>>) -> Option<TapThread> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn install_slot(
    slot: &Mutex<Option<TapThread>>,
    spawn: impl FnOnce() -> Result<TapThread, BackendError>,
) -> Result<(), BackendError> {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.is_none() {
        *guard = Some(spawn()?);
    }
    Ok(())
}

/// Core Graphics implementation of [`InputBackend`]
#[derive(Default)]
pub struct CgEventBackend {
    modifiers: Mutex<Option<TapThread>>,
    key_downs: Mutex<Option<TapThread>>,
    interception: Mutex<Option<TapThread>>,
}

impl CgEventBackend {
    /// Backend with nothing installed
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputBackend for CgEventBackend {
    fn subscribe_modifiers(&self, sink: ModifierSink) -> Result<(), BackendError> {
        install_slot(&self.modifiers, || {
            TapThread::spawn(
                "modifier",
                CGEventTapOptions::ListenOnly,
                vec![CGEventType::FlagsChanged],
                move |event_type, event| {
                    if let Some(disabled) = disabled_event(event_type) {
                        warn!(?disabled, "modifier event tap disabled by the OS");
                        return HookAction::Reenable;
                    }
                    if matches!(event_type, CGEventType::FlagsChanged) {
                        sink(ModifierEvent {
                            key_code: key_code_of(event),
                            modifiers: ModifierState::from_flags(event.get_flags()),
                            timestamp: event_timestamp(event),
                        });
                    }
                    HookAction::PassThrough
                },
            )
        })
    }

    fn unsubscribe_modifiers(&self) {
        if let Some(tap) = replace_slot(&self.modifiers) {
            tap.stop();
        }
    }

    fn subscribe_key_downs(&self, sink: KeyDownSink) -> Result<(), BackendError> {
        install_slot(&self.key_downs, || {
            TapThread::spawn(
                "key-down",
                CGEventTapOptions::ListenOnly,
                vec![CGEventType::KeyDown],
                move |event_type, event| {
                    if disabled_event(event_type).is_some() {
                        return HookAction::Reenable;
                    }
                    if matches!(event_type, CGEventType::KeyDown) {
                        sink(key_code_of(event));
                    }
                    HookAction::PassThrough
                },
            )
        })
    }

    fn unsubscribe_key_downs(&self) {
        if let Some(tap) = replace_slot(&self.key_downs) {
            tap.stop();
        }
    }

    fn install_interception(&self, handler: HookHandler) -> Result<(), BackendError> {
        install_slot(&self.interception, || {
            TapThread::spawn(
                "interception",
                CGEventTapOptions::Default,
                vec![CGEventType::KeyDown],
                move |event_type, event| {
                    if let Some(disabled) = disabled_event(event_type) {
                        return handler(disabled);
                    }
                    if matches!(event_type, CGEventType::KeyDown) {
                        return handler(HookEvent::KeyDown(key_code_of(event)));
                    }
                    HookAction::PassThrough
                },
            )
        })
    }

    fn remove_interception(&self) {
        if let Some(tap) = replace_slot(&self.interception) {
            tap.stop();
        }
    }

    fn is_key_down(&self, key_code: KeyCode) -> bool {
        // SAFETY: pure query of the session keyboard state.
        unsafe { CGEventSourceKeyState(COMBINED_SESSION_STATE, key_code) }
    }
}

impl Drop for CgEventBackend {
    fn drop(&mut self) {
        self.unsubscribe_modifiers();
        self.unsubscribe_key_downs();
        self.remove_interception();
    }
}
