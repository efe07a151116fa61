//! System-wide keyboard and mouse capture via a macOS `CGEventTap`.
//!
//! Runs on a dedicated background thread with its own `CFRunLoop`, exactly as
//! the teacher's keyboard monitor does, generalized from key-down-only
//! capture to the full `os_input` layer (key down/up, mouse down/up, and
//! throttled mouse move) spec §4.1 calls for.

use std::sync::Arc;

use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::{CaptureSource, SequenceCounter};
use crate::model::{EventContext, EventPayload, Layer, Modifiers, MouseButton, Point, RawEvent};

#[derive(Error, Debug)]
pub enum OsInputError {
    #[error("input monitoring permission not granted")]
    PermissionDenied,
    #[error("failed to create the system event tap")]
    EventTapCreationFailed,
    #[error("monitor is already running")]
    AlreadyRunning,
    #[error("failed to spawn the capture thread")]
    ThreadSpawnFailed,
}

/// Shared context accessor: the coalescer and enricher need to know the
/// currently focused app/window to stamp onto every raw event. This is
/// supplied by the session orchestrator (which owns the `app_focus` source's
/// latest reading) rather than queried redundantly here.
pub type ContextProvider = Arc<dyn Fn() -> EventContext + Send + Sync>;

#[cfg(target_os = "macos")]
mod mac {
    use super::*;
    use core_foundation::base::TCFType;
    use core_foundation::mach_port::CFMachPortRef;
    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventType, EventField,
    };
    use macos_accessibility_client::accessibility;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    struct SendableMachPortRef(Option<CFMachPortRef>);
    unsafe impl Send for SendableMachPortRef {}
    unsafe impl Sync for SendableMachPortRef {}

    pub struct OsInputSource {
        running: Arc<AtomicBool>,
        thread_handle: Option<JoinHandle<()>>,
        run_loop: Arc<std::sync::Mutex<Option<CFRunLoop>>>,
    }

    impl OsInputSource {
        pub fn has_permission() -> bool {
            accessibility::application_is_trusted()
        }

        pub fn start(
            tx: Sender<RawEvent>,
            sequence: SequenceCounter,
            context: ContextProvider,
            mouse_move_throttle_ms: u64,
        ) -> Result<Self, OsInputError> {
            if !Self::has_permission() {
                warn!("input monitoring permission not granted, os_input source disabled");
                return Err(OsInputError::PermissionDenied);
            }

            let running = Arc::new(AtomicBool::new(true));
            let run_loop_storage: Arc<std::sync::Mutex<Option<CFRunLoop>>> =
                Arc::new(std::sync::Mutex::new(None));

            let running_thread = Arc::clone(&running);
            let run_loop_thread = Arc::clone(&run_loop_storage);

            let handle = thread::Builder::new()
                .name("os-input-capture".into())
                .spawn(move || {
                    Self::event_loop(
                        running_thread,
                        run_loop_thread,
                        tx,
                        sequence,
                        context,
                        mouse_move_throttle_ms,
                    );
                })
                .map_err(|_| OsInputError::ThreadSpawnFailed)?;

            Ok(Self {
                running,
                thread_handle: Some(handle),
                run_loop: run_loop_storage,
            })
        }

        fn event_loop(
            running: Arc<AtomicBool>,
            run_loop_storage: Arc<std::sync::Mutex<Option<CFRunLoop>>>,
            tx: Sender<RawEvent>,
            sequence: SequenceCounter,
            context: ContextProvider,
            mouse_move_throttle_ms: u64,
        ) {
            let current_run_loop = CFRunLoop::get_current();
            if let Ok(mut guard) = run_loop_storage.lock() {
                *guard = Some(current_run_loop.clone());
            }

            let mach_port_ref: Arc<std::sync::Mutex<SendableMachPortRef>> =
                Arc::new(std::sync::Mutex::new(SendableMachPortRef(None)));
            let mach_port_for_callback = Arc::clone(&mach_port_ref);
            let last_move = Arc::new(std::sync::Mutex::new(Instant::now() - Duration::from_secs(1)));

            let event_types = vec![
                CGEventType::KeyDown,
                CGEventType::KeyUp,
                CGEventType::LeftMouseDown,
                CGEventType::LeftMouseUp,
                CGEventType::RightMouseDown,
                CGEventType::RightMouseUp,
                CGEventType::MouseMoved,
            ];

            let event_tap_result = CGEventTap::new(
                CGEventTapLocation::HID,
                CGEventTapPlacement::HeadInsertEventTap,
                CGEventTapOptions::ListenOnly,
                event_types,
                move |_proxy, event_type, event: &CGEvent| {
                    match event_type {
                        CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                            warn!("os_input event tap disabled, re-enabling");
                            reenable_tap(&mach_port_for_callback);
                            return None;
                        }
                        _ => {}
                    }

                    if event_type == CGEventType::MouseMoved {
                        let mut last = last_move.lock().unwrap();
                        if last.elapsed() < Duration::from_millis(mouse_move_throttle_ms) {
                            return None;
                        }
                        *last = Instant::now();
                    }

                    if let Some(payload) = payload_for(event_type, event) {
                        let raw = RawEvent {
                            sequence: sequence.next(),
                            timestamp: chrono::Utc::now(),
                            layer: Layer::OsInput,
                            payload,
                            context: context(),
                        };
                        let _ = tx.try_send(raw);
                    }

                    None
                },
            );

            let event_tap = match event_tap_result {
                Ok(tap) => tap,
                Err(()) => {
                    warn!("failed to create os_input event tap");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Ok(mut guard) = mach_port_ref.lock() {
                guard.0 = Some(event_tap.mach_port.as_concrete_TypeRef());
            }

            let run_loop_source = match event_tap.mach_port.create_runloop_source(0) {
                Ok(source) => source,
                Err(()) => {
                    warn!("failed to create run loop source for os_input tap");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            unsafe {
                current_run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
            }
            event_tap.enable();
            info!("os_input capture source running");

            while running.load(Ordering::SeqCst) {
                let result = CFRunLoop::run_in_mode(
                    unsafe { kCFRunLoopDefaultMode },
                    Duration::from_millis(100),
                    true,
                );
                if matches!(
                    result,
                    core_foundation::runloop::CFRunLoopRunResult::Stopped
                ) {
                    break;
                }
            }

            debug!("os_input event loop exiting");
            running.store(false, Ordering::SeqCst);
            if let Ok(mut guard) = run_loop_storage.lock() {
                *guard = None;
            }
        }

        pub fn stop_impl(&mut self) {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            self.running.store(false, Ordering::SeqCst);
            if let Ok(guard) = self.run_loop.lock() {
                if let Some(run_loop) = guard.as_ref() {
                    run_loop.stop();
                }
            }
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }

        pub fn is_running_impl(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    fn reenable_tap(mach_port_ref: &Arc<std::sync::Mutex<SendableMachPortRef>>) {
        extern "C" {
            fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
        }
        if let Ok(guard) = mach_port_ref.lock() {
            if let Some(port) = guard.0 {
                unsafe {
                    CGEventTapEnable(port, true);
                }
            }
        }
    }

    fn modifiers_from_flags(flags: CGEventFlags) -> Modifiers {
        Modifiers {
            shift: flags.contains(CGEventFlags::CGEventFlagShift),
            control: flags.contains(CGEventFlags::CGEventFlagControl),
            option: flags.contains(CGEventFlags::CGEventFlagAlternate),
            command: flags.contains(CGEventFlags::CGEventFlagCommand),
        }
    }

    fn cursor_from_event(event: &CGEvent) -> Point {
        let loc = event.location();
        Point { x: loc.x, y: loc.y }
    }

    fn character_from_event(event: &CGEvent) -> Option<String> {
        extern "C" {
            fn CGEventKeyboardGetUnicodeString(
                event: core_graphics::sys::CGEventRef,
                max_len: libc::c_ulong,
                actual_len: *mut libc::c_ulong,
                buffer: *mut u16,
            );
        }
        const BUFFER_SIZE: usize = 32;
        let mut buffer: [u16; BUFFER_SIZE] = [0; BUFFER_SIZE];
        let mut actual_len: libc::c_ulong = 0;
        unsafe {
            use foreign_types::ForeignType;
            CGEventKeyboardGetUnicodeString(
                event.as_ptr(),
                BUFFER_SIZE as libc::c_ulong,
                &mut actual_len,
                buffer.as_mut_ptr(),
            );
        }
        if actual_len > 0 && (actual_len as usize) <= BUFFER_SIZE {
            String::from_utf16(&buffer[..actual_len as usize]).ok()
        } else {
            None
        }
    }

    fn payload_for(event_type: CGEventType, event: &CGEvent) -> Option<EventPayload> {
        let flags = event.get_flags();
        match event_type {
            CGEventType::KeyDown => Some(EventPayload::KeyDown {
                key_code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16,
                character: character_from_event(event),
                modifiers: modifiers_from_flags(flags),
                cursor: cursor_from_event(event),
            }),
            CGEventType::KeyUp => Some(EventPayload::KeyUp {
                key_code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16,
                modifiers: modifiers_from_flags(flags),
            }),
            CGEventType::LeftMouseDown => Some(EventPayload::MouseDown {
                button: MouseButton::Left,
                cursor: cursor_from_event(event),
            }),
            CGEventType::RightMouseDown => Some(EventPayload::MouseDown {
                button: MouseButton::Right,
                cursor: cursor_from_event(event),
            }),
            CGEventType::LeftMouseUp => Some(EventPayload::MouseUp {
                button: MouseButton::Left,
                cursor: cursor_from_event(event),
            }),
            CGEventType::RightMouseUp => Some(EventPayload::MouseUp {
                button: MouseButton::Right,
                cursor: cursor_from_event(event),
            }),
            CGEventType::MouseMoved => Some(EventPayload::MouseMove {
                cursor: cursor_from_event(event),
            }),
            _ => None,
        }
    }
}

#[cfg(target_os = "macos")]
pub use mac::OsInputSource as PlatformOsInputSource;

/// Cross-platform `os_input` capture source. On macOS this wraps a
/// `CGEventTap`; elsewhere it reports itself disabled rather than panicking,
/// per the open question in spec §9 about platforms with no equivalent hook.
pub struct OsInputSource {
    #[cfg(target_os = "macos")]
    inner: Option<PlatformOsInputSource>,
    running: bool,
}

impl OsInputSource {
    pub fn start(
        tx: Sender<RawEvent>,
        sequence: SequenceCounter,
        context: ContextProvider,
        mouse_move_throttle_ms: u64,
    ) -> Result<Self, OsInputError> {
        #[cfg(target_os = "macos")]
        {
            let inner =
                PlatformOsInputSource::start(tx, sequence, context, mouse_move_throttle_ms)?;
            Ok(Self {
                inner: Some(inner),
                running: true,
            })
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = (tx, sequence, context, mouse_move_throttle_ms);
            warn!("os_input capture is unavailable on this platform");
            Err(OsInputError::PermissionDenied)
        }
    }

    pub fn has_permission() -> bool {
        #[cfg(target_os = "macos")]
        {
            PlatformOsInputSource::has_permission()
        }
        #[cfg(not(target_os = "macos"))]
        {
            false
        }
    }
}

impl CaptureSource for OsInputSource {
    fn name(&self) -> &'static str {
        "os_input"
    }

    fn stop(&mut self) {
        #[cfg(target_os = "macos")]
        if let Some(inner) = self.inner.as_mut() {
            inner.stop_impl();
        }
        self.running = false;
    }

    fn is_running(&self) -> bool {
        #[cfg(target_os = "macos")]
        {
            self.inner.as_ref().map(|i| i.is_running_impl()).unwrap_or(false)
        }
        #[cfg(not(target_os = "macos"))]
        {
            self.running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_permission_does_not_panic() {
        let _ = OsInputSource::has_permission();
    }

    #[test]
    #[cfg_attr(not(target_os = "macos"), ignore = "macOS-only source")]
    #[ignore = "requires input monitoring permission"]
    fn start_and_stop_round_trips() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let ctx: ContextProvider = Arc::new(EventContext::default);
        if !OsInputSource::has_permission() {
            return;
        }
        let mut source = OsInputSource::start(tx, SequenceCounter::new(), ctx, 100).unwrap();
        assert!(source.is_running());
        source.stop();
        assert!(!source.is_running());
    }
}
