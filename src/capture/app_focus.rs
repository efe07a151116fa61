//! Polls the OS for the frontmost `(app, window)` pair and emits a debounced
//! `AppFocus` event on change, grounded on the teacher's focus-change
//! debounce shape (`focus_coordinator.rs`) generalized from GPUI-internal
//! focus targets to OS-level window focus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::capture::{CaptureSource, SequenceCounter};
use crate::model::{EventContext, EventPayload, Layer, RawEvent};

/// Queries the OS for the currently focused `(app_name, window_title)`.
/// Abstracted behind a trait so the polling loop is platform-independent and
/// unit-testable with a fake.
pub trait FocusProbe: Send + 'static {
    fn frontmost(&mut self) -> Option<(String, String)>;
}

#[cfg(target_os = "macos")]
pub struct AppleScriptFocusProbe;

#[cfg(target_os = "macos")]
impl FocusProbe for AppleScriptFocusProbe {
    fn frontmost(&mut self) -> Option<(String, String)> {
        let script = r#"
            tell application "System Events"
                set frontApp to first application process whose frontmost is true
                set appName to name of frontApp
                try
                    set winName to name of front window of frontApp
                on error
                    set winName to ""
                end try
            end tell
            return appName & "||" & winName
        "#;
        let output = std::process::Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut parts = text.trim_end().splitn(2, "||");
        let app = parts.next()?.to_string();
        let window = parts.next().unwrap_or("").to_string();
        Some((app, window))
    }
}

#[cfg(not(target_os = "macos"))]
pub struct UnavailableFocusProbe;

#[cfg(not(target_os = "macos"))]
impl FocusProbe for UnavailableFocusProbe {
    fn frontmost(&mut self) -> Option<(String, String)> {
        None
    }
}

pub struct AppFocusSource {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AppFocusSource {
    pub fn start(tx: Sender<RawEvent>, sequence: SequenceCounter, poll_ms: u64) -> Self {
        Self::start_with_probe(tx, sequence, poll_ms, default_probe())
    }

    pub fn start_with_probe(
        tx: Sender<RawEvent>,
        sequence: SequenceCounter,
        poll_ms: u64,
        mut probe: impl FocusProbe,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("app-focus-capture".into())
            .spawn(move || {
                let mut last: Option<(String, String)> = None;
                while running_thread.load(Ordering::SeqCst) {
                    if let Some(current) = probe.frontmost() {
                        if last.as_ref() != Some(&current) {
                            debug!(app = %current.0, window = %current.1, "app focus changed");
                            let raw = RawEvent {
                                sequence: sequence.next(),
                                timestamp: chrono::Utc::now(),
                                layer: Layer::AppFocus,
                                payload: EventPayload::AppFocus {
                                    app_name: current.0.clone(),
                                    window_title: current.1.clone(),
                                },
                                context: EventContext {
                                    active_app: current.0.clone(),
                                    active_window: current.1.clone(),
                                    active_url: None,
                                },
                            };
                            if tx.try_send(raw).is_err() {
                                warn!("app_focus channel full or closed, dropping event");
                            }
                            last = Some(current);
                        }
                    }
                    thread::sleep(Duration::from_millis(poll_ms));
                }
            })
            .expect("failed to spawn app-focus-capture thread");

        Self {
            running,
            handle: Some(handle),
        }
    }
}

#[cfg(target_os = "macos")]
fn default_probe() -> AppleScriptFocusProbe {
    AppleScriptFocusProbe
}

#[cfg(not(target_os = "macos"))]
fn default_probe() -> UnavailableFocusProbe {
    UnavailableFocusProbe
}

impl CaptureSource for AppFocusSource {
    fn name(&self) -> &'static str {
        "app_focus"
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AppFocusSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedProbe {
        readings: std::vec::IntoIter<(String, String)>,
    }

    impl FocusProbe for ScriptedProbe {
        fn frontmost(&mut self) -> Option<(String, String)> {
            self.readings.next()
        }
    }

    #[test]
    fn emits_one_event_per_distinct_focus_change() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let probe = ScriptedProbe {
            readings: vec![
                ("Terminal".into(), "zsh".into()),
                ("Terminal".into(), "zsh".into()),
                ("Browser".into(), "tab 1".into()),
            ]
            .into_iter(),
        };
        let mut source =
            AppFocusSource::start_with_probe(tx, SequenceCounter::new(), 5, probe);
        thread::sleep(Duration::from_millis(60));
        source.stop();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        match &events[0].payload {
            EventPayload::AppFocus { app_name, .. } => assert_eq!(app_name, "Terminal"),
            _ => panic!("expected AppFocus payload"),
        }
        match &events[1].payload {
            EventPayload::AppFocus { app_name, .. } => assert_eq!(app_name, "Browser"),
            _ => panic!("expected AppFocus payload"),
        }
    }
}
