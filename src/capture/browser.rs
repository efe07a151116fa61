//! Browser bridge: polls the frontmost tracked browser for URL/tab/window
//! changes. No teacher module polls a browser directly; this is grounded on
//! the *shape* of `clipboard_history/monitor.rs`'s poll-and-diff loop,
//! generalized from clipboard text to `(url, title, tab_index, window_index,
//! tab_count)` tuples (spec §4.1).
//!
//! The open question in spec §9 about the cross-platform chrome-offset
//! mechanism is resolved here: this source is macOS-only (driven by
//! AppleScript's dictionary support in Safari/Chrome) and reports itself
//! disabled elsewhere rather than substituting an unreliable heuristic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::capture::{CaptureSource, SequenceCounter};
use crate::model::{EventContext, EventPayload, Layer, PageChangeType, RawEvent};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowserTab {
    pub url: String,
    pub title: String,
    pub tab_index: u32,
    pub window_index: u32,
    pub tab_count: u32,
}

pub trait BrowserProbe: Send + 'static {
    fn active_tab(&mut self) -> Option<BrowserTab>;
}

#[cfg(target_os = "macos")]
pub struct AppleScriptBrowserProbe {
    bundle_id: &'static str,
}

#[cfg(target_os = "macos")]
impl AppleScriptBrowserProbe {
    pub fn safari() -> Self {
        Self { bundle_id: "Safari" }
    }
}

#[cfg(target_os = "macos")]
impl BrowserProbe for AppleScriptBrowserProbe {
    fn active_tab(&mut self) -> Option<BrowserTab> {
        let script = format!(
            r#"
            tell application "{app}"
                if (count of windows) is 0 then return ""
                set w to front window
                set t to current tab of w
                set u to URL of t
                set ti to name of t
                set tc to count of tabs of w
                return u & "||" & ti & "||" & (tc as string)
            end tell
            "#,
            app = self.bundle_id
        );
        let output = std::process::Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let text = text.trim_end();
        if text.is_empty() {
            return None;
        }
        let mut parts = text.splitn(3, "||");
        let url = parts.next()?.to_string();
        let title = parts.next().unwrap_or_default().to_string();
        let tab_count: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(1);
        Some(BrowserTab {
            url,
            title,
            tab_index: 0,
            window_index: 0,
            tab_count,
        })
    }
}

#[cfg(not(target_os = "macos"))]
pub struct UnavailableBrowserProbe;

#[cfg(not(target_os = "macos"))]
impl BrowserProbe for UnavailableBrowserProbe {
    fn active_tab(&mut self) -> Option<BrowserTab> {
        None
    }
}

pub struct BrowserSource {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    enabled: bool,
}

impl BrowserSource {
    /// Whether this platform has a working browser bridge at all.
    pub fn is_supported() -> bool {
        cfg!(target_os = "macos")
    }

    pub fn start(tx: Sender<RawEvent>, sequence: SequenceCounter, poll_ms: u64) -> Self {
        if !Self::is_supported() {
            warn!("browser capture is unavailable on this platform, source disabled");
            return Self {
                running: Arc::new(AtomicBool::new(false)),
                handle: None,
                enabled: false,
            };
        }
        Self::start_with_probe(tx, sequence, poll_ms, default_probe())
    }

    pub fn start_with_probe(
        tx: Sender<RawEvent>,
        sequence: SequenceCounter,
        poll_ms: u64,
        mut probe: impl BrowserProbe,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("browser-capture".into())
            .spawn(move || {
                let mut last: Option<BrowserTab> = None;
                while running_thread.load(Ordering::SeqCst) {
                    if let Some(tab) = probe.active_tab() {
                        let changed = last.as_ref() != Some(&tab);
                        if changed {
                            let change_type = match &last {
                                None => PageChangeType::NewTab,
                                Some(prev) if prev.window_index != tab.window_index => {
                                    PageChangeType::WindowChange
                                }
                                Some(prev) if tab.tab_count > prev.tab_count => PageChangeType::NewTab,
                                Some(prev) if prev.url != tab.url && !prev.url.is_empty() => {
                                    PageChangeType::TabSwitch
                                }
                                _ => PageChangeType::Navigation,
                            };
                            debug!(url = %tab.url, ?change_type, "browser page view changed");
                            let raw = RawEvent {
                                sequence: sequence.next(),
                                timestamp: chrono::Utc::now(),
                                layer: Layer::Browser,
                                payload: EventPayload::UrlChange {
                                    url: tab.url.clone(),
                                    title: tab.title.clone(),
                                    tab_index: tab.tab_index,
                                    window_index: tab.window_index,
                                    tab_count: tab.tab_count,
                                    change_type,
                                },
                                context: EventContext {
                                    active_app: "Browser".into(),
                                    active_window: tab.title.clone(),
                                    active_url: Some(tab.url.clone()),
                                },
                            };
                            if tx.try_send(raw).is_err() {
                                warn!("browser channel full or closed, dropping event");
                            }
                            last = Some(tab);
                        }
                    }
                    thread::sleep(Duration::from_millis(poll_ms));
                }
            })
            .expect("failed to spawn browser-capture thread");

        Self {
            running,
            handle: Some(handle),
            enabled: true,
        }
    }
}

#[cfg(target_os = "macos")]
fn default_probe() -> AppleScriptBrowserProbe {
    AppleScriptBrowserProbe::safari()
}

#[cfg(not(target_os = "macos"))]
fn default_probe() -> UnavailableBrowserProbe {
    UnavailableBrowserProbe
}

impl CaptureSource for BrowserSource {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.enabled && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for BrowserSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedProbe {
        tabs: std::vec::IntoIter<BrowserTab>,
    }

    impl BrowserProbe for ScriptedProbe {
        fn active_tab(&mut self) -> Option<BrowserTab> {
            self.tabs.next()
        }
    }

    #[test]
    fn emits_new_tab_then_tab_switch() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let probe = ScriptedProbe {
            tabs: vec![
                BrowserTab {
                    url: "https://a.example".into(),
                    title: "A".into(),
                    tab_index: 0,
                    window_index: 0,
                    tab_count: 1,
                },
                BrowserTab {
                    url: "https://b.example".into(),
                    title: "B".into(),
                    tab_index: 0,
                    window_index: 0,
                    tab_count: 1,
                },
            ]
            .into_iter(),
        };
        let mut source =
            BrowserSource::start_with_probe(tx, SequenceCounter::new(), 5, probe);
        thread::sleep(Duration::from_millis(60));
        source.stop();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        match &events[0].payload {
            EventPayload::UrlChange { change_type, .. } => {
                assert_eq!(*change_type, PageChangeType::NewTab)
            }
            _ => panic!("expected UrlChange"),
        }
        match &events[1].payload {
            EventPayload::UrlChange { change_type, .. } => {
                assert_eq!(*change_type, PageChangeType::TabSwitch)
            }
            _ => panic!("expected UrlChange"),
        }
    }

    #[test]
    fn detects_new_tab_via_tab_count_increase() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let probe = ScriptedProbe {
            tabs: vec![
                BrowserTab {
                    url: "https://a.example".into(),
                    title: "A".into(),
                    tab_index: 0,
                    window_index: 0,
                    tab_count: 1,
                },
                BrowserTab {
                    url: "https://b.example".into(),
                    title: "B".into(),
                    tab_index: 0,
                    window_index: 0,
                    tab_count: 2,
                },
            ]
            .into_iter(),
        };
        let mut source =
            BrowserSource::start_with_probe(tx, SequenceCounter::new(), 5, probe);
        thread::sleep(Duration::from_millis(60));
        source.stop();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        match &events[1].payload {
            EventPayload::UrlChange { change_type, .. } => {
                assert_eq!(*change_type, PageChangeType::NewTab)
            }
            _ => panic!("expected UrlChange"),
        }
    }

    #[test]
    fn treats_same_url_tab_count_as_navigation() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let probe = ScriptedProbe {
            tabs: vec![
                BrowserTab {
                    url: "https://a.example".into(),
                    title: "A".into(),
                    tab_index: 0,
                    window_index: 0,
                    tab_count: 1,
                },
                BrowserTab {
                    url: "https://a.example".into(),
                    title: "A (updated)".into(),
                    tab_index: 0,
                    window_index: 0,
                    tab_count: 1,
                },
            ]
            .into_iter(),
        };
        let mut source =
            BrowserSource::start_with_probe(tx, SequenceCounter::new(), 5, probe);
        thread::sleep(Duration::from_millis(60));
        source.stop();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        match &events[1].payload {
            EventPayload::UrlChange { change_type, .. } => {
                assert_eq!(*change_type, PageChangeType::Navigation)
            }
            _ => panic!("expected UrlChange"),
        }
    }
}
