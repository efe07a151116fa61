//! Polls the system clipboard and classifies changes into a
//! [`ClipboardContentType`], grounded on the teacher's
//! `clipboard_history/monitor.rs` poll loop (change detection by diffing
//! against the last seen text, `arboard` as the clipboard backend).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arboard::Clipboard;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::capture::{CaptureSource, SequenceCounter};
use crate::model::{ClipboardContentType, EventContext, EventPayload, Layer, RawEvent};

/// Content longer than this is flagged `truncated` but still captured at
/// this length (spec §4.1: clipboard payloads are bounded, not dropped).
const MAX_CONTENT_LEN: usize = 4_096;

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://\S+$").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(/[^/\x00]+)+/?$|^[A-Za-z]:\\").unwrap())
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap())
}

/// Deterministic content-type classification (no ML, no network). Order
/// matters: more specific patterns are checked before falling back to text.
pub fn classify(text: &str) -> ClipboardContentType {
    let trimmed = text.trim();
    if url_re().is_match(trimmed) {
        ClipboardContentType::Url
    } else if email_re().is_match(trimmed) {
        ClipboardContentType::Email
    } else if path_re().is_match(trimmed) {
        ClipboardContentType::FilePath
    } else if number_re().is_match(trimmed) {
        ClipboardContentType::Number
    } else if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
            ClipboardContentType::Json
        } else {
            ClipboardContentType::Text
        }
    } else if looks_like_code(trimmed) {
        ClipboardContentType::Code
    } else {
        ClipboardContentType::Text
    }
}

fn looks_like_code(text: &str) -> bool {
    let code_markers = ["fn ", "function ", "def ", "class ", "{\n", "=> ", "const ", "import "];
    code_markers.iter().any(|m| text.contains(m)) && text.contains('\n')
}

pub struct ClipboardSource {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClipboardSource {
    pub fn start(
        tx: crossbeam_channel::Sender<RawEvent>,
        sequence: SequenceCounter,
        poll_ms: u64,
        context: impl Fn() -> EventContext + Send + 'static,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("clipboard-capture".into())
            .spawn(move || {
                let mut clipboard = match Clipboard::new() {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "failed to open system clipboard");
                        return;
                    }
                };
                let mut last_text: Option<String> = None;

                while running_thread.load(Ordering::SeqCst) {
                    if let Ok(text) = clipboard.get_text() {
                        if !text.is_empty() && last_text.as_deref() != Some(text.as_str()) {
                            let content_type = classify(&text);
                            let truncated = text.len() > MAX_CONTENT_LEN;
                            let content: String = text.chars().take(MAX_CONTENT_LEN).collect();
                            let word_count = text.split_whitespace().count();

                            debug!(content_type = ?content_type, len = text.len(), "clipboard changed");

                            let raw = RawEvent {
                                sequence: sequence.next(),
                                timestamp: chrono::Utc::now(),
                                layer: Layer::Clipboard,
                                payload: EventPayload::ClipboardChange {
                                    content,
                                    content_type,
                                    content_length: text.len(),
                                    truncated,
                                    contains_url: content_type == ClipboardContentType::Url
                                        || url_re().is_match(text.trim()),
                                    contains_email: content_type == ClipboardContentType::Email,
                                    word_count,
                                },
                                context: context(),
                            };
                            if tx.try_send(raw).is_err() {
                                warn!("clipboard channel full or closed, dropping event");
                            }
                            last_text = Some(text);
                        }
                    }
                    thread::sleep(Duration::from_millis(poll_ms));
                }
            })
            .expect("failed to spawn clipboard-capture thread");

        Self {
            running,
            handle: Some(handle),
        }
    }
}

impl CaptureSource for ClipboardSource {
    fn name(&self) -> &'static str {
        "clipboard"
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

impl Drop for ClipboardSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_url() {
        assert_eq!(classify("https://example.com/path"), ClipboardContentType::Url);
    }

    #[test]
    fn classifies_email() {
        assert_eq!(classify("person@example.com"), ClipboardContentType::Email);
    }

    #[test]
    fn classifies_json() {
        assert_eq!(classify(r#"{"a": 1}"#), ClipboardContentType::Json);
    }

    #[test]
    fn classifies_plain_text_as_fallback() {
        assert_eq!(classify("just some words"), ClipboardContentType::Text);
    }

    #[test]
    fn classifies_number() {
        assert_eq!(classify("42.5"), ClipboardContentType::Number);
    }

    #[test]
    #[ignore = "requires a live system clipboard"]
    fn start_and_stop_round_trips() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut source =
            ClipboardSource::start(tx, SequenceCounter::new(), 10, EventContext::default);
        assert!(source.is_running());
        source.stop();
        assert!(!source.is_running());
    }
}
