//! C2: keystroke coalescer. Merges a run of key-down events from the same
//! `(app, window)` into a single [`TextInputEvent`], flushing on idle
//! timeout, punctuation, return/tab, context change, or a size cap.
//!
//! Grounded on the teacher's `filter_coalescer.rs` (one-pending-value debounce
//! shape, generalized here from "latest wins" to "accumulate then flush") and
//! `keystroke_logger.rs` (buffering keystrokes into a session-scoped string
//! before handing it off).

use chrono::{DateTime, Utc};

use crate::model::{EventContext, FlushReason, TextInputEvent};

const PUNCTUATION_FLUSH_CHARS: &[char] = &['.', '!', '?'];

#[derive(Debug, Default)]
struct PendingRun {
    text: String,
    app: String,
    window_title: String,
    start_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
}

impl PendingRun {
    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Buffers key-down characters into semantically complete text units.
pub struct KeystrokeCoalescer {
    idle_flush: chrono::Duration,
    max_chars: usize,
    pending: PendingRun,
}

impl KeystrokeCoalescer {
    pub fn new(idle_flush_ms: u64, max_chars: usize) -> Self {
        Self {
            idle_flush: chrono::Duration::milliseconds(idle_flush_ms as i64),
            max_chars,
            pending: PendingRun::default(),
        }
    }

    /// Feeds one typed character (already resolved from the key event,
    /// ignoring pure modifier/non-printing keys) into the coalescer. Returns
    /// a completed [`TextInputEvent`] if this keystroke triggered a flush.
    pub fn push_char(
        &mut self,
        ch: char,
        context: &EventContext,
        timestamp: DateTime<Utc>,
    ) -> Option<TextInputEvent> {
        let context_changed = !self.pending.is_empty()
            && (self.pending.app != context.active_app
                || self.pending.window_title != context.active_window);

        let mut flushed = if context_changed {
            self.flush(FlushReason::ContextChange)
        } else {
            None
        };

        if self.pending.is_empty() {
            self.pending.app = context.active_app.clone();
            self.pending.window_title = context.active_window.clone();
            self.pending.start_ts = Some(timestamp);
        }
        self.pending.text.push(ch);
        self.pending.last_ts = Some(timestamp);

        if ch == '\n' {
            flushed = flushed.or_else(|| self.flush(FlushReason::ReturnKey));
        } else if ch == '\t' {
            flushed = flushed.or_else(|| self.flush(FlushReason::Tab));
        } else if PUNCTUATION_FLUSH_CHARS.contains(&ch) {
            flushed = flushed.or_else(|| self.flush(FlushReason::Punctuation));
        } else if self.pending.text.chars().count() >= self.max_chars {
            flushed = flushed.or_else(|| self.flush(FlushReason::MaxLength));
        }

        flushed
    }

    /// Handles a non-printing key (backspace, arrow, etc.) by forcing a
    /// context-preserving flush boundary. Kept separate from `push_char` so
    /// callers can route key codes without guessing printability here.
    pub fn push_backspace(&mut self) {
        if !self.pending.text.is_empty() {
            self.pending.text.pop();
        }
    }

    /// Call periodically (driven by the session's idle timer) to flush a run
    /// that has gone quiet without a natural punctuation boundary.
    pub fn poll_idle(&mut self, now: DateTime<Utc>) -> Option<TextInputEvent> {
        let last = self.pending.last_ts?;
        if now.signed_duration_since(last) >= self.idle_flush {
            self.flush(FlushReason::Idle)
        } else {
            None
        }
    }

    /// Force-flushes any pending run, used on session pause/stop (spec §9:
    /// drain-then-clear).
    pub fn force_flush(&mut self) -> Option<TextInputEvent> {
        self.flush(FlushReason::Force)
    }

    fn flush(&mut self, reason: FlushReason) -> Option<TextInputEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        let text = pending.text;
        let word_count = text.split_whitespace().count();
        let char_count = text.chars().count();
        let contains_punctuation = text.chars().any(|c| PUNCTUATION_FLUSH_CHARS.contains(&c));
        Some(TextInputEvent {
            text,
            word_count,
            char_count,
            contains_punctuation,
            app: pending.app,
            window_title: pending.window_title,
            start_ts: pending.start_ts.unwrap_or(Utc::now()),
            end_ts: pending.last_ts.unwrap_or(Utc::now()),
            flush_reason: reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(app: &str) -> EventContext {
        EventContext {
            active_app: app.into(),
            active_window: "main".into(),
            active_url: None,
        }
    }

    #[test]
    fn flushes_on_punctuation() {
        let mut c = KeystrokeCoalescer::new(2_000, 2_000);
        let t0 = Utc::now();
        assert!(c.push_char('h', &ctx("Notes"), t0).is_none());
        assert!(c.push_char('i', &ctx("Notes"), t0).is_none());
        let flushed = c.push_char('.', &ctx("Notes"), t0).unwrap();
        assert_eq!(flushed.text, "hi.");
        assert_eq!(flushed.flush_reason, FlushReason::Punctuation);
    }

    #[test]
    fn flushes_on_context_change() {
        let mut c = KeystrokeCoalescer::new(2_000, 2_000);
        let t0 = Utc::now();
        c.push_char('h', &ctx("Notes"), t0);
        c.push_char('i', &ctx("Notes"), t0);
        let flushed = c.push_char('x', &ctx("Mail"), t0).unwrap();
        assert_eq!(flushed.text, "hi");
        assert_eq!(flushed.flush_reason, FlushReason::ContextChange);
        assert_eq!(flushed.app, "Notes");
    }

    #[test]
    fn flushes_on_idle_timeout() {
        let mut c = KeystrokeCoalescer::new(100, 2_000);
        let t0 = Utc::now();
        c.push_char('h', &ctx("Notes"), t0);
        let later = t0 + chrono::Duration::milliseconds(200);
        let flushed = c.poll_idle(later).unwrap();
        assert_eq!(flushed.text, "h");
        assert_eq!(flushed.flush_reason, FlushReason::Idle);
    }

    #[test]
    fn poll_idle_is_none_when_within_window() {
        let mut c = KeystrokeCoalescer::new(5_000, 2_000);
        let t0 = Utc::now();
        c.push_char('h', &ctx("Notes"), t0);
        let soon = t0 + chrono::Duration::milliseconds(50);
        assert!(c.poll_idle(soon).is_none());
    }

    #[test]
    fn flushes_on_max_length() {
        let mut c = KeystrokeCoalescer::new(5_000, 3);
        let t0 = Utc::now();
        c.push_char('a', &ctx("Notes"), t0);
        c.push_char('b', &ctx("Notes"), t0);
        let flushed = c.push_char('c', &ctx("Notes"), t0).unwrap();
        assert_eq!(flushed.text, "abc");
        assert_eq!(flushed.flush_reason, FlushReason::MaxLength);
    }

    #[test]
    fn force_flush_drains_pending_run() {
        let mut c = KeystrokeCoalescer::new(5_000, 2_000);
        let t0 = Utc::now();
        c.push_char('h', &ctx("Notes"), t0);
        let flushed = c.force_flush().unwrap();
        assert_eq!(flushed.text, "h");
        assert!(c.force_flush().is_none());
    }

    #[test]
    fn backspace_removes_last_char_without_flushing() {
        let mut c = KeystrokeCoalescer::new(5_000, 2_000);
        let t0 = Utc::now();
        c.push_char('h', &ctx("Notes"), t0);
        c.push_char('i', &ctx("Notes"), t0);
        c.push_backspace();
        let flushed = c.force_flush().unwrap();
        assert_eq!(flushed.text, "h");
    }
}
