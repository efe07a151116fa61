//! C1: capture sources. Each source is a tagged variant producing
//! [`RawEvent`](crate::model::RawEvent)s on a shared channel, rather than an
//! inheritance hierarchy (per the design notes against dynamic dispatch for
//! the source set).

pub mod accessibility;
pub mod app_focus;
pub mod browser;
pub mod clipboard;
pub mod os_input;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::model::RawEvent;

/// Shared, monotonically increasing sequence counter handed to every source
/// so `RawEvent::sequence` is strictly increasing session-wide regardless of
/// which source produced the event (spec §8.1).
#[derive(Clone, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    /// Returns the next sequence number (spec §8 invariant 1: the first
    /// event in a session has `sequence == 1`).
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A running capture source that can be asked to stop and report whether it
/// is still alive. Implemented per-source rather than as a trait object
/// hierarchy; sources are enumerated explicitly in [`CaptureSet`].
pub trait CaptureSource {
    fn name(&self) -> &'static str;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// The emitter end every capture source is constructed with.
pub type RawEventSender = Sender<RawEvent>;

/// All C1 sources enabled for a session, named explicitly (spec §9: "a
/// tagged enumeration of concrete source kinds, not a trait-object
/// hierarchy").
pub enum CaptureHandle {
    OsInput(os_input::OsInputSource),
    AppFocus(app_focus::AppFocusSource),
    Clipboard(clipboard::ClipboardSource),
    Browser(browser::BrowserSource),
}

impl CaptureHandle {
    pub fn stop(&mut self) {
        match self {
            CaptureHandle::OsInput(s) => s.stop(),
            CaptureHandle::AppFocus(s) => s.stop(),
            CaptureHandle::Clipboard(s) => s.stop(),
            CaptureHandle::Browser(s) => s.stop(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            CaptureHandle::OsInput(s) => s.is_running(),
            CaptureHandle::AppFocus(s) => s.is_running(),
            CaptureHandle::Clipboard(s) => s.is_running(),
            CaptureHandle::Browser(s) => s.is_running(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureHandle::OsInput(s) => s.name(),
            CaptureHandle::AppFocus(s) => s.name(),
            CaptureHandle::Clipboard(s) => s.name(),
            CaptureHandle::Browser(s) => s.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_counter_is_strictly_increasing() {
        let counter = SequenceCounter::new();
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn sequence_counter_shared_across_clones_stays_monotonic() {
        let counter = SequenceCounter::new();
        let clone = counter.clone();
        let a = counter.next();
        let b = clone.next();
        let c = counter.next();
        assert!(a < b && b < c);
    }
}
