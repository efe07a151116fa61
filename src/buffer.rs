//! C4: raw event buffer and batcher. Holds the in-flight raw and AI events
//! for the current batch window, deduplicates near-identical raw events, and
//! cuts a [`Batch`] on interval, size-cap, or forced boundaries.
//!
//! Grounded on the CosmoCorral `data_collector.rs` bounded-`VecDeque`-history
//! idiom (kept the bounding discipline, dropped its synthetic/random-data
//! generation) and the teacher's clipboard cache for the LRU-backed
//! object-inference idiom (`lru`).

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;

use chrono::Utc;
use lru::LruCache;
use uuid::Uuid;

use crate::model::{AiEvent, Batch, BatchReason, DedupKey, ObjectType, OptimizationSummary, RawEvent};

/// Within this window, two raw events with the same dedup key are treated as
/// duplicates from overlapping sources (spec §9 open question resolution:
/// `(layer, kind, timestamp ± 50ms, payload-digest)`).
const DEDUP_WINDOW_MS: i64 = 50;

struct DedupEntry {
    key: DedupKey,
    timestamp: chrono::DateTime<Utc>,
}

/// Bounded ordered buffer of raw and AI events awaiting the next batch cut.
pub struct RawEventBuffer {
    session_id: Uuid,
    max_events_in_memory: usize,
    batch_max_raw_events: usize,
    raw_events: VecDeque<RawEvent>,
    ai_events: Vec<AiEvent>,
    recent_dedup: VecDeque<DedupEntry>,
    batch_started_at: chrono::DateTime<Utc>,
    object_cache: LruCache<String, (ObjectType, String)>,
}

impl RawEventBuffer {
    pub fn new(session_id: Uuid, max_events_in_memory: usize, batch_max_raw_events: usize) -> Self {
        Self {
            session_id,
            max_events_in_memory,
            batch_max_raw_events,
            raw_events: VecDeque::new(),
            ai_events: Vec::new(),
            recent_dedup: VecDeque::new(),
            batch_started_at: Utc::now(),
            object_cache: LruCache::new(NonZeroUsize::new(256).unwrap()),
        }
    }

    /// Attempts to push a raw event, dropping it silently if it is a
    /// duplicate of a very recent event (spec §9). Evicts the oldest event
    /// if the buffer is at capacity (spec §5: bounded, drop-oldest
    /// backpressure — the channel feeding this buffer is itself
    /// bounded/lossless; this cap is the buffer's own memory ceiling).
    ///
    /// Returns `true` if the event was accepted.
    pub fn push_raw(&mut self, event: RawEvent) -> bool {
        let key = event.dedup_key();
        let is_duplicate = self.recent_dedup.iter().any(|entry| {
            entry.key == key
                && (event.timestamp - entry.timestamp).num_milliseconds().abs() <= DEDUP_WINDOW_MS
        });
        if is_duplicate {
            return false;
        }

        while self.recent_dedup.len() > 512 {
            self.recent_dedup.pop_front();
        }
        self.recent_dedup.push_back(DedupEntry {
            key,
            timestamp: event.timestamp,
        });

        if self.raw_events.len() >= self.max_events_in_memory {
            self.raw_events.pop_front();
        }
        self.raw_events.push_back(event);
        true
    }

    pub fn push_ai_event(&mut self, event: AiEvent) {
        self.ai_events.push(event);
    }

    /// Caches an inferred `(ObjectType, object_id)` for a context key (e.g.
    /// a URL or file path), so repeated activity against the same object
    /// does not re-run classification.
    pub fn cache_object_inference(&mut self, context_key: String, inferred: (ObjectType, String)) {
        self.object_cache.put(context_key, inferred);
    }

    pub fn lookup_object_inference(&mut self, context_key: &str) -> Option<(ObjectType, String)> {
        self.object_cache.get(context_key).cloned()
    }

    pub fn raw_event_count(&self) -> usize {
        self.raw_events.len()
    }

    /// Non-destructive snapshot of the in-flight raw/AI events for the
    /// current (not-yet-cut) batch, used by `export_session` (spec §6) to
    /// include activity that has not reached a batch boundary yet.
    pub fn snapshot(&self) -> (Vec<RawEvent>, Vec<AiEvent>) {
        (self.raw_events.iter().cloned().collect(), self.ai_events.clone())
    }

    pub fn ai_event_count(&self) -> usize {
        self.ai_events.len()
    }

    /// Whether the current batch has grown past its size cap (spec §4.4).
    pub fn should_cut_for_size(&self) -> bool {
        self.raw_events.len() >= self.batch_max_raw_events
    }

    /// Whether `interval_secs` have elapsed since the batch started.
    pub fn should_cut_for_interval(&self, interval_secs: u64, now: chrono::DateTime<Utc>) -> bool {
        (now - self.batch_started_at).num_seconds() >= interval_secs as i64
    }

    /// Cuts the current batch, retaining only raw events referenced by at
    /// least one AI event that survives (spec §8 invariant 2: referenced-only
    /// raw events travel with the batch; the rest were already consumed by
    /// the coalescer/enricher upstream and are dropped here rather than kept
    /// forever).
    pub fn cut_batch(&mut self, reason: BatchReason) -> Batch {
        let now = Utc::now();
        let ai_events = std::mem::take(&mut self.ai_events);
        let referenced: HashSet<u64> = ai_events.iter().flat_map(|e| e.raw_refs.iter().copied()).collect();
        let raw_events: Vec<RawEvent> = self
            .raw_events
            .drain(..)
            .filter(|e| referenced.contains(&e.sequence))
            .collect();

        let batch = Batch {
            batch_id: Uuid::new_v4(),
            session_id: self.session_id,
            started_at: self.batch_started_at,
            ended_at: now,
            reason,
            raw_events,
            ai_events,
            optimization_summary: OptimizationSummary::default(),
        };
        self.batch_started_at = now;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventContext, EventPayload, Layer, Point};

    fn raw(seq: u64, ts: chrono::DateTime<Utc>) -> RawEvent {
        RawEvent {
            sequence: seq,
            timestamp: ts,
            layer: Layer::OsInput,
            payload: EventPayload::MouseMove { cursor: Point { x: 1.0, y: 1.0 } },
            context: EventContext::default(),
        }
    }

    #[test]
    fn rejects_near_duplicate_raw_events() {
        let mut buf = RawEventBuffer::new(Uuid::new_v4(), 100, 100);
        let t0 = Utc::now();
        assert!(buf.push_raw(raw(1, t0)));
        assert!(!buf.push_raw(raw(2, t0 + chrono::Duration::milliseconds(10))));
        assert_eq!(buf.raw_event_count(), 1);
    }

    #[test]
    fn accepts_events_outside_dedup_window() {
        let mut buf = RawEventBuffer::new(Uuid::new_v4(), 100, 100);
        let t0 = Utc::now();
        assert!(buf.push_raw(raw(1, t0)));
        assert!(buf.push_raw(raw(2, t0 + chrono::Duration::milliseconds(500))));
        assert_eq!(buf.raw_event_count(), 2);
    }

    #[test]
    fn evicts_oldest_when_over_memory_cap() {
        let mut buf = RawEventBuffer::new(Uuid::new_v4(), 2, 100);
        let t0 = Utc::now();
        buf.push_raw(raw(1, t0));
        buf.push_raw(raw(2, t0 + chrono::Duration::milliseconds(200)));
        buf.push_raw(raw(3, t0 + chrono::Duration::milliseconds(400)));
        assert_eq!(buf.raw_event_count(), 2);
    }

    #[test]
    fn cut_batch_only_keeps_referenced_raw_events() {
        let mut buf = RawEventBuffer::new(Uuid::new_v4(), 100, 100);
        let t0 = Utc::now();
        buf.push_raw(raw(1, t0));
        buf.push_raw(raw(2, t0 + chrono::Duration::milliseconds(200)));
        buf.push_ai_event(AiEvent {
            id: Uuid::new_v4(),
            timestamp: t0,
            object_type: ObjectType::Unknown,
            object_id: "x".into(),
            kind: crate::model::AiEventKind::Scroll {
                direction: crate::model::ScrollDirection::Down,
                count: 1,
            },
            raw_refs: vec![1],
        });
        let batch = buf.cut_batch(BatchReason::Interval);
        assert_eq!(batch.raw_events.len(), 1);
        assert_eq!(batch.raw_events[0].sequence, 1);
        assert!(batch.check_reference_invariant());
    }

    #[test]
    fn should_cut_for_size_triggers_at_cap() {
        let mut buf = RawEventBuffer::new(Uuid::new_v4(), 100, 2);
        let t0 = Utc::now();
        buf.push_raw(raw(1, t0));
        assert!(!buf.should_cut_for_size());
        buf.push_raw(raw(2, t0 + chrono::Duration::milliseconds(300)));
        assert!(buf.should_cut_for_size());
    }

    #[test]
    fn object_inference_cache_round_trips() {
        let mut buf = RawEventBuffer::new(Uuid::new_v4(), 100, 100);
        buf.cache_object_inference("https://x.test/repo".into(), (ObjectType::Repository, "repo".into()));
        assert_eq!(
            buf.lookup_object_inference("https://x.test/repo"),
            Some((ObjectType::Repository, "repo".into()))
        );
        assert_eq!(buf.lookup_object_inference("unknown"), None);
    }
}
