//! C5: token optimizer. Reduces a batch's AI events before they are handed
//! to the summarizer's prompt assembly, recording what it did in an
//! [`OptimizationSummary`] (spec §4.5).
//!
//! Grounded on the teacher's `filter_coalescer.rs` merge-adjacent-items
//! idiom, generalized to the five reduction kinds spec §4.5 names: coalesce
//! adjacent text inputs, coalesce near-duplicate content snapshots, throttle
//! scroll events per minute, drop low-signal events, and enforce minimum
//! snapshot spacing.

use chrono::{DateTime, Duration, Utc};

use crate::config::OptimizerConfig;
use crate::model::{AiEvent, AiEventKind, OptimizationSummary};

/// Applies all five reduction passes in sequence and returns the optimized
/// event list plus a summary of the reduction achieved.
pub fn optimize(events: Vec<AiEvent>, config: &OptimizerConfig) -> (Vec<AiEvent>, OptimizationSummary) {
    let input_count = events.len();
    let bytes_before = estimate_bytes(&events);

    let events = drop_useless_events(events);
    let events = coalesce_text_inputs(events, config.text_coalesce_window_ms);
    let events = coalesce_duplicate_snapshots(events, config.snapshot_similarity_threshold);
    let events = enforce_snapshot_spacing(events, config.min_time_between_snapshots_ms);
    let events = throttle_scroll_events(events, config.max_scroll_events_per_minute);

    let output_count = events.len();
    let bytes_after = estimate_bytes(&events);
    let reduction_percent = if bytes_before == 0 {
        0.0
    } else {
        100.0 * (1.0 - bytes_after as f32 / bytes_before as f32)
    };

    let summary = OptimizationSummary {
        input_count,
        output_count,
        reduction_percent,
        bytes_before,
        bytes_after,
    };
    (events, summary)
}

fn estimate_bytes(events: &[AiEvent]) -> usize {
    events
        .iter()
        .map(|e| serde_json::to_vec(e).map(|v| v.len()).unwrap_or(0))
        .sum()
}

/// Drops events carrying no summarizable signal on their own: zero-char key
/// runs, and empty clipboard changes (spec §4.5). Raw mouse-moves-without-
/// click never reach this stage at all — the pipeline only ever promotes a
/// `mouse_down`/`mouse_up` pair to a `Click` AI event (see §4.4 grouping in
/// `session.rs`), so there is no `AiEventKind` variant for a bare move to
/// drop here.
fn drop_useless_events(events: Vec<AiEvent>) -> Vec<AiEvent> {
    events
        .into_iter()
        .filter(|e| match &e.kind {
            AiEventKind::TextInput(text) => text.char_count > 0,
            AiEventKind::Clipboard(clip) => clip.content_length > 0,
            AiEventKind::Scroll { count, .. } => *count > 0,
            _ => true,
        })
        .collect()
}

/// Coalesces adjacent TextInputEvents from the same `(app, window)` within
/// `window_ms` of each other, concatenating their texts with a single space
/// (spec §4.5: "coalesce text inputs").
fn coalesce_text_inputs(events: Vec<AiEvent>, window_ms: u64) -> Vec<AiEvent> {
    let window = Duration::milliseconds(window_ms as i64);
    let mut out: Vec<AiEvent> = Vec::with_capacity(events.len());
    for event in events {
        let mut merged_into_prev = false;
        if let AiEventKind::TextInput(ref text) = event.kind {
            if let Some(prev) = out.last_mut() {
                if let AiEventKind::TextInput(ref mut prev_text) = prev.kind {
                    if prev_text.app == text.app
                        && prev_text.window_title == text.window_title
                        && (text.start_ts - prev_text.end_ts) <= window
                    {
                        prev_text.text = format!("{} {}", prev_text.text, text.text);
                        prev_text.word_count = prev_text.text.split_whitespace().count();
                        prev_text.char_count = prev_text.text.chars().count();
                        prev_text.contains_punctuation |= text.contains_punctuation;
                        prev_text.end_ts = text.end_ts;
                        prev_text.flush_reason = text.flush_reason;
                        prev.raw_refs.extend(event.raw_refs.iter().copied());
                        prev.timestamp = event.timestamp;
                        merged_into_prev = true;
                    }
                }
            }
        }
        if !merged_into_prev {
            out.push(event);
        }
    }
    out
}

/// Collapses consecutive ContentSnapshots from the same `(app,
/// window_title)` whose previews differ by less than `threshold` (spec
/// §4.5: "coalesce duplicate snapshots"). Only the last of a near-duplicate
/// run is retained, at its own timestamp.
fn coalesce_duplicate_snapshots(events: Vec<AiEvent>, threshold: f32) -> Vec<AiEvent> {
    let mut out: Vec<AiEvent> = Vec::with_capacity(events.len());
    for event in events {
        let mut replaced_prev = false;
        if let AiEventKind::Snapshot(ref snap) = event.kind {
            if let Some(prev) = out.last() {
                if let AiEventKind::Snapshot(ref prev_snap) = prev.kind {
                    if prev_snap.app == snap.app
                        && prev_snap.window_title == snap.window_title
                        && preview_diff_ratio(&prev_snap.preview, &snap.preview) < threshold
                    {
                        replaced_prev = true;
                    }
                }
            }
        }
        if replaced_prev {
            out.pop();
        }
        out.push(event);
    }
    out
}

/// Cheap character-level diff fraction between two previews: the count of
/// differing or missing characters divided by the longer preview's length.
fn preview_diff_ratio(a: &str, b: &str) -> f32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 0.0;
    }
    let common_len = a_chars.len().min(b_chars.len());
    let mut diff = a_chars.len().abs_diff(b_chars.len());
    for i in 0..common_len {
        if a_chars[i] != b_chars[i] {
            diff += 1;
        }
    }
    diff as f32 / max_len as f32
}

/// Enforces a minimum gap between retained snapshots, dropping any snapshot
/// that arrives before `min_gap_ms` has elapsed since the last retained one
/// (spec §4.5: "snapshot spacing").
fn enforce_snapshot_spacing(events: Vec<AiEvent>, min_gap_ms: u64) -> Vec<AiEvent> {
    let min_gap = Duration::milliseconds(min_gap_ms as i64);
    let mut out: Vec<AiEvent> = Vec::with_capacity(events.len());
    let mut last_snapshot_at: Option<DateTime<Utc>> = None;
    for event in events {
        if matches!(event.kind, AiEventKind::Snapshot(_)) {
            if let Some(last) = last_snapshot_at {
                if event.timestamp - last < min_gap {
                    continue;
                }
            }
            last_snapshot_at = Some(event.timestamp);
        }
        out.push(event);
    }
    out
}

/// Caps scroll-kind events at `max_per_minute` within any rolling
/// fixed window anchored at the first scroll event of the window (spec
/// §4.5: "throttle network/burst events").
fn throttle_scroll_events(events: Vec<AiEvent>, max_per_minute: u32) -> Vec<AiEvent> {
    let minute = Duration::minutes(1);
    let mut out: Vec<AiEvent> = Vec::with_capacity(events.len());
    let mut window_start: Option<DateTime<Utc>> = None;
    let mut count_in_window: u32 = 0;
    for event in events {
        if matches!(event.kind, AiEventKind::Scroll { .. }) {
            match window_start {
                Some(start) if event.timestamp - start < minute => {
                    count_in_window += 1;
                }
                _ => {
                    window_start = Some(event.timestamp);
                    count_in_window = 1;
                }
            }
            if count_in_window <= max_per_minute {
                out.push(event);
            }
        } else {
            out.push(event);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClickPath, ClickTarget, FlushReason, NativeClick, Point, ScrollDirection, SnapshotType, TextInputEvent};
    use crate::model::{ClipboardContentType, ClipboardEvent, ContentSnapshot};
    use uuid::Uuid;

    fn config() -> OptimizerConfig {
        OptimizerConfig::default()
    }

    fn scroll_event(count: u32, ts: DateTime<Utc>) -> AiEvent {
        AiEvent {
            id: Uuid::new_v4(),
            timestamp: ts,
            object_type: crate::model::ObjectType::Unknown,
            object_id: "page".into(),
            kind: AiEventKind::Scroll { direction: ScrollDirection::Down, count },
            raw_refs: vec![1],
        }
    }

    fn text_event(text: &str, app: &str, ts: DateTime<Utc>) -> AiEvent {
        AiEvent {
            id: Uuid::new_v4(),
            timestamp: ts,
            object_type: crate::model::ObjectType::Unknown,
            object_id: "doc".into(),
            kind: AiEventKind::TextInput(TextInputEvent {
                text: text.into(),
                word_count: text.split_whitespace().count(),
                char_count: text.chars().count(),
                contains_punctuation: false,
                app: app.into(),
                window_title: "Untitled".into(),
                start_ts: ts,
                end_ts: ts,
                flush_reason: FlushReason::Idle,
            }),
            raw_refs: vec![3],
        }
    }

    fn snapshot_event(preview: &str, ts: DateTime<Utc>) -> AiEvent {
        AiEvent {
            id: Uuid::new_v4(),
            timestamp: ts,
            object_type: crate::model::ObjectType::Unknown,
            object_id: "win".into(),
            kind: AiEventKind::Snapshot(ContentSnapshot {
                app: "Notes".into(),
                window_title: "Untitled".into(),
                is_web: false,
                url: None,
                preview: preview.into(),
                word_count: preview.split_whitespace().count(),
                element_count: 1,
                snapshot_type: SnapshotType::Interval,
            }),
            raw_refs: vec![4],
        }
    }

    #[test]
    fn coalesces_adjacent_text_inputs_within_window() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(500);
        let events = vec![text_event("Hello", "Editor", t0), text_event("world", "Editor", t1)];
        let (out, _) = optimize(events, &config());
        assert_eq!(out.len(), 1);
        match &out[0].kind {
            AiEventKind::TextInput(t) => assert_eq!(t.text, "Hello world"),
            _ => panic!("expected text input"),
        }
    }

    #[test]
    fn does_not_coalesce_text_inputs_across_apps() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(500);
        let events = vec![text_event("Hello", "Editor", t0), text_event("world", "Browser", t1)];
        let (out, _) = optimize(events, &config());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn does_not_coalesce_text_inputs_outside_window() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(3_000);
        let events = vec![text_event("Hello", "Editor", t0), text_event("world", "Editor", t1)];
        let (out, _) = optimize(events, &config());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn drops_zero_count_scrolls() {
        let t0 = Utc::now();
        let events = vec![scroll_event(0, t0)];
        let (out, _) = optimize(events, &config());
        assert!(out.is_empty());
    }

    #[test]
    fn drops_empty_clipboard_changes() {
        let t0 = Utc::now();
        let event = AiEvent {
            id: Uuid::new_v4(),
            timestamp: t0,
            object_type: crate::model::ObjectType::Unknown,
            object_id: "clip".into(),
            kind: AiEventKind::Clipboard(ClipboardEvent {
                content: String::new(),
                content_type: ClipboardContentType::Text,
                content_length: 0,
                truncated: false,
                contains_url: false,
                contains_email: false,
                word_count: 0,
            }),
            raw_refs: vec![5],
        };
        let (out, _) = optimize(vec![event], &config());
        assert!(out.is_empty());
    }

    #[test]
    fn throttles_scroll_events_past_per_minute_cap() {
        let t0 = Utc::now();
        let events: Vec<AiEvent> = (0..5)
            .map(|i| scroll_event(1, t0 + Duration::seconds(i)))
            .collect();
        let mut cfg = config();
        cfg.max_scroll_events_per_minute = 3;
        let (out, _) = optimize(events, &cfg);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn coalesces_near_duplicate_snapshots() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(100);
        let events = vec![snapshot_event("hello world", t0), snapshot_event("hello worle", t1)];
        let (out, _) = optimize(events, &config());
        assert_eq!(out.len(), 1);
        match &out[0].kind {
            AiEventKind::Snapshot(s) => assert_eq!(s.preview, "hello worle"),
            _ => panic!("expected snapshot"),
        }
    }

    #[test]
    fn keeps_dissimilar_snapshots() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(100);
        let events = vec![snapshot_event("hello world", t0), snapshot_event("a completely different page entirely", t1)];
        let (out, _) = optimize(events, &config());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn enforces_minimum_snapshot_spacing() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(5_000);
        let mut cfg = config();
        cfg.snapshot_similarity_threshold = 0.0;
        let events = vec![snapshot_event("aaaa", t0), snapshot_event("bbbb", t1)];
        let (out, _) = optimize(events, &cfg);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn preserves_click_events_untouched() {
        let t0 = Utc::now();
        let click = AiEvent {
            id: Uuid::new_v4(),
            timestamp: t0,
            object_type: crate::model::ObjectType::App,
            object_id: "App".into(),
            kind: AiEventKind::Click(ClickTarget {
                coordinates: Point { x: 0.0, y: 0.0 },
                app: "App".into(),
                window_title: "Win".into(),
                path: ClickPath::Native(NativeClick {
                    role: "button".into(),
                    label: None,
                    identifier: None,
                    value: None,
                    enabled: true,
                    focused: false,
                    parent_context: None,
                    sibling_texts: vec![],
                    semantic_type: "generic_button".into(),
                    confidence: 1.0,
                    action_context: None,
                }),
            }),
            raw_refs: vec![2],
        };
        let (out, _) = optimize(vec![click], &config());
        assert_eq!(out.len(), 1);
    }
}
