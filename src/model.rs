//! Core data model: raw events, derived events, batches and summaries.
//!
//! Every payload variant here has a fixed schema (spec §9: "dynamically-typed
//! payloads... payloads are a sum type over those schemas, not a free-form
//! map"). Nothing in this module reaches for `serde_json::Value` for event
//! bodies.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonically increasing per-session sequence number.
pub type Sequence = u64;

/// Which capture source produced a [`RawEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    OsInput,
    AppFocus,
    Clipboard,
    Accessibility,
    Browser,
    Snapshot,
}

/// The ambient `(app, window, url)` context captured alongside every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventContext {
    pub active_app: String,
    pub active_window: String,
    pub active_url: Option<String>,
}

/// Keyboard modifier set captured with OS input events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    pub option: bool,
    pub command: bool,
}

/// Screen-space coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The fixed set of layer-specific payload schemas. This is the sum type
/// spec §9 calls for in place of a free-form map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    KeyDown {
        key_code: u16,
        character: Option<String>,
        modifiers: Modifiers,
        cursor: Point,
    },
    KeyUp {
        key_code: u16,
        modifiers: Modifiers,
    },
    MouseDown {
        button: MouseButton,
        cursor: Point,
    },
    MouseUp {
        button: MouseButton,
        cursor: Point,
    },
    MouseMove {
        cursor: Point,
    },
    AppFocus {
        app_name: String,
        window_title: String,
    },
    ClipboardChange {
        content: String,
        content_type: ClipboardContentType,
        content_length: usize,
        truncated: bool,
        contains_url: bool,
        contains_email: bool,
        word_count: usize,
    },
    UrlChange {
        url: String,
        title: String,
        tab_index: u32,
        window_index: u32,
        tab_count: u32,
        change_type: PageChangeType,
    },
    DomClick {
        click: ClickTarget,
    },
    Scroll {
        scroll_y: f64,
        direction: ScrollDirection,
    },
    TextSelection {
        text: String,
    },
    ContentSnapshot {
        snapshot: ContentSnapshot,
    },
    SourceDisabled {
        layer: Layer,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardContentType {
    Text,
    Url,
    Email,
    FilePath,
    Json,
    Code,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageChangeType {
    Navigation,
    TabSwitch,
    NewTab,
    WindowChange,
}

/// An observation from a single capture source (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub sequence: Sequence,
    pub timestamp: DateTime<Utc>,
    pub layer: Layer,
    pub payload: EventPayload,
    pub context: EventContext,
}

impl RawEvent {
    /// `(layer, kind-discriminant, timestamp-bucket, payload-digest)` key
    /// used for cross-source deduplication (spec §9 open question).
    pub fn dedup_key(&self) -> DedupKey {
        use sha2::{Digest, Sha256};
        let kind = std::mem::discriminant(&self.payload);
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", self.payload));
        let digest: [u8; 32] = hasher.finalize().into();
        DedupKey {
            layer: self.layer,
            kind_tag: format!("{:?}", kind),
            digest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub layer: Layer,
    pub kind_tag: String,
    pub digest: [u8; 32],
}

/// Why a [`TextInputEvent`] was flushed out of the coalescer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    Idle,
    Punctuation,
    ReturnKey,
    Tab,
    ContextChange,
    MaxLength,
    Force,
}

/// A keystroke run coalesced into a semantically complete text unit (spec §3, C2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextInputEvent {
    pub text: String,
    pub word_count: usize,
    pub char_count: usize,
    pub contains_punctuation: bool,
    pub app: String,
    pub window_title: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub flush_reason: FlushReason,
}

/// One of the two mutually exclusive enrichment paths for a click (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClickPath {
    Native(NativeClick),
    Web(WebClick),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionContext {
    Send,
    Save,
    Delete,
    Edit,
    Create,
    Cancel,
    Confirm,
    Navigate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeClick {
    pub role: String,
    pub label: Option<String>,
    pub identifier: Option<String>,
    pub value: Option<String>,
    pub enabled: bool,
    pub focused: bool,
    pub parent_context: Option<String>,
    pub sibling_texts: Vec<String>,
    pub semantic_type: String,
    pub confidence: f32,
    pub action_context: Option<ActionContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebClick {
    pub url: String,
    pub title: String,
    pub tag: String,
    pub selector: String,
    pub text: String,
    pub href: Option<String>,
    pub aria_label: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub is_button: bool,
    pub is_link: bool,
    pub is_form_element: bool,
    pub appears_clickable: bool,
}

/// A pointer event plus its enrichment (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickTarget {
    pub coordinates: Point,
    pub app: String,
    pub window_title: String,
    pub path: ClickPath,
}

impl ClickTarget {
    pub fn is_native(&self) -> bool {
        matches!(self.path, ClickPath::Native(_))
    }
}

/// A URL/tab/window change in a tracked browser (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewEvent {
    pub url: String,
    pub title: String,
    pub tab_index: u32,
    pub window_index: u32,
    pub tab_count: u32,
    pub change_type: PageChangeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardEvent {
    pub content: String,
    pub content_type: ClipboardContentType,
    pub content_length: usize,
    pub truncated: bool,
    pub contains_url: bool,
    pub contains_email: bool,
    pub word_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Interval,
    AppFocus,
    Context,
    Manual,
    Initial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub app: String,
    pub window_title: String,
    pub is_web: bool,
    pub url: Option<String>,
    pub preview: String,
    pub word_count: usize,
    pub element_count: usize,
    pub snapshot_type: SnapshotType,
}

/// A semantically grouped unit emitted into a batch (GLOSSARY: "AI event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub object_type: ObjectType,
    pub object_id: String,
    pub kind: AiEventKind,
    /// Sequence numbers of the raw events this AI event summarizes.
    pub raw_refs: Vec<Sequence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Repository,
    Email,
    Webpage,
    File,
    Terminal,
    Window,
    App,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant")]
pub enum AiEventKind {
    TextInput(TextInputEvent),
    Click(ClickTarget),
    PageView(PageViewEvent),
    Clipboard(ClipboardEvent),
    Snapshot(ContentSnapshot),
    Scroll { direction: ScrollDirection, count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchReason {
    Interval,
    SizeCap,
    SessionEnd,
    Force,
}

/// Summary of what the token optimizer did to a batch's AI events (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct OptimizationSummary {
    pub input_count: usize,
    pub output_count: usize,
    pub reduction_percent: f32,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// A time- or size-bounded cut of AI events plus their referenced raw events
/// (spec §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub reason: BatchReason,
    pub raw_events: Vec<RawEvent>,
    pub ai_events: Vec<AiEvent>,
    pub optimization_summary: OptimizationSummary,
}

impl Batch {
    /// Spec §8 invariant 2: every raw event referenced by an AI event exists
    /// in `raw_events`, and no raw event is referenced by two AI events.
    pub fn check_reference_invariant(&self) -> bool {
        let present: std::collections::HashSet<Sequence> =
            self.raw_events.iter().map(|e| e.sequence).collect();
        let mut seen = std::collections::HashSet::new();
        for ai in &self.ai_events {
            for seq in &ai.raw_refs {
                if !present.contains(seq) {
                    return false;
                }
                if !seen.insert(*seq) {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Interval,
    Break,
    SessionEnd,
    Pattern,
}

/// A 15-minute productivity artifact (spec §3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalSummary {
    pub interval_index: u32,
    pub session_id: Uuid,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub productivity_score: u8,
    pub summary_text: String,
    pub insights: Vec<String>,
    pub break_recommendation: Option<String>,
    pub app_usage: HashMap<String, u32>,
    pub embedding_vector: Option<Vec<f32>>,
    pub memory_type: MemoryType,
    pub ai_generated: bool,
}

/// `export_session(session_id)` response shape (spec §6): everything known
/// about a session, in memory or persisted, at the moment of export.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExportBundle {
    pub raw_events: Vec<RawEvent>,
    pub ai_events: Vec<AiEvent>,
    pub interval_summaries: Vec<IntervalSummary>,
    pub optimization_summaries: Vec<OptimizationSummary>,
}

/// Session lifecycle state machine (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition per spec §3's state
    /// machine (`idle -> starting -> running <-> paused -> stopping -> idle`,
    /// with error reachable from any non-idle state, and `error -> idle`
    /// only via explicit reset).
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Starting) => true,
            (Starting, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Stopping) => true,
            (Paused, Stopping) => true,
            (Stopping, Idle) => true,
            (_, Error) if self != Idle => true,
            (Error, Idle) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw(seq: Sequence) -> RawEvent {
        RawEvent {
            sequence: seq,
            timestamp: Utc::now(),
            layer: Layer::OsInput,
            payload: EventPayload::MouseMove {
                cursor: Point { x: 1.0, y: 1.0 },
            },
            context: EventContext::default(),
        }
    }

    #[test]
    fn batch_reference_invariant_holds_for_disjoint_refs() {
        let raws = vec![sample_raw(1), sample_raw(2), sample_raw(3)];
        let ai = vec![
            AiEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                object_type: ObjectType::Unknown,
                object_id: "a".into(),
                kind: AiEventKind::Scroll { direction: ScrollDirection::Down, count: 1 },
                raw_refs: vec![1, 2],
            },
            AiEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                object_type: ObjectType::Unknown,
                object_id: "b".into(),
                kind: AiEventKind::Scroll { direction: ScrollDirection::Down, count: 1 },
                raw_refs: vec![3],
            },
        ];
        let batch = Batch {
            batch_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            reason: BatchReason::Interval,
            raw_events: raws,
            ai_events: ai,
            optimization_summary: OptimizationSummary::default(),
        };
        assert!(batch.check_reference_invariant());
    }

    #[test]
    fn batch_reference_invariant_rejects_double_reference() {
        let raws = vec![sample_raw(1)];
        let ai = vec![
            AiEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                object_type: ObjectType::Unknown,
                object_id: "a".into(),
                kind: AiEventKind::Scroll { direction: ScrollDirection::Down, count: 1 },
                raw_refs: vec![1],
            },
            AiEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                object_type: ObjectType::Unknown,
                object_id: "b".into(),
                kind: AiEventKind::Scroll { direction: ScrollDirection::Down, count: 1 },
                raw_refs: vec![1],
            },
        ];
        let batch = Batch {
            batch_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            reason: BatchReason::Interval,
            raw_events: raws,
            ai_events: ai,
            optimization_summary: OptimizationSummary::default(),
        };
        assert!(!batch.check_reference_invariant());
    }

    #[test]
    fn session_state_machine_allows_pause_resume_cycle() {
        assert!(SessionState::Idle.can_transition_to(SessionState::Starting));
        assert!(SessionState::Starting.can_transition_to(SessionState::Running));
        assert!(SessionState::Running.can_transition_to(SessionState::Paused));
        assert!(SessionState::Paused.can_transition_to(SessionState::Running));
        assert!(SessionState::Running.can_transition_to(SessionState::Stopping));
        assert!(SessionState::Stopping.can_transition_to(SessionState::Idle));
    }

    #[test]
    fn session_state_machine_rejects_impossible_transition() {
        assert!(!SessionState::Idle.can_transition_to(SessionState::Running));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Paused));
    }

    #[test]
    fn session_state_machine_error_resets_only_via_idle() {
        assert!(SessionState::Running.can_transition_to(SessionState::Error));
        assert!(SessionState::Error.can_transition_to(SessionState::Idle));
        assert!(!SessionState::Error.can_transition_to(SessionState::Running));
    }

    #[test]
    fn dedup_key_differs_for_different_payloads() {
        let a = sample_raw(1);
        let mut b = sample_raw(2);
        b.payload = EventPayload::MouseMove { cursor: Point { x: 2.0, y: 2.0 } };
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
