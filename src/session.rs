//! Session orchestrator: wires C1 capture sources into C2 (coalescer), C3
//! (enricher), C4 (buffer/batcher), C5 (optimizer), and C6 (summarizer), and
//! drives the [`SessionState`] machine (spec §3, §5).
//!
//! The pipeline thread's shape — `AtomicBool` running flag, a stop channel,
//! `recv_timeout` loop — is grounded on the teacher's `scheduler/mod.rs`
//! background thread, generalized from polling due cron scripts to draining
//! a `crossbeam_channel::Receiver<RawEvent>` and periodically checking batch
//! cut conditions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::RawEventBuffer;
use crate::capture::accessibility::{self, ElementInspector};
use crate::capture::browser::BrowserSource;
use crate::capture::clipboard::ClipboardSource;
use crate::capture::os_input::OsInputSource;
use crate::capture::{app_focus::AppFocusSource, CaptureHandle, SequenceCounter};
use crate::coalescer::KeystrokeCoalescer;
use crate::config::{Config, EnvSecrets};
use crate::enricher;
use crate::error::{CoreError, Result};
use crate::model::{
    AiEvent, AiEventKind, Batch, BatchReason, ClickTarget, ClipboardEvent, ContentSnapshot,
    EventContext, EventPayload, MemoryType, ObjectType, PageViewEvent, Point, RawEvent,
    SessionState, Sequence,
};
use crate::persistence::{PersistenceSink, RawEventLog};
use crate::summarizer::embedding::{EmbeddingClient, UreqEmbeddingClient};
use crate::summarizer::llm::{LlmClient, UreqLlmClient};
use crate::summarizer::{IntervalTimer, Summarizer};

/// Point-in-time operational counters surfaced by `get_status()` (spec §6).
#[derive(Debug, Default)]
pub struct SessionCounts {
    pub raw_events: AtomicU64,
    pub ai_events: AtomicU64,
    pub batches: AtomicU64,
    pub summaries: AtomicU64,
}

/// A `mouse_down` awaiting its flush-time pairing (spec §4.4): either a
/// `mouse_up` within 500 ms (native click confirmed as-is) or, when it
/// landed inside a browser window, a `dom_click` within the 5-second window
/// (the browser's enriched click replaces the native guess entirely).
struct PendingMouseDown {
    seq: Sequence,
    at: DateTime<Utc>,
    is_browser: bool,
    click: Option<ClickTarget>,
}

struct SharedState {
    session_id: Uuid,
    buffer: Mutex<RawEventBuffer>,
    coalescer: Mutex<KeystrokeCoalescer>,
    pending_text_refs: Mutex<Vec<Sequence>>,
    last_context: Arc<Mutex<EventContext>>,
    completed_batches: Mutex<Vec<Batch>>,
    pending_summaries: Mutex<Vec<crate::model::IntervalSummary>>,
    inspector: Box<dyn ElementInspector>,
    enrichment_timeout: Duration,
    optimizer_config: crate::config::OptimizerConfig,
    click_pairing_window_ms: i64,
    pending_mouse_down: Mutex<Option<PendingMouseDown>>,
    batch_interval_secs: u64,
    max_pending_summaries: usize,
    counts: SessionCounts,
    last_batch_at: Mutex<Option<DateTime<Utc>>>,
    last_summary_at: Mutex<Option<DateTime<Utc>>>,
    paused: AtomicBool,
    raw_event_log: Option<Mutex<RawEventLog>>,
}

impl SharedState {
    fn current_context(&self) -> EventContext {
        self.last_context.lock().unwrap().clone()
    }

    /// Appends to the on-disk append-only raw-event log (spec §6), ahead of
    /// any in-memory deduplication, so the disk log is the literal emission
    /// order from the capture sources.
    fn log_raw(&self, event: &RawEvent) {
        if let Some(log) = &self.raw_event_log {
            if let Err(e) = log.lock().unwrap().append(event) {
                warn!(error = %e, "failed to append raw event to disk log");
            }
        }
    }

    /// Cuts the current batch, runs the optimizer over its AI events, and
    /// stashes it for the next summarization tick.
    fn cut_and_store_batch(&self, reason: BatchReason) {
        let mut batch = self.buffer.lock().unwrap().cut_batch(reason);
        if batch.ai_events.is_empty() && batch.raw_events.is_empty() {
            return;
        }
        let (optimized, summary) = crate::optimizer::optimize(
            std::mem::take(&mut batch.ai_events),
            &self.optimizer_config,
        );
        batch.ai_events = optimized;
        batch.optimization_summary = summary;
        debug_assert!(batch.check_reference_invariant());

        self.counts.batches.fetch_add(1, Ordering::Relaxed);
        *self.last_batch_at.lock().unwrap() = Some(batch.ended_at);
        self.completed_batches.lock().unwrap().push(batch);
    }
}

/// Assigns a coarse object type/id from a page URL or clipboard content,
/// used for AI-event grouping (spec §3: every AI event carries an
/// `object_type`/`object_id`).
fn infer_object(context: &EventContext) -> (ObjectType, String) {
    match &context.active_url {
        Some(url) => (ObjectType::Webpage, url.clone()),
        None if !context.active_app.is_empty() => (ObjectType::App, context.active_app.clone()),
        None => (ObjectType::Unknown, "unknown".to_string()),
    }
}

/// Handle to the long-running pipeline thread that drains raw events off the
/// capture channel into the buffer/coalescer/enricher stack.
struct PipelineThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PipelineThread {
    fn spawn(raw_rx: Receiver<RawEvent>, shared: Arc<SharedState>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("flowmeter-pipeline".into())
            .spawn(move || {
                while running_thread.load(Ordering::SeqCst) {
                    match raw_rx.recv_timeout(Duration::from_millis(250)) {
                        Ok(event) => process_event(&shared, event),
                        Err(RecvTimeoutError::Timeout) => {
                            flush_idle_text_run(&shared);
                            flush_stale_pending_click(&shared);
                            if shared
                                .buffer
                                .lock()
                                .unwrap()
                                .should_cut_for_interval(shared.batch_interval_secs, Utc::now())
                            {
                                shared.cut_and_store_batch(BatchReason::Interval);
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("pipeline thread exiting");
            })
            .expect("failed to spawn flowmeter-pipeline thread");

        Self {
            running,
            handle: Some(handle),
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn flush_idle_text_run(shared: &SharedState) {
    let flushed = shared.coalescer.lock().unwrap().poll_idle(Utc::now());
    if let Some(text_input) = flushed {
        emit_text_input(shared, text_input);
    }
}

/// Takes the current pending `mouse_down` (if any) and emits it as a
/// standalone click when it carried one (the native path); a browser-chrome
/// pending with no click built is simply dropped (spec §4.4, §4.3: native
/// inspection of browser chrome never describes the clicked web element).
fn take_and_emit_pending_click(shared: &Arc<SharedState>) {
    let pending = shared.pending_mouse_down.lock().unwrap().take();
    if let Some(pending) = pending {
        if let Some(click) = pending.click {
            push_click_event_with_refs(shared, vec![pending.seq], click);
        }
    }
}

/// Flushes a pending `mouse_down` once its flush-time pairing window has
/// elapsed without a match: 500 ms for a native click awaiting `mouse_up`,
/// the full `click_pairing_window_ms` for a browser-chrome click awaiting a
/// `dom_click` (spec §4.4).
fn flush_stale_pending_click(shared: &Arc<SharedState>) {
    let now = Utc::now();
    let expired = match &*shared.pending_mouse_down.lock().unwrap() {
        Some(p) if p.is_browser => now - p.at > ChronoDuration::milliseconds(shared.click_pairing_window_ms),
        Some(p) => now - p.at > ChronoDuration::milliseconds(500),
        None => false,
    };
    if expired {
        take_and_emit_pending_click(shared);
    }
}

fn emit_text_input(shared: &SharedState, text_input: crate::model::TextInputEvent) {
    let raw_refs = std::mem::take(&mut *shared.pending_text_refs.lock().unwrap());
    let context = EventContext {
        active_app: text_input.app.clone(),
        active_window: text_input.window_title.clone(),
        active_url: None,
    };
    let (object_type, object_id) = infer_object(&context);
    let ai_event = AiEvent {
        id: Uuid::new_v4(),
        timestamp: text_input.end_ts,
        object_type,
        object_id,
        kind: AiEventKind::TextInput(text_input),
        raw_refs,
    };
    shared.counts.ai_events.fetch_add(1, Ordering::Relaxed);
    shared.buffer.lock().unwrap().push_ai_event(ai_event);
}

fn process_event(shared: &Arc<SharedState>, event: RawEvent) {
    shared.counts.raw_events.fetch_add(1, Ordering::Relaxed);
    shared.log_raw(&event);
    let seq = event.sequence;
    let context = event.context.clone();

    if let EventPayload::AppFocus { .. } | EventPayload::UrlChange { .. } = &event.payload {
        *shared.last_context.lock().unwrap() = context.clone();
    }

    let accepted = shared.buffer.lock().unwrap().push_raw(event.clone());
    if !accepted {
        return;
    }

    if shared.paused.load(Ordering::SeqCst) {
        return;
    }

    match event.payload {
        EventPayload::KeyDown { ref character, key_code, .. } => {
            handle_key_down(shared, seq, &context, key_code, character.clone());
        }
        EventPayload::MouseDown { cursor, .. } => {
            handle_mouse_down(shared, seq, &context, cursor);
        }
        EventPayload::MouseUp { .. } => {
            handle_mouse_up(shared, seq);
        }
        EventPayload::DomClick { click } => {
            handle_dom_click(shared, seq, click);
        }
        EventPayload::ClipboardChange {
            content,
            content_type,
            content_length,
            truncated,
            contains_url,
            contains_email,
            word_count,
        } => {
            let object_id = content.chars().take(64).collect::<String>();
            let ai_event = AiEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                object_type: if contains_url { ObjectType::Webpage } else { ObjectType::Unknown },
                object_id,
                kind: AiEventKind::Clipboard(ClipboardEvent {
                    content,
                    content_type,
                    content_length,
                    truncated,
                    contains_url,
                    contains_email,
                    word_count,
                }),
                raw_refs: vec![seq],
            };
            shared.counts.ai_events.fetch_add(1, Ordering::Relaxed);
            shared.buffer.lock().unwrap().push_ai_event(ai_event);
        }
        EventPayload::UrlChange { url, title, tab_index, window_index, tab_count, change_type } => {
            shared.buffer.lock().unwrap().cache_object_inference(url.clone(), (ObjectType::Webpage, url.clone()));
            let ai_event = AiEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                object_type: ObjectType::Webpage,
                object_id: url.clone(),
                kind: AiEventKind::PageView(PageViewEvent { url, title, tab_index, window_index, tab_count, change_type }),
                raw_refs: vec![seq],
            };
            shared.counts.ai_events.fetch_add(1, Ordering::Relaxed);
            shared.buffer.lock().unwrap().push_ai_event(ai_event);
        }
        EventPayload::Scroll { direction, .. } => {
            let (object_type, object_id) = infer_object(&context);
            let ai_event = AiEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                object_type,
                object_id,
                kind: AiEventKind::Scroll { direction, count: 1 },
                raw_refs: vec![seq],
            };
            shared.counts.ai_events.fetch_add(1, Ordering::Relaxed);
            shared.buffer.lock().unwrap().push_ai_event(ai_event);
        }
        EventPayload::ContentSnapshot { snapshot } => {
            push_snapshot_event(shared, seq, &context, snapshot);
        }
        EventPayload::SourceDisabled { layer, reason } => {
            warn!(?layer, reason, "capture source disabled itself");
        }
        _ => {}
    }

    if shared.buffer.lock().unwrap().should_cut_for_size() {
        shared.cut_and_store_batch(BatchReason::SizeCap);
    }
}

fn handle_key_down(
    shared: &Arc<SharedState>,
    seq: Sequence,
    context: &EventContext,
    key_code: u16,
    character: Option<String>,
) {
    const BACKSPACE_KEY_CODE: u16 = 51;

    shared.pending_text_refs.lock().unwrap().push(seq);

    let flushed = if key_code == BACKSPACE_KEY_CODE {
        shared.coalescer.lock().unwrap().push_backspace();
        None
    } else if let Some(text) = character {
        let mut flushed = None;
        for ch in text.chars() {
            if let Some(event) = shared.coalescer.lock().unwrap().push_char(ch, context, Utc::now()) {
                flushed = Some(event);
            }
        }
        flushed
    } else {
        None
    };

    if let Some(text_input) = flushed {
        emit_text_input(shared, text_input);
    }
}

/// Records a `mouse_down` as pending its flush-time pairing (spec §4.4)
/// instead of emitting its click immediately. A browser-chrome mouse_down
/// (active URL set) needs DOM-level data only a `dom_click` from the
/// browser bridge can supply, so no native enrichment is attempted for it —
/// it waits, carrying no click of its own, for a matching `dom_click`.
fn handle_mouse_down(shared: &Arc<SharedState>, seq: Sequence, context: &EventContext, cursor: Point) {
    let is_browser = context.active_url.is_some();
    let click = if is_browser {
        None
    } else {
        let native = enricher::enrich_native_click(shared.inspector.as_ref(), cursor, shared.enrichment_timeout);
        enricher::assemble_click_target(cursor, context, native, None)
    };

    // Any earlier pending mouse_down never got paired in time; flush it
    // before tracking the new one.
    take_and_emit_pending_click(shared);
    *shared.pending_mouse_down.lock().unwrap() = Some(PendingMouseDown {
        seq,
        at: Utc::now(),
        is_browser,
        click,
    });
}

/// Pairs a `mouse_up` with a pending native `mouse_down` within 500 ms into
/// one click AI event referencing both raw events (spec §4.4). A pending
/// browser-chrome mouse_down is left in place — its pairing is with a
/// `dom_click`, not this `mouse_up`.
fn handle_mouse_up(shared: &Arc<SharedState>, seq: Sequence) {
    let mut guard = shared.pending_mouse_down.lock().unwrap();
    if matches!(&*guard, Some(p) if p.is_browser) {
        return;
    }
    let Some(pending) = guard.take() else {
        return;
    };
    drop(guard);

    if Utc::now() - pending.at <= ChronoDuration::milliseconds(500) {
        if let Some(click) = pending.click {
            push_click_event_with_refs(shared, vec![pending.seq, seq], click);
        }
    } else if let Some(click) = pending.click {
        push_click_event_with_refs(shared, vec![pending.seq], click);
    }
}

/// Pairs an OS `mouse_down` inside a browser window with the `dom_click`
/// that follows it into one enriched click (spec §4.4). Absent a matching
/// pending mouse_down, the `dom_click` still stands on its own.
fn handle_dom_click(shared: &Arc<SharedState>, seq: Sequence, click: ClickTarget) {
    let merged_down_seq = {
        let mut guard = shared.pending_mouse_down.lock().unwrap();
        let matches_pending = matches!(
            &*guard,
            Some(p) if p.is_browser && Utc::now() - p.at <= ChronoDuration::milliseconds(shared.click_pairing_window_ms)
        );
        if matches_pending {
            guard.take().map(|p| p.seq)
        } else {
            None
        }
    };

    match merged_down_seq {
        Some(down_seq) => push_click_event_with_refs(shared, vec![down_seq, seq], click),
        None => push_click_event_with_refs(shared, vec![seq], click),
    }
}

fn push_click_event_with_refs(shared: &Arc<SharedState>, raw_refs: Vec<Sequence>, click: ClickTarget) {
    let (object_type, object_id) = (ObjectType::App, click.app.clone());
    let ai_event = AiEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        object_type,
        object_id,
        kind: AiEventKind::Click(click),
        raw_refs,
    };
    shared.counts.ai_events.fetch_add(1, Ordering::Relaxed);
    shared.buffer.lock().unwrap().push_ai_event(ai_event);
}

fn push_snapshot_event(shared: &Arc<SharedState>, seq: Sequence, context: &EventContext, snapshot: ContentSnapshot) {
    let (object_type, object_id) = infer_object(context);
    let ai_event = AiEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        object_type,
        object_id,
        kind: AiEventKind::Snapshot(snapshot),
        raw_refs: vec![seq],
    };
    shared.counts.ai_events.fetch_add(1, Ordering::Relaxed);
    shared.buffer.lock().unwrap().push_ai_event(ai_event);
}

/// Top-level orchestrator for one tracked session's lifetime. Not `Clone`;
/// owned by [`crate::control::SessionController`].
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub daily_goal: Option<String>,
    pub started_at: DateTime<Utc>,
    state: SessionState,
    sources: Vec<CaptureHandle>,
    pipeline: PipelineThread,
    summary_timer: IntervalTimer,
    shared: Arc<SharedState>,
    summarizer: Arc<Mutex<Summarizer>>,
    persistence: Arc<dyn PersistenceSink>,
}

impl Session {
    /// `start_session(user_id, daily_goal?, session_id?)` (spec §6). Fails if
    /// required permissions are absent.
    pub fn start(
        user_id: String,
        daily_goal: Option<String>,
        session_id: Option<Uuid>,
        config: Config,
        secrets: EnvSecrets,
        persistence: Arc<dyn PersistenceSink>,
    ) -> Result<Self> {
        // Accessibility/input-monitoring denial does not block startup (spec:
        // native click events still produced at reduced confidence, one
        // `source_disabled` emitted); only a hard OS input capture failure
        // below is treated as unavailable rather than fatal.
        let session_id = session_id.unwrap_or_else(Uuid::new_v4);
        let started_at = Utc::now();
        let sequence = SequenceCounter::new();
        let (tx, rx) = unbounded::<RawEvent>();

        let last_context: Arc<Mutex<EventContext>> = Arc::new(Mutex::new(EventContext::default()));
        let ctx_for_os = Arc::clone(&last_context);
        let os_context_provider: crate::capture::os_input::ContextProvider =
            Arc::new(move || ctx_for_os.lock().unwrap().clone());
        let ctx_for_clipboard = Arc::clone(&last_context);

        let mut sources = Vec::new();

        match OsInputSource::start(
            tx.clone(),
            sequence.clone(),
            os_context_provider,
            config.capture.mouse_move_throttle_ms,
        ) {
            Ok(source) => sources.push(CaptureHandle::OsInput(source)),
            Err(e) => {
                warn!(error = ?e, "os_input capture unavailable, starting without it");
            }
        }

        sources.push(CaptureHandle::AppFocus(AppFocusSource::start(
            tx.clone(),
            sequence.clone(),
            config.capture.app_focus_poll_ms,
        )));
        sources.push(CaptureHandle::Clipboard(ClipboardSource::start(
            tx.clone(),
            sequence.clone(),
            config.capture.clipboard_poll_ms,
            move || ctx_for_clipboard.lock().unwrap().clone(),
        )));
        if BrowserSource::is_supported() {
            sources.push(CaptureHandle::Browser(BrowserSource::start(
                tx,
                sequence,
                config.capture.browser_poll_ms,
            )));
        }

        let buffer = RawEventBuffer::new(session_id, config.buffer.max_events_in_memory, config.buffer.batch_max_raw_events);
        let coalescer = KeystrokeCoalescer::new(config.coalescer.idle_flush_ms, config.coalescer.max_chars);

        let raw_event_log = match dirs::data_dir() {
            Some(dir) => match RawEventLog::open(dir.join("flowmeter-core").join("raw-events"), config.raw_event_retention_days) {
                Ok(log) => Some(Mutex::new(log)),
                Err(e) => {
                    warn!(error = %e, "failed to open raw event log, continuing without on-disk logging");
                    None
                }
            },
            None => None,
        };

        let shared = Arc::new(SharedState {
            session_id,
            buffer: Mutex::new(buffer),
            coalescer: Mutex::new(coalescer),
            pending_text_refs: Mutex::new(Vec::new()),
            last_context,
            completed_batches: Mutex::new(Vec::new()),
            pending_summaries: Mutex::new(Vec::new()),
            inspector: accessibility::default_inspector(),
            enrichment_timeout: Duration::from_millis(config.enrichment_timeout_ms),
            optimizer_config: config.optimizer.clone(),
            click_pairing_window_ms: config.click_pairing_window_ms as i64,
            pending_mouse_down: Mutex::new(None),
            batch_interval_secs: config.buffer.batch_interval_secs,
            max_pending_summaries: config.summarizer.max_pending_summaries,
            counts: SessionCounts::default(),
            last_batch_at: Mutex::new(None),
            last_summary_at: Mutex::new(None),
            paused: AtomicBool::new(false),
            raw_event_log,
        });

        let pipeline = PipelineThread::spawn(rx, Arc::clone(&shared));

        let llm: Option<Box<dyn LlmClient>> = secrets
            .llm_api_key
            .clone()
            .map(|key| Box::new(UreqLlmClient::new(config.summarizer.llm_endpoint.clone(), key)) as Box<dyn LlmClient>);
        let embedding: Option<Box<dyn EmbeddingClient>> = secrets
            .embedding_api_key
            .clone()
            .map(|key| Box::new(UreqEmbeddingClient::new(config.summarizer.embedding_endpoint.clone(), key)) as Box<dyn EmbeddingClient>);
        if llm.is_none() {
            info!("LLM_API_KEY not set; interval summaries will use the local fallback synthesizer");
        }

        let summarizer = Arc::new(Mutex::new(Summarizer::new(
            session_id,
            user_id.clone(),
            daily_goal.clone(),
            llm,
            embedding,
            Arc::clone(&persistence),
            config.summarizer.clone(),
        )));

        let summarizer_for_timer = Arc::clone(&summarizer);
        let shared_for_timer = Arc::clone(&shared);
        let shared_for_pause_check = Arc::clone(&shared);
        let summary_timer = IntervalTimer::start(
            config.summarizer.interval_secs,
            move || shared_for_pause_check.paused.load(Ordering::SeqCst),
            move || {
                run_summarization_tick(&shared_for_timer, &summarizer_for_timer);
            },
        );

        info!(%session_id, %user_id, "session started");

        Ok(Self {
            session_id,
            user_id,
            daily_goal,
            started_at,
            state: SessionState::Running,
            sources,
            pipeline,
            summary_timer,
            shared,
            summarizer,
            persistence,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::Fatal(format!("illegal session transition {:?} -> {:?}", self.state, next)));
        }
        self.state = next;
        Ok(())
    }

    /// `pause_session(reason)` (spec §6) — idempotent.
    pub fn pause(&mut self, reason: &str) -> Result<()> {
        if self.state == SessionState::Paused {
            return Ok(());
        }
        self.transition(SessionState::Paused)?;
        self.shared.paused.store(true, Ordering::SeqCst);
        info!(%self.session_id, reason, "session paused");
        Ok(())
    }

    /// `resume_session()` (spec §6).
    pub fn resume(&mut self) -> Result<()> {
        if self.state == SessionState::Running {
            return Ok(());
        }
        self.transition(SessionState::Running)?;
        self.shared.paused.store(false, Ordering::SeqCst);
        info!(%self.session_id, "session resumed");
        Ok(())
    }

    /// `stop_session()` (spec §6): cuts a final forced batch, runs a final
    /// summarization pass, and tears down all sources and threads.
    pub fn stop(mut self) -> Result<(Uuid, DateTime<Utc>, Option<crate::model::IntervalSummary>)> {
        self.transition(SessionState::Stopping)?;

        for source in &mut self.sources {
            source.stop();
        }
        self.pipeline.stop();
        self.summary_timer.stop();

        take_and_emit_pending_click(&self.shared);
        self.shared.cut_and_store_batch(BatchReason::SessionEnd);
        let final_summary = {
            let mut pending = self.shared.completed_batches.lock().unwrap();
            if pending.is_empty() {
                None
            } else {
                let batches = std::mem::take(&mut *pending);
                let mut summarizer = self.summarizer.lock().unwrap();
                let summary = summarizer.summarize_interval(&batches, MemoryType::SessionEnd);
                if let Err(e) = summarizer.persist_and_recall(&summary) {
                    warn!(error = %e, "failed to persist final session summary");
                }
                Some(summary)
            }
        };

        if let Some(log) = &self.shared.raw_event_log {
            log.lock().unwrap().stop();
        }

        let ended_at = Utc::now();
        info!(%self.session_id, "session stopped");
        Ok((self.session_id, ended_at, final_summary))
    }

    /// `get_status()` (spec §6).
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            raw_event_count: self.shared.counts.raw_events.load(Ordering::Relaxed),
            ai_event_count: self.shared.counts.ai_events.load(Ordering::Relaxed),
            batch_count: self.shared.counts.batches.load(Ordering::Relaxed),
            summary_count: self.shared.counts.summaries.load(Ordering::Relaxed),
            last_batch_at: *self.shared.last_batch_at.lock().unwrap(),
            last_summary_at: *self.shared.last_summary_at.lock().unwrap(),
        }
    }

    /// `export_session(session_id)` (spec §6): folds the in-flight batch,
    /// any completed-but-not-yet-summarized batches, and this session's
    /// persisted interval summaries into one bundle. Raw/AI events already
    /// folded into a persisted summary are not re-materialized — they were
    /// dropped from memory once their batch summarized successfully.
    pub fn export(&self) -> Result<crate::model::ExportBundle> {
        let (mut raw_events, mut ai_events) = self.shared.buffer.lock().unwrap().snapshot();
        let mut optimization_summaries = Vec::new();
        for batch in self.shared.completed_batches.lock().unwrap().iter() {
            raw_events.extend(batch.raw_events.iter().cloned());
            ai_events.extend(batch.ai_events.iter().cloned());
            optimization_summaries.push(batch.optimization_summary);
        }

        let mut interval_summaries = self
            .persistence
            .find_by_session(self.session_id)
            .map_err(|e| CoreError::PersistenceTransient(e.to_string()))?;
        interval_summaries.extend(self.shared.pending_summaries.lock().unwrap().iter().cloned());

        Ok(crate::model::ExportBundle {
            raw_events,
            ai_events,
            interval_summaries,
            optimization_summaries,
        })
    }
}

fn run_summarization_tick(shared: &Arc<SharedState>, summarizer: &Arc<Mutex<Summarizer>>) {
    if shared.paused.load(Ordering::SeqCst) {
        return;
    }
    shared.cut_and_store_batch(BatchReason::Interval);
    let batches = {
        let mut pending = shared.completed_batches.lock().unwrap();
        if pending.is_empty() {
            return;
        }
        std::mem::take(&mut *pending)
    };

    let mut summarizer = summarizer.lock().unwrap();
    let summary = summarizer.summarize_interval(&batches, MemoryType::Interval);
    match summarizer.persist_and_recall(&summary) {
        Ok(_similar) => {
            shared.counts.summaries.fetch_add(1, Ordering::Relaxed);
            *shared.last_summary_at.lock().unwrap() = Some(Utc::now());
        }
        Err(e) => {
            warn!(error = %e, "persisting interval summary failed, buffering in memory");
            let mut pending_summaries = shared.pending_summaries.lock().unwrap();
            pending_summaries.push(summary);
            while pending_summaries.len() > shared.max_pending_summaries {
                pending_summaries.remove(0);
            }
        }
    }
}

/// `get_status()` response shape (spec §6).
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub raw_event_count: u64,
    pub ai_event_count: u64,
    pub batch_count: u64,
    pub summary_count: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub last_summary_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_object_prefers_url_then_app() {
        let with_url = EventContext { active_app: "Safari".into(), active_window: "w".into(), active_url: Some("https://x.test".into()) };
        assert_eq!(infer_object(&with_url).0, ObjectType::Webpage);

        let app_only = EventContext { active_app: "Code".into(), active_window: "w".into(), active_url: None };
        assert_eq!(infer_object(&app_only).0, ObjectType::App);

        let neither = EventContext::default();
        assert_eq!(infer_object(&neither).0, ObjectType::Unknown);
    }
}
