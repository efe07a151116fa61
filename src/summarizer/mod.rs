//! C6: interval summarizer and memory. Fires on a fixed active-time
//! interval (default 15 minutes), assembles a prompt from the batches
//! accumulated since the last summary, calls the LLM/embedding contracts,
//! persists the result, and searches past summaries for relevant context.
//!
//! The interval timer's thread/stop-channel/`AtomicBool` shape is grounded
//! on the teacher's `scheduler/mod.rs` background-thread loop — generalized
//! from cron-expression due-script checks to a plain fixed-interval active-time
//! timer (this component does not use `croner`; spec's interval is driven by
//! *active* elapsed time, not wall-clock time — pausing freezes the elapsed
//! counter per spec §4.6, so no tick, and no summary, fires while paused).

pub mod embedding;
pub mod fallback;
pub mod llm;
pub mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SummarizerConfig;
use crate::error::{CoreError, Result};
use crate::model::{Batch, IntervalSummary, MemoryType};
use crate::persistence::PersistenceSink;
use embedding::EmbeddingClient;
use llm::{LlmClient, PromptContext, SimilarSummary};

/// Granularity at which the timer checks whether it is paused and
/// accumulates active time. Short enough that pausing near the end of an
/// interval doesn't lose much accrued progress.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Fires a tick on a background thread every `interval_secs` of *active*
/// (non-paused) time while running. Time spent paused does not count toward
/// the interval — the elapsed counter freezes rather than keeps ticking
/// (spec §4.6).
pub struct IntervalTimer {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
}

impl IntervalTimer {
    pub fn start(
        interval_secs: u64,
        is_paused: impl Fn() -> bool + Send + 'static,
        mut on_tick: impl FnMut() + Send + 'static,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);
        let (stop_tx, stop_rx) = channel::<()>();

        let handle = thread::Builder::new()
            .name("interval-summarizer".into())
            .spawn(move || {
                let interval = Duration::from_secs(interval_secs);
                let mut accrued = Duration::ZERO;
                while running_thread.load(Ordering::SeqCst) {
                    match stop_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if !running_thread.load(Ordering::SeqCst) {
                                break;
                            }
                            if is_paused() {
                                continue;
                            }
                            accrued += POLL_INTERVAL;
                            if accrued >= interval {
                                accrued = Duration::ZERO;
                                on_tick();
                            }
                        }
                    }
                }
                debug!("interval summarizer timer exiting");
            })
            .expect("failed to spawn interval-summarizer thread");

        Self {
            running,
            thread_handle: Some(handle),
            stop_tx: Some(stop_tx),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Orchestrates prompt assembly, the LLM/embedding contracts, persistence,
/// and memory search for one interval's worth of batches.
pub struct Summarizer {
    session_id: Uuid,
    user_id: String,
    daily_goal: Option<String>,
    llm: Option<Box<dyn LlmClient>>,
    embedding: Option<Box<dyn EmbeddingClient>>,
    persistence: Arc<dyn PersistenceSink>,
    config: SummarizerConfig,
    interval_index: u32,
    /// Memory search results from the *previous* interval's `persist_and_recall`
    /// call, fed into this interval's prompt (spec §4.6 step 2: recall
    /// happens after persistence, so it can only inform the next summary).
    recalled: Vec<SimilarSummary>,
}

impl Summarizer {
    pub fn new(
        session_id: Uuid,
        user_id: String,
        daily_goal: Option<String>,
        llm: Option<Box<dyn LlmClient>>,
        embedding: Option<Box<dyn EmbeddingClient>>,
        persistence: Arc<dyn PersistenceSink>,
        config: SummarizerConfig,
    ) -> Self {
        Self {
            session_id,
            user_id,
            daily_goal,
            llm,
            embedding,
            persistence,
            config,
            interval_index: 0,
            recalled: Vec::new(),
        }
    }

    /// Summarizes the batches accumulated over one interval. Falls back to
    /// [`fallback::local_summary`] when no LLM client is configured (spec
    /// §6: missing `LLM_API_KEY` disables only the LLM-backed path) or when
    /// the call itself fails (the client itself already retries once before
    /// returning an error — spec §7).
    pub fn summarize_interval(&mut self, batches: &[Batch], memory_type: MemoryType) -> IntervalSummary {
        let started_at = batches.first().map(|b| b.started_at).unwrap_or_else(Utc::now);
        let ended_at = batches.last().map(|b| b.ended_at).unwrap_or_else(Utc::now);
        let app_usage = fallback::tally_app_usage(batches);

        let historical_trend = self
            .persistence
            .analyze_trend(&self.user_id, self.config.trend_lookback_days)
            .unwrap_or_default();

        let (summary_text, insights, productivity_score, ai_generated) = match &mut self.llm {
            Some(client) => {
                let ctx = PromptContext {
                    session_id: self.session_id,
                    user_id: &self.user_id,
                    interval_index: self.interval_index + 1,
                    daily_goal: self.daily_goal.clone(),
                    similar_past_summaries: self.recalled.clone(),
                    historical_trend,
                };
                let prompt = llm::assemble_prompt(batches, &app_usage, ctx);
                match client.summarize(&prompt) {
                    Ok(response) => (response.summary_text, response.insights, response.productivity_score, true),
                    Err(e) => {
                        warn!(error = %e, "LLM summarization failed after retry, using local fallback");
                        let local = fallback::local_summary(batches, &app_usage);
                        (local.summary_text, local.insights, local.productivity_score, false)
                    }
                }
            }
            None => {
                let local = fallback::local_summary(batches, &app_usage);
                (local.summary_text, local.insights, local.productivity_score, false)
            }
        };

        let embedding_vector = self
            .embedding
            .as_mut()
            .and_then(|client| client.embed(&summary_text).ok());

        let break_recommendation = fallback::break_recommendation(productivity_score, batches);

        self.interval_index += 1;
        IntervalSummary {
            interval_index: self.interval_index,
            session_id: self.session_id,
            user_id: self.user_id.clone(),
            started_at,
            ended_at,
            productivity_score,
            summary_text,
            insights,
            break_recommendation,
            app_usage,
            embedding_vector,
            memory_type,
            ai_generated,
        }
    }

    /// Persists a summary and recalls the nearest prior summaries for this
    /// user (spec §4.6 memory search, §8 invariant 6: scoped to `user_id`).
    /// The recalled set is cached and fed into the *next* call to
    /// [`Self::summarize_interval`]'s prompt as `similar_past_summaries`.
    pub fn persist_and_recall(&mut self, summary: &IntervalSummary) -> Result<Vec<IntervalSummary>> {
        self.persistence
            .insert_summary(summary)
            .map_err(|e| CoreError::PersistenceTransient(e.to_string()))?;

        let Some(query_vec) = &summary.embedding_vector else {
            self.recalled.clear();
            return Ok(Vec::new());
        };

        let matches = self
            .persistence
            .similarity_search(query_vec, &self.user_id, self.config.similarity_threshold, self.config.memory_search_top_k)
            .map_err(|e| CoreError::PersistenceTransient(e.to_string()))?;

        self.recalled = matches
            .iter()
            .filter_map(|m| {
                m.embedding_vector.as_ref().map(|v| SimilarSummary {
                    summary_text: m.summary_text.clone(),
                    productivity_score: m.productivity_score,
                    similarity: memory::cosine_similarity(query_vec, v),
                    created_at: m.started_at,
                })
            })
            .collect();

        Ok(matches)
    }
}
