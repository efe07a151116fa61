//! LLM summarization contract (spec §6). The teacher has no LLM client of
//! its own; this is grounded on the *contract shape* spec.md defines,
//! transported with `ureq` — the HTTP client the teacher already uses for
//! its own AI-provider calls.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::memory::{Trend, TrendDirection};
use crate::model::AiEvent;

/// One retry delay after a failed LLM call, before falling back to local
/// synthesis (spec §6/§7).
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// The full §6 request contract: everything the LLM needs to summarize one
/// interval, including recall context from past intervals.
#[derive(Debug, Serialize)]
pub struct SummarizePrompt {
    pub session_id: Uuid,
    pub user_id: String,
    pub interval_index: u32,
    pub duration_minutes: f64,
    pub daily_goal: Option<String>,
    pub events: Vec<AiEvent>,
    pub app_time_estimate: HashMap<String, u32>,
    pub similar_past_summaries: Vec<SimilarSummary>,
    pub historical_trend: Option<HistoricalTrend>,
}

/// One past summary surfaced by memory search, trimmed to what the prompt
/// needs rather than the full persisted row (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct SimilarSummary {
    pub summary_text: String,
    pub productivity_score: u8,
    pub similarity: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirectionWire {
    Increasing,
    Decreasing,
    Stable,
}

impl From<TrendDirection> for TrendDirectionWire {
    fn from(d: TrendDirection) -> Self {
        match d {
            TrendDirection::Rising => TrendDirectionWire::Increasing,
            TrendDirection::Falling => TrendDirectionWire::Decreasing,
            TrendDirection::Flat => TrendDirectionWire::Stable,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoricalTrend {
    pub direction: TrendDirectionWire,
    pub magnitude: f32,
}

impl From<Trend> for HistoricalTrend {
    fn from(t: Trend) -> Self {
        Self {
            direction: t.direction.into(),
            magnitude: t.average_score,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeResponse {
    pub summary_text: String,
    #[serde(default)]
    pub insights: Vec<String>,
    pub productivity_score: u8,
}

pub trait LlmClient: Send {
    fn summarize(&mut self, prompt: &SummarizePrompt) -> anyhow::Result<SummarizeResponse>;
}

/// Parameters threaded into one prompt that aren't derivable from the
/// batches alone (spec §6).
pub struct PromptContext<'a> {
    pub session_id: Uuid,
    pub user_id: &'a str,
    pub interval_index: u32,
    pub daily_goal: Option<String>,
    pub similar_past_summaries: Vec<SimilarSummary>,
    pub historical_trend: Option<Trend>,
}

/// Assembles the full §6 request contract from a set of batches plus the
/// session/memory context gathered by the summarizer.
pub fn assemble_prompt(
    batches: &[crate::model::Batch],
    app_usage: &HashMap<String, u32>,
    ctx: PromptContext<'_>,
) -> SummarizePrompt {
    let started_at = batches.first().map(|b| b.started_at);
    let ended_at = batches.last().map(|b| b.ended_at);
    let duration_minutes = match (started_at, ended_at) {
        (Some(s), Some(e)) => (e - s).num_milliseconds() as f64 / 60_000.0,
        _ => 0.0,
    };

    SummarizePrompt {
        session_id: ctx.session_id,
        user_id: ctx.user_id.to_string(),
        interval_index: ctx.interval_index,
        duration_minutes,
        daily_goal: ctx.daily_goal,
        events: batches.iter().flat_map(|b| b.ai_events.iter().cloned()).collect(),
        app_time_estimate: app_usage.clone(),
        similar_past_summaries: ctx.similar_past_summaries,
        historical_trend: ctx.historical_trend.map(Into::into),
    }
}

/// Default HTTP-backed client calling an external LLM endpoint with the
/// `LLM_API_KEY` bearer token (spec §6). Retries once after
/// [`RETRY_DELAY`] on failure before giving up, per spec §7 — the caller
/// falls back to local synthesis only once both attempts have failed.
pub struct UreqLlmClient {
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl UreqLlmClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            endpoint,
            api_key,
            timeout: Duration::from_secs(20),
        }
    }

    fn send(&self, prompt: &SummarizePrompt) -> anyhow::Result<SummarizeResponse> {
        let mut response = ureq::post(&self.endpoint)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .config()
            .timeout_global(Some(self.timeout))
            .build()
            .send_json(prompt)
            .map_err(|e| anyhow::anyhow!("LLM request failed: {e}"))?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| anyhow::anyhow!("LLM response decode failed: {e}"))
    }
}

impl LlmClient for UreqLlmClient {
    fn summarize(&mut self, prompt: &SummarizePrompt) -> anyhow::Result<SummarizeResponse> {
        match self.send(prompt) {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!(error = %e, "LLM request failed, retrying once after delay");
                thread::sleep(RETRY_DELAY);
                self.send(prompt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchReason, OptimizationSummary};
    use uuid::Uuid;

    fn sample_batch() -> crate::model::Batch {
        let now = chrono::Utc::now();
        crate::model::Batch {
            batch_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            started_at: now,
            ended_at: now,
            reason: BatchReason::Interval,
            raw_events: vec![],
            ai_events: vec![],
            optimization_summary: OptimizationSummary::default(),
        }
    }

    fn sample_ctx(session_id: Uuid) -> PromptContext<'static> {
        PromptContext {
            session_id,
            user_id: "u",
            interval_index: 3,
            daily_goal: Some("ship the feature".to_string()),
            similar_past_summaries: vec![SimilarSummary {
                summary_text: "prior focused work".into(),
                productivity_score: 70,
                similarity: 0.9,
                created_at: chrono::Utc::now(),
            }],
            historical_trend: Some(Trend { average_score: 65.0, direction: TrendDirection::Rising }),
        }
    }

    #[test]
    fn assemble_prompt_carries_full_request_contract() {
        let session_id = Uuid::new_v4();
        let batches = vec![sample_batch(), sample_batch()];
        let usage = HashMap::from([("Terminal".to_string(), 10)]);
        let prompt = assemble_prompt(&batches, &usage, sample_ctx(session_id));

        assert_eq!(prompt.session_id, session_id);
        assert_eq!(prompt.user_id, "u");
        assert_eq!(prompt.interval_index, 3);
        assert_eq!(prompt.daily_goal.as_deref(), Some("ship the feature"));
        assert_eq!(prompt.app_time_estimate.get("Terminal"), Some(&10));
        assert_eq!(prompt.similar_past_summaries.len(), 1);
        assert!(prompt.historical_trend.is_some());
    }

    #[test]
    fn assemble_prompt_handles_no_recall_context() {
        let batches = vec![sample_batch()];
        let usage = HashMap::new();
        let ctx = PromptContext {
            session_id: Uuid::new_v4(),
            user_id: "u",
            interval_index: 0,
            daily_goal: None,
            similar_past_summaries: vec![],
            historical_trend: None,
        };
        let prompt = assemble_prompt(&batches, &usage, ctx);
        assert!(prompt.similar_past_summaries.is_empty());
        assert!(prompt.historical_trend.is_none());
    }
}
