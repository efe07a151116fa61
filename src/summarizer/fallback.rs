//! Local, non-LLM summary generation used when `LLM_API_KEY` is absent or
//! an LLM call fails (spec §6, §7: `LlmFailure` degrades to a local summary
//! rather than losing the interval).

use std::collections::HashMap;

use crate::enricher::{categorize_app, AppCategory};
use crate::model::{AiEventKind, Batch};

pub struct LocalSummary {
    pub summary_text: String,
    pub insights: Vec<String>,
    pub productivity_score: u8,
}

/// Counts raw-event active time per app across a set of batches, keyed by
/// `active_app` from each raw event's context.
pub fn tally_app_usage(batches: &[Batch]) -> HashMap<String, u32> {
    let mut usage: HashMap<String, u32> = HashMap::new();
    for batch in batches {
        for event in &batch.raw_events {
            if event.context.active_app.is_empty() {
                continue;
            }
            *usage.entry(event.context.active_app.clone()).or_insert(0) += 1;
        }
    }
    usage
}

/// Generates a deterministic summary from batch statistics alone: app usage
/// counts, AI event kind tallies, and a category-weighted productivity
/// score. No network call, no randomness.
pub fn local_summary(batches: &[Batch], app_usage: &HashMap<String, u32>) -> LocalSummary {
    let total_ai_events: usize = batches.iter().map(|b| b.ai_events.len()).sum();
    let text_events = count_kind(batches, |k| matches!(k, AiEventKind::TextInput(_)));
    let click_events = count_kind(batches, |k| matches!(k, AiEventKind::Click(_)));
    let page_views = count_kind(batches, |k| matches!(k, AiEventKind::PageView(_)));

    let top_app = app_usage
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(app, _)| app.clone());

    let productive_ticks: u32 = app_usage
        .iter()
        .filter(|(app, _)| {
            matches!(
                categorize_app(app),
                AppCategory::Development | AppCategory::Productivity | AppCategory::Design
            )
        })
        .map(|(_, count)| *count)
        .sum();
    let total_ticks: u32 = app_usage.values().sum();
    let productivity_score = if total_ticks == 0 {
        50
    } else {
        ((productive_ticks as f32 / total_ticks as f32) * 100.0).round() as u8
    };

    let summary_text = match &top_app {
        Some(app) => format!(
            "Spent most of this interval in {app}, with {text_events} text inputs, {click_events} clicks and {page_views} page views across {total_ai_events} tracked events."
        ),
        None => "No significant activity was captured this interval.".to_string(),
    };

    let mut insights = Vec::new();
    if click_events > text_events * 3 && text_events > 0 {
        insights.push("Mostly clicking rather than typing this interval.".to_string());
    }
    if page_views > 10 {
        insights.push("High browser tab/page-view churn.".to_string());
    }

    LocalSummary {
        summary_text,
        insights,
        productivity_score,
    }
}

fn count_kind(batches: &[Batch], predicate: impl Fn(&AiEventKind) -> bool) -> usize {
    batches
        .iter()
        .flat_map(|b| &b.ai_events)
        .filter(|e| predicate(&e.kind))
        .count()
}

/// Suggests a break when productivity is low and the interval has run long
/// enough that fatigue is a plausible explanation (spec §4.6).
pub fn break_recommendation(productivity_score: u8, batches: &[Batch]) -> Option<String> {
    let has_activity = batches.iter().any(|b| !b.ai_events.is_empty() || !b.raw_events.is_empty());
    if has_activity && productivity_score < 30 {
        Some("Productivity looks low this interval — consider a short break.".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchReason, EventContext, EventPayload, Layer, OptimizationSummary, Point, RawEvent};
    use chrono::Utc;
    use uuid::Uuid;

    fn batch_with_app(app: &str, count: usize) -> Batch {
        let now = Utc::now();
        let raw_events = (0..count)
            .map(|i| RawEvent {
                sequence: i as u64,
                timestamp: now,
                layer: Layer::OsInput,
                payload: EventPayload::MouseMove { cursor: Point { x: 0.0, y: 0.0 } },
                context: EventContext {
                    active_app: app.to_string(),
                    active_window: "win".into(),
                    active_url: None,
                },
            })
            .collect();
        Batch {
            batch_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            started_at: now,
            ended_at: now,
            reason: BatchReason::Interval,
            raw_events,
            ai_events: vec![],
            optimization_summary: OptimizationSummary::default(),
        }
    }

    #[test]
    fn tally_app_usage_counts_per_app() {
        let batches = vec![batch_with_app("Code", 3), batch_with_app("Code", 2), batch_with_app("Slack", 1)];
        let usage = tally_app_usage(&batches);
        assert_eq!(usage.get("Code"), Some(&5));
        assert_eq!(usage.get("Slack"), Some(&1));
    }

    #[test]
    fn local_summary_picks_dominant_app() {
        let batches = vec![batch_with_app("Code", 10)];
        let usage = tally_app_usage(&batches);
        let summary = local_summary(&batches, &usage);
        assert!(summary.summary_text.contains("Code"));
        assert!(summary.productivity_score > 50);
    }

    #[test]
    fn local_summary_handles_no_activity() {
        let summary = local_summary(&[], &HashMap::new());
        assert_eq!(summary.summary_text, "No significant activity was captured this interval.");
        assert_eq!(summary.productivity_score, 50);
    }

    #[test]
    fn break_recommendation_triggers_on_low_score_with_activity() {
        let batches = vec![batch_with_app("Slack", 1)];
        assert!(break_recommendation(10, &batches).is_some());
    }

    #[test]
    fn break_recommendation_none_when_no_activity() {
        assert!(break_recommendation(10, &[]).is_none());
    }
}
