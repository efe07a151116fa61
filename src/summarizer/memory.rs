//! Cosine-similarity search and trend analysis over past interval summaries
//! (spec §4.6, GLOSSARY: "memory").

use crate::model::IntervalSummary;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Ranks `candidates` by similarity to `query`, keeping only those at or
/// above `threshold`, and returns at most `top_k`.
pub fn top_k_similar<'a>(
    query: &[f32],
    candidates: &'a [IntervalSummary],
    top_k: usize,
    threshold: f32,
) -> Vec<&'a IntervalSummary> {
    let mut scored: Vec<(f32, &IntervalSummary)> = candidates
        .iter()
        .filter_map(|c| {
            c.embedding_vector
                .as_ref()
                .map(|v| (cosine_similarity(query, v), c))
        })
        .filter(|(score, _)| *score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(top_k).map(|(_, s)| s).collect()
}

/// A simple productivity trend over a run of summaries: whether the score
/// is rising, falling, or flat, plus the average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub average_score: f32,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

/// Analyzes a chronologically ordered slice of summaries (oldest first).
pub fn analyze_trend(summaries: &[IntervalSummary]) -> Option<Trend> {
    if summaries.is_empty() {
        return None;
    }
    let scores: Vec<f32> = summaries.iter().map(|s| s.productivity_score as f32).collect();
    let average_score = scores.iter().sum::<f32>() / scores.len() as f32;

    let direction = if scores.len() < 2 {
        TrendDirection::Flat
    } else {
        let mid = scores.len() / 2;
        let first_half_avg = scores[..mid].iter().sum::<f32>() / mid as f32;
        let second_half_avg = scores[mid..].iter().sum::<f32>() / (scores.len() - mid) as f32;
        let delta = second_half_avg - first_half_avg;
        if delta > 5.0 {
            TrendDirection::Rising
        } else if delta < -5.0 {
            TrendDirection::Falling
        } else {
            TrendDirection::Flat
        }
    };

    Some(Trend { average_score, direction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn summary(score: u8, embedding: Option<Vec<f32>>) -> IntervalSummary {
        IntervalSummary {
            interval_index: 0,
            session_id: Uuid::new_v4(),
            user_id: "u".into(),
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
            productivity_score: score,
            summary_text: String::new(),
            insights: vec![],
            break_recommendation: None,
            app_usage: HashMap::new(),
            embedding_vector: embedding,
            memory_type: crate::model::MemoryType::Interval,
            ai_generated: false,
        }
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn top_k_similar_filters_below_threshold() {
        let candidates = vec![
            summary(80, Some(vec![1.0, 0.0])),
            summary(60, Some(vec![0.0, 1.0])),
        ];
        let results = top_k_similar(&[1.0, 0.0], &candidates, 5, 0.5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].productivity_score, 80);
    }

    #[test]
    fn analyze_trend_detects_rising() {
        let summaries = vec![summary(40, None), summary(50, None), summary(80, None), summary(90, None)];
        let trend = analyze_trend(&summaries).unwrap();
        assert_eq!(trend.direction, TrendDirection::Rising);
    }

    #[test]
    fn analyze_trend_none_for_empty_input() {
        assert!(analyze_trend(&[]).is_none());
    }
}
