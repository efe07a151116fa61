//! Persistence contract (spec §6) plus a local SQLite-backed default
//! implementation and the append-only raw-event log.
//!
//! Grounded on the teacher's `clipboard_history` module as a whole:
//! `rusqlite` with WAL mode, a `Mutex<Connection>` guarding access, and a
//! background pruning thread, generalized from clipboard entries to
//! [`IntervalSummary`] rows and raw-event JSONL log rotation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::model::{IntervalSummary, RawEvent};
use crate::summarizer::memory;

/// The abstract row-store interface spec.md §6 names. `SqliteSink` is one
/// concrete implementor, not a replacement for the contract — a
/// Supabase-style remote store reachable via `PERSISTENCE_URL` is expected
/// to implement this same trait.
pub trait PersistenceSink: Send + Sync {
    fn insert_summary(&self, summary: &IntervalSummary) -> anyhow::Result<()>;
    /// Cosine-similarity search scoped to `user_id` (spec §6, §8 invariant
    /// 6: "results for user U never include rows of any other user").
    fn similarity_search(
        &self,
        query_vector: &[f32],
        user_id: &str,
        threshold: f32,
        top_k: usize,
    ) -> anyhow::Result<Vec<IntervalSummary>>;
    /// Recall by recurring time-of-day context: summaries for `user_id`
    /// started at `hour` on `day_of_week` (0 = Sunday) within the last
    /// `days_back` days (spec §6).
    fn find_by_time_context(
        &self,
        user_id: &str,
        hour: u32,
        day_of_week: u32,
        days_back: u32,
    ) -> anyhow::Result<Vec<IntervalSummary>>;
    /// Historical productivity trend for `user_id` over the last
    /// `days_back` days (spec §6).
    fn analyze_trend(&self, user_id: &str, days_back: u32) -> anyhow::Result<Option<memory::Trend>>;
    /// Every summary recorded for one session, in interval order. Used by
    /// `export_session` (spec §6) to recall a not-currently-running
    /// session's summaries; not itself a spec §6 time-context or trend
    /// operation.
    fn find_by_session(&self, session_id: uuid::Uuid) -> anyhow::Result<Vec<IntervalSummary>>;
}

/// Local SQLite-backed implementation used for development, testing, and
/// standalone CLI use without a remote backend.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS interval_summaries (
                interval_index INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                productivity_score INTEGER NOT NULL,
                summary_text TEXT NOT NULL,
                insights TEXT NOT NULL,
                break_recommendation TEXT,
                app_usage TEXT NOT NULL,
                embedding_vector TEXT,
                memory_type TEXT NOT NULL,
                ai_generated INTEGER NOT NULL,
                PRIMARY KEY (session_id, interval_index)
            )",
            [],
        )?;
        info!(path = %path.display(), "opened local persistence sink");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS interval_summaries (
                interval_index INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                productivity_score INTEGER NOT NULL,
                summary_text TEXT NOT NULL,
                insights TEXT NOT NULL,
                break_recommendation TEXT,
                app_usage TEXT NOT NULL,
                embedding_vector TEXT,
                memory_type TEXT NOT NULL,
                ai_generated INTEGER NOT NULL,
                PRIMARY KEY (session_id, interval_index)
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<IntervalSummary> {
        let insights_json: String = row.get("insights")?;
        let app_usage_json: String = row.get("app_usage")?;
        let embedding_json: Option<String> = row.get("embedding_vector")?;
        let memory_type_json: String = row.get("memory_type")?;
        let session_id: String = row.get("session_id")?;

        Ok(IntervalSummary {
            interval_index: row.get("interval_index")?,
            session_id: uuid::Uuid::parse_str(&session_id).unwrap_or_default(),
            user_id: row.get("user_id")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            productivity_score: row.get("productivity_score")?,
            summary_text: row.get("summary_text")?,
            insights: serde_json::from_str(&insights_json).unwrap_or_default(),
            break_recommendation: row.get("break_recommendation")?,
            app_usage: serde_json::from_str(&app_usage_json).unwrap_or_default(),
            embedding_vector: embedding_json.and_then(|s| serde_json::from_str(&s).ok()),
            memory_type: serde_json::from_str(&memory_type_json).unwrap_or(crate::model::MemoryType::Interval),
            ai_generated: row.get::<_, i64>("ai_generated")? != 0,
        })
    }
}

impl PersistenceSink for SqliteSink {
    fn insert_summary(&self, summary: &IntervalSummary) -> anyhow::Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        conn.execute(
            "INSERT OR REPLACE INTO interval_summaries
                (interval_index, session_id, user_id, started_at, ended_at, productivity_score,
                 summary_text, insights, break_recommendation, app_usage, embedding_vector,
                 memory_type, ai_generated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                summary.interval_index,
                summary.session_id.to_string(),
                summary.user_id,
                summary.started_at,
                summary.ended_at,
                summary.productivity_score,
                summary.summary_text,
                serde_json::to_string(&summary.insights)?,
                summary.break_recommendation,
                serde_json::to_string(&summary.app_usage)?,
                summary.embedding_vector.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&summary.memory_type)?,
                summary.ai_generated as i64,
            ],
        )?;
        Ok(())
    }

    fn similarity_search(
        &self,
        query_vector: &[f32],
        user_id: &str,
        threshold: f32,
        top_k: usize,
    ) -> anyhow::Result<Vec<IntervalSummary>> {
        let candidates = self.all_for_user(user_id)?;
        let matches = memory::top_k_similar(query_vector, &candidates, top_k, threshold);
        Ok(matches.into_iter().cloned().collect())
    }

    fn find_by_time_context(
        &self,
        user_id: &str,
        hour: u32,
        day_of_week: u32,
        days_back: u32,
    ) -> anyhow::Result<Vec<IntervalSummary>> {
        let cutoff = Utc::now() - chrono::Duration::days(days_back as i64);
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(
            "SELECT * FROM interval_summaries
                WHERE user_id = ?1
                  AND CAST(strftime('%H', started_at) AS INTEGER) = ?2
                  AND CAST(strftime('%w', started_at) AS INTEGER) = ?3
                  AND started_at >= ?4
                ORDER BY started_at ASC",
        )?;
        let rows = stmt.query_map(params![user_id, hour, day_of_week, cutoff], Self::row_to_summary)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn analyze_trend(&self, user_id: &str, days_back: u32) -> anyhow::Result<Option<memory::Trend>> {
        let cutoff = Utc::now() - chrono::Duration::days(days_back as i64);
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(
            "SELECT * FROM interval_summaries
                WHERE user_id = ?1 AND started_at >= ?2
                ORDER BY interval_index ASC",
        )?;
        let rows = stmt.query_map(params![user_id, cutoff], Self::row_to_summary)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(memory::analyze_trend(&out))
    }

    fn find_by_session(&self, session_id: uuid::Uuid) -> anyhow::Result<Vec<IntervalSummary>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(
            "SELECT * FROM interval_summaries WHERE session_id = ?1 ORDER BY interval_index ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], Self::row_to_summary)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl SqliteSink {
    /// Every summary belonging to `user_id`, regardless of time — the
    /// candidate pool for similarity search (spec §8 invariant 6: never
    /// leak another user's rows into the result).
    fn all_for_user(&self, user_id: &str) -> anyhow::Result<Vec<IntervalSummary>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(
            "SELECT * FROM interval_summaries WHERE user_id = ?1 ORDER BY started_at ASC",
        )?;
        let rows = stmt.query_map(params![user_id], Self::row_to_summary)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Append-only raw-event JSONL log with a background pruning thread that
/// deletes files older than `retention_days` (spec §6/§9 open question:
/// local retention defaults to 7 days).
pub struct RawEventLog {
    log_dir: PathBuf,
    running: Arc<AtomicBool>,
    prune_handle: Option<JoinHandle<()>>,
}

impl RawEventLog {
    pub fn open(log_dir: PathBuf, retention_days: u32) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&log_dir)?;
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);
        let prune_dir = log_dir.clone();

        let prune_handle = thread::Builder::new()
            .name("raw-event-log-prune".into())
            .spawn(move || {
                while running_thread.load(Ordering::SeqCst) {
                    if let Err(e) = prune_old_files(&prune_dir, retention_days) {
                        warn!(error = %e, "raw event log pruning failed");
                    }
                    thread::sleep(Duration::from_secs(3_600));
                }
            })
            .ok();

        Ok(Self {
            log_dir,
            running,
            prune_handle,
        })
    }

    /// Appends one raw event as a JSON line to today's log file.
    pub fn append(&self, event: &RawEvent) -> anyhow::Result<()> {
        let file_name = format!("raw-events-{}.jsonl", event.timestamp.format("%Y-%m-%d"));
        let path = self.log_dir.join(file_name);
        let line = serde_json::to_string(event)?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.prune_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RawEventLog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn prune_old_files(log_dir: &Path, retention_days: u32) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(date_str) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("raw-events-"))
        else {
            continue;
        };
        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            let file_date = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
            if file_date < cutoff {
                debug!(path = %path.display(), "pruning expired raw event log");
                let _ = std::fs::remove_file(&path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use std::collections::HashMap;

    fn summary_for(user_id: &str, idx: u32, session_id: uuid::Uuid, score: u8, embedding: Option<Vec<f32>>) -> IntervalSummary {
        IntervalSummary {
            interval_index: idx,
            session_id,
            user_id: user_id.into(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            productivity_score: score,
            summary_text: "text".into(),
            insights: vec!["insight".into()],
            break_recommendation: None,
            app_usage: HashMap::from([("Code".to_string(), 5)]),
            embedding_vector: embedding,
            memory_type: crate::model::MemoryType::Interval,
            ai_generated: true,
        }
    }

    fn summary(idx: u32, session_id: uuid::Uuid, score: u8, embedding: Option<Vec<f32>>) -> IntervalSummary {
        summary_for("u", idx, session_id, score, embedding)
    }

    #[test]
    fn insert_and_find_round_trips() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let session_id = uuid::Uuid::new_v4();
        sink.insert_summary(&summary(1, session_id, 70, None)).unwrap();
        let now = Utc::now();
        let found = sink
            .find_by_time_context("u", now.hour(), now.weekday().num_days_from_sunday(), 7)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].productivity_score, 70);
        assert_eq!(found[0].app_usage.get("Code"), Some(&5));
    }

    #[test]
    fn find_by_time_context_excludes_other_users() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.insert_summary(&summary_for("alice", 1, uuid::Uuid::new_v4(), 70, None)).unwrap();
        sink.insert_summary(&summary_for("bob", 1, uuid::Uuid::new_v4(), 70, None)).unwrap();
        let now = Utc::now();
        let found = sink
            .find_by_time_context("alice", now.hour(), now.weekday().num_days_from_sunday(), 7)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "alice");
    }

    #[test]
    fn similarity_search_respects_threshold() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let session_id = uuid::Uuid::new_v4();
        sink.insert_summary(&summary(1, session_id, 70, Some(vec![1.0, 0.0]))).unwrap();
        sink.insert_summary(&summary(2, session_id, 50, Some(vec![0.0, 1.0]))).unwrap();
        let results = sink.similarity_search(&[1.0, 0.0], "u", 0.9, 5).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn similarity_search_never_returns_another_users_rows() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.insert_summary(&summary_for("alice", 1, uuid::Uuid::new_v4(), 70, Some(vec![1.0, 0.0]))).unwrap();
        sink.insert_summary(&summary_for("bob", 1, uuid::Uuid::new_v4(), 70, Some(vec![1.0, 0.0]))).unwrap();
        let results = sink.similarity_search(&[1.0, 0.0], "alice", 0.0, 5).unwrap();
        assert!(results.iter().all(|s| s.user_id == "alice"));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn analyze_trend_reads_session_history_in_order() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let session_id = uuid::Uuid::new_v4();
        sink.insert_summary(&summary(1, session_id, 40, None)).unwrap();
        sink.insert_summary(&summary(2, session_id, 90, None)).unwrap();
        let trend = sink.analyze_trend("u", 30).unwrap().unwrap();
        assert_eq!(trend.direction, memory::TrendDirection::Rising);
    }

    #[test]
    fn raw_event_log_append_creates_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = RawEventLog::open(dir.path().to_path_buf(), 7).unwrap();
        let event = RawEvent {
            sequence: 1,
            timestamp: Utc::now(),
            layer: crate::model::Layer::OsInput,
            payload: crate::model::EventPayload::MouseMove {
                cursor: crate::model::Point { x: 0.0, y: 0.0 },
            },
            context: crate::model::EventContext::default(),
        };
        log.append(&event).unwrap();
        let file_name = format!("raw-events-{}.jsonl", event.timestamp.format("%Y-%m-%d"));
        assert!(dir.path().join(file_name).exists());
    }
}
