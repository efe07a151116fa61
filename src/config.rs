//! Runtime configuration for every tunable named in the component designs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default values for every tunable, mirroring the teacher's `DEFAULT_*`
/// constant split.
pub mod defaults {
    pub const APP_FOCUS_POLL_MS: u64 = 250;
    pub const CLIPBOARD_POLL_MS: u64 = 500;
    pub const MOUSE_MOVE_THROTTLE_MS: u64 = 100;
    pub const BROWSER_POLL_MS: u64 = 500;

    pub const COALESCER_IDLE_MS: u64 = 2_000;
    pub const COALESCER_MAX_CHARS: usize = 2_000;

    pub const BATCH_INTERVAL_SECS: u64 = 60;
    pub const BATCH_MAX_RAW_EVENTS: usize = 5_000;
    pub const MAX_EVENTS_IN_MEMORY: usize = 20_000;

    pub const OPTIMIZER_TEXT_COALESCE_WINDOW_MS: u64 = 2_000;
    pub const OPTIMIZER_SNAPSHOT_SIMILARITY_THRESHOLD: f32 = 0.05;
    pub const OPTIMIZER_MAX_SCROLL_EVENTS_PER_MINUTE: u32 = 3;
    pub const OPTIMIZER_MIN_TIME_BETWEEN_SNAPSHOTS_MS: u64 = 30_000;

    pub const SUMMARY_INTERVAL_SECS: u64 = 15 * 60;
    pub const MAX_PENDING_SUMMARIES: usize = 8;
    pub const MEMORY_SEARCH_TOP_K: usize = 5;
    pub const SIMILARITY_THRESHOLD: f32 = 0.75;
    /// Span `analyze_trend` looks back over for `historical_trend` — three
    /// weekly averages (spec §6).
    pub const TREND_LOOKBACK_DAYS: u32 = 21;

    pub const RAW_EVENT_RETENTION_DAYS: u32 = 7;

    pub const ENRICHMENT_TIMEOUT_MS: u64 = 200;

    /// Flush-time grouping window for pairing `mouse_down`/`mouse_up` and OS/
    /// browser click events into one AI event (§4.4).
    pub const CLICK_PAIRING_WINDOW_MS: u64 = 5_000;
}

fn default_app_focus_poll_ms() -> u64 {
    defaults::APP_FOCUS_POLL_MS
}
fn default_clipboard_poll_ms() -> u64 {
    defaults::CLIPBOARD_POLL_MS
}
fn default_mouse_move_throttle_ms() -> u64 {
    defaults::MOUSE_MOVE_THROTTLE_MS
}
fn default_browser_poll_ms() -> u64 {
    defaults::BROWSER_POLL_MS
}
fn default_coalescer_idle_ms() -> u64 {
    defaults::COALESCER_IDLE_MS
}
fn default_coalescer_max_chars() -> usize {
    defaults::COALESCER_MAX_CHARS
}
fn default_batch_interval_secs() -> u64 {
    defaults::BATCH_INTERVAL_SECS
}
fn default_batch_max_raw_events() -> usize {
    defaults::BATCH_MAX_RAW_EVENTS
}
fn default_max_events_in_memory() -> usize {
    defaults::MAX_EVENTS_IN_MEMORY
}
fn default_optimizer_text_coalesce_window_ms() -> u64 {
    defaults::OPTIMIZER_TEXT_COALESCE_WINDOW_MS
}
fn default_optimizer_snapshot_similarity_threshold() -> f32 {
    defaults::OPTIMIZER_SNAPSHOT_SIMILARITY_THRESHOLD
}
fn default_optimizer_max_scroll_events_per_minute() -> u32 {
    defaults::OPTIMIZER_MAX_SCROLL_EVENTS_PER_MINUTE
}
fn default_optimizer_min_time_between_snapshots_ms() -> u64 {
    defaults::OPTIMIZER_MIN_TIME_BETWEEN_SNAPSHOTS_MS
}
fn default_summary_interval_secs() -> u64 {
    defaults::SUMMARY_INTERVAL_SECS
}
fn default_max_pending_summaries() -> usize {
    defaults::MAX_PENDING_SUMMARIES
}
fn default_memory_search_top_k() -> usize {
    defaults::MEMORY_SEARCH_TOP_K
}
fn default_similarity_threshold() -> f32 {
    defaults::SIMILARITY_THRESHOLD
}
fn default_trend_lookback_days() -> u32 {
    defaults::TREND_LOOKBACK_DAYS
}
fn default_raw_event_retention_days() -> u32 {
    defaults::RAW_EVENT_RETENTION_DAYS
}
fn default_enrichment_timeout_ms() -> u64 {
    defaults::ENRICHMENT_TIMEOUT_MS
}
fn default_click_pairing_window_ms() -> u64 {
    defaults::CLICK_PAIRING_WINDOW_MS
}
fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

/// Poll/throttle intervals for each C1 capture source (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_app_focus_poll_ms")]
    pub app_focus_poll_ms: u64,
    #[serde(default = "default_clipboard_poll_ms")]
    pub clipboard_poll_ms: u64,
    #[serde(default = "default_mouse_move_throttle_ms")]
    pub mouse_move_throttle_ms: u64,
    #[serde(default = "default_browser_poll_ms")]
    pub browser_poll_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            app_focus_poll_ms: defaults::APP_FOCUS_POLL_MS,
            clipboard_poll_ms: defaults::CLIPBOARD_POLL_MS,
            mouse_move_throttle_ms: defaults::MOUSE_MOVE_THROTTLE_MS,
            browser_poll_ms: defaults::BROWSER_POLL_MS,
        }
    }
}

/// Keystroke coalescer tunables (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoalescerConfig {
    #[serde(default = "default_coalescer_idle_ms")]
    pub idle_flush_ms: u64,
    #[serde(default = "default_coalescer_max_chars")]
    pub max_chars: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            idle_flush_ms: defaults::COALESCER_IDLE_MS,
            max_chars: defaults::COALESCER_MAX_CHARS,
        }
    }
}

/// Raw event buffer and batcher tunables (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferConfig {
    #[serde(default = "default_batch_interval_secs")]
    pub batch_interval_secs: u64,
    #[serde(default = "default_batch_max_raw_events")]
    pub batch_max_raw_events: usize,
    #[serde(default = "default_max_events_in_memory")]
    pub max_events_in_memory: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_interval_secs: defaults::BATCH_INTERVAL_SECS,
            batch_max_raw_events: defaults::BATCH_MAX_RAW_EVENTS,
            max_events_in_memory: defaults::MAX_EVENTS_IN_MEMORY,
        }
    }
}

/// Token optimizer thresholds (§4.5): one tunable per named reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Coalesce text inputs: merge window between adjacent same-`(app,
    /// window)` TextInputEvents.
    #[serde(default = "default_optimizer_text_coalesce_window_ms")]
    pub text_coalesce_window_ms: u64,
    /// Coalesce duplicate snapshots: max character-level preview diff
    /// fraction to still treat two snapshots as duplicates.
    #[serde(default = "default_optimizer_snapshot_similarity_threshold")]
    pub snapshot_similarity_threshold: f32,
    /// Throttle scroll events: cap on scroll-kind events per rolling minute.
    #[serde(default = "default_optimizer_max_scroll_events_per_minute")]
    pub max_scroll_events_per_minute: u32,
    /// Snapshot spacing: minimum gap enforced between retained snapshots.
    #[serde(default = "default_optimizer_min_time_between_snapshots_ms")]
    pub min_time_between_snapshots_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            text_coalesce_window_ms: defaults::OPTIMIZER_TEXT_COALESCE_WINDOW_MS,
            snapshot_similarity_threshold: defaults::OPTIMIZER_SNAPSHOT_SIMILARITY_THRESHOLD,
            max_scroll_events_per_minute: defaults::OPTIMIZER_MAX_SCROLL_EVENTS_PER_MINUTE,
            min_time_between_snapshots_ms: defaults::OPTIMIZER_MIN_TIME_BETWEEN_SNAPSHOTS_MS,
        }
    }
}

/// Interval summarizer and memory tunables (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizerConfig {
    #[serde(default = "default_summary_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_pending_summaries")]
    pub max_pending_summaries: usize,
    #[serde(default = "default_memory_search_top_k")]
    pub memory_search_top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_trend_lookback_days")]
    pub trend_lookback_days: u32,
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,
    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::SUMMARY_INTERVAL_SECS,
            max_pending_summaries: defaults::MAX_PENDING_SUMMARIES,
            memory_search_top_k: defaults::MEMORY_SEARCH_TOP_K,
            similarity_threshold: defaults::SIMILARITY_THRESHOLD,
            trend_lookback_days: defaults::TREND_LOOKBACK_DAYS,
            llm_endpoint: default_llm_endpoint(),
            embedding_endpoint: default_embedding_endpoint(),
        }
    }
}

/// Top-level configuration, assembled from one sub-config per component.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub coalescer: CoalescerConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default = "default_raw_event_retention_days")]
    pub raw_event_retention_days: u32,
    #[serde(default = "default_enrichment_timeout_ms")]
    pub enrichment_timeout_ms: u64,
    #[serde(default = "default_click_pairing_window_ms")]
    pub click_pairing_window_ms: u64,
}

impl Config {
    /// Loads configuration from `path` (or `<data_dir>/config.toml` if
    /// `path` is `None`). Missing file falls back to `Config::default()`,
    /// matching the teacher's loader behavior.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => match dirs::data_dir() {
                Some(d) => d.join("flowmeter-core").join("config.toml"),
                None => return Ok(Config::default()),
            },
        };

        match std::fs::read_to_string(&resolved) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| CoreError::Config(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

/// The four environment variables spec.md §6 names. Missing `llm_api_key`
/// disables C6 construction but leaves C1–C5 operating.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets {
    pub llm_api_key: Option<String>,
    pub embedding_api_key: Option<String>,
    pub persistence_url: Option<String>,
    pub persistence_key: Option<String>,
}

impl EnvSecrets {
    pub fn from_env() -> Self {
        Self {
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            persistence_url: std::env::var("PERSISTENCE_URL").ok(),
            persistence_key: std::env::var("PERSISTENCE_KEY").ok(),
        }
    }
}
