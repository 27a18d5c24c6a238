//! Application configuration.
//!
//! Configuration layers, lowest precedence first: built-in defaults, an
//! optional TOML file, environment variables. The OpenAI credential is only
//! ever read from the environment; its absence disables summarization but
//! not capture.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::errors::{Result, TraceError};

/// Capture pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Tick period in milliseconds.
    pub tick_millis: u64,
    /// Hamming distance at or under which a frame is a duplicate.
    pub dedup_threshold: u32,
    /// JPEG quality for stored frames.
    pub jpeg_quality: u8,
    /// Minimum seconds between location probe fetches.
    pub location_interval_secs: u64,
    /// Per-probe deadline in milliseconds; a probe exceeding it reports
    /// unavailable for the tick.
    pub probe_deadline_millis: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_millis: constants::DEFAULT_TICK_MILLIS,
            dedup_threshold: constants::DEFAULT_DEDUP_THRESHOLD,
            jpeg_quality: constants::DEFAULT_JPEG_QUALITY,
            location_interval_secs: constants::DEFAULT_LOCATION_INTERVAL_SECS,
            probe_deadline_millis: 500,
        }
    }
}

/// Summarization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub model: String,
    pub triage_model: String,
    pub embedding_model: String,
    /// Total token budget for text evidence per hour.
    pub max_text_tokens: usize,
    /// Token cap per individual snippet.
    pub max_snippet_tokens: usize,
    pub max_keyframes: usize,
    /// Use the heuristic triager instead of the vision model.
    pub heuristic_triage: bool,
    /// Attach low-detail keyframe images to the LLM call.
    pub include_images: bool,
    /// Validation retries after repair.
    pub validation_retries: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini-2025-08-07".to_string(),
            triage_model: "gpt-5-nano-2025-08-07".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_text_tokens: constants::DEFAULT_MAX_TEXT_TOKENS,
            max_snippet_tokens: constants::DEFAULT_MAX_SNIPPET_TOKENS,
            max_keyframes: constants::DEFAULT_MAX_KEYFRAMES,
            heuristic_triage: true,
            include_images: true,
            validation_retries: 2,
        }
    }
}

/// Retrieval engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_days: usize,
    pub max_hours_per_day: usize,
    pub max_context_notes: usize,
    pub graph_hops: u32,
    pub min_edge_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_days: 5,
            max_hours_per_day: 3,
            max_context_notes: 10,
            graph_hops: 1,
            min_edge_weight: 0.3,
        }
    }
}

/// Scheduler and supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Local hour (0-23) at which the daily revision job runs.
    pub daily_hour: u32,
    /// Backfill lookback window in hours.
    pub backfill_lookback_hours: i64,
    /// Screenshot retention in days; older blobs are trimmed by the daily job.
    pub retention_days: i64,
    /// Parallelism of the summarization worker pool.
    pub summarize_parallelism: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_hour: 3,
            backfill_lookback_hours: constants::DEFAULT_BACKFILL_LOOKBACK_HOURS,
            retention_days: 30,
            summarize_parallelism: 1,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Data root; notes/, screenshots/ and db/ live underneath.
    pub data_dir: PathBuf,
    pub capture: CaptureConfig,
    pub summarizer: SummarizerConfig,
    pub retrieval: RetrievalConfig,
    pub scheduler: SchedulerConfig,
    /// OpenAI credential, populated from the environment only.
    #[serde(skip)]
    pub openai_api_key: Option<String>,
}

impl TraceConfig {
    /// Load configuration: defaults, then the TOML file at `path` (if it
    /// exists), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| TraceError::Config(format!("read {}: {e}", p.display())))?;
                toml::from_str(&raw)
                    .map_err(|e| TraceError::Config(format!("parse {}: {e}", p.display())))?
            }
            _ => Self::default(),
        };

        config.apply_env();

        if config.data_dir.as_os_str().is_empty() {
            config.data_dir = default_data_dir();
        }

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("TRACE_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => self.openai_api_key = Some(key),
            _ => self.openai_api_key = None,
        }
    }

    /// Whether summarization can run at all.
    pub fn summarization_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db").join("trace.sqlite")
    }

    /// Root of the notes tree.
    pub fn notes_dir(&self) -> PathBuf {
        self.data_dir.join("notes")
    }

    /// Root of the screenshot blob tree.
    pub fn screenshots_dir(&self) -> PathBuf {
        self.data_dir.join("screenshots")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME").map(|home| PathBuf::from(home).join("Trace")).unwrap_or_else(|_| {
        PathBuf::from(".").join("trace-data")
    })
}
