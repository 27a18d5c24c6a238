//! The hourly summarization orchestrator.
//!
//! Pipeline per hour: idempotency guard, evidence aggregation, triage and
//! keyframe selection, multimodal LLM call, schema validation with repair,
//! Markdown rendering, note persistence, entity/edge write-through,
//! embedding, and aggregate updates. Failures never leave a malformed note
//! behind; a failure marker is recorded for backfill instead.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use trace_common::{execute_with_retry, RetryConfig};
use trace_domain::config::SummarizerConfig;
use trace_domain::constants::MAX_KEYFRAMES_FOR_LLM;
use trace_domain::types::{
    Aggregate, AggregateKeyType, EmbeddingRecord, HourlySummary, Note, NoteType, PeriodType,
};
use trace_domain::utils::time::{floor_to_hour, hour_note_path};
use trace_domain::{Result, TraceError};
use uuid::Uuid;

use crate::evidence::aggregator::{EvidenceAggregator, HourlyEvidence};
use crate::storage::{
    AggregateStore, EmbeddingIndex, JobRecord, JobStore, NoteStore, ScreenshotStore,
};
use crate::triage::{
    HeuristicTriager, KeyframeSelector, ScreenshotCandidate, SelectedKeyframe,
};

use super::embedding_text::build_embedding_text;
use super::entities::EntityExtractor;
use super::ports::{ChatMessage, ChatRequest, Embedder, LanguageModel, NoteFiles};
use super::prompts::{build_user_message, system_prompt};
use super::render::MarkdownRenderer;
use super::schema::{empty_summary, validate_with_retry};

/// Result of summarizing one hour.
#[derive(Debug, Clone)]
pub struct SummarizeOutcome {
    pub note_id: String,
    /// False when the idempotency guard returned an existing note.
    pub created: bool,
    pub file_path: String,
    pub events_count: usize,
    pub screenshots_count: i64,
    pub keyframes_count: usize,
    pub entities_count: usize,
    pub embedding_computed: bool,
}

/// Orchestrates the complete hourly summarization pipeline.
pub struct HourlySummarizer {
    notes: Arc<dyn NoteStore>,
    screenshots: Arc<dyn ScreenshotStore>,
    aggregates: Arc<dyn AggregateStore>,
    embeddings: Arc<dyn EmbeddingIndex>,
    jobs: Arc<dyn JobStore>,
    files: Arc<dyn NoteFiles>,
    evidence: EvidenceAggregator,
    extractor: EntityExtractor,
    language_model: Option<Arc<dyn LanguageModel>>,
    embedder: Option<Arc<dyn Embedder>>,
    triager: HeuristicTriager,
    selector: KeyframeSelector,
    renderer: MarkdownRenderer,
    config: SummarizerConfig,
}

impl HourlySummarizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notes: Arc<dyn NoteStore>,
        screenshots: Arc<dyn ScreenshotStore>,
        aggregates: Arc<dyn AggregateStore>,
        embeddings: Arc<dyn EmbeddingIndex>,
        jobs: Arc<dyn JobStore>,
        files: Arc<dyn NoteFiles>,
        evidence: EvidenceAggregator,
        extractor: EntityExtractor,
        language_model: Option<Arc<dyn LanguageModel>>,
        embedder: Option<Arc<dyn Embedder>>,
        config: SummarizerConfig,
    ) -> Self {
        Self {
            notes,
            screenshots,
            aggregates,
            embeddings,
            jobs,
            files,
            evidence,
            extractor,
            language_model,
            embedder,
            triager: HeuristicTriager,
            selector: KeyframeSelector::default(),
            renderer: MarkdownRenderer,
            config,
        }
    }

    /// Generate the hourly note for the hour containing `hour_start`.
    ///
    /// Calling twice for the same hour returns the same note id unless
    /// `force` is set.
    pub async fn summarize_hour(
        &self,
        hour_start: NaiveDateTime,
        force: bool,
    ) -> Result<SummarizeOutcome> {
        let hour_start = floor_to_hour(hour_start);
        let hour_end = hour_start + Duration::hours(1);
        let file_path = hour_note_path(hour_start).to_string_lossy().into_owned();

        tracing::info!(hour = %hour_start, force, "starting hourly summarization");

        if !force {
            if let Some(existing) = self.notes.find_note_id(NoteType::Hour, hour_start).await? {
                tracing::info!(hour = %hour_start, note_id = %existing, "note already exists");
                return Ok(SummarizeOutcome {
                    note_id: existing,
                    created: false,
                    file_path,
                    events_count: 0,
                    screenshots_count: 0,
                    keyframes_count: 0,
                    entities_count: 0,
                    embedding_computed: false,
                });
            }
        }

        let evidence = self.evidence.aggregate(hour_start).await?;

        if evidence.total_events == 0 {
            tracing::info!(hour = %hour_start, "no activity, writing empty note");
            return self.persist_empty(hour_start, hour_end, &file_path).await;
        }

        let keyframes = self.select_keyframes(hour_start, hour_end).await?;
        let summary = match self.call_llm(&evidence, &keyframes).await {
            Ok(summary) => summary,
            Err(err) => {
                self.record_failure(hour_start, &err).await;
                return Err(err);
            }
        };

        let note_id = Uuid::new_v4().to_string();
        let location = evidence.locations.first().map(String::as_str);
        let markdown = self.renderer.render(
            &summary,
            &note_id,
            NoteType::Hour,
            hour_start,
            hour_end,
            location,
        );
        self.files.write_note(&file_path, &markdown).await?;
        self.insert_note_row(&note_id, hour_start, hour_end, &file_path, &summary).await?;

        let links = self
            .extractor
            .extract_and_store(&summary, &note_id, hour_start, hour_end)
            .await?;

        let embedding_computed = self.compute_embedding(&note_id, &summary, hour_start).await?;

        self.update_aggregates(&summary, &evidence, hour_start, hour_end).await?;

        tracing::info!(hour = %hour_start, note_id = %note_id, "summarization complete");

        Ok(SummarizeOutcome {
            note_id,
            created: true,
            file_path,
            events_count: evidence.total_events,
            screenshots_count: evidence.total_screenshots,
            keyframes_count: keyframes.len(),
            entities_count: links.len(),
            embedding_computed,
        })
    }

    async fn persist_empty(
        &self,
        hour_start: NaiveDateTime,
        hour_end: NaiveDateTime,
        file_path: &str,
    ) -> Result<SummarizeOutcome> {
        let note_id = Uuid::new_v4().to_string();
        let summary = empty_summary(hour_start, hour_end, "No activity detected");

        let markdown =
            self.renderer
                .render(&summary, &note_id, NoteType::Hour, hour_start, hour_end, None);
        self.files.write_note(file_path, &markdown).await?;
        self.insert_note_row(&note_id, hour_start, hour_end, file_path, &summary).await?;

        Ok(SummarizeOutcome {
            note_id,
            created: true,
            file_path: file_path.to_string(),
            events_count: 0,
            screenshots_count: 0,
            keyframes_count: 0,
            entities_count: 0,
            embedding_computed: false,
        })
    }

    async fn select_keyframes(
        &self,
        hour_start: NaiveDateTime,
        hour_end: NaiveDateTime,
    ) -> Result<Vec<SelectedKeyframe>> {
        let rows = self.screenshots.candidates_in_range(hour_start, hour_end).await?;

        let candidates: Vec<ScreenshotCandidate> = rows
            .into_iter()
            .map(|row| {
                let triage = self.config.heuristic_triage.then(|| {
                    self.triager.triage(
                        row.app_id.as_deref(),
                        row.window_title.as_deref(),
                        row.diff_score,
                    )
                });
                ScreenshotCandidate {
                    screenshot_id: row.screenshot_id,
                    path: row.path,
                    timestamp: row.ts,
                    monitor_id: row.monitor_id,
                    diff_score: row.diff_score,
                    app_id: row.app_id,
                    app_name: row.app_name,
                    window_title: row.window_title,
                    triage,
                }
            })
            .collect();

        let mut selected = self.selector.select(&candidates);
        selected.truncate(MAX_KEYFRAMES_FOR_LLM);
        Ok(selected)
    }

    async fn call_llm(
        &self,
        evidence: &HourlyEvidence,
        keyframes: &[SelectedKeyframe],
    ) -> Result<HourlySummary> {
        let model = self
            .language_model
            .as_ref()
            .ok_or_else(|| TraceError::Config("summarization disabled: no API credential".into()))?;

        let mut images: Vec<(usize, Vec<u8>)> = Vec::new();
        if self.config.include_images {
            for (index, keyframe) in keyframes.iter().enumerate() {
                match self.files.load_frame_jpeg(&keyframe.path).await {
                    Ok(jpeg) => images.push((index, jpeg)),
                    Err(err) => {
                        // Row without blob is tolerated; the frame simply
                        // drops out of the prompt.
                        tracing::warn!(path = %keyframe.path, error = %err, "keyframe blob unreadable");
                    }
                }
            }
        }

        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(system_prompt()),
                build_user_message(evidence, keyframes, &images),
            ],
            json_mode: true,
            max_tokens: 4096,
            temperature: None,
        };

        let outcome = execute_with_retry(
            &RetryConfig::llm(),
            "summarize_hour.llm",
            || model.complete(request.clone()),
            TraceError::is_transient,
        )
        .await
        .map_err(|err| err.into_source())?;

        validate_with_retry(&outcome.content, self.config.validation_retries.max(1))
    }

    async fn insert_note_row(
        &self,
        note_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        file_path: &str,
        summary: &HourlySummary,
    ) -> Result<()> {
        let now = chrono::Local::now().naive_local();
        let payload = serde_json::to_string(summary)
            .map_err(|e| TraceError::SchemaInvalid(format!("payload serialize: {e}")))?;

        self.notes
            .insert_note(&Note {
                note_id: note_id.to_string(),
                note_type: NoteType::Hour,
                start_ts: start,
                end_ts: end,
                file_path: file_path.to_string(),
                json_payload: payload,
                created_ts: now,
                updated_ts: now,
            })
            .await
    }

    async fn compute_embedding(
        &self,
        note_id: &str,
        summary: &HourlySummary,
        hour_start: NaiveDateTime,
    ) -> Result<bool> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(false);
        };

        let text = build_embedding_text(summary, Some(hour_start));
        let vector = execute_with_retry(
            &RetryConfig::api(),
            "summarize_hour.embed",
            || embedder.embed(&text),
            TraceError::is_transient,
        )
        .await
        .map_err(|err| err.into_source())?;

        self.embeddings
            .upsert(&EmbeddingRecord {
                embedding_id: Uuid::new_v4().to_string(),
                source_type: "note".to_string(),
                source_id: note_id.to_string(),
                vector,
                model_name: embedder.model_name().to_string(),
            })
            .await?;

        Ok(true)
    }

    async fn update_aggregates(
        &self,
        summary: &HourlySummary,
        evidence: &HourlyEvidence,
        hour_start: NaiveDateTime,
        hour_end: NaiveDateTime,
    ) -> Result<()> {
        for aggregate in hour_aggregates(summary, evidence, hour_start, hour_end) {
            self.aggregates.record(&aggregate).await?;
        }
        Ok(())
    }

    async fn record_failure(&self, hour_start: NaiveDateTime, err: &TraceError) {
        let marker = JobRecord {
            job_id: Uuid::new_v4().to_string(),
            job_type: "summarize_hour".to_string(),
            target_ts: hour_start,
            status: "failed".to_string(),
            error: Some(err.to_string()),
            created_ts: chrono::Local::now().naive_local(),
        };
        if let Err(record_err) = self.jobs.record_job(&marker).await {
            tracing::error!(error = %record_err, "failed to record summarization failure");
        }
    }
}

/// Build the hour's aggregate rows from the validated payload (categories,
/// apps, domains, topics, media) plus evidence-derived app durations when
/// the payload's activities carry no app names.
fn hour_aggregates(
    summary: &HourlySummary,
    evidence: &HourlyEvidence,
    hour_start: NaiveDateTime,
    hour_end: NaiveDateTime,
) -> Vec<Aggregate> {
    use std::collections::BTreeMap;

    let row = |key_type: AggregateKeyType, key: &str, value: f64| Aggregate {
        period_type: PeriodType::Hour,
        period_start_ts: hour_start,
        period_end_ts: hour_end,
        key_type,
        key: key.to_string(),
        value_num: value,
        extra_json: None,
    };

    let mut rows = Vec::new();

    // Category and app seconds from the activity timeline.
    let mut category_secs: BTreeMap<&str, i64> = BTreeMap::new();
    let mut app_secs: BTreeMap<&str, i64> = BTreeMap::new();
    for activity in &summary.activities {
        let secs = activity_seconds(hour_start, &activity.time_start, &activity.time_end);
        *category_secs.entry(activity.category.as_str()).or_insert(0) += secs;
        if let Some(app) = activity.app.as_deref() {
            *app_secs.entry(app).or_insert(0) += secs;
        }
    }

    for (category, secs) in category_secs {
        rows.push(row(AggregateKeyType::Category, category, secs as f64));
    }

    if app_secs.is_empty() {
        for (app, secs) in &evidence.app_durations {
            rows.push(row(AggregateKeyType::App, app, *secs as f64));
        }
    } else {
        for (app, secs) in app_secs {
            rows.push(row(AggregateKeyType::App, app, secs as f64));
        }
    }

    for site in &summary.websites {
        rows.push(row(AggregateKeyType::Domain, &site.domain, 1.0));
    }

    for topic in &summary.topics {
        rows.push(row(AggregateKeyType::Topic, &topic.name, 1.0));
    }

    for item in &summary.media.listening {
        let secs = item.duration_seconds.unwrap_or(0) as f64;
        rows.push(row(AggregateKeyType::Artist, &item.artist, secs));
        let track_key = format!("{} - {}", item.artist, item.track);
        rows.push(row(AggregateKeyType::Track, &track_key, secs));
        rows.push(row(AggregateKeyType::Media, &track_key, secs));
    }

    for item in &summary.media.watching {
        let secs = item.duration_seconds.unwrap_or(0) as f64;
        rows.push(row(AggregateKeyType::Media, &item.title, secs));
    }

    rows
}

/// Seconds between two `HH:MM` labels anchored on the hour's date; invalid
/// or inverted labels contribute nothing.
fn activity_seconds(hour_start: NaiveDateTime, time_start: &str, time_end: &str) -> i64 {
    let parse = |label: &str| -> Option<NaiveTime> {
        NaiveTime::parse_from_str(label.trim(), "%H:%M").ok()
    };

    match (parse(time_start), parse(time_end)) {
        (Some(start), Some(end)) => {
            let date = hour_start.date();
            let duration = date.and_time(end) - date.and_time(start);
            duration.num_seconds().max(0)
        }
        _ => 0,
    }
}
