//! Application context: every service constructed once at startup and
//! passed by reference. No process-wide mutable state.

use std::sync::Arc;
use std::time::Duration;

use trace_core::capture::blocklist::BlocklistService;
use trace_core::capture::pipeline::{CapturePipeline, CaptureWorker};
use trace_core::capture::ports::{CaptureStore, FrameBlobStore, PlatformProbes};
use trace_core::chat::answer::AnswerSynthesizer;
use trace_core::chat::router::{ChatEngine, ChatLimits};
use trace_core::evidence::aggregator::EvidenceAggregator;
use trace_core::jobs::backfill::BackfillDetector;
use trace_core::jobs::daily::DailyReviser;
use trace_core::notify::Notifier;
use trace_core::retrieval::aggregates::AggregatesLookup;
use trace_core::retrieval::graph::GraphExpander;
use trace_core::retrieval::hierarchical::HierarchicalSearcher;
use trace_core::retrieval::search::VectorSearcher;
use trace_core::services::ServiceRegistry;
use trace_core::storage::{
    AggregateStore, EdgeStore, EmbeddingIndex, EntityStore, EventStore, JobStore, NoteStore,
    ScreenshotStore, TextBufferStore,
};
use trace_core::summarize::entities::EntityExtractor;
use trace_core::summarize::ports::{Embedder, LanguageModel, NoteFiles};
use trace_core::summarize::summarizer::HourlySummarizer;
use trace_domain::config::TraceConfig;
use trace_domain::Result;
use trace_infra::blobs::{FsNoteFiles, FsScreenshotBlobs};
use trace_infra::database::{
    DbManager, SqliteAggregateRepository, SqliteBlocklistRepository, SqliteCaptureStore,
    SqliteEdgeRepository, SqliteEntityRepository, SqliteEventRepository, SqliteJobRepository,
    SqliteNoteRepository, SqliteScreenshotRepository, SqliteTextBufferRepository,
    SqliteVectorIndex,
};
use trace_infra::export::TraceExporter;
use trace_infra::http::HttpClient;
use trace_infra::insights::{DashboardService, PatternDetector, WeeklyDigestService};
use trace_infra::llm::{OpenAIChatModel, OpenAIEmbedder};
use trace_infra::notifications::ChannelNotifier;
use trace_infra::platform::{DeadlineProbes, UnavailableProbes};
use trace_infra::scheduling::SummarizeQueue;
use trace_infra::tokens::TiktokenCounter;

/// Everything the IPC surface and the services need, wired once.
pub struct AppContext {
    pub config: TraceConfig,
    pub db: Arc<DbManager>,
    pub registry: Arc<ServiceRegistry>,
    pub notifier: Arc<dyn Notifier>,

    // Stores
    pub notes: Arc<dyn NoteStore>,
    pub events: Arc<dyn EventStore>,
    pub screenshots: Arc<dyn ScreenshotStore>,
    pub blobs: Arc<dyn FrameBlobStore>,

    // Services
    pub blocklist: Arc<BlocklistService>,
    pub summarizer: Arc<HourlySummarizer>,
    pub reviser: Arc<DailyReviser>,
    pub backfill: Arc<BackfillDetector>,
    pub queue: Arc<SummarizeQueue>,
    pub chat: Arc<ChatEngine>,
    pub searcher: Arc<VectorSearcher>,
    pub graph: Arc<GraphExpander>,
    pub exporter: Arc<TraceExporter>,
    pub dashboard: Arc<DashboardService>,
    pub digest: Arc<WeeklyDigestService>,
    pub patterns: Arc<PatternDetector>,

    // Capture
    pub probes: Arc<dyn PlatformProbes>,
    pub capture_store: Arc<dyn CaptureStore>,
}

impl AppContext {
    /// Build the full context from configuration. Runs migrations and seeds
    /// the default blocklist.
    pub fn initialize(config: TraceConfig) -> Result<Self> {
        let db = Arc::new(DbManager::new(config.db_path(), 8)?);
        db.run_migrations()?;

        let blocklist_repo = Arc::new(SqliteBlocklistRepository::new(Arc::clone(&db)));
        blocklist_repo.seed_defaults()?;

        let notes: Arc<dyn NoteStore> = Arc::new(SqliteNoteRepository::new(Arc::clone(&db)));
        let events: Arc<dyn EventStore> = Arc::new(SqliteEventRepository::new(Arc::clone(&db)));
        let screenshots: Arc<dyn ScreenshotStore> =
            Arc::new(SqliteScreenshotRepository::new(Arc::clone(&db)));
        let text_buffers: Arc<dyn TextBufferStore> =
            Arc::new(SqliteTextBufferRepository::new(Arc::clone(&db)));
        let entities: Arc<dyn EntityStore> =
            Arc::new(SqliteEntityRepository::new(Arc::clone(&db)));
        let edges: Arc<dyn EdgeStore> = Arc::new(SqliteEdgeRepository::new(Arc::clone(&db)));
        let aggregates_store: Arc<dyn AggregateStore> =
            Arc::new(SqliteAggregateRepository::new(Arc::clone(&db)));
        let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobRepository::new(Arc::clone(&db)));
        let index: Arc<dyn EmbeddingIndex> = Arc::new(SqliteVectorIndex::new(Arc::clone(&db)));

        let files: Arc<dyn NoteFiles> = Arc::new(FsNoteFiles::new(&config.data_dir));
        let blobs: Arc<dyn FrameBlobStore> = Arc::new(FsScreenshotBlobs::new(&config.data_dir));

        let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier::log_only());

        // LLM providers, present only when a credential exists.
        let (language_model, embedder): (
            Option<Arc<dyn LanguageModel>>,
            Option<Arc<dyn Embedder>>,
        ) = match &config.openai_api_key {
            Some(key) => {
                let http = HttpClient::builder()
                    .timeout(Duration::from_secs(120))
                    .max_attempts(1)
                    .build()?;
                (
                    Some(Arc::new(OpenAIChatModel::new(
                        key.clone(),
                        config.summarizer.model.clone(),
                        http.clone(),
                    ))),
                    Some(Arc::new(OpenAIEmbedder::new(
                        key.clone(),
                        config.summarizer.embedding_model.clone(),
                        http,
                    ))),
                )
            }
            None => {
                tracing::warn!("no OPENAI_API_KEY; summarization disabled, capture continues");
                (None, None)
            }
        };

        let evidence = EvidenceAggregator::new(
            Arc::clone(&events),
            Arc::clone(&screenshots),
            text_buffers,
            Arc::new(TiktokenCounter),
            config.summarizer.max_text_tokens,
            config.summarizer.max_snippet_tokens,
        );
        let extractor = EntityExtractor::new(Arc::clone(&entities), Arc::clone(&edges));

        let summarizer = Arc::new(HourlySummarizer::new(
            Arc::clone(&notes),
            Arc::clone(&screenshots),
            Arc::clone(&aggregates_store),
            Arc::clone(&index),
            jobs,
            Arc::clone(&files),
            evidence,
            extractor,
            language_model.clone(),
            embedder.clone(),
            config.summarizer.clone(),
        ));

        let reviser = Arc::new(DailyReviser::new(
            Arc::clone(&notes),
            Arc::clone(&aggregates_store),
            Arc::clone(&index),
            Arc::clone(&files),
            embedder.clone(),
        ));

        let backfill = Arc::new(BackfillDetector::new(
            Arc::clone(&notes),
            Arc::clone(&events),
            Arc::clone(&screenshots),
            config.scheduler.backfill_lookback_hours,
        ));

        let aggregates = Arc::new(AggregatesLookup::new(aggregates_store));
        let searcher = Arc::new(VectorSearcher::new(
            Arc::clone(&notes),
            Arc::clone(&entities),
            index,
            embedder.clone(),
        ));
        let hierarchical =
            Arc::new(HierarchicalSearcher::new(Arc::clone(&searcher), embedder.clone()));
        let graph = Arc::new(GraphExpander::new(
            Arc::clone(&entities),
            edges,
            Arc::clone(&notes),
        ));

        let chat = Arc::new(ChatEngine::new(
            Arc::clone(&aggregates),
            Arc::clone(&searcher),
            hierarchical,
            Arc::clone(&graph),
            AnswerSynthesizer::new(language_model),
            ChatLimits {
                max_days: config.retrieval.max_days,
                max_hours_per_day: config.retrieval.max_hours_per_day,
                max_context_notes: config.retrieval.max_context_notes,
                max_aggregates: 10,
            },
        ));

        let exporter = Arc::new(TraceExporter::new(Arc::clone(&db), &config.data_dir));
        let dashboard =
            Arc::new(DashboardService::new(Arc::clone(&aggregates), Arc::clone(&notes)));
        let digest = Arc::new(WeeklyDigestService::new(Arc::clone(&aggregates)));
        let patterns = Arc::new(PatternDetector::new(aggregates, Arc::clone(&notes)));

        let probes: Arc<dyn PlatformProbes> = Arc::new(DeadlineProbes::new(
            UnavailableProbes,
            Duration::from_millis(config.capture.probe_deadline_millis),
        ));
        let capture_store: Arc<dyn CaptureStore> =
            Arc::new(SqliteCaptureStore::new(Arc::clone(&db)));

        Ok(Self {
            registry: Arc::new(ServiceRegistry::new()),
            notifier,
            notes,
            events,
            screenshots,
            blobs,
            blocklist: Arc::new(BlocklistService::new(blocklist_repo)),
            summarizer,
            reviser,
            backfill,
            queue: Arc::new(SummarizeQueue::new()),
            chat,
            searcher,
            graph,
            exporter,
            dashboard,
            digest,
            patterns,
            probes,
            capture_store,
            config,
            db,
        })
    }

    /// Build a capture pipeline from the wired stores. Called once at
    /// startup and again on every capture restart.
    pub fn build_capture_pipeline(&self) -> CapturePipeline {
        CapturePipeline::new(
            Arc::clone(&self.probes),
            Arc::clone(&self.capture_store),
            Arc::clone(&self.blobs),
            Arc::clone(&self.blocklist),
            self.config.capture.clone(),
        )
    }

    /// Spawn a capture worker on a fresh pipeline.
    pub fn spawn_capture(&self) -> Result<CaptureWorker> {
        CaptureWorker::spawn(self.build_capture_pipeline())
    }
}
