//! Composition root
//!
//! Builds every component from configuration, wires the queues to their
//! workers through the notification bridge, and runs until the shutdown
//! token fires. Startup initialises the database before any worker spawns.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::commands::{AdminContext, AdminRegistry, CommandDispatcher};
use crate::config::Config;
use crate::database::Database;
use crate::embedding::{EmbeddingProvider, HttpEmbeddingProvider, ResilientEmbeddingClient};
use crate::error::Result;
use crate::indexing::{
    ContextEmbeddingHandler, EmbeddingHandler, IndexingMetrics, IndexingOrchestrator,
    MessageEmbeddingHandler, QuestionGenerationHandler,
};
use crate::ingest::IngestPipeline;
use crate::llm::{LlmRouter, OpenAiProvider, PromptRegistry};
use crate::profile::{
    AliasService, FactExtractor, FactService, MemoryService, ProfileGenerator,
    RelationshipService,
};
use crate::queue::{
    self, run_worker, NotificationBridge, TypedQueue,
};
use crate::retrieval::{
    AnswerGenerator, ConfidencePolicy, ContextBuilder, DisabledReranker, HttpRerankProvider,
    HybridSearcher, IntentClassifier, RerankProvider, RetrievalEngine,
};
use crate::retrieval::fusion::QueryExpander;
use crate::store::{bans::BanService, chats::ChatRegistry, MessageStore};
use crate::transport::ChatTransport;
use crate::workers::{AskWorker, FactWorker, Schedules, SummaryWorker, TruthWorker, Watchdog};

pub struct Service {
    config: Config,
    db: Database,
    store: MessageStore,
    chats: ChatRegistry,
    bans: BanService,
    prompts: Arc<PromptRegistry>,
    router: Arc<LlmRouter>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn RerankProvider>,
    ask_queue: TypedQueue<queue::AskTask>,
    summary_queue: TypedQueue<queue::SummaryTask>,
    truth_queue: TypedQueue<queue::TruthTask>,
    message_queue: TypedQueue<queue::ProfileTask>,
    question_queue: TypedQueue<queue::QuestionGenTask>,
    ingest: IngestPipeline,
    indexing_metrics: Arc<IndexingMetrics>,
}

impl Service {
    /// Construct every component. No I/O happens here; `run` initialises
    /// the database first.
    pub fn build(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_url, config.max_connections)?;
        let pool = db.pool().clone();

        let store = MessageStore::new(pool.clone());
        let chats = ChatRegistry::new(pool.clone());
        let bans = BanService::new(pool.clone());
        let aliases = AliasService::new(pool.clone());
        let relationships = RelationshipService::new(pool.clone());

        let prompts = Arc::new(PromptRegistry::with_defaults());
        let router = Arc::new(LlmRouter::new(
            config
                .llm_providers
                .iter()
                .cloned()
                .map(|p| Arc::new(OpenAiProvider::new(p)) as Arc<dyn crate::llm::ChatProvider>)
                .collect(),
        ));

        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(ResilientEmbeddingClient::new(Arc::new(
                HttpEmbeddingProvider::new(
                    &config.embedding_base_url,
                    &config.embedding_api_key,
                    &config.embedding_model,
                    config.embedding_dim,
                ),
            )));

        let reranker: Arc<dyn RerankProvider> = if config.rerank_enabled {
            Arc::new(HttpRerankProvider::new(
                &config.rerank_base_url,
                &config.rerank_api_key,
                &config.rerank_model,
            ))
        } else {
            Arc::new(DisabledReranker)
        };

        let ask_queue = TypedQueue::new(pool.clone(), queue::ask_queue());
        let summary_queue = TypedQueue::new(pool.clone(), queue::summary_queue());
        let truth_queue = TypedQueue::new(pool.clone(), queue::truth_queue());
        let message_queue = TypedQueue::new(pool.clone(), queue::message_queue());
        let question_queue = TypedQueue::new(pool.clone(), queue::question_generation_queue());

        let ingest = IngestPipeline::new(
            store.clone(),
            chats.clone(),
            bans.clone(),
            aliases.clone(),
            relationships.clone(),
            message_queue.clone(),
            question_queue.clone(),
            config.min_embed_length,
        );

        Ok(Self {
            config,
            db,
            store,
            chats,
            bans,
            prompts,
            router,
            embedder,
            reranker,
            ask_queue,
            summary_queue,
            truth_queue,
            message_queue,
            question_queue,
            ingest,
            indexing_metrics: IndexingMetrics::shared(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Ingestion entry point for the transport layer.
    pub fn ingest(&self) -> &IngestPipeline {
        &self.ingest
    }

    /// Command dispatcher for the transport layer.
    pub fn dispatcher(&self, transport: Arc<dyn ChatTransport>) -> CommandDispatcher {
        let admin = AdminRegistry::new(AdminContext {
            db: self.db.clone(),
            queues: self.all_queue_services(),
            handlers: self.build_handlers(self.indexing_metrics.clone()),
            indexing_metrics: self.indexing_metrics.clone(),
            prompts: self.prompts.clone(),
            router: self.router.clone(),
            chats: self.chats.clone(),
        });

        CommandDispatcher::new(
            transport,
            self.bans.clone(),
            self.ask_queue.clone(),
            self.summary_queue.clone(),
            self.truth_queue.clone(),
            admin,
            self.config.admin_user_id,
            &self.config.admin_username,
            "https://t.me/chatwarden_bot?startgroup=true",
        )
    }

    fn all_queue_services(&self) -> Vec<queue::QueueService> {
        vec![
            self.ask_queue.service().clone(),
            self.summary_queue.service().clone(),
            self.truth_queue.service().clone(),
            self.message_queue.service().clone(),
            self.question_queue.service().clone(),
        ]
    }

    fn build_handlers(
        &self,
        metrics: Arc<IndexingMetrics>,
    ) -> Vec<Arc<dyn EmbeddingHandler>> {
        let pool = self.db.pool().clone();
        vec![
            Arc::new(MessageEmbeddingHandler::new(
                pool.clone(),
                self.store.clone(),
                self.embedder.clone(),
                metrics.clone(),
                self.config.min_embed_length,
            )),
            Arc::new(ContextEmbeddingHandler::new(
                pool.clone(),
                self.store.clone(),
                self.chats.clone(),
                self.embedder.clone(),
                metrics.clone(),
                self.config.context_window_size,
            )),
            Arc::new(QuestionGenerationHandler::new(
                pool,
                self.store.clone(),
                self.question_queue.clone(),
                self.embedder.clone(),
                self.router.clone(),
                self.prompts.clone(),
                metrics,
                self.config.questions_per_message,
            )),
        ]
    }

    fn build_engine(&self) -> RetrievalEngine {
        let pool = self.db.pool().clone();
        RetrievalEngine::new(
            HybridSearcher::new(pool.clone(), &self.config.fts_config),
            self.embedder.clone(),
            QueryExpander::new(self.router.clone(), self.prompts.clone()),
            IntentClassifier::new(self.router.clone(), self.prompts.clone()),
            self.reranker.clone(),
            AliasService::new(pool),
            ConfidencePolicy::default(),
        )
    }

    /// Run every worker until the shutdown token fires.
    pub async fn run(
        &self,
        transport: Arc<dyn ChatTransport>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        // Database first: extensions, tables and indexes must exist
        // before any worker touches them.
        self.db
            .initialize(self.config.embedding_dim, &self.config.fts_config)
            .await?;
        self.prompts.load_overrides(self.db.pool()).await?;

        let pool = self.db.pool().clone();
        let facts = FactService::new(pool.clone());
        let relationships = RelationshipService::new(pool.clone());
        let memory = MemoryService::new(pool.clone(), facts.clone(), relationships);

        // Notification bridge: one mailbox per worker-driven queue.
        let mut bridge = NotificationBridge::new(&self.config.database_url);
        let ask_mailbox = bridge.register(&self.ask_queue.service().config().channel());
        let summary_mailbox = bridge.register(&self.summary_queue.service().config().channel());
        let truth_mailbox = bridge.register(&self.truth_queue.service().config().channel());
        let message_mailbox = bridge.register(&self.message_queue.service().config().channel());

        let mut tasks = tokio::task::JoinSet::new();

        {
            let bridge_shutdown = shutdown.clone();
            tasks.spawn(async move { bridge.run(bridge_shutdown).await });
        }

        // Ask worker
        {
            let engine = Arc::new(self.build_engine());
            let context_builder = Arc::new(ContextBuilder::new(
                self.store.clone(),
                self.config.timezone_offset_hours,
            ));
            let generator = Arc::new(AnswerGenerator::new(
                self.router.clone(),
                self.prompts.clone(),
                memory.clone(),
            ));
            let worker = AskWorker::new(
                engine,
                context_builder,
                generator,
                transport.clone(),
                self.chats.clone(),
                &self.config.default_mode,
                &self.config.default_language,
                self.ask_queue.service().config().max_attempts,
            );
            let queue = self.ask_queue.clone();
            let token = shutdown.clone();
            tasks.spawn(async move { run_worker(queue, worker, ask_mailbox, token).await });
        }

        // Summary worker
        {
            let worker = SummaryWorker::new(
                self.store.clone(),
                self.chats.clone(),
                self.router.clone(),
                self.prompts.clone(),
                transport.clone(),
                &self.config.default_mode,
                &self.config.default_language,
            );
            let queue = self.summary_queue.clone();
            let token = shutdown.clone();
            tasks.spawn(async move { run_worker(queue, worker, summary_mailbox, token).await });
        }

        // Truth worker
        {
            let worker = TruthWorker::new(
                self.store.clone(),
                self.router.clone(),
                self.prompts.clone(),
                transport.clone(),
            );
            let queue = self.truth_queue.clone();
            let token = shutdown.clone();
            tasks.spawn(async move { run_worker(queue, worker, truth_mailbox, token).await });
        }

        // Fact extraction worker
        {
            let extractor = FactExtractor::new(
                facts.clone(),
                self.store.clone(),
                self.router.clone(),
                self.prompts.clone(),
                self.config.fact_request_delay,
            );
            let worker = FactWorker::new(
                self.message_queue.clone(),
                extractor,
                self.config.fact_batch_size,
            );
            let token = shutdown.clone();
            tasks.spawn(async move { worker.run(message_mailbox, token).await });
        }

        // Indexing orchestrator (drives the question queue itself)
        {
            let orchestrator = IndexingOrchestrator::new(
                self.build_handlers(self.indexing_metrics.clone()),
                self.indexing_metrics.clone(),
                &self.config,
            );
            let token = shutdown.clone();
            tasks.spawn(async move { orchestrator.run(token).await });
        }

        // Watchdog
        {
            let watchdog = Watchdog::new(self.db.clone(), self.all_queue_services());
            let token = shutdown.clone();
            tasks.spawn(async move { watchdog.run(token).await });
        }

        // Cron schedules
        let profile_generator = Arc::new(ProfileGenerator::new(
            pool,
            self.store.clone(),
            facts,
            self.router.clone(),
            self.prompts.clone(),
            self.config.profile_min_messages,
        ));
        let mut schedules = Schedules::start(
            self.chats.clone(),
            self.summary_queue.clone(),
            profile_generator,
            self.config.daily_summary_hour,
            self.config.nightly_profile_hour,
        )
        .await?;

        tracing::info!("Service running; waiting for shutdown signal");
        shutdown.cancelled().await;

        tracing::info!("Shutting down workers");
        if let Err(e) = schedules.stop().await {
            tracing::warn!("Scheduler shutdown failed: {e}");
        }
        while tasks.join_next().await.is_some() {}

        Ok(())
    }
}
