//! RAGFab worker binary.
//!
//! There is no HTTP route surface here — this is a job-processing/CLI
//! binary with four subcommands: `migrate`, `serve-ingestion`,
//! `serve-feedback`, `ask`. For library usage, import from the `ragfab`
//! crate instead.

use clap::Parser;
use ragfab::cli::{output::Output, Cli, Commands};
use ragfab::config::Config;
use ragfab::context::{ContextAssembler, RetrievalSettings};
use ragfab::db::repository::{ChunkRepository, ConversationRepository, QualityRepository, RatingRepository};
use ragfab::db::{connect, migrations};
use ragfab::embedding::EmbeddingClient;
use ragfab::feedback::FeedbackAnalyzer;
use ragfab::ingestion::IngestionPipeline;
use ragfab::llm::openai::OpenAiCompatClient;
use ragfab::llm::LLMClient;
use ragfab::orchestrator::{ConversationSettings, RagOrchestrator};
use ragfab::reranker::RerankerClient;
use ragfab::retrieval::RetrievalEngine;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Looked for relative to the running process; overridable for
/// deployments that lay the tree out differently.
const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let output = if cli.no_color { Output::no_color() } else { Output::new() };

    let config = Config::from_env()?;

    match cli.command {
        Commands::Migrate => run_migrate(&config, &output).await?,
        Commands::ServeIngestion { worker_id, poll_interval_secs } => {
            run_serve_ingestion(&config, &worker_id, poll_interval_secs, &output).await?
        }
        Commands::ServeFeedback => run_serve_feedback(&config, &output).await?,
        Commands::Ask { conversation_id, user_id, message } => {
            run_ask(&config, conversation_id, user_id, &message, &output).await?
        }
    }

    Ok(())
}

async fn run_migrate(config: &Config, output: &Output) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    let applied = migrations::run(&pool, Path::new(DEFAULT_MIGRATIONS_DIR)).await?;
    if applied.is_empty() {
        output.info("database already up to date");
    } else {
        for filename in &applied {
            output.success(&format!("applied {filename}"));
        }
    }
    Ok(())
}

async fn run_serve_ingestion(
    config: &Config,
    worker_id: &str,
    poll_interval_secs: u64,
    output: &Output,
) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    let pipeline = IngestionPipeline::new(pool, config);
    output.info(&format!("ingestion worker {worker_id} started"));

    loop {
        match pipeline.run_one(worker_id).await {
            Ok(Some(outcome)) => {
                output.success(&format!("job {} completed, {} chunks persisted", outcome.job_id, outcome.chunk_count));
            }
            Ok(None) => {
                tokio::time::sleep(Duration::from_secs(poll_interval_secs)).await;
            }
            Err(e) => {
                output.error(&format!("ingestion job failed: {e}"));
            }
        }
    }
}

async fn run_serve_feedback(config: &Config, output: &Output) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    let llm: Box<dyn LLMClient> =
        Box::new(OpenAiCompatClient::new(&config.llm_service_url, config.llm_api_key.as_deref(), config.llm_model.as_str()));

    let analyzer = FeedbackAnalyzer::new(
        RatingRepository::new(pool.clone()),
        ConversationRepository::new(pool.clone()),
        QualityRepository::new(pool),
        llm,
        config.llm_timeout,
        config.thumbs_down_confidence_threshold,
        3,
    );
    let _sender = analyzer.spawn();
    output.info("feedback analyzer running");

    // The sender half is normally held by the process that inserts ratings
    // (the admin UI's collaborator); this subcommand just keeps the
    // consumer task alive.
    std::future::pending::<()>().await;
    Ok(())
}

async fn run_ask(
    config: &Config,
    conversation_id: Uuid,
    user_id: Uuid,
    message: &str,
    output: &Output,
) -> anyhow::Result<()> {
    let pool = connect(config).await?;

    let conversations = ConversationRepository::new(pool.clone());
    let conversation_row = conversations.get(conversation_id).await?.ok_or_else(|| anyhow::anyhow!("conversation not found"))?;
    let active_universes: Vec<Uuid> = conversation_row.universe_id.into_iter().collect();

    let embedding = EmbeddingClient::new(config);
    let retrieval = RetrievalEngine::new(pool.clone());
    let reranker = RerankerClient::new(config);
    let chunks = ChunkRepository::new(pool);
    let context = ContextAssembler::new(reranker, chunks);
    let llm: Box<dyn LLMClient> =
        Box::new(OpenAiCompatClient::new(&config.llm_service_url, config.llm_api_key.as_deref(), config.llm_model.as_str()));

    let orchestrator = RagOrchestrator::new(conversations, embedding, retrieval, context, llm);

    let settings = ConversationSettings {
        tool_calling_enabled: config.llm_use_tools,
        hybrid_search_enabled: conversation_row.hybrid_enabled.unwrap_or(config.hybrid_search_enabled),
        alpha_override: conversation_row.alpha_override,
        retrieval: RetrievalSettings::from_config(config),
        retrieval_k: config.reranker_top_k as i64,
        history_window: config.conversation_history_window as i64,
        rag_timeout: config.rag_timeout,
        llm_model: config.llm_model.clone(),
        llm_timeout: config.llm_timeout,
    };

    // Cooperative cancellation: this subcommand is the one caller this
    // crate ships directly (an admin UI's HTTP layer is out of scope), so
    // Ctrl-C is the cancellation source. Dropping the `answer` future on
    // the Ctrl-C branch stops it at its current await point; nothing in the
    // orchestrator spawns a detached task, so no partial assistant message
    // is ever persisted past that point.
    let result = tokio::select! {
        result = orchestrator.answer(conversation_id, message, user_id, &active_universes, &settings) => result?,
        _ = tokio::signal::ctrl_c() => return Err(ragfab::EngineError::CancellationRequested.into()),
    };

    output.header("Réponse");
    println!("{}", result.assistant_message);
    if !result.sources.is_empty() {
        output.subheader("Sources");
        for source in &result.sources {
            output.list_item(&format!("chunk {} (document {})", source.chunk_id, source.document_id));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_migrations_dir_is_relative() {
        assert_eq!(DEFAULT_MIGRATIONS_DIR, "migrations");
    }
}
