//! CLI for the `ragfab-worker` binary.
//!
//! There's no HTTP route surface here — it is a worker/job-processing
//! binary consumed by an external caller (an admin UI, deployment tooling)
//! through its subcommands, rather than one fixed `main()` path. Uses clap
//! for argument parsing and owo-colors for colored terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// RAGFab worker: ingestion jobs, the feedback analyzer, schema migrations,
/// and a one-shot `ask` entry point for scripting/debugging.
#[derive(Parser, Debug)]
#[command(
    name = "ragfab-worker",
    author,
    version,
    about = "RAGFab - moteur RAG hybride optimisé pour le français",
    long_about = "Worker process for RAGFab: applies database migrations, \
                  runs the ingestion job queue, runs the thumbs-down feedback \
                  analyzer, and can answer a single question from the command \
                  line for debugging."
)]
pub struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply any pending database migrations and exit.
    Migrate,

    /// Run the ingestion job queue worker loop, polling for pending jobs
    /// until interrupted.
    ServeIngestion {
        /// Identifier recorded on claimed jobs, for observability.
        #[arg(long, default_value = "ragfab-worker")]
        worker_id: String,

        /// Seconds to wait between polls when the queue is empty.
        #[arg(long, default_value_t = 5)]
        poll_interval_secs: u64,
    },

    /// Run the thumbs-down feedback analyzer consumer loop until
    /// interrupted.
    ServeFeedback,

    /// Answer a single question against an existing conversation, printing
    /// the assistant message and cited sources (debugging entry point; an
    /// admin UI is the real caller of the orchestrator in production).
    Ask {
        /// Existing conversation id to append to.
        #[arg(long)]
        conversation_id: Uuid,

        /// User id the question is attributed to.
        #[arg(long)]
        user_id: Uuid,

        /// The question text.
        message: String,
    },
}
